//! EpgLookup port - EPG metadata lookup service

use async_trait::async_trait;

use crate::domain::{EpgEvent, EventId};

#[async_trait]
pub trait EpgLookup: Send + Sync {
    /// `None` when the guide no longer knows the event.
    async fn event_by_id(&self, event_id: &EventId) -> Option<EpgEvent>;
}
