//! StaticGuide - 開発用の固定 EPG

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{EpgEvent, EventId, SeriesId};
use crate::ports::EpgLookup;

#[derive(Debug, Default)]
pub struct StaticGuide {
    events: RwLock<BTreeMap<EventId, EpgEvent>>,
}

impl StaticGuide {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: impl IntoIterator<Item = EpgEvent>) -> Self {
        let guide = Self::new();
        for event in events {
            guide.insert(event);
        }
        guide
    }

    pub fn insert(&self, event: EpgEvent) {
        self.events.write().insert(event.event_id.clone(), event);
    }

    pub fn event(&self, event_id: &EventId) -> Option<EpgEvent> {
        self.events.read().get(event_id).cloned()
    }

    /// Episodes of a series, earliest first.
    pub fn episodes(&self, series_id: &SeriesId) -> Vec<EpgEvent> {
        let mut episodes: Vec<EpgEvent> = self
            .events
            .read()
            .values()
            .filter(|e| e.series_id.as_ref() == Some(series_id))
            .cloned()
            .collect();
        episodes.sort_by_key(|e| e.start_time);
        episodes
    }
}

#[async_trait]
impl EpgLookup for StaticGuide {
    async fn event_by_id(&self, event_id: &EventId) -> Option<EpgEvent> {
        self.event(event_id)
    }
}
