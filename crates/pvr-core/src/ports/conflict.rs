//! ConflictStrategy port - pluggable conflict-grouping policy
//!
//! core は呼ぶだけで、grouping の policy は実装しません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ConflictGroup, PvrError, Task};

#[async_trait]
pub trait ConflictStrategy: Send + Sync {
    /// Group degraded candidates into conflicts.
    async fn handle_conflicts_for_tasks(
        &self,
        tasks: Vec<Task>,
    ) -> Result<Vec<ConflictGroup>, PvrError>;

    /// Tasks competing for resources at `at`.
    async fn handle_conflicts_for_time(&self, at: DateTime<Utc>) -> Result<Vec<Task>, PvrError>;
}
