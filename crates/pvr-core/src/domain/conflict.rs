//! Conflict: an ephemeral set of Tasks competing for the same resources.

use serde::{Deserialize, Serialize};

use super::task::Task;

/// One group computed by the conflict strategy.
///
/// Not persisted; only lives as long as the notification that carries it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictGroup {
    pub tasks: Vec<Task>,
}

impl ConflictGroup {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
