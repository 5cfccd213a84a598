//! Derived recording status (computed from a Task, never persisted).

use serde::{Deserialize, Serialize};

use super::task::{CompleteStatus, ObjectState, Task};

/// Status shown by UI/EPG code.
///
/// Variant order matters: `[Scheduled, ActiveInSeries]` is the
/// "scheduled or active" range other components rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingStatus {
    Unscheduled,
    Scheduled,
    ScheduledBySeries,
    Active,
    ActiveInSeries,
    Partial,
    Completed,
}

impl RecordingStatus {
    /// Closed range check `[Scheduled, ActiveInSeries]`.
    pub fn is_scheduled_or_active(self) -> bool {
        (RecordingStatus::Scheduled..=RecordingStatus::ActiveInSeries).contains(&self)
    }
}

/// Map a Task's persisted fields to its RecordingStatus.
///
/// Total: every combination lands on exactly one status, UNSCHEDULED by default.
pub fn status_of(task: &Task) -> RecordingStatus {
    let series = task.is_series();
    match task.object_state {
        ObjectState::Booked if series => RecordingStatus::ScheduledBySeries,
        ObjectState::Booked => RecordingStatus::Scheduled,
        ObjectState::Processing if series => RecordingStatus::ActiveInSeries,
        ObjectState::Processing => RecordingStatus::Active,
        ObjectState::SuspendProcessing
        | ObjectState::StopProcessing
        | ObjectState::Processed
        | ObjectState::Final => match task.complete_status {
            CompleteStatus::Partial => RecordingStatus::Partial,
            CompleteStatus::Full => RecordingStatus::Completed,
            CompleteStatus::Invalid | CompleteStatus::None => RecordingStatus::Unscheduled,
        },
        ObjectState::Error | ObjectState::Deleting | ObjectState::Deleted => {
            RecordingStatus::Unscheduled
        }
    }
}
