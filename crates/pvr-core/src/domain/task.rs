//! Task record and the Store-owned object-state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId};
use super::job::{JobType, TaskKind};
use super::keys::{EventId, SeriesId, ServerId, ServiceId};

/// Object state of a Task, mutated exclusively by the Store.
///
/// State transitions:
/// - Booked -> Processing <-> SuspendProcessing -> StopProcessing -> Processed | Final
/// - any -> Error
/// - Processed | Final -> Deleting -> Deleted
///
/// The discriminants are ordered: callers filter with inequalities
/// (`state <= Processing`, `state < Error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ObjectState {
    Booked = 0,
    Processing = 1,
    SuspendProcessing = 2,
    StopProcessing = 3,
    Processed = 4,
    Final = 5,
    Error = 6,
    Deleting = 7,
    Deleted = 8,
}

impl ObjectState {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Still owned by the scheduler side (not yet rolled into the content store).
    pub fn is_live(self) -> bool {
        self < ObjectState::Final
    }

    /// Is the transition `self -> next` allowed by the state machine?
    pub fn can_transition_to(self, next: ObjectState) -> bool {
        use ObjectState::*;
        if next == Error {
            return self != Deleted;
        }
        matches!(
            (self, next),
            (Booked, Processing)
                | (Processing, SuspendProcessing)
                | (SuspendProcessing, Processing)
                | (Processing | SuspendProcessing, StopProcessing)
                | (StopProcessing, Processed | Final)
                | (Processed, Final)
                | (Processed | Final, Deleting)
                | (Deleting, Deleted)
        )
    }
}

/// How much of the recording ended up on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompleteStatus {
    Invalid,
    None,
    Partial,
    Full,
}

/// The scheduler's projection of how much of a booked Task can be recorded
/// given current resource demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Fulfillment {
    None,
    Partial,
    Full,
}

impl Fulfillment {
    /// NONE / PARTIAL が conflict 候補
    pub fn is_degraded(self) -> bool {
        matches!(self, Fulfillment::None | Fulfillment::Partial)
    }
}

/// Series linkage carried by a Task (and copied into Folder headers).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub series_id: Option<SeriesId>,
    pub season_id: Option<String>,
    pub series_name: Option<String>,
}

/// One concrete recording instance produced from a Job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub event_id: Option<EventId>,
    pub service_id: ServiceId,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub object_state: ObjectState,
    pub complete_status: CompleteStatus,
    pub fulfillment: Fulfillment,
    pub schedule_type: JobType,
    pub task_type: TaskKind,
    pub keep: bool,
    /// Playback position in milliseconds.
    pub bookmark_ms: u64,
    pub is_authorized: bool,
    #[serde(default)]
    pub series: SeriesInfo,
    pub ui_folder: Option<String>,
    /// Remote-origin record returned through the same API surface.
    #[serde(default)]
    pub is_remote: bool,
    pub server_id: Option<ServerId>,
}

impl Task {
    pub fn is_series(&self) -> bool {
        self.schedule_type == JobType::Series
    }

    pub fn is_active(&self) -> bool {
        self.object_state == ObjectState::Processing
    }

    pub fn is_booked(&self) -> bool {
        self.object_state == ObjectState::Booked
    }

    pub fn overlaps(&self, other: &Task) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    pub fn task(state: ObjectState, schedule_type: JobType) -> Task {
        timed_task(state, schedule_type, 0, 60)
    }

    /// 2024-01-01 20:00 UTC を基準に、`offset_min` 分後から `len_min` 分の Task を作る
    pub fn timed_task(
        state: ObjectState,
        schedule_type: JobType,
        offset_min: i64,
        len_min: i64,
    ) -> Task {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap();
        let start = base + chrono::Duration::minutes(offset_min);
        Task {
            task_id: TaskId::from_ulid(Ulid::new()),
            job_id: JobId::from_ulid(Ulid::new()),
            event_id: Some(EventId::new("ev-1")),
            service_id: ServiceId::new("svc-1"),
            title: "News".to_string(),
            start_time: start,
            end_time: start + chrono::Duration::minutes(len_min),
            object_state: state,
            complete_status: CompleteStatus::None,
            fulfillment: Fulfillment::Full,
            schedule_type,
            task_type: TaskKind::Recording,
            keep: false,
            bookmark_ms: 0,
            is_authorized: true,
            series: SeriesInfo::default(),
            ui_folder: None,
            is_remote: false,
            server_id: None,
        }
    }
}
