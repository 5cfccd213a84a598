//! Job record and the request payload submitted to the Store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::frequency::DayMask;
use super::ids::JobId;
use super::keys::{EventId, SeriesId, ServiceId};
use super::query::Filter;

/// Kind of scheduling request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Single,
    Repeat,
    Event,
    Series,
    Search,
}

/// What the Store does when a Task of the Job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Recording,
    Reminder,
    Reboot,
}

/// Pre/post padding in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    pub pre_ms: u64,
    pub post_ms: u64,
}

impl Padding {
    pub fn new(pre_ms: u64, post_ms: u64) -> Self {
        Self { pre_ms, post_ms }
    }
}

/// Presentation metadata supplied by the caller of a request.
///
/// Any field left `None` falls back to what the EPG event (or the config) says.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub title: Option<String>,
    pub padding: Option<Padding>,
    pub expiration: Option<DateTime<Utc>>,
    pub ui_folder: Option<String>,
    #[serde(default)]
    pub task_type: Option<TaskKind>,
}

impl RecordingMetadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn task_type(&self) -> TaskKind {
        self.task_type.unwrap_or(TaskKind::Recording)
    }
}

/// Schedule part of a job request; one variant per job shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSchedule {
    Event {
        event_id: EventId,
        service_id: ServiceId,
    },
    Series {
        event_id: EventId,
        service_id: ServiceId,
        series_id: SeriesId,
        /// Scope filter: same series, same service, not before the first episode.
        filter: Filter,
    },
    Single {
        service_id: ServiceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Repeat {
        service_id: ServiceId,
        first_start: DateTime<Utc>,
        /// Seconds since local midnight.
        time_of_day: u32,
        duration_secs: u32,
        days: DayMask,
    },
}

impl JobSchedule {
    pub fn job_type(&self) -> JobType {
        match self {
            JobSchedule::Event { .. } => JobType::Event,
            JobSchedule::Series { .. } => JobType::Series,
            JobSchedule::Single { .. } => JobType::Single,
            JobSchedule::Repeat { .. } => JobType::Repeat,
        }
    }

    pub fn service_id(&self) -> &ServiceId {
        match self {
            JobSchedule::Event { service_id, .. }
            | JobSchedule::Series { service_id, .. }
            | JobSchedule::Single { service_id, .. }
            | JobSchedule::Repeat { service_id, .. } => service_id,
        }
    }
}

/// Payload submitted to the Store's add-job operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub schedule: JobSchedule,
    pub task_type: TaskKind,
    pub padding: Padding,
    pub keep: bool,
    pub title: String,
    pub expiration: Option<DateTime<Utc>>,
    pub ui_folder: Option<String>,
}

impl JobRequest {
    pub fn job_type(&self) -> JobType {
        self.schedule.job_type()
    }
}

/// A scheduling request as persisted by the Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub job_type: JobType,
    pub task_type: TaskKind,
    pub padding: Padding,
    pub keep: bool,
    pub title: String,
    pub service_id: ServiceId,
    pub event_id: Option<EventId>,
    pub expiration: Option<DateTime<Utc>>,
    pub repeat_days: Option<DayMask>,
    pub time_of_day: Option<u32>,
    pub query_filter: Option<Filter>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Build the persisted record for an accepted request.
    pub fn from_request(job_id: JobId, request: &JobRequest, created_at: DateTime<Utc>) -> Self {
        let (event_id, repeat_days, time_of_day, query_filter) = match &request.schedule {
            JobSchedule::Event { event_id, .. } => (Some(event_id.clone()), None, None, None),
            JobSchedule::Series {
                event_id, filter, ..
            } => (Some(event_id.clone()), None, None, Some(filter.clone())),
            JobSchedule::Single { .. } => (None, None, None, None),
            JobSchedule::Repeat {
                days, time_of_day, ..
            } => (None, Some(*days), Some(*time_of_day), None),
        };
        Self {
            job_id,
            job_type: request.job_type(),
            task_type: request.task_type,
            padding: request.padding,
            keep: request.keep,
            title: request.title.clone(),
            service_id: request.schedule.service_id().clone(),
            event_id,
            expiration: request.expiration,
            repeat_days,
            time_of_day,
            query_filter,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    #[test]
    fn repeat_request_keeps_day_mask_and_time_of_day() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap();
        let request = JobRequest {
            schedule: JobSchedule::Repeat {
                service_id: ServiceId::new("svc"),
                first_start: start,
                time_of_day: 72_000,
                duration_secs: 1800,
                days: DayMask::DAILY,
            },
            task_type: TaskKind::Recording,
            padding: Padding::new(1000, 2000),
            keep: true,
            title: "Daily".to_string(),
            expiration: None,
            ui_folder: None,
        };

        let job = Job::from_request(JobId::from_ulid(Ulid::new()), &request, start);
        assert_eq!(job.job_type, JobType::Repeat);
        assert_eq!(job.repeat_days, Some(DayMask::DAILY));
        assert_eq!(job.time_of_day, Some(72_000));
        assert!(job.event_id.is_none());
    }

    #[test]
    fn metadata_defaults_to_recording() {
        assert_eq!(RecordingMetadata::default().task_type(), TaskKind::Recording);
    }
}
