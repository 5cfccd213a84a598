//! RecordingBackend - local Store と remote recorder の切り替え
//!
//! Lifecycle Operations は呼び出しごとに一度だけ backend を選び、あとは分岐しません。
//!
//! - `LocalBackend`: Store に直接 add / stop / delete / update する
//! - `RemoteBackend`: whole-home recorder の request shape に変換して委譲する

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, info};

use super::ledger::SubmissionLedger;
use crate::config::PvrConfig;
use crate::domain::{
    EpgEvent, Field, Filter, Frequency, JobId, JobRequest, JobSchedule, Padding, PvrError,
    RecordingMetadata, RemoteError, ServerId, ServiceId, Task, TaskKind, Value, check_repeat_days_array,
};
use crate::ports::{
    Clock, EntryUpdate, MarkerStore, RemoteRecorder, RemoteRecordingRequest, SchedulerStore,
    TaskUpdate,
};

/// Where an accepted request went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The Store accepted the add; completion arrives as `JobCompleted`.
    Local { job_id: JobId },
    /// Handed to a remote recorder; completion arrives as a `RemoteEvent`.
    Remote { server_id: ServerId },
}

impl Submission {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Submission::Local { job_id } => Some(*job_id),
            Submission::Remote { .. } => None,
        }
    }
}

/// What a cancel did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Scheduled-but-not-started: the job is gone.
    JobDeleted,
    /// Active or series: the task was stopped, the job stays.
    TaskStopped,
    Delegated,
}

/// An event or series request after validation.
#[derive(Debug, Clone)]
pub struct EventRequest {
    pub event: EpgEvent,
    pub metadata: RecordingMetadata,
    pub keep: bool,
}

#[async_trait]
pub trait RecordingBackend: Send + Sync {
    async fn request_event(&self, request: EventRequest) -> Result<Submission, PvrError>;

    async fn request_series(&self, request: EventRequest) -> Result<Submission, PvrError>;

    async fn cancel_task(&self, task: &Task) -> Result<CancelOutcome, PvrError>;

    async fn save_bookmark(&self, task: &Task, position_ms: u64) -> Result<(), PvrError>;

    async fn get_bookmark(&self, task: &Task) -> Result<u64, PvrError>;

    async fn set_keep(&self, task: &Task, keep: bool) -> Result<(), PvrError>;
}

// ========================================
// Local
// ========================================

pub struct LocalBackend {
    store: Arc<dyn SchedulerStore>,
    markers: Arc<dyn MarkerStore>,
    ledger: Arc<SubmissionLedger>,
    clock: Arc<dyn Clock>,
    config: PvrConfig,
}

impl LocalBackend {
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        markers: Arc<dyn MarkerStore>,
        ledger: Arc<SubmissionLedger>,
        clock: Arc<dyn Clock>,
        config: PvrConfig,
    ) -> Self {
        Self {
            store,
            markers,
            ledger,
            clock,
            config,
        }
    }

    /// Single or repeat recording by wall-clock time.
    ///
    /// An empty day mask after validation degrades to a single job.
    pub async fn request_time(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        frequency: Frequency,
        service_id: ServiceId,
        keep: bool,
        metadata: RecordingMetadata,
    ) -> Result<Submission, PvrError> {
        if end <= start {
            return Err(PvrError::InvalidRequest(format!(
                "time recording on {service_id} ends before it starts"
            )));
        }
        if service_id.as_str().is_empty() {
            return Err(PvrError::InvalidRequest(
                "time recording has no service id".to_string(),
            ));
        }

        let today = self.config.local_date(self.clock.now());
        let occurrence = self.config.local_date(start);
        let schedule = match frequency {
            Frequency::Once => None,
            other => check_repeat_days_array(other.day_mask(Some(occurrence), today)),
        }
        .map(|days| JobSchedule::Repeat {
            service_id: service_id.clone(),
            first_start: start,
            time_of_day: self.config.local_time(start).num_seconds_from_midnight(),
            duration_secs: u32::try_from((end - start).num_seconds()).unwrap_or(u32::MAX),
            days,
        })
        .unwrap_or_else(|| JobSchedule::Single {
            service_id: service_id.clone(),
            start,
            end,
        });

        let title = metadata
            .title
            .clone()
            .unwrap_or_else(|| format!("{service_id} {}", start.format("%Y-%m-%d %H:%M")));
        self.submit(self.job_request(schedule, &metadata, keep, title))
            .await
    }

    fn job_request(
        &self,
        schedule: JobSchedule,
        metadata: &RecordingMetadata,
        keep: bool,
        title: String,
    ) -> JobRequest {
        JobRequest {
            schedule,
            task_type: metadata.task_type(),
            padding: metadata.padding.unwrap_or(self.config.default_padding),
            keep,
            title,
            expiration: metadata.expiration,
            ui_folder: metadata.ui_folder.clone(),
        }
    }

    async fn submit(&self, request: JobRequest) -> Result<Submission, PvrError> {
        let job_type = request.job_type();
        let job_id = self.store.add_job(request).await?;
        // job-completed より先に印を付ける
        self.markers.mark(job_id).await;
        self.ledger.record(job_id);
        info!(job_id = %job_id, ?job_type, "job submitted to store");
        Ok(Submission::Local { job_id })
    }
}

#[async_trait]
impl RecordingBackend for LocalBackend {
    async fn request_event(&self, request: EventRequest) -> Result<Submission, PvrError> {
        let EventRequest {
            event,
            metadata,
            keep,
        } = request;
        let title = metadata.title.clone().unwrap_or(event.title);
        let schedule = JobSchedule::Event {
            event_id: event.event_id,
            service_id: event.service_id,
        };
        self.submit(self.job_request(schedule, &metadata, keep, title))
            .await
    }

    async fn request_series(&self, request: EventRequest) -> Result<Submission, PvrError> {
        let EventRequest {
            event,
            metadata,
            keep,
        } = request;
        let Some(series_id) = event.series_id else {
            return Err(PvrError::InvalidRequest(format!(
                "event {} is not part of a series",
                event.event_id
            )));
        };
        let filter = Filter::eq(Field::SeriesId, Value::text(&series_id))
            .and(Filter::eq(Field::ServiceId, Value::text(&event.service_id)))
            .and(Filter::ge(Field::StartTime, Value::Time(event.start_time)));
        let title = metadata
            .title
            .clone()
            .or(event.series_name)
            .unwrap_or(event.title);
        let schedule = JobSchedule::Series {
            event_id: event.event_id,
            service_id: event.service_id,
            series_id,
            filter,
        };
        self.submit(self.job_request(schedule, &metadata, keep, title))
            .await
    }

    async fn cancel_task(&self, task: &Task) -> Result<CancelOutcome, PvrError> {
        if task.is_booked() && !task.is_series() {
            self.store.delete_job(task.job_id).await?;
            debug!(task_id = %task.task_id, job_id = %task.job_id, "cancelled by deleting job");
            return Ok(CancelOutcome::JobDeleted);
        }
        if task.is_booked() || task.is_active() {
            self.store.stop_task(task.task_id).await?;
            debug!(task_id = %task.task_id, "cancelled by stopping task");
            return Ok(CancelOutcome::TaskStopped);
        }
        Err(PvrError::InvalidRequest(format!(
            "task {} is neither scheduled nor recording",
            task.task_id
        )))
    }

    async fn save_bookmark(&self, task: &Task, position_ms: u64) -> Result<(), PvrError> {
        self.store
            .update_entry(
                task.task_id,
                EntryUpdate {
                    bookmark_ms: Some(position_ms),
                    ..EntryUpdate::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn get_bookmark(&self, task: &Task) -> Result<u64, PvrError> {
        Ok(task.bookmark_ms)
    }

    /// Scheduler while the task is live, content entry once it reached FINAL.
    async fn set_keep(&self, task: &Task, keep: bool) -> Result<(), PvrError> {
        if task.object_state.is_live() {
            self.store
                .update_task(task.task_id, TaskUpdate { keep: Some(keep) })
                .await?;
        } else {
            self.store
                .update_entry(
                    task.task_id,
                    EntryUpdate {
                        keep: Some(keep),
                        ..EntryUpdate::default()
                    },
                )
                .await?;
        }
        Ok(())
    }
}

// ========================================
// Remote
// ========================================

/// Remote recorder bound to one server for the duration of a call.
pub struct RemoteBackend {
    remote: Arc<dyn RemoteRecorder>,
    server_id: ServerId,
    server_name: String,
    default_padding: Padding,
}

impl RemoteBackend {
    pub fn new(remote: Arc<dyn RemoteRecorder>, server_id: ServerId, server_name: String) -> Self {
        Self {
            remote,
            server_id,
            server_name,
            default_padding: Padding::default(),
        }
    }

    /// Padding used when the caller gives none.
    pub fn with_default_padding(mut self, padding: Padding) -> Self {
        self.default_padding = padding;
        self
    }

    fn translate(&self, request: EventRequest) -> RemoteRecordingRequest {
        let EventRequest {
            event,
            metadata,
            keep,
        } = request;
        RemoteRecordingRequest {
            title: metadata.title.clone().unwrap_or(event.title),
            event_id: event.event_id,
            series_id: event.series_id,
            service_id: event.service_id,
            start_time: event.start_time,
            end_time: event.end_time,
            padding: metadata.padding.unwrap_or(self.default_padding),
            keep,
        }
    }

    fn fail(&self, source: RemoteError) -> PvrError {
        PvrError::remote(self.server_name.clone(), source)
    }
}

#[async_trait]
impl RecordingBackend for RemoteBackend {
    async fn request_event(&self, request: EventRequest) -> Result<Submission, PvrError> {
        if request.metadata.task_type() != TaskKind::Recording {
            return Err(PvrError::Unsupported("reminders"));
        }
        let payload = self.translate(request);
        self.remote
            .request_event_recording(&self.server_id, payload)
            .await
            .map_err(|e| self.fail(e))?;
        info!(server = %self.server_name, "event recording delegated");
        Ok(Submission::Remote {
            server_id: self.server_id.clone(),
        })
    }

    async fn request_series(&self, request: EventRequest) -> Result<Submission, PvrError> {
        if request.event.series_id.is_none() {
            return Err(PvrError::InvalidRequest(format!(
                "event {} is not part of a series",
                request.event.event_id
            )));
        }
        let payload = self.translate(request);
        self.remote
            .request_series_recording(&self.server_id, payload)
            .await
            .map_err(|e| self.fail(e))?;
        info!(server = %self.server_name, "series recording delegated");
        Ok(Submission::Remote {
            server_id: self.server_id.clone(),
        })
    }

    async fn cancel_task(&self, task: &Task) -> Result<CancelOutcome, PvrError> {
        self.remote
            .delete_task(&self.server_id, task.task_id, task.event_id.clone())
            .await
            .map_err(|e| self.fail(e))?;
        Ok(CancelOutcome::Delegated)
    }

    async fn save_bookmark(&self, task: &Task, position_ms: u64) -> Result<(), PvrError> {
        self.remote
            .save_bookmark(&self.server_id, task.task_id, position_ms)
            .await
            .map_err(|e| self.fail(e))
    }

    async fn get_bookmark(&self, task: &Task) -> Result<u64, PvrError> {
        self.remote
            .get_bookmark(&self.server_id, task.task_id)
            .await
            .map_err(|e| self.fail(e))
    }

    async fn set_keep(&self, _task: &Task, _keep: bool) -> Result<(), PvrError> {
        Err(PvrError::Unsupported("protect/unprotect"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::fixtures::task;
    use crate::domain::{DayMask, JobType, ObjectState, Padding, UniqueEventId};
    use crate::impls::{InMemoryMarkers, InMemoryStore, ScriptedRemote};
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        // Monday
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn local() -> (Arc<InMemoryStore>, Arc<InMemoryMarkers>, LocalBackend) {
        let clock = Arc::new(FixedClock::new(now()));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let markers = Arc::new(InMemoryMarkers::new());
        let backend = LocalBackend::new(
            store.clone(),
            markers.clone(),
            Arc::new(SubmissionLedger::new()),
            clock,
            PvrConfig::default(),
        );
        (store, markers, backend)
    }

    fn event(series: Option<&str>) -> EpgEvent {
        EpgEvent {
            event_id: "ev-9".into(),
            unique_event_id: UniqueEventId::new("u-9"),
            service_id: "svc-1".into(),
            title: "Drama".to_string(),
            start_time: now() + chrono::Duration::hours(8),
            end_time: now() + chrono::Duration::hours(9),
            series_id: series.map(Into::into),
            season_id: None,
            series_name: series.map(|_| "Drama Series".to_string()),
        }
    }

    #[tokio::test]
    async fn event_request_applies_default_padding_and_marks_job() {
        let (store, markers, backend) = local();
        let submission = backend
            .request_event(EventRequest {
                event: event(None),
                metadata: RecordingMetadata::default(),
                keep: true,
            })
            .await
            .unwrap();
        let job_id = submission.job_id().unwrap();

        let job = store.job(job_id).unwrap();
        assert_eq!(job.job_type, JobType::Event);
        assert_eq!(job.padding, PvrConfig::default().default_padding);
        assert_eq!(job.title, "Drama");
        assert!(job.keep);
        assert!(markers.take(job_id).await);
    }

    #[tokio::test]
    async fn series_request_carries_scope_filter() {
        let (store, _, backend) = local();
        let ev = event(Some("S1"));
        let submission = backend
            .request_series(EventRequest {
                event: ev.clone(),
                metadata: RecordingMetadata {
                    padding: Some(Padding::new(0, 0)),
                    ..RecordingMetadata::default()
                },
                keep: false,
            })
            .await
            .unwrap();

        let job = store.job(submission.job_id().unwrap()).unwrap();
        let filter = job.query_filter.unwrap();
        assert_eq!(
            filter.to_string(),
            format!(
                "(seriesId = 'S1' AND serviceId = 'svc-1' AND startTime >= {})",
                ev.start_time.timestamp()
            )
        );
        assert_eq!(job.title, "Drama Series");
    }

    #[tokio::test]
    async fn series_request_without_series_is_rejected() {
        let (_, _, backend) = local();
        let err = backend
            .request_series(EventRequest {
                event: event(None),
                metadata: RecordingMetadata::default(),
                keep: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PvrError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn weekly_time_recording_uses_occurrence_weekday() {
        let (store, _, backend) = local();
        // Wednesday 2024-01-03 21:00
        let start = Utc.with_ymd_and_hms(2024, 1, 3, 21, 0, 0).unwrap();
        let submission = backend
            .request_time(
                start,
                start + chrono::Duration::minutes(30),
                Frequency::Weekly,
                "svc-2".into(),
                false,
                RecordingMetadata::titled("Quiz"),
            )
            .await
            .unwrap();

        let job = store.job(submission.job_id().unwrap()).unwrap();
        assert_eq!(job.job_type, JobType::Repeat);
        assert_eq!(
            job.repeat_days,
            Some(DayMask::new([false, false, true, false, false, false, false]))
        );
        assert_eq!(job.time_of_day, Some(21 * 3600));
    }

    #[tokio::test]
    async fn empty_custom_mask_degrades_to_single() {
        let (store, _, backend) = local();
        let start = now() + chrono::Duration::hours(1);
        let submission = backend
            .request_time(
                start,
                start + chrono::Duration::minutes(30),
                Frequency::Custom(DayMask::EMPTY),
                "svc-2".into(),
                false,
                RecordingMetadata::default(),
            )
            .await
            .unwrap();

        let job = store.job(submission.job_id().unwrap()).unwrap();
        assert_eq!(job.job_type, JobType::Single);
        assert!(job.repeat_days.is_none());
    }

    #[tokio::test]
    async fn inverted_time_window_is_invalid() {
        let (_, _, backend) = local();
        let err = backend
            .request_time(
                now(),
                now(),
                Frequency::Once,
                "svc-2".into(),
                false,
                RecordingMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PvrError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn keep_goes_to_scheduler_or_content_store() {
        let (store, _, backend) = local();
        let live = task(ObjectState::Booked, JobType::Event);
        let done = task(ObjectState::Final, JobType::Event);
        store.insert_task(live.clone());
        store.insert_task(done.clone());

        backend.set_keep(&live, true).await.unwrap();
        backend.set_keep(&done, true).await.unwrap();

        assert_eq!(store.scheduler_updates(), vec![live.task_id]);
        assert_eq!(store.entry_updates(), vec![done.task_id]);
    }

    #[tokio::test]
    async fn remote_protect_is_unsupported() {
        let remote = Arc::new(ScriptedRemote::new("living-room"));
        let backend = RemoteBackend::new(remote, "srv-2".into(), "Bedroom".to_string());
        let mut t = task(ObjectState::Final, JobType::Event);
        t.is_remote = true;
        let err = backend.set_keep(&t, true).await.unwrap_err();
        assert!(matches!(err, PvrError::Unsupported(_)));
    }

    #[tokio::test]
    async fn remote_request_gets_default_padding() {
        let remote = Arc::new(ScriptedRemote::new("living-room"));
        let padding = PvrConfig::default().default_padding;
        let backend = RemoteBackend::new(remote.clone(), "srv-2".into(), "Bedroom".to_string())
            .with_default_padding(padding);

        backend
            .request_event(EventRequest {
                event: event(None),
                metadata: RecordingMetadata::default(),
                keep: false,
            })
            .await
            .unwrap();
        let explicit = Padding::new(0, 5_000);
        backend
            .request_event(EventRequest {
                event: event(None),
                metadata: RecordingMetadata {
                    padding: Some(explicit),
                    ..RecordingMetadata::default()
                },
                keep: false,
            })
            .await
            .unwrap();

        let sent: Vec<Padding> = remote.requests().iter().map(|r| r.padding).collect();
        assert_eq!(sent, vec![padding, explicit]);
    }

    #[tokio::test]
    async fn remote_failure_names_server() {
        let remote = Arc::new(ScriptedRemote::new("living-room"));
        remote.fail_next("network unreachable");
        let backend = RemoteBackend::new(remote, "srv-2".into(), "Bedroom".to_string());
        let err = backend
            .request_event(EventRequest {
                event: event(None),
                metadata: RecordingMetadata::default(),
                keep: false,
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "remote recorder Bedroom: network unreachable"
        );
    }
}
