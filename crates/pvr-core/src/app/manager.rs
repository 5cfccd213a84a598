//! PvrManager - recording job / task lifecycle と conflict 解決の中心
//!
//! # 構成
//! - Store Query Layer (`StoreQueries`) と Recording Cache (`RecordingCache`)
//! - Conflict Orchestrator（job-completed / about-to-start / tasks-changed）
//! - Lifecycle Operations（`RecordingBackend` で local / remote を一度だけ選ぶ）
//! - Listener Registry（Store と remote のイベントを同じ `PvrEvent` に demultiplex）
//!
//! # 単一の論理スレッド
//! mutating API とイベント処理は `serial` で直列化します。add を発行してから
//! local marker を付け終えるまでに job-completed を処理してしまうことはありません。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::backend::{
    CancelOutcome, EventRequest, LocalBackend, RecordingBackend, RemoteBackend, Submission,
};
use super::cache::RecordingCache;
use super::ledger::SubmissionLedger;
use super::listeners::{ListenerRegistry, PvrListener};
use super::orchestrator::ConflictOrchestrator;
use super::queries::StoreQueries;
use crate::config::PvrConfig;
use crate::domain::{
    EpgEvent, EventId, FailureReason, Filter, Frequency, Job, JobId, Order, Origin, PvrError,
    PvrEvent, PvrEventKind, RecordingEntry, RecordingMetadata, RecordingStatus, RemoteError,
    RemoteEvent, SeriesId, ServerId, ServiceId, SortMode, StoreEvent, Task, TaskId, TaskKind,
    UniqueEventId, group_into_folders,
};
use crate::ports::{
    Clock, EpgLookup, MarkerStore, RemoteRecorder, RemoteServer, SchedulerStore,
};

/// Result of `delete_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The task was recording; it is removed once the Store acknowledges the stop.
    AwaitingStop,
    Delegated,
}

/// Work waiting for a `TaskStopAcknowledged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingRemoval {
    /// Remove the content entry, then the job if it was the last task.
    Task { job_id: JobId },
    /// Delete the whole job once its last active task has stopped.
    Job { job_id: JobId },
}

pub struct PvrManager {
    config: PvrConfig,
    store: Arc<dyn SchedulerStore>,
    remote: Option<Arc<dyn RemoteRecorder>>,
    markers: Arc<dyn MarkerStore>,
    clock: Arc<dyn Clock>,
    queries: StoreQueries,
    cache: RecordingCache,
    orchestrator: ConflictOrchestrator,
    ledger: Arc<SubmissionLedger>,
    local: Arc<LocalBackend>,
    listeners: ListenerRegistry,
    sort_mode: RwLock<SortMode>,
    pending: Mutex<HashMap<TaskId, PendingRemoval>>,
    serial: tokio::sync::Mutex<()>,
}

/// Collaborators handed over by the builder.
pub(crate) struct Ports {
    pub store: Arc<dyn SchedulerStore>,
    pub remote: Option<Arc<dyn RemoteRecorder>>,
    pub epg: Arc<dyn EpgLookup>,
    pub markers: Arc<dyn MarkerStore>,
    pub strategy: Arc<dyn crate::ports::ConflictStrategy>,
    pub clock: Arc<dyn Clock>,
}

impl PvrManager {
    pub(crate) fn new(ports: Ports, config: PvrConfig) -> Self {
        let Ports {
            store,
            remote,
            epg,
            markers,
            strategy,
            clock,
        } = ports;
        let queries = StoreQueries::new(Arc::clone(&store), config.page_size);
        let ledger = Arc::new(SubmissionLedger::new());
        let local = Arc::new(LocalBackend::new(
            Arc::clone(&store),
            Arc::clone(&markers),
            Arc::clone(&ledger),
            Arc::clone(&clock),
            config.clone(),
        ));
        Self {
            sort_mode: RwLock::new(config.sort_mode),
            cache: RecordingCache::new(queries.clone(), epg),
            orchestrator: ConflictOrchestrator::new(Arc::clone(&store), strategy),
            config,
            store,
            remote,
            markers,
            clock,
            queries,
            ledger,
            local,
            listeners: ListenerRegistry::new(),
            pending: Mutex::new(HashMap::new()),
            serial: tokio::sync::Mutex::new(()),
        }
    }

    /// Build the Recording Cache from the Store.
    pub async fn start(&self) {
        let _serial = self.serial.lock().await;
        self.cache.rebuild().await;
    }

    pub fn store(&self) -> &Arc<dyn SchedulerStore> {
        &self.store
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteRecorder>> {
        self.remote.as_ref()
    }

    pub fn config(&self) -> &PvrConfig {
        &self.config
    }

    // ========================================
    // Listener Registry
    // ========================================

    pub fn register_listener(&self, kind: PvrEventKind, listener: Arc<dyn PvrListener>) -> bool {
        self.listeners.register(kind, listener)
    }

    pub fn register_all(&self, listener: Arc<dyn PvrListener>) {
        self.listeners.register_all(listener);
    }

    pub fn unregister_listener(&self, kind: PvrEventKind, listener: &Arc<dyn PvrListener>) -> bool {
        self.listeners.unregister(kind, listener)
    }

    pub fn unregister_all(&self, listener: &Arc<dyn PvrListener>) {
        self.listeners.unregister_all(listener);
    }

    fn emit(&self, event: PvrEvent) {
        debug!(kind = ?event.kind(), "notify listeners");
        self.listeners.dispatch(&event);
    }

    // ========================================
    // Store Query Layer
    // ========================================

    pub fn queries(&self) -> &StoreQueries {
        &self.queries
    }

    pub async fn job_by_id(&self, job_id: JobId) -> Option<Job> {
        self.queries.job_by_id(job_id).await
    }

    pub async fn job_by_event(&self, event_id: &EventId) -> Option<Job> {
        self.queries.job_by_event(event_id).await
    }

    pub async fn job_by_service(&self, service_id: &ServiceId) -> Option<Job> {
        self.queries.job_by_service(service_id).await
    }

    pub async fn job_by_query(&self, filter: Filter, order: Order) -> Option<Job> {
        self.queries.job_by_query(filter, order).await
    }

    pub async fn task_by_id(&self, task_id: TaskId) -> Option<Task> {
        self.queries.task_by_id(task_id).await
    }

    pub async fn task_by_event(&self, event_id: &EventId) -> Option<Task> {
        self.queries.task_by_event(event_id).await
    }

    pub async fn task_by_service(&self, service_id: &ServiceId) -> Option<Task> {
        self.queries.task_by_service(service_id).await
    }

    pub async fn tasks_for_job(&self, job_id: JobId) -> Vec<Task> {
        self.queries.tasks_for_job(job_id).await
    }

    pub async fn count_tasks_by_query(&self, filter: Filter) -> usize {
        self.queries.count_tasks_by_query(filter).await
    }

    pub async fn all_recordings(&self, as_folders: bool) -> Vec<RecordingEntry> {
        entries(self.queries.all_recordings().await, as_folders)
    }

    pub async fn scheduled_recordings(&self) -> Vec<Task> {
        self.queries.scheduled_recordings().await
    }

    pub async fn active_recordings(&self) -> Vec<Task> {
        self.queries.active_recordings().await
    }

    pub async fn partial_recordings(&self) -> Vec<Task> {
        self.queries.partial_recordings().await
    }

    pub async fn timed_recordings(&self) -> Vec<Task> {
        self.queries.timed_recordings().await
    }

    /// Completed content in the current sort mode.
    pub async fn complete_recordings(&self, as_folders: bool) -> Vec<RecordingEntry> {
        let mut tasks = self.queries.complete_recordings().await;
        self.sort_mode().sort(&mut tasks);
        entries(tasks, as_folders)
    }

    pub async fn recordings_by_series(
        &self,
        series_id: &SeriesId,
        as_folders: bool,
    ) -> Vec<RecordingEntry> {
        entries(self.queries.recordings_by_series(series_id).await, as_folders)
    }

    pub async fn series_recordings_by_status(
        &self,
        statuses: &[RecordingStatus],
        as_folders: bool,
    ) -> Vec<RecordingEntry> {
        entries(
            self.queries.series_recordings_by_status(statuses).await,
            as_folders,
        )
    }

    pub fn sort_mode(&self) -> SortMode {
        *self.sort_mode.read()
    }

    pub fn set_sort_mode(&self, mode: SortMode) {
        *self.sort_mode.write() = mode;
    }

    // ========================================
    // Status
    // ========================================

    pub fn is_pvr_event_scheduled(&self, unique_event_id: &UniqueEventId) -> bool {
        self.cache.is_scheduled(unique_event_id)
    }

    pub fn recording_status(&self, unique_event_id: &UniqueEventId) -> RecordingStatus {
        self.cache.lookup(unique_event_id)
    }

    pub async fn recording_status_by_event(&self, event_id: &EventId) -> RecordingStatus {
        self.cache.status_by_event(event_id).await
    }

    /// Resynchronise the cache from the Store.
    pub async fn refresh_cache(&self) {
        let _serial = self.serial.lock().await;
        self.cache.rebuild().await;
    }

    // ========================================
    // Lifecycle Operations
    // ========================================

    pub async fn request_event_recording(
        &self,
        event: EpgEvent,
        metadata: RecordingMetadata,
        keep: bool,
    ) -> Result<Submission, PvrError> {
        event.validate().map_err(PvrError::InvalidRequest)?;
        let _serial = self.serial.lock().await;
        let backend = self.request_backend().await?;
        backend
            .request_event(EventRequest {
                event,
                metadata,
                keep,
            })
            .await
    }

    pub async fn request_series_recording(
        &self,
        event: EpgEvent,
        metadata: RecordingMetadata,
        keep: bool,
    ) -> Result<Submission, PvrError> {
        event.validate().map_err(PvrError::InvalidRequest)?;
        let _serial = self.serial.lock().await;
        let backend = self.request_backend().await?;
        backend
            .request_series(EventRequest {
                event,
                metadata,
                keep,
            })
            .await
    }

    /// Manual recording; always served by the local Store.
    pub async fn request_time_recording(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        frequency: Frequency,
        service_id: ServiceId,
        keep: bool,
        metadata: RecordingMetadata,
    ) -> Result<Submission, PvrError> {
        let _serial = self.serial.lock().await;
        self.local
            .request_time(start, end, frequency, service_id, keep, metadata)
            .await
    }

    pub async fn cancel_event_recording(&self, event_id: &EventId) -> Result<CancelOutcome, PvrError> {
        let _serial = self.serial.lock().await;
        let task = self
            .queries
            .task_by_event(event_id)
            .await
            .ok_or_else(|| PvrError::NotFound(format!("event {event_id}")))?;
        self.cancel_task(task).await
    }

    pub async fn cancel_manual_recording(
        &self,
        service_id: &ServiceId,
    ) -> Result<CancelOutcome, PvrError> {
        let _serial = self.serial.lock().await;
        let task = self
            .queries
            .task_by_service(service_id)
            .await
            .ok_or_else(|| PvrError::NotFound(format!("manual recording on {service_id}")))?;
        self.cancel_task(task).await
    }

    /// Booked single recording: delete the job. Active or series: stop the task.
    pub async fn cancel_recording_by_task(&self, task: &Task) -> Result<CancelOutcome, PvrError> {
        let _serial = self.serial.lock().await;
        self.cancel_task(task.clone()).await
    }

    /// Stop every active episode, delete the job, and drop any remote
    /// default-location schedule for the series.
    pub async fn cancel_series_recording(&self, job_id: JobId) -> Result<CancelOutcome, PvrError> {
        let _serial = self.serial.lock().await;
        self.cancel_series(job_id).await
    }

    pub async fn cancel_series_recording_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<CancelOutcome, PvrError> {
        let _serial = self.serial.lock().await;
        let task = self
            .queries
            .task_by_event(event_id)
            .await
            .ok_or_else(|| PvrError::NotFound(format!("event {event_id}")))?;
        if task.is_remote {
            let outcome = self.task_backend(&task).await?.cancel_task(&task).await?;
            if let Some(series_id) = task.series.series_id.as_ref() {
                self.delete_remote_schedule(series_id).await;
            }
            return Ok(outcome);
        }
        self.cancel_series(task.job_id).await
    }

    /// Remove a recording. An active task is stopped first and removed once the
    /// stop is acknowledged; the job goes with its last task.
    pub async fn delete_task(&self, task: &Task) -> Result<DeleteOutcome, PvrError> {
        let _serial = self.serial.lock().await;
        if task.is_remote {
            self.task_backend(task).await?.cancel_task(task).await?;
            return Ok(DeleteOutcome::Delegated);
        }
        let current = self
            .queries
            .task_by_id(task.task_id)
            .await
            .ok_or_else(|| PvrError::NotFound(format!("task {}", task.task_id)))?;
        if current.is_active() {
            self.store.stop_task(current.task_id).await?;
            self.pending.lock().insert(
                current.task_id,
                PendingRemoval::Task {
                    job_id: current.job_id,
                },
            );
            info!(task_id = %current.task_id, "stopping before delete");
            return Ok(DeleteOutcome::AwaitingStop);
        }
        self.remove_entry(current.task_id, current.job_id).await?;
        self.cache.update_one(current.task_id).await;
        Ok(DeleteOutcome::Deleted)
    }

    pub async fn protect_recording(&self, task: &Task) -> Result<(), PvrError> {
        self.set_keep(task, true).await
    }

    pub async fn unprotect_recording(&self, task: &Task) -> Result<(), PvrError> {
        self.set_keep(task, false).await
    }

    pub async fn save_bookmark(&self, task: &Task, position_ms: u64) -> Result<(), PvrError> {
        let _serial = self.serial.lock().await;
        self.task_backend(task)
            .await?
            .save_bookmark(task, position_ms)
            .await
    }

    pub async fn get_bookmark(&self, task: &Task) -> Result<u64, PvrError> {
        if task.is_remote {
            return self.task_backend(task).await?.get_bookmark(task).await;
        }
        let current = self.fresh(task).await;
        self.local.get_bookmark(&current).await
    }

    /// Same as saving position 0.
    pub async fn delete_bookmark(&self, task: &Task) -> Result<(), PvrError> {
        self.save_bookmark(task, 0).await
    }

    // ---- remote passthroughs ---------------------------------------------

    pub async fn list_servers(&self) -> Vec<RemoteServer> {
        match &self.remote {
            Some(remote) => remote.list_servers().await,
            None => Vec::new(),
        }
    }

    pub async fn local_server_name(&self) -> Option<String> {
        match &self.remote {
            Some(remote) => Some(remote.local_server_name().await),
            None => None,
        }
    }

    pub async fn set_local_server_name(&self, name: &str) -> Result<(), PvrError> {
        let Some(remote) = &self.remote else {
            return Err(PvrError::Unsupported("whole-home recording is not configured"));
        };
        remote
            .set_local_server_name(name)
            .await
            .map_err(|e| PvrError::remote(name, e))
    }

    // ---- helpers ---------------------------------------------------------

    async fn set_keep(&self, task: &Task, keep: bool) -> Result<(), PvrError> {
        let _serial = self.serial.lock().await;
        if task.is_remote {
            return self.task_backend(task).await?.set_keep(task, keep).await;
        }
        // live かどうかは Store の最新状態で判断する
        let current = self.fresh(task).await;
        self.local.set_keep(&current, keep).await
    }

    async fn fresh(&self, task: &Task) -> Task {
        self.queries
            .task_by_id(task.task_id)
            .await
            .unwrap_or_else(|| task.clone())
    }

    async fn cancel_task(&self, task: Task) -> Result<CancelOutcome, PvrError> {
        let task = if task.is_remote {
            task
        } else {
            self.fresh(&task).await
        };
        self.task_backend(&task).await?.cancel_task(&task).await
    }

    async fn cancel_series(&self, job_id: JobId) -> Result<CancelOutcome, PvrError> {
        let tasks = self.queries.tasks_for_job(job_id).await;
        if tasks.is_empty() && self.queries.job_by_id(job_id).await.is_none() {
            return Err(PvrError::NotFound(format!("series job {job_id}")));
        }
        let series_id = tasks.iter().find_map(|t| t.series.series_id.clone());

        let active: Vec<TaskId> = tasks
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.task_id)
            .collect();
        let outcome = if active.is_empty() {
            self.store.delete_job(job_id).await?;
            CancelOutcome::JobDeleted
        } else {
            for task_id in &active {
                self.store.stop_task(*task_id).await?;
                self.pending
                    .lock()
                    .insert(*task_id, PendingRemoval::Job { job_id });
            }
            info!(job_id = %job_id, active = active.len(), "series stopping; job deleted on acknowledgement");
            CancelOutcome::TaskStopped
        };

        if let Some(series_id) = series_id {
            self.delete_remote_schedule(&series_id).await;
        }
        Ok(outcome)
    }

    /// Best effort: a missing or failing remote is only logged.
    async fn delete_remote_schedule(&self, series_id: &SeriesId) {
        let Some(remote) = &self.remote else {
            return;
        };
        let Some(server_id) = remote.current_server_id().await else {
            return;
        };
        if let Err(e) = remote.delete_schedule(&server_id, series_id).await {
            warn!(server_id = %server_id, series_id = %series_id, error = %e, "remote schedule delete failed");
        }
    }

    /// Delete the content entry, and the job when nothing else is left in it.
    async fn remove_entry(&self, task_id: TaskId, job_id: JobId) -> Result<(), PvrError> {
        self.store.delete_task(task_id).await?;
        if self.queries.tasks_for_job(job_id).await.is_empty() {
            self.store.delete_job(job_id).await?;
            debug!(job_id = %job_id, "deleted job with its last task");
        }
        Ok(())
    }

    fn local_backend(&self) -> Arc<dyn RecordingBackend> {
        self.local.clone()
    }

    async fn request_backend(&self) -> Result<Arc<dyn RecordingBackend>, PvrError> {
        let Some(remote) = &self.remote else {
            return Ok(self.local_backend());
        };
        if remote.is_local_server().await {
            return Ok(self.local_backend());
        }
        let server_id = remote.current_server_id().await.ok_or_else(|| {
            PvrError::remote(
                "whole-home",
                RemoteError::new("no active recording server"),
            )
        })?;
        Ok(self.remote_backend(remote, server_id).await)
    }

    async fn task_backend(&self, task: &Task) -> Result<Arc<dyn RecordingBackend>, PvrError> {
        if !task.is_remote {
            return Ok(self.local_backend());
        }
        let Some(remote) = &self.remote else {
            return Err(PvrError::Unsupported("whole-home recording is not configured"));
        };
        let server_id = match task.server_id.clone() {
            Some(id) => id,
            None => remote.current_server_id().await.ok_or_else(|| {
                PvrError::remote(
                    "whole-home",
                    RemoteError::new("remote task names no server"),
                )
            })?,
        };
        Ok(self.remote_backend(remote, server_id).await)
    }

    async fn remote_backend(
        &self,
        remote: &Arc<dyn RemoteRecorder>,
        server_id: ServerId,
    ) -> Arc<dyn RecordingBackend> {
        let name = remote.server_name(&server_id).await;
        Arc::new(
            RemoteBackend::new(Arc::clone(remote), server_id, name)
                .with_default_padding(self.config.default_padding),
        )
    }

    // ========================================
    // Store events
    // ========================================

    pub async fn handle_store_event(&self, event: StoreEvent) {
        let _serial = self.serial.lock().await;
        debug!(event = event.name(), "store event");
        match event {
            StoreEvent::JobAdded { job_id } => {
                if self.ledger.contains(job_id) {
                    self.emit(PvrEvent::RecordingRequested {
                        job_id: Some(job_id),
                        origin: Origin::Local,
                    });
                }
            }
            StoreEvent::JobAddFailed {
                job_id,
                reason,
                message,
            } => {
                if let Some(job_id) = job_id {
                    self.ledger.forget(job_id);
                    self.markers.take(job_id).await;
                }
                warn!(?reason, %message, "store rejected job");
                self.emit(PvrEvent::RequestFailed {
                    reason,
                    message,
                    origin: Origin::Local,
                });
            }
            StoreEvent::TaskAddFailed { job_id, message } => {
                warn!(job_id = %job_id, %message, "store failed to add task");
                self.emit(PvrEvent::RequestFailed {
                    reason: FailureReason::Generic,
                    message,
                    origin: Origin::Local,
                });
            }
            StoreEvent::JobCompleted { job_id } => self.on_job_completed(job_id).await,
            StoreEvent::TaskStarted { task_id } => {
                self.cache.update_one(task_id).await;
                self.emit(PvrEvent::TaskStarted { task_id });
            }
            StoreEvent::TaskStopped { task_id } => {
                self.cache.update_one(task_id).await;
                self.emit(PvrEvent::TaskStopped { task_id });
            }
            StoreEvent::TaskAboutToStart { task_id } => {
                let Some(task) = self.queries.task_by_id(task_id).await else {
                    warn!(task_id = %task_id, "about-to-start for unknown task");
                    return;
                };
                let event = self
                    .orchestrator
                    .about_to_start(task, self.clock.now(), self.config.about_to_start_lead())
                    .await;
                self.emit(event);
            }
            StoreEvent::TasksChanged { tasks, caused_by } => {
                if let Some(job_id) = caused_by
                    && self.ledger.consume(job_id)
                {
                    debug!(job_id = %job_id, "ignoring fulfilment change caused by own request");
                    return;
                }
                if let Some(event) = self.orchestrator.tasks_changed(tasks).await {
                    self.emit(event);
                }
            }
            StoreEvent::TasksModified { task_ids } => {
                for task_id in task_ids {
                    self.cache.update_one(task_id).await;
                }
                self.emit(PvrEvent::RecordingsRefreshed);
            }
            StoreEvent::JobDeleted { job_id } => {
                self.ledger.forget(job_id);
                self.cache.rebuild().await;
                self.emit(PvrEvent::RecordingRemoved {
                    task_id: None,
                    origin: Origin::Local,
                });
            }
            StoreEvent::TaskStopAcknowledged { task_id } => self.on_stop_acknowledged(task_id).await,
            StoreEvent::ContentModified { task_id } => {
                self.cache.update_one(task_id).await;
                self.emit(PvrEvent::RecordingsRefreshed);
            }
            StoreEvent::DiskSpaceAlert { percent_used } => {
                warn!(percent_used, "disk space alert");
                self.emit(PvrEvent::DiskSpaceAlert { percent_used });
            }
            StoreEvent::OverlapReady { handle, tasks } => {
                if let Some(event) = self.orchestrator.on_overlap_ready(handle, tasks).await {
                    self.emit(event);
                }
            }
            StoreEvent::OverlapFailed { handle, message } => {
                if let Some(event) = self.orchestrator.on_overlap_failed(handle, &message).await {
                    self.emit(event);
                }
            }
        }
    }

    async fn on_job_completed(&self, job_id: JobId) {
        let tasks = self.queries.tasks_for_job(job_id).await;
        for task in &tasks {
            self.cache.update_one(task.task_id).await;
        }
        // ledger は tasks-changed が消費する。到着順は保証されない

        if !self.markers.take(job_id).await {
            debug!(job_id = %job_id, "job added by another device; conflict check suppressed");
            return;
        }

        let task_type = match self.queries.job_by_id(job_id).await {
            Some(job) => job.task_type,
            None => tasks
                .first()
                .map(|t| t.task_type)
                .unwrap_or(TaskKind::Recording),
        };
        if task_type == TaskKind::Reminder {
            self.emit(PvrEvent::RecordingsRefreshed);
            return;
        }
        if let Some(event) = self.orchestrator.begin(job_id, tasks).await {
            self.emit(event);
        }
    }

    async fn on_stop_acknowledged(&self, task_id: TaskId) {
        self.cache.update_one(task_id).await;
        let pending = self.pending.lock().remove(&task_id);
        match pending {
            None => {}
            Some(PendingRemoval::Task { job_id }) => {
                match self.remove_entry(task_id, job_id).await {
                    Ok(()) => {
                        self.cache.update_one(task_id).await;
                        self.emit(PvrEvent::RecordingRemoved {
                            task_id: Some(task_id),
                            origin: Origin::Local,
                        });
                    }
                    Err(e) => warn!(task_id = %task_id, error = %e, "delete after stop failed"),
                }
            }
            Some(PendingRemoval::Job { job_id }) => {
                let still_stopping = self
                    .pending
                    .lock()
                    .values()
                    .any(|p| *p == PendingRemoval::Job { job_id });
                if still_stopping {
                    return;
                }
                if let Err(e) = self.store.delete_job(job_id).await {
                    warn!(job_id = %job_id, error = %e, "series delete after stop failed");
                }
            }
        }
    }

    // ========================================
    // Remote events
    // ========================================

    pub async fn handle_remote_event(&self, event: RemoteEvent) {
        let _serial = self.serial.lock().await;
        match event {
            RemoteEvent::ScheduleCreated { server_id, event_id } => {
                debug!(server_id = %server_id, event_id = ?event_id, "remote schedule created");
                self.emit(PvrEvent::RecordingRequested {
                    job_id: None,
                    origin: Origin::Remote { server_id },
                });
            }
            RemoteEvent::ScheduleCreateFailed {
                server_id,
                event_id,
                conflicted,
                message,
            } => {
                let server_name = self.server_name(&server_id).await;
                if conflicted {
                    // remote 側で計算済みの conflict は local の orchestrator を通さない
                    self.emit(PvrEvent::RemoteConflict {
                        server_name,
                        event_id,
                        message,
                    });
                } else {
                    self.emit(PvrEvent::RequestFailed {
                        reason: FailureReason::Generic,
                        message: message.clone(),
                        origin: Origin::Remote { server_id },
                    });
                    self.emit(PvrEvent::RemoteFailure {
                        server_name,
                        message,
                    });
                }
            }
            RemoteEvent::ScheduleDeleted { server_id, .. }
            | RemoteEvent::ScheduleRemoved { server_id } => {
                self.emit(PvrEvent::RecordingRemoved {
                    task_id: None,
                    origin: Origin::Remote { server_id },
                });
            }
            RemoteEvent::ScheduleDeleteFailed { server_id, message } => {
                let server_name = self.server_name(&server_id).await;
                self.emit(PvrEvent::RemoteFailure {
                    server_name,
                    message,
                });
            }
            RemoteEvent::TaskRemoved { server_id, task_id } => {
                self.emit(PvrEvent::RecordingRemoved {
                    task_id,
                    origin: Origin::Remote { server_id },
                });
            }
            RemoteEvent::RecordingUpdated { .. } | RemoteEvent::TaskFetched { .. } => {
                self.emit(PvrEvent::RecordingsRefreshed);
            }
        }
    }

    async fn server_name(&self, server_id: &ServerId) -> String {
        match &self.remote {
            Some(remote) => remote.server_name(server_id).await,
            None => server_id.to_string(),
        }
    }
}

fn entries(tasks: Vec<Task>, as_folders: bool) -> Vec<RecordingEntry> {
    if as_folders {
        group_into_folders(tasks)
    } else {
        tasks.into_iter().map(RecordingEntry::Recording).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::PvrManagerBuilder;
    use crate::app::listeners::EventLog;
    use crate::domain::{
        JobRequest, JobSchedule, ObjectState, Padding, RecordingEntry, StoreError,
    };
    use crate::impls::{
        InMemoryMarkers, InMemoryStore, OverlapGroupingStrategy, ScriptedRemote, StaticGuide,
    };
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap()
    }

    fn epg(id: &str, service: &str, offset_min: i64, len_min: i64, series: Option<&str>) -> EpgEvent {
        let start = base() + chrono::Duration::minutes(offset_min);
        EpgEvent {
            event_id: id.into(),
            unique_event_id: UniqueEventId::new(format!("u-{id}")),
            service_id: service.into(),
            title: id.to_string(),
            start_time: start,
            end_time: start + chrono::Duration::minutes(len_min),
            series_id: series.map(Into::into),
            season_id: None,
            series_name: series.map(|_| "Saga".to_string()),
        }
    }

    struct Harness {
        clock: Arc<FixedClock>,
        guide: Arc<StaticGuide>,
        store: Arc<InMemoryStore>,
        remote: Option<Arc<ScriptedRemote>>,
        markers: Arc<InMemoryMarkers>,
        manager: Arc<PvrManager>,
        log: Arc<EventLog>,
        store_rx: UnboundedReceiver<StoreEvent>,
        remote_rx: Option<UnboundedReceiver<RemoteEvent>>,
    }

    impl Harness {
        fn new(tuners: usize, with_remote: bool) -> Self {
            let clock = Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            ));
            let day = 24 * 60;
            let guide = Arc::new(StaticGuide::with_events([
                epg("news", "svc-1", 0, 60, None),
                epg("rerun", "svc-2", 0, 60, None),
                epg("late", "svc-1", 180, 60, None),
                epg("s1e1", "svc-3", day, 60, Some("S1")),
                epg("s1e2", "svc-3", 2 * day, 60, Some("S1")),
                epg("s1e3", "svc-3", 3 * day, 60, Some("S1")),
            ]));
            let store = Arc::new(
                InMemoryStore::new(clock.clone())
                    .with_guide(guide.clone())
                    .with_tuners(tuners),
            );
            let markers = Arc::new(InMemoryMarkers::new());
            let remote = with_remote.then(|| Arc::new(ScriptedRemote::new("den")));

            let mut builder = PvrManagerBuilder::new()
                .store(store.clone())
                .epg(guide.clone())
                .markers(markers.clone())
                .strategy(Arc::new(OverlapGroupingStrategy::new(
                    StoreQueries::new(store.clone(), 10),
                    tuners,
                )))
                .clock(clock.clone());
            if let Some(remote) = &remote {
                builder = builder.remote(remote.clone());
            }
            let manager = builder.build().unwrap();

            let log = Arc::new(EventLog::default());
            manager.register_all(log.clone());
            let store_rx = store.subscribe();
            let remote_rx = remote.as_ref().map(|r| r.subscribe());

            Self {
                clock,
                guide,
                store,
                remote,
                markers,
                manager,
                log,
                store_rx,
                remote_rx,
            }
        }

        /// Feed every queued notification (and whatever it triggers) to the manager.
        async fn settle(&mut self) {
            loop {
                let mut progressed = false;
                while let Ok(event) = self.store_rx.try_recv() {
                    self.manager.handle_store_event(event).await;
                    progressed = true;
                }
                if let Some(rx) = self.remote_rx.as_mut() {
                    while let Ok(event) = rx.try_recv() {
                        self.manager.handle_remote_event(event).await;
                        progressed = true;
                    }
                }
                if !progressed {
                    return;
                }
            }
        }

        fn event(&self, id: &str) -> EpgEvent {
            self.guide.event(&id.into()).unwrap()
        }

        async fn record(&mut self, id: &str) -> JobId {
            let submission = self
                .manager
                .request_event_recording(self.event(id), RecordingMetadata::default(), false)
                .await
                .unwrap();
            self.settle().await;
            submission.job_id().unwrap()
        }

        fn remote(&self) -> &Arc<ScriptedRemote> {
            self.remote.as_ref().unwrap()
        }
    }

    fn event_job(id: &str, service: &str) -> JobRequest {
        JobRequest {
            schedule: JobSchedule::Event {
                event_id: id.into(),
                service_id: service.into(),
            },
            task_type: TaskKind::Recording,
            padding: Padding::default(),
            keep: false,
            title: id.to_string(),
            expiration: None,
            ui_folder: None,
        }
    }

    #[tokio::test]
    async fn single_event_without_overlaps_refreshes() {
        let mut h = Harness::new(2, false);
        let job_id = h.record("news").await;

        assert_eq!(
            h.log.kinds(),
            vec![PvrEventKind::RecordingRequested, PvrEventKind::RecordingsRefreshed]
        );
        assert_eq!(
            h.log.events()[0],
            PvrEvent::RecordingRequested {
                job_id: Some(job_id),
                origin: Origin::Local
            }
        );
        assert_eq!(h.store.overlap_requests().len(), 1);
        let key = UniqueEventId::new("u-news");
        assert!(h.manager.is_pvr_event_scheduled(&key));
        assert_eq!(h.manager.recording_status(&key), RecordingStatus::Scheduled);
    }

    #[tokio::test]
    async fn overlapping_request_on_one_tuner_conflicts() {
        let mut h = Harness::new(1, false);
        h.record("news").await;
        h.log.clear();

        let job_id = h.record("rerun").await;

        // the bump of "news" is our own doing; only the job-completed path reports it
        assert_eq!(
            h.log.kinds(),
            vec![PvrEventKind::RecordingRequested, PvrEventKind::RequestConflicted]
        );
        match &h.log.events()[1] {
            PvrEvent::RequestConflicted {
                job_id: conflicted,
                unscheduled,
                groups,
            } => {
                assert_eq!(*conflicted, job_id);
                assert_eq!(unscheduled.len(), 1);
                assert_eq!(unscheduled[0].event_id, Some("news".into()));
                assert_eq!(unscheduled[0].fulfillment, crate::domain::Fulfillment::None);
                assert_eq!(groups.len(), 1);
            }
            other => panic!("expected request-conflicted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn own_change_arriving_after_completion_is_still_ignored() {
        let mut h = Harness::new(1, false);
        h.record("news").await;
        h.log.clear();

        let job_id = h
            .manager
            .request_event_recording(h.event("rerun"), RecordingMetadata::default(), false)
            .await
            .unwrap()
            .job_id()
            .unwrap();
        let mut queued = Vec::new();
        while let Ok(event) = h.store_rx.try_recv() {
            queued.push(event);
        }
        // fulfilment change delivered after job-completed
        queued.sort_by_key(|e| matches!(e, StoreEvent::TasksChanged { .. }));
        assert!(matches!(queued.last(), Some(StoreEvent::TasksChanged { .. })));
        for event in queued {
            h.manager.handle_store_event(event).await;
        }
        h.settle().await;

        assert_eq!(
            h.log.kinds(),
            vec![PvrEventKind::RecordingRequested, PvrEventKind::RequestConflicted]
        );
        assert!(!h.manager.ledger.contains(job_id));
    }

    #[tokio::test]
    async fn foreign_job_is_reported_through_tasks_changed() {
        let mut h = Harness::new(1, false);
        h.record("news").await;
        h.log.clear();

        // another device on the home network adds a job straight to the Store
        h.store.add_job(event_job("rerun", "svc-2")).await.unwrap();
        h.settle().await;

        assert_eq!(h.log.kinds(), vec![PvrEventKind::TaskChangedConflicted]);
        // no overlap round for a job this core did not submit
        assert_eq!(h.store.overlap_requests().len(), 1);
    }

    #[tokio::test]
    async fn series_request_groups_into_one_folder() {
        let mut h = Harness::new(2, false);
        h.manager
            .request_series_recording(h.event("s1e1"), RecordingMetadata::default(), false)
            .await
            .unwrap();
        h.settle().await;

        // one overlap query per episode, one conclusion
        assert_eq!(h.store.overlap_requests().len(), 3);
        assert_eq!(
            h.log.kinds(),
            vec![PvrEventKind::RecordingRequested, PvrEventKind::RecordingsRefreshed]
        );

        let entries = h.manager.recordings_by_series(&"S1".into(), true).await;
        assert_eq!(entries.len(), 1);
        let folder = entries[0].as_folder().unwrap();
        assert_eq!(folder.sub_recordings.len(), 3);
        assert_eq!(folder.series.series_id, Some("S1".into()));
        assert_eq!(folder.title, "Saga");
        assert_eq!(
            h.manager.recording_status(&UniqueEventId::new("u-s1e2")),
            RecordingStatus::ScheduledBySeries
        );
    }

    #[tokio::test]
    async fn reminder_skips_conflict_check() {
        let mut h = Harness::new(1, false);
        let metadata = RecordingMetadata {
            task_type: Some(TaskKind::Reminder),
            ..RecordingMetadata::default()
        };
        h.manager
            .request_event_recording(h.event("news"), metadata, false)
            .await
            .unwrap();
        h.settle().await;

        assert!(h.store.overlap_requests().is_empty());
        assert_eq!(
            h.log.kinds(),
            vec![PvrEventKind::RecordingRequested, PvrEventKind::RecordingsRefreshed]
        );
    }

    #[tokio::test]
    async fn asynchronous_add_failure_is_reported() {
        let mut h = Harness::new(2, false);
        h.store.fail_next_add(FailureReason::BadParameter, "no such service");
        let submission = h
            .manager
            .request_event_recording(h.event("news"), RecordingMetadata::default(), false)
            .await
            .unwrap();
        h.settle().await;

        assert_eq!(
            h.log.events(),
            vec![PvrEvent::RequestFailed {
                reason: FailureReason::BadParameter,
                message: "no such service".to_string(),
                origin: Origin::Local,
            }]
        );
        assert!(!h.markers.take(submission.job_id().unwrap()).await);
    }

    #[tokio::test]
    async fn synchronous_rejection_returns_error() {
        let mut h = Harness::new(2, false);
        h.store
            .reject_next_add(StoreError::BadParameter("malformed".to_string()));
        let err = h
            .manager
            .request_event_recording(h.event("news"), RecordingMetadata::default(), false)
            .await
            .unwrap_err();
        h.settle().await;

        assert!(matches!(err, PvrError::Store(StoreError::BadParameter(_))));
        assert!(h.log.events().is_empty());
    }

    #[tokio::test]
    async fn malformed_event_is_rejected_before_submission() {
        let h = Harness::new(2, false);
        let mut event = h.event("news");
        event.end_time = event.start_time;
        let err = h
            .manager
            .request_event_recording(event, RecordingMetadata::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PvrError::InvalidRequest(_)));
        assert!(h.store.overlap_requests().is_empty());
    }

    #[tokio::test]
    async fn cancelling_booked_event_deletes_job() {
        let mut h = Harness::new(2, false);
        let job_id = h.record("news").await;
        h.log.clear();

        let outcome = h.manager.cancel_event_recording(&"news".into()).await.unwrap();
        h.settle().await;

        assert_eq!(outcome, CancelOutcome::JobDeleted);
        assert!(h.store.job(job_id).is_none());
        assert!(h.log.kinds().contains(&PvrEventKind::RecordingRemoved));
        assert!(!h.manager.is_pvr_event_scheduled(&UniqueEventId::new("u-news")));
    }

    #[tokio::test]
    async fn cancelling_active_task_stops_it_and_keeps_job() {
        let mut h = Harness::new(2, false);
        let job_id = h.record("news").await;
        let task = h.store.tasks_of(job_id).remove(0);
        h.store.start_task(task.task_id).unwrap();
        h.settle().await;
        h.log.clear();

        let outcome = h.manager.cancel_recording_by_task(&task).await.unwrap();
        h.settle().await;

        assert_eq!(outcome, CancelOutcome::TaskStopped);
        assert!(h.store.job(job_id).is_some());
        let stopped = h.store.task(task.task_id).unwrap();
        assert_eq!(stopped.object_state, ObjectState::Final);
        assert!(h.log.kinds().contains(&PvrEventKind::TaskStopped));
    }

    #[tokio::test]
    async fn cancelling_booked_series_episode_stops_it_and_keeps_job() {
        let mut h = Harness::new(2, false);
        let submission = h
            .manager
            .request_series_recording(h.event("s1e1"), RecordingMetadata::default(), false)
            .await
            .unwrap();
        h.settle().await;
        let job_id = submission.job_id().unwrap();
        let episode = h.store.tasks_of(job_id).remove(1);
        assert_eq!(episode.object_state, ObjectState::Booked);

        let outcome = h.manager.cancel_recording_by_task(&episode).await.unwrap();
        h.settle().await;

        assert_eq!(outcome, CancelOutcome::TaskStopped);
        assert!(h.store.job(job_id).is_some());
        assert_eq!(h.store.tasks_of(job_id).len(), 3);
        assert_ne!(
            h.store.task(episode.task_id).unwrap().object_state,
            ObjectState::Booked
        );
    }

    #[tokio::test]
    async fn cancelling_unknown_event_is_not_found() {
        let h = Harness::new(2, false);
        let err = h
            .manager
            .cancel_event_recording(&"nothing".into())
            .await
            .unwrap_err();
        assert!(matches!(err, PvrError::NotFound(_)));
    }

    #[tokio::test]
    async fn deleting_active_task_waits_for_stop() {
        let mut h = Harness::new(2, false);
        let job_id = h.record("news").await;
        let task = h.store.tasks_of(job_id).remove(0);
        h.store.start_task(task.task_id).unwrap();
        h.settle().await;
        assert_eq!(
            h.manager.recording_status(&UniqueEventId::new("u-news")),
            RecordingStatus::Active
        );
        h.log.clear();

        let outcome = h.manager.delete_task(&task).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::AwaitingStop);
        // nothing removed until the Store acknowledges
        assert!(h.store.task(task.task_id).is_some());

        h.settle().await;
        assert!(h.store.task(task.task_id).is_none());
        assert!(h.store.job(job_id).is_none());
        let events = h.log.events();
        assert!(events.contains(&PvrEvent::TaskStopped {
            task_id: task.task_id
        }));
        assert!(events.contains(&PvrEvent::RecordingRemoved {
            task_id: Some(task.task_id),
            origin: Origin::Local
        }));
    }

    #[tokio::test]
    async fn cancelling_series_stops_active_episode_then_deletes_job() {
        let mut h = Harness::new(2, false);
        let submission = h
            .manager
            .request_series_recording(h.event("s1e1"), RecordingMetadata::default(), false)
            .await
            .unwrap();
        h.settle().await;
        let job_id = submission.job_id().unwrap();
        let first = h.store.tasks_of(job_id).remove(0);
        h.store.start_task(first.task_id).unwrap();
        h.settle().await;

        let outcome = h.manager.cancel_series_recording(job_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::TaskStopped);
        assert!(h.store.job(job_id).is_some());

        h.settle().await;
        assert!(h.store.job(job_id).is_none());
        // the recorded part of the active episode stays as content
        let kept = h.store.task(first.task_id).unwrap();
        assert_eq!(kept.object_state, ObjectState::Final);
        assert_eq!(h.store.tasks_of(job_id).len(), 1);
    }

    #[tokio::test]
    async fn about_to_start_reports_time_conflicts() {
        let mut h = Harness::new(1, false);
        h.record("news").await;
        let rerun = h.record("rerun").await;
        h.log.clear();
        h.clock.set(base() - chrono::Duration::minutes(1));

        let task = h.store.tasks_of(rerun).remove(0);
        h.store.announce_about_to_start(task.task_id);
        h.settle().await;

        match h.log.events().as_slice() {
            [PvrEvent::TaskAboutToStartConflicted { task: t, conflicts, .. }] => {
                assert_eq!(t.task_id, task.task_id);
                assert_eq!(conflicts.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn about_to_start_without_competition_is_plain() {
        let mut h = Harness::new(2, false);
        let job_id = h.record("news").await;
        h.log.clear();
        h.clock.set(base() - chrono::Duration::minutes(1));

        let task = h.store.tasks_of(job_id).remove(0);
        h.store.announce_about_to_start(task.task_id);
        h.settle().await;

        assert_eq!(h.log.kinds(), vec![PvrEventKind::TaskAboutToStart]);
    }

    #[tokio::test]
    async fn protect_and_bookmark_local_recording() {
        let mut h = Harness::new(2, false);
        let job_id = h.record("news").await;
        let task = h.store.tasks_of(job_id).remove(0);

        h.manager.protect_recording(&task).await.unwrap();
        assert!(h.store.task(task.task_id).unwrap().keep);

        h.manager.save_bookmark(&task, 5_000).await.unwrap();
        assert_eq!(h.manager.get_bookmark(&task).await.unwrap(), 5_000);
        h.manager.delete_bookmark(&task).await.unwrap();
        assert_eq!(h.manager.get_bookmark(&task).await.unwrap(), 0);

        h.manager.unprotect_recording(&task).await.unwrap();
        assert!(!h.store.task(task.task_id).unwrap().keep);
    }

    #[tokio::test]
    async fn remote_task_without_remote_is_unsupported() {
        let h = Harness::new(2, false);
        let mut task = crate::domain::task::fixtures::task(ObjectState::Final, crate::domain::JobType::Event);
        task.is_remote = true;
        let err = h.manager.protect_recording(&task).await.unwrap_err();
        assert!(matches!(err, PvrError::Unsupported(_)));
    }

    #[tokio::test]
    async fn remote_server_serves_requests_through_same_listeners() {
        let mut h = Harness::new(2, true);
        h.remote().use_server("srv-2".into(), "Bedroom");

        let submission = h
            .manager
            .request_event_recording(h.event("news"), RecordingMetadata::default(), false)
            .await
            .unwrap();
        h.settle().await;

        assert_eq!(
            submission,
            Submission::Remote {
                server_id: "srv-2".into()
            }
        );
        assert_eq!(
            h.log.events(),
            vec![PvrEvent::RecordingRequested {
                job_id: None,
                origin: Origin::Remote {
                    server_id: "srv-2".into()
                }
            }]
        );
        // nothing reached the local Store
        assert!(h.store.overlap_requests().is_empty());
        assert_eq!(h.remote().calls(), vec!["event srv-2 news".to_string()]);
    }

    #[tokio::test]
    async fn remote_conflict_goes_to_remote_dialog_path() {
        let mut h = Harness::new(2, true);
        h.remote().use_server("srv-2".into(), "Bedroom");
        h.remote().conflict_next("both tuners busy");

        h.manager
            .request_event_recording(h.event("news"), RecordingMetadata::default(), false)
            .await
            .unwrap();
        h.settle().await;

        assert_eq!(
            h.log.events(),
            vec![PvrEvent::RemoteConflict {
                server_name: "Bedroom".to_string(),
                event_id: Some("news".into()),
                message: "both tuners busy".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn remote_create_failure_reports_failure_and_dialog() {
        let mut h = Harness::new(2, true);
        h.remote().use_server("srv-2".into(), "Bedroom");
        h.remote().emit(RemoteEvent::ScheduleCreateFailed {
            server_id: "srv-2".into(),
            event_id: None,
            conflicted: false,
            message: "disk full".to_string(),
        });
        h.settle().await;

        assert_eq!(
            h.log.kinds(),
            vec![PvrEventKind::RequestFailed, PvrEventKind::RemoteFailure]
        );
    }

    #[tokio::test]
    async fn local_server_uses_store_even_with_remote_configured() {
        let mut h = Harness::new(2, true);
        let job_id = h.record("news").await;

        assert!(h.store.job(job_id).is_some());
        assert!(h.remote().calls().is_empty());
        assert_eq!(h.manager.local_server_name().await, Some("den".to_string()));
    }

    #[tokio::test]
    async fn time_recording_is_always_local() {
        let mut h = Harness::new(2, true);
        h.remote().use_server("srv-2".into(), "Bedroom");

        let submission = h
            .manager
            .request_time_recording(
                base(),
                base() + chrono::Duration::minutes(30),
                Frequency::Once,
                "svc-9".into(),
                false,
                RecordingMetadata::titled("Manual"),
            )
            .await
            .unwrap();
        h.settle().await;

        let job_id = submission.job_id().unwrap();
        assert_eq!(h.store.tasks_of(job_id).len(), 1);
        assert!(h.remote().calls().is_empty());
        assert_eq!(
            h.manager
                .cancel_manual_recording(&"svc-9".into())
                .await
                .unwrap(),
            CancelOutcome::JobDeleted
        );
    }

    #[tokio::test]
    async fn complete_recordings_follow_sort_mode() {
        let mut h = Harness::new(2, false);
        let news = h.record("news").await;
        let late = h.record("late").await;
        for job_id in [news, late] {
            let task = h.store.tasks_of(job_id).remove(0);
            h.store.start_task(task.task_id).unwrap();
            h.store.finish_task(task.task_id).unwrap();
        }
        h.settle().await;

        h.manager.set_sort_mode(SortMode::ByDateDesc);
        let titles: Vec<String> = h
            .manager
            .complete_recordings(false)
            .await
            .into_iter()
            .filter_map(|e| match e {
                RecordingEntry::Recording(t) => Some(t.title),
                RecordingEntry::Folder(_) => None,
            })
            .collect();
        assert_eq!(titles, vec!["late".to_string(), "news".to_string()]);
    }
}
