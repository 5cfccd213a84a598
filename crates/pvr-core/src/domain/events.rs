//! Events - Store / remote から届くイベントと、core が外へ出すイベント
//!
//! - `StoreEvent`: Scheduler/Store の通知（閉じた enum）
//! - `RemoteEvent`: whole-home recorder の通知（閉じた enum）
//! - `PvrEvent`: listener に配るイベント。`PvrEventKind` で購読する

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conflict::ConflictGroup;
use super::ids::{JobId, QueryHandle, TaskId};
use super::keys::{EventId, SeriesId, ServerId};
use super::task::Task;

/// Why the Store refused an add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    BadParameter,
    Generic,
}

/// Notifications produced by the Store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    JobAdded { job_id: JobId },
    JobAddFailed { job_id: Option<JobId>, reason: FailureReason, message: String },
    TaskAddFailed { job_id: JobId, message: String },
    /// The Store finished expanding the job into Tasks.
    JobCompleted { job_id: JobId },
    TaskStarted { task_id: TaskId },
    TaskStopped { task_id: TaskId },
    TaskAboutToStart { task_id: TaskId },
    /// Fulfilment of already-scheduled Tasks changed.
    ///
    /// `caused_by` names the job whose addition bumped them, when known.
    TasksChanged { tasks: Vec<Task>, caused_by: Option<JobId> },
    TasksModified { task_ids: Vec<TaskId> },
    JobDeleted { job_id: JobId },
    /// Acknowledgement of a stop-task call.
    TaskStopAcknowledged { task_id: TaskId },
    ContentModified { task_id: TaskId },
    DiskSpaceAlert { percent_used: u8 },
    OverlapReady { handle: QueryHandle, tasks: Vec<Task> },
    OverlapFailed { handle: QueryHandle, message: String },
}

impl StoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::JobAdded { .. } => "job-added-ok",
            StoreEvent::JobAddFailed { .. } => "job-added-failed",
            StoreEvent::TaskAddFailed { .. } => "task-add-failed",
            StoreEvent::JobCompleted { .. } => "job-completed",
            StoreEvent::TaskStarted { .. } => "task-started",
            StoreEvent::TaskStopped { .. } => "task-stopped",
            StoreEvent::TaskAboutToStart { .. } => "task-about-to-start",
            StoreEvent::TasksChanged { .. } => "tasks-changed",
            StoreEvent::TasksModified { .. } => "tasks-modified",
            StoreEvent::JobDeleted { .. } => "job-deleted-ok",
            StoreEvent::TaskStopAcknowledged { .. } => "task-stopped-ok",
            StoreEvent::ContentModified { .. } => "content-modified",
            StoreEvent::DiskSpaceAlert { .. } => "disk-space-alert",
            StoreEvent::OverlapReady { .. } => "overlap-ok",
            StoreEvent::OverlapFailed { .. } => "overlap-failed",
        }
    }
}

/// Notifications produced by the whole-home recorder subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    ScheduleCreated { server_id: ServerId, event_id: Option<EventId> },
    ScheduleCreateFailed {
        server_id: ServerId,
        event_id: Option<EventId>,
        /// The remote side pre-computed a conflict.
        conflicted: bool,
        message: String,
    },
    ScheduleDeleted { server_id: ServerId, series_id: Option<SeriesId> },
    ScheduleDeleteFailed { server_id: ServerId, message: String },
    TaskRemoved { server_id: ServerId, task_id: Option<TaskId> },
    ScheduleRemoved { server_id: ServerId },
    RecordingUpdated { server_id: ServerId },
    TaskFetched { server_id: ServerId, task: Box<Task> },
}

/// Where a request was served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Local,
    Remote { server_id: ServerId },
}

/// Subscription key for `PvrEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PvrEventKind {
    RecordingRequested,
    RequestFailed,
    RecordingsRefreshed,
    RequestConflicted,
    TaskAboutToStart,
    TaskAboutToStartConflicted,
    TaskChangedConflicted,
    TaskStarted,
    TaskStopped,
    RecordingRemoved,
    DiskSpaceAlert,
    RemoteFailure,
    RemoteConflict,
}

impl PvrEventKind {
    pub const ALL: [PvrEventKind; 13] = [
        PvrEventKind::RecordingRequested,
        PvrEventKind::RequestFailed,
        PvrEventKind::RecordingsRefreshed,
        PvrEventKind::RequestConflicted,
        PvrEventKind::TaskAboutToStart,
        PvrEventKind::TaskAboutToStartConflicted,
        PvrEventKind::TaskChangedConflicted,
        PvrEventKind::TaskStarted,
        PvrEventKind::TaskStopped,
        PvrEventKind::RecordingRemoved,
        PvrEventKind::DiskSpaceAlert,
        PvrEventKind::RemoteFailure,
        PvrEventKind::RemoteConflict,
    ];
}

/// What this core tells its listeners.
///
/// Local and remote paths produce the same variants; callers never need to
/// know which one served a request.
#[derive(Debug, Clone, PartialEq)]
pub enum PvrEvent {
    RecordingRequested { job_id: Option<JobId>, origin: Origin },
    RequestFailed { reason: FailureReason, message: String, origin: Origin },
    /// Generic "reload your lists" notification.
    RecordingsRefreshed,
    RequestConflicted {
        job_id: JobId,
        /// Candidates whose fulfilment is NONE or PARTIAL.
        unscheduled: Vec<Task>,
        groups: Vec<ConflictGroup>,
    },
    TaskAboutToStart { task: Box<Task> },
    TaskAboutToStartConflicted {
        task: Box<Task>,
        at: DateTime<Utc>,
        conflicts: Vec<Task>,
    },
    TaskChangedConflicted {
        unscheduled: Vec<Task>,
        groups: Vec<ConflictGroup>,
    },
    TaskStarted { task_id: TaskId },
    TaskStopped { task_id: TaskId },
    RecordingRemoved { task_id: Option<TaskId>, origin: Origin },
    DiskSpaceAlert { percent_used: u8 },
    /// Shown through the remote dialog path, naming the server.
    RemoteFailure { server_name: String, message: String },
    RemoteConflict { server_name: String, event_id: Option<EventId>, message: String },
}

impl PvrEvent {
    pub fn kind(&self) -> PvrEventKind {
        match self {
            PvrEvent::RecordingRequested { .. } => PvrEventKind::RecordingRequested,
            PvrEvent::RequestFailed { .. } => PvrEventKind::RequestFailed,
            PvrEvent::RecordingsRefreshed => PvrEventKind::RecordingsRefreshed,
            PvrEvent::RequestConflicted { .. } => PvrEventKind::RequestConflicted,
            PvrEvent::TaskAboutToStart { .. } => PvrEventKind::TaskAboutToStart,
            PvrEvent::TaskAboutToStartConflicted { .. } => {
                PvrEventKind::TaskAboutToStartConflicted
            }
            PvrEvent::TaskChangedConflicted { .. } => PvrEventKind::TaskChangedConflicted,
            PvrEvent::TaskStarted { .. } => PvrEventKind::TaskStarted,
            PvrEvent::TaskStopped { .. } => PvrEventKind::TaskStopped,
            PvrEvent::RecordingRemoved { .. } => PvrEventKind::RecordingRemoved,
            PvrEvent::DiskSpaceAlert { .. } => PvrEventKind::DiskSpaceAlert,
            PvrEvent::RemoteFailure { .. } => PvrEventKind::RemoteFailure,
            PvrEvent::RemoteConflict { .. } => PvrEventKind::RemoteConflict,
        }
    }
}
