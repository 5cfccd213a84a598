//! SchedulerStore port - 正本（source of truth）となる scheduler + content database
//!
//! すべての mutating call は即座に返り（validation エラーだけはその場で返る）、
//! 結果は `subscribe()` で得たチャネルに `StoreEvent` として後から届きます。

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{
    Job, JobId, JobRequest, Query, QueryHandle, StoreError, StoreEvent, Task, TaskId,
};

/// Partial update of a Task while it is still live in the scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub keep: Option<bool>,
}

/// Partial update of a completed content entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryUpdate {
    pub keep: Option<bool>,
    pub bookmark_ms: Option<u64>,
}

/// SchedulerStore は Job / Task / content entry の正本
///
/// # 設計原則
/// - Task の object state を変えられるのは Store だけ
/// - query は `page_size` 件ずつ返す（`Query::limit` / `Query::offset` で cursor を表現）
/// - overlap query は handle を即座に返し、結果は `OverlapReady` / `OverlapFailed` で届く
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// Register for notifications. Calling again while registered returns an
    /// already-closed receiver.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent>;

    /// Drop the notification channel. No-op when not registered.
    fn unsubscribe(&self);

    async fn add_job(&self, request: JobRequest) -> Result<JobId, StoreError>;

    async fn stop_task(&self, task_id: TaskId) -> Result<(), StoreError>;

    async fn delete_job(&self, job_id: JobId) -> Result<(), StoreError>;

    /// Remove a task's content entry.
    async fn delete_task(&self, task_id: TaskId) -> Result<(), StoreError>;

    async fn update_task(&self, task_id: TaskId, update: TaskUpdate) -> Result<(), StoreError>;

    async fn update_entry(&self, task_id: TaskId, update: EntryUpdate) -> Result<(), StoreError>;

    async fn query_jobs(&self, query: &Query) -> Result<Vec<Job>, StoreError>;

    /// Tasks, including those that rolled into the content store.
    async fn query_tasks(&self, query: &Query) -> Result<Vec<Task>, StoreError>;

    async fn count_tasks(&self, query: &Query) -> Result<usize, StoreError>;

    async fn request_overlaps(&self, task_id: TaskId) -> Result<QueryHandle, StoreError>;
}
