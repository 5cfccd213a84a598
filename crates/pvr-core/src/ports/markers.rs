//! MarkerStore port - "job X was added by this device" の永続フラグ
//!
//! add を発行した直後に `mark` し、job-completed で `take` する（read-and-clear）。
//! marker がない job は同じ backend を共有する別デバイスが追加したもの。

use async_trait::async_trait;

use crate::domain::JobId;

#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn mark(&self, job_id: JobId);

    /// Read and clear. Returns whether the marker was present.
    async fn take(&self, job_id: JobId) -> bool;
}
