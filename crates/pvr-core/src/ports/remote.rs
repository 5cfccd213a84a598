//! RemoteRecorder port - whole-home PVR (home network 上の別デバイス)
//!
//! 結果は `RemoteEvent` として別チャネルで届き、manager が `PvrEvent` に
//! demultiplex します。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{
    EventId, Padding, RemoteError, RemoteEvent, SeriesId, ServerId, ServiceId, TaskId,
};

/// Request shape understood by the remote recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecordingRequest {
    pub event_id: EventId,
    pub series_id: Option<SeriesId>,
    pub service_id: ServiceId,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub padding: Padding,
    pub keep: bool,
}

/// A recorder visible on the home network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServer {
    pub server_id: ServerId,
    pub name: String,
    pub is_local: bool,
}

#[async_trait]
pub trait RemoteRecorder: Send + Sync {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<RemoteEvent>;

    fn unsubscribe(&self);

    /// Is the active recording server this device?
    async fn is_local_server(&self) -> bool;

    async fn current_server_id(&self) -> Option<ServerId>;

    /// Display name used by the remote dialog path.
    async fn server_name(&self, server_id: &ServerId) -> String;

    async fn request_event_recording(
        &self,
        server_id: &ServerId,
        request: RemoteRecordingRequest,
    ) -> Result<(), RemoteError>;

    async fn request_series_recording(
        &self,
        server_id: &ServerId,
        request: RemoteRecordingRequest,
    ) -> Result<(), RemoteError>;

    async fn delete_task(
        &self,
        server_id: &ServerId,
        task_id: TaskId,
        event_id: Option<EventId>,
    ) -> Result<(), RemoteError>;

    /// Delete the default-location schedule for a series.
    async fn delete_schedule(
        &self,
        server_id: &ServerId,
        series_id: &SeriesId,
    ) -> Result<(), RemoteError>;

    async fn save_bookmark(
        &self,
        server_id: &ServerId,
        task_id: TaskId,
        position_ms: u64,
    ) -> Result<(), RemoteError>;

    async fn get_bookmark(&self, server_id: &ServerId, task_id: TaskId) -> Result<u64, RemoteError>;

    async fn local_server_name(&self) -> String;

    async fn set_local_server_name(&self, name: &str) -> Result<(), RemoteError>;

    async fn list_servers(&self) -> Vec<RemoteServer>;
}
