//! ScriptedRemote - テスト / デモ用の RemoteRecorder
//!
//! 受け付けた request は即座に `RemoteEvent` として返す。
//! `fail_next` / `conflict_next` で次の 1 回だけ失敗を仕込める。

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::domain::{EventId, RemoteError, RemoteEvent, SeriesId, ServerId, TaskId};
use crate::ports::{RemoteRecorder, RemoteRecordingRequest, RemoteServer};

struct State {
    local_name: String,
    is_local: bool,
    current: Option<ServerId>,
    servers: Vec<RemoteServer>,
    sender: Option<mpsc::UnboundedSender<RemoteEvent>>,
    fail_next: Option<String>,
    conflict_next: Option<String>,
    calls: Vec<String>,
    requests: Vec<RemoteRecordingRequest>,
    bookmarks: HashMap<TaskId, u64>,
}

impl State {
    fn emit(&self, event: RemoteEvent) {
        if let Some(tx) = &self.sender {
            let _ = tx.send(event);
        }
    }

    fn take_failure(&mut self) -> Result<(), RemoteError> {
        match self.fail_next.take() {
            Some(message) => Err(RemoteError::new(message)),
            None => Ok(()),
        }
    }
}

pub struct ScriptedRemote {
    state: Mutex<State>,
}

impl ScriptedRemote {
    /// Starts as the active (local) recording server.
    pub fn new(local_name: &str) -> Self {
        Self {
            state: Mutex::new(State {
                local_name: local_name.to_string(),
                is_local: true,
                current: None,
                servers: Vec::new(),
                sender: None,
                fail_next: None,
                conflict_next: None,
                calls: Vec::new(),
                requests: Vec::new(),
                bookmarks: HashMap::new(),
            }),
        }
    }

    /// Make `server` the active recording server; the device stops being local.
    pub fn use_server(&self, server_id: ServerId, name: &str) {
        let mut st = self.state.lock();
        st.is_local = false;
        if !st.servers.iter().any(|s| s.server_id == server_id) {
            st.servers.push(RemoteServer {
                server_id: server_id.clone(),
                name: name.to_string(),
                is_local: false,
            });
        }
        st.current = Some(server_id);
    }

    pub fn use_local(&self) {
        let mut st = self.state.lock();
        st.is_local = true;
        st.current = None;
    }

    pub fn add_server(&self, server: RemoteServer) {
        self.state.lock().servers.push(server);
    }

    /// The next fallible call returns this error.
    pub fn fail_next(&self, message: &str) {
        self.state.lock().fail_next = Some(message.to_string());
    }

    /// The next schedule request is accepted, then reported conflicted.
    pub fn conflict_next(&self, message: &str) {
        self.state.lock().conflict_next = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Event and series requests accepted so far.
    pub fn requests(&self) -> Vec<RemoteRecordingRequest> {
        self.state.lock().requests.clone()
    }

    pub fn emit(&self, event: RemoteEvent) {
        self.state.lock().emit(event);
    }

    fn schedule(
        &self,
        verb: &str,
        server_id: &ServerId,
        request: &RemoteRecordingRequest,
    ) -> Result<(), RemoteError> {
        let mut st = self.state.lock();
        st.take_failure()?;
        st.calls
            .push(format!("{verb} {server_id} {}", request.event_id));
        st.requests.push(request.clone());
        let event_id = Some(request.event_id.clone());
        let event = match st.conflict_next.take() {
            Some(message) => RemoteEvent::ScheduleCreateFailed {
                server_id: server_id.clone(),
                event_id,
                conflicted: true,
                message,
            },
            None => RemoteEvent::ScheduleCreated {
                server_id: server_id.clone(),
                event_id,
            },
        };
        st.emit(event);
        Ok(())
    }
}

#[async_trait]
impl RemoteRecorder for ScriptedRemote {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<RemoteEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut st = self.state.lock();
        if st.sender.as_ref().is_none_or(|s| s.is_closed()) {
            st.sender = Some(tx);
        }
        rx
    }

    fn unsubscribe(&self) {
        self.state.lock().sender = None;
    }

    async fn is_local_server(&self) -> bool {
        self.state.lock().is_local
    }

    async fn current_server_id(&self) -> Option<ServerId> {
        self.state.lock().current.clone()
    }

    async fn server_name(&self, server_id: &ServerId) -> String {
        self.state
            .lock()
            .servers
            .iter()
            .find(|s| &s.server_id == server_id)
            .map_or_else(|| server_id.to_string(), |s| s.name.clone())
    }

    async fn request_event_recording(
        &self,
        server_id: &ServerId,
        request: RemoteRecordingRequest,
    ) -> Result<(), RemoteError> {
        self.schedule("event", server_id, &request)
    }

    async fn request_series_recording(
        &self,
        server_id: &ServerId,
        request: RemoteRecordingRequest,
    ) -> Result<(), RemoteError> {
        self.schedule("series", server_id, &request)
    }

    async fn delete_task(
        &self,
        server_id: &ServerId,
        task_id: TaskId,
        event_id: Option<EventId>,
    ) -> Result<(), RemoteError> {
        let mut st = self.state.lock();
        st.take_failure()?;
        let event = event_id.map(|e| e.to_string()).unwrap_or_default();
        st.calls
            .push(format!("delete-task {server_id} {task_id} {event}"));
        st.emit(RemoteEvent::TaskRemoved {
            server_id: server_id.clone(),
            task_id: Some(task_id),
        });
        Ok(())
    }

    async fn delete_schedule(
        &self,
        server_id: &ServerId,
        series_id: &SeriesId,
    ) -> Result<(), RemoteError> {
        let mut st = self.state.lock();
        st.take_failure()?;
        st.calls
            .push(format!("delete-schedule {server_id} {series_id}"));
        st.emit(RemoteEvent::ScheduleDeleted {
            server_id: server_id.clone(),
            series_id: Some(series_id.clone()),
        });
        Ok(())
    }

    async fn save_bookmark(
        &self,
        _server_id: &ServerId,
        task_id: TaskId,
        position_ms: u64,
    ) -> Result<(), RemoteError> {
        let mut st = self.state.lock();
        st.take_failure()?;
        st.bookmarks.insert(task_id, position_ms);
        Ok(())
    }

    async fn get_bookmark(&self, _server_id: &ServerId, task_id: TaskId) -> Result<u64, RemoteError> {
        let mut st = self.state.lock();
        st.take_failure()?;
        Ok(st.bookmarks.get(&task_id).copied().unwrap_or(0))
    }

    async fn local_server_name(&self) -> String {
        self.state.lock().local_name.clone()
    }

    async fn set_local_server_name(&self, name: &str) -> Result<(), RemoteError> {
        let mut st = self.state.lock();
        st.take_failure()?;
        if name.trim().is_empty() {
            return Err(RemoteError::new("server name must not be blank"));
        }
        st.local_name = name.to_string();
        Ok(())
    }

    async fn list_servers(&self) -> Vec<RemoteServer> {
        self.state.lock().servers.clone()
    }
}
