//! MarkerStore 実装
//!
//! - `InMemoryMarkers`: テスト / デモ用
//! - `JsonFileMarkers`: JSON 配列としてファイルに永続化（再起動をまたいで残る）

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::domain::JobId;
use crate::ports::MarkerStore;

#[derive(Debug, Default)]
pub struct InMemoryMarkers {
    marked: Mutex<HashSet<JobId>>,
}

impl InMemoryMarkers {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarkerStore for InMemoryMarkers {
    async fn mark(&self, job_id: JobId) {
        self.marked.lock().insert(job_id);
    }

    async fn take(&self, job_id: JobId) -> bool {
        self.marked.lock().remove(&job_id)
    }
}

/// Markers persisted as a JSON array of job ids.
///
/// I/O failures are logged; the in-memory set stays authoritative for the
/// running process.
pub struct JsonFileMarkers {
    path: PathBuf,
    marked: tokio::sync::Mutex<HashSet<JobId>>,
}

impl JsonFileMarkers {
    /// Load existing markers; a missing or unreadable file starts empty.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let marked = match tokio::fs::read_to_string(&path).await {
            Ok(json) => serde_json::from_str::<Vec<JobId>>(&json)
                .map(|ids| ids.into_iter().collect())
                .unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e, "ignoring malformed marker file");
                    HashSet::new()
                }),
            Err(_) => HashSet::new(),
        };
        Self {
            path,
            marked: tokio::sync::Mutex::new(marked),
        }
    }

    async fn persist(&self, marked: &HashSet<JobId>) {
        let mut ids: Vec<&JobId> = marked.iter().collect();
        ids.sort();
        let json = match serde_json::to_string(&ids) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to encode markers");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.path, json).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist markers");
        }
    }
}

#[async_trait]
impl MarkerStore for JsonFileMarkers {
    async fn mark(&self, job_id: JobId) {
        let mut marked = self.marked.lock().await;
        if marked.insert(job_id) {
            self.persist(&marked).await;
        }
    }

    async fn take(&self, job_id: JobId) -> bool {
        let mut marked = self.marked.lock().await;
        let present = marked.remove(&job_id);
        if present {
            self.persist(&marked).await;
        }
        present
    }
}
