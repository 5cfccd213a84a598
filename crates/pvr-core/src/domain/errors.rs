//! Errors - エラー型と分類

use thiserror::Error;

use super::events::FailureReason;

/// ErrorKind は失敗の運用分類
///
/// - Validation: 呼び出し側のパラメータ不正（即時に返す）
/// - Submission: Store が add を拒否した
/// - Remote: whole-home recorder / ネットワーク障害
/// - Internal: それ以外（conflict strategy の失敗など）
///
/// Conflict と partial fulfilment はエラーではないのでここには現れない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Submission,
    Remote,
    Internal,
}

/// Errors reported by a Store implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            StoreError::BadParameter(_) => FailureReason::BadParameter,
            _ => FailureReason::Generic,
        }
    }
}

/// Errors reported by the remote recorder subsystem.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The error of every fallible core operation.
#[derive(Debug, Error)]
pub enum PvrError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("store rejected request: {0}")]
    Store(#[from] StoreError),

    #[error("remote recorder {server}: {source}")]
    Remote {
        server: String,
        #[source]
        source: RemoteError,
    },

    #[error("no recording found for {0}")]
    NotFound(String),

    #[error("not supported for remote recordings: {0}")]
    Unsupported(&'static str),

    #[error("conflict strategy failed: {0}")]
    Strategy(String),
}

impl PvrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PvrError::InvalidRequest(_) | PvrError::NotFound(_) | PvrError::Unsupported(_) => {
                ErrorKind::Validation
            }
            PvrError::Store(StoreError::BadParameter(_)) => ErrorKind::Validation,
            PvrError::Store(_) => ErrorKind::Submission,
            PvrError::Remote { .. } => ErrorKind::Remote,
            PvrError::Strategy(_) => ErrorKind::Internal,
        }
    }

    pub fn remote(server: impl Into<String>, source: RemoteError) -> Self {
        PvrError::Remote {
            server: server.into(),
            source,
        }
    }
}
