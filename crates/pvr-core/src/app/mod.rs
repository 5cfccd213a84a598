//! App - アプリケーション層
//!
//! ports を組み合わせて PVR の振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **PvrManagerBuilder**: collaborator のワイヤリングと起動時検証
//! - **PvrManager**: lifecycle 操作、query、status、イベントの demultiplex
//! - **EventPump**: Store / remote のチャネルを manager に流すループ
//! - **StoreQueries / RecordingCache**: 読み取り側
//! - **ConflictOrchestrator**: overlap query の集約と conflict 通知
//! - **RecordingBackend**: local / remote の送り先

pub mod backend;
pub mod builder;
pub mod cache;
pub mod ledger;
pub mod listeners;
pub mod manager;
pub mod orchestrator;
pub mod pump;
pub mod queries;

pub use self::backend::{
    CancelOutcome, EventRequest, LocalBackend, RecordingBackend, RemoteBackend, Submission,
};
pub use self::builder::{BuildError, PvrManagerBuilder};
pub use self::cache::RecordingCache;
pub use self::ledger::SubmissionLedger;
pub use self::listeners::{ListenerRegistry, PvrListener};
pub use self::manager::{DeleteOutcome, PvrManager};
pub use self::orchestrator::ConflictOrchestrator;
pub use self::pump::EventPump;
pub use self::queries::StoreQueries;
