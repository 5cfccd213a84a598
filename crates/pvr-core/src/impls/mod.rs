//! Port 実装（in-memory / file-backed）
//!
//! デモ CLI とテストで使う adapter 群です。本番の Store / remote recorder は
//! この crate の外で同じ trait を実装します。

pub mod grouping;
pub mod guide;
pub mod markers;
pub mod memory_remote;
pub mod memory_store;

pub use grouping::OverlapGroupingStrategy;
pub use guide::StaticGuide;
pub use markers::{InMemoryMarkers, JsonFileMarkers};
pub use memory_remote::ScriptedRemote;
pub use memory_store::InMemoryStore;
