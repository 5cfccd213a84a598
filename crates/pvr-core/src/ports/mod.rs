//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部の collaborator はすべて trait の向こう側にいます。
//!
//! # 設計原則
//! - Store が source of truth（正本）。core のキャッシュは最適化にすぎない
//! - mutating call は即座に返り、結果はイベントチャネルで届く
//! - remote recorder の結果も同じ形で届くので、上位は経路を意識しない

pub mod clock;
pub mod conflict;
pub mod epg;
pub mod id_generator;
pub mod markers;
pub mod remote;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::conflict::ConflictStrategy;
pub use self::epg::EpgLookup;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::markers::MarkerStore;
pub use self::remote::{RemoteRecorder, RemoteRecordingRequest, RemoteServer};
pub use self::store::{EntryUpdate, SchedulerStore, TaskUpdate};
