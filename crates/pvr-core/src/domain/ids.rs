//! Domain identifiers (strongly-typed IDs).
//!
//! Store が払い出す ID は ULID ベースで、Phantom type パターンで型を分けています。
//! `JobId` と `TaskId` と `QueryHandle` は同じ表現を持ちますが、混同はできません。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: 払い出し順に並ぶ（"most recent" の判定に使える）
//! - **分散生成可能**: home network 上の複数デバイスで衝突しない

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"job-", "task-", "query-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData で、実行時にはメモリを消費しません。
#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

// derive だと T にも境界が付いてしまうので手で実装する
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ulid == other.ulid
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ulid.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ulid.cmp(&other.ulid)
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Job のマーカー型
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Task のマーカー型
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Overlap query のマーカー型
pub enum Query {}

impl IdMarker for Query {
    fn prefix() -> &'static str {
        "query-"
    }
}

/// Identifier of a Job (one scheduling request).
pub type JobId = Id<Job>;

/// Identifier of a Task (one concrete recording instance).
pub type TaskId = Id<Task>;

/// Opaque handle the Store hands back for an asynchronous overlap query.
pub type QueryHandle = Id<Query>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        let job = JobId::from_ulid(Ulid::new());
        let task = TaskId::from_ulid(Ulid::new());
        let handle = QueryHandle::from_ulid(Ulid::new());

        assert!(job.to_string().starts_with("job-"));
        assert!(task.to_string().starts_with("task-"));
        assert!(handle.to_string().starts_with("query-"));
        // let _: JobId = task; // <- does not compile
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = JobId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = JobId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }

    #[test]
    fn ids_serialize_as_plain_ulid() {
        let ulid = Ulid::new();
        let task_id = TaskId::from_ulid(ulid);

        let serialized = serde_json::to_string(&task_id).unwrap();
        assert_eq!(serialized, format!("\"{ulid}\""));
        let back: TaskId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(task_id, back);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<JobId>(), size_of::<Ulid>());
        assert_eq!(size_of::<QueryHandle>(), 16);
    }
}
