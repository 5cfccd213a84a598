//! IdGenerator port - ID 生成の抽象化
//!
//! Store 実装が Job / Task / overlap query handle を払い出すときに使います。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock の時刻を timestamp 部分に使う）

use crate::domain::ids::{JobId, QueryHandle, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は Store 側で使う ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;

    fn generate_task_id(&self) -> TaskId;

    fn generate_query_handle(&self) -> QueryHandle;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// FixedClock を渡すと timestamp 部分が固定され、ランダム部分だけが変わります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next_ulid())
    }

    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_query_handle(&self) -> QueryHandle {
        QueryHandle::from(self.next_ulid())
    }
}
