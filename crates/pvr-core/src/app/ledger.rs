//! SubmissionLedger - この core 自身が submit した job の集合
//!
//! `TasksChanged { caused_by }` が自分の add の副作用なら一度だけ無視する。
//! 単一スロットではなく集合なので、通知が届く前に次の job を add しても取り違えない。
//!
//! エントリが消えるのは次のときだけ:
//! - `consume`（最初の tasks-changed）
//! - `forget`（add 失敗 / job 削除）
//! - 容量を超えたとき、古いものから

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::domain::JobId;

/// Jobs whose Store never reports a fulfilment change are evicted past this.
const CAPACITY: usize = 256;

#[derive(Debug)]
pub struct SubmissionLedger {
    jobs: Mutex<VecDeque<JobId>>,
    capacity: usize,
}

impl Default for SubmissionLedger {
    fn default() -> Self {
        Self::with_capacity(CAPACITY)
    }
}

impl SubmissionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, job_id: JobId) {
        let mut jobs = self.jobs.lock();
        if jobs.contains(&job_id) {
            return;
        }
        if jobs.len() == self.capacity {
            jobs.pop_front();
        }
        jobs.push_back(job_id);
    }

    /// Consume-once. Returns whether `job_id` was ours.
    pub fn consume(&self, job_id: JobId) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.iter().position(|j| *j == job_id) {
            Some(i) => {
                jobs.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.jobs.lock().contains(&job_id)
    }

    pub fn forget(&self, job_id: JobId) {
        self.consume(job_id);
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn job() -> JobId {
        JobId::from_ulid(Ulid::new())
    }

    #[test]
    fn consumed_once_per_job() {
        let ledger = SubmissionLedger::new();
        let first = job();
        let second = job();
        ledger.record(first);
        ledger.record(second);

        // second job's notification arrives first; first is still tracked
        assert!(ledger.consume(second));
        assert!(ledger.consume(first));
        assert!(!ledger.consume(first));
        assert!(ledger.is_empty());
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let ledger = SubmissionLedger::with_capacity(2);
        let (a, b, c) = (job(), job(), job());
        ledger.record(a);
        ledger.record(b);
        ledger.record(b);
        ledger.record(c);

        assert_eq!(ledger.len(), 2);
        assert!(!ledger.contains(a));
        assert!(ledger.contains(b));
        assert!(ledger.contains(c));
    }
}
