//! ConflictOrchestrator - overlap query の fan-out / fan-in と conflict 判定
//!
//! # 状態機械（job-completed 1 件ごと）
//! 1. job の Task を取得し、`expected = tasks.len()` を先に snapshot する
//! 2. overlap query を 1 件ずつ発行（前の結果が届いてから次を発行）
//! 3. 結果は fulfilment が NONE / PARTIAL のものだけ候補にし、task id で重複排除
//! 4. `received == expected` になった時点で一度だけ結論を出す
//!
//! 相関は Store が返す `QueryHandle` で行うので、到着順には依存しません。
//! 知らない handle（すでに結論済みの round など）は無視します。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{JobId, PvrEvent, QueryHandle, Task, TaskId};
use crate::ports::{ConflictStrategy, SchedulerStore};

/// Per-job correlation state.
#[derive(Debug)]
struct OverlapRound {
    job_id: JobId,
    tasks: Vec<Task>,
    expected: usize,
    received: usize,
    next: usize,
    seen: HashSet<TaskId>,
    candidates: Vec<Task>,
}

impl OverlapRound {
    fn new(job_id: JobId, tasks: Vec<Task>) -> Self {
        Self {
            job_id,
            expected: tasks.len(),
            tasks,
            received: 0,
            next: 0,
            seen: HashSet::new(),
            candidates: Vec::new(),
        }
    }

    fn absorb(&mut self, overlaps: Vec<Task>) {
        for task in overlaps {
            if task.fulfillment.is_degraded() && self.seen.insert(task.task_id) {
                self.candidates.push(task);
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.received >= self.expected
    }
}

pub struct ConflictOrchestrator {
    store: Arc<dyn SchedulerStore>,
    strategy: Arc<dyn ConflictStrategy>,
    rounds: Mutex<HashMap<QueryHandle, OverlapRound>>,
}

impl ConflictOrchestrator {
    pub fn new(store: Arc<dyn SchedulerStore>, strategy: Arc<dyn ConflictStrategy>) -> Self {
        Self {
            store,
            strategy,
            rounds: Mutex::new(HashMap::new()),
        }
    }

    /// Start checking a freshly completed job.
    ///
    /// Returns the conclusion right away only when nothing had to be awaited.
    pub async fn begin(&self, job_id: JobId, tasks: Vec<Task>) -> Option<PvrEvent> {
        debug!(job_id = %job_id, tasks = tasks.len(), "starting overlap round");
        self.advance(OverlapRound::new(job_id, tasks)).await
    }

    pub async fn on_overlap_ready(&self, handle: QueryHandle, tasks: Vec<Task>) -> Option<PvrEvent> {
        let mut round = self.take_round(handle)?;
        round.absorb(tasks);
        round.received += 1;
        self.advance(round).await
    }

    /// A failed overlap query still counts towards the round.
    pub async fn on_overlap_failed(&self, handle: QueryHandle, message: &str) -> Option<PvrEvent> {
        let mut round = self.take_round(handle)?;
        warn!(job_id = %round.job_id, handle = %handle, reason = message, "overlap query failed");
        round.received += 1;
        self.advance(round).await
    }

    /// Rounds still waiting on the Store.
    pub fn pending_rounds(&self) -> usize {
        self.rounds.lock().len()
    }

    /// Imminent-task check at `now + lead`.
    pub async fn about_to_start(
        &self,
        task: Task,
        now: DateTime<Utc>,
        lead: chrono::Duration,
    ) -> PvrEvent {
        let at = now + lead;
        match self.strategy.handle_conflicts_for_time(at).await {
            Ok(conflicts) if conflicts.len() > 1 => {
                info!(task_id = %task.task_id, conflicts = conflicts.len(), %at, "task about to start with conflicts");
                PvrEvent::TaskAboutToStartConflicted {
                    task: Box::new(task),
                    at,
                    conflicts,
                }
            }
            Ok(_) => PvrEvent::TaskAboutToStart {
                task: Box::new(task),
            },
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "time conflict check failed");
                PvrEvent::TaskAboutToStart {
                    task: Box::new(task),
                }
            }
        }
    }

    /// Fulfilment of scheduled tasks changed for a reason other than our own add.
    pub async fn tasks_changed(&self, tasks: Vec<Task>) -> Option<PvrEvent> {
        let mut seen = HashSet::new();
        let unscheduled: Vec<Task> = tasks
            .into_iter()
            .filter(|t| t.fulfillment.is_degraded() && seen.insert(t.task_id))
            .collect();
        if unscheduled.is_empty() {
            return None;
        }
        match self
            .strategy
            .handle_conflicts_for_tasks(unscheduled.clone())
            .await
        {
            Ok(groups) if !groups.is_empty() => {
                Some(PvrEvent::TaskChangedConflicted { unscheduled, groups })
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "conflict strategy failed for changed tasks");
                None
            }
        }
    }

    fn take_round(&self, handle: QueryHandle) -> Option<OverlapRound> {
        let round = self.rounds.lock().remove(&handle);
        if round.is_none() {
            debug!(handle = %handle, "ignoring overlap result for unknown handle");
        }
        round
    }

    /// Issue the next query, or conclude once every reply is counted.
    async fn advance(&self, mut round: OverlapRound) -> Option<PvrEvent> {
        loop {
            if round.is_complete() {
                return Some(self.conclude(round).await);
            }
            let Some(task_id) = round.tasks.get(round.next).map(|t| t.task_id) else {
                // 発行済みなのに結果が足りない状態にはならない
                warn!(job_id = %round.job_id, "overlap round ran out of tasks");
                return Some(self.conclude(round).await);
            };
            round.next += 1;
            match self.store.request_overlaps(task_id).await {
                Ok(handle) => {
                    debug!(job_id = %round.job_id, task_id = %task_id, handle = %handle, "overlap query issued");
                    self.rounds.lock().insert(handle, round);
                    return None;
                }
                Err(e) => {
                    warn!(job_id = %round.job_id, task_id = %task_id, error = %e, "overlap query rejected");
                    round.received += 1;
                }
            }
        }
    }

    async fn conclude(&self, round: OverlapRound) -> PvrEvent {
        let OverlapRound {
            job_id, candidates, ..
        } = round;
        if candidates.is_empty() {
            debug!(job_id = %job_id, "no conflicts");
            return PvrEvent::RecordingsRefreshed;
        }
        match self
            .strategy
            .handle_conflicts_for_tasks(candidates.clone())
            .await
        {
            Ok(groups) if !groups.is_empty() => {
                info!(job_id = %job_id, unscheduled = candidates.len(), groups = groups.len(), "recording request conflicted");
                PvrEvent::RequestConflicted {
                    job_id,
                    unscheduled: candidates,
                    groups,
                }
            }
            // strategy grouped nothing: no user choice to make
            Ok(_) => PvrEvent::RecordingsRefreshed,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "conflict strategy failed");
                PvrEvent::RecordingsRefreshed
            }
        }
    }
}
