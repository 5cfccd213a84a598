//! OverlapGroupingStrategy - tuner 数だけを見る素朴な conflict policy
//!
//! 候補ごとに、時間が重なる live な録画を 1 グループにまとめる。
//! すでに前のグループに入った候補は新しいグループを作らない。

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::StoreQueries;
use crate::domain::{
    ConflictGroup, Field, Filter, ObjectState, PvrError, Query, Task, TaskId, TaskKind, Value,
};
use crate::ports::ConflictStrategy;

pub struct OverlapGroupingStrategy {
    queries: StoreQueries,
    tuners: usize,
}

impl OverlapGroupingStrategy {
    pub fn new(queries: StoreQueries, tuners: usize) -> Self {
        Self { queries, tuners }
    }

    async fn live_recordings(&self) -> Vec<Task> {
        let filter = Filter::le(Field::ObjectState, Value::State(ObjectState::Processing))
            .and(Filter::eq(Field::TaskType, Value::TaskKind(TaskKind::Recording)));
        self.queries.tasks(Query::new(filter)).await
    }
}

#[async_trait]
impl ConflictStrategy for OverlapGroupingStrategy {
    async fn handle_conflicts_for_tasks(
        &self,
        tasks: Vec<Task>,
    ) -> Result<Vec<ConflictGroup>, PvrError> {
        let live = self.live_recordings().await;
        let mut grouped: HashSet<TaskId> = HashSet::new();
        let mut groups = Vec::new();

        for candidate in tasks {
            if grouped.contains(&candidate.task_id) {
                continue;
            }
            let mut members: Vec<Task> = live
                .iter()
                .filter(|t| t.task_id != candidate.task_id && t.overlaps(&candidate))
                .cloned()
                .collect();
            members.insert(0, candidate);
            grouped.extend(members.iter().map(|t| t.task_id));
            groups.push(ConflictGroup::new(members));
        }
        Ok(groups)
    }

    async fn handle_conflicts_for_time(&self, at: DateTime<Utc>) -> Result<Vec<Task>, PvrError> {
        let covering: Vec<Task> = self
            .live_recordings()
            .await
            .into_iter()
            .filter(|t| t.start_time <= at && at < t.end_time)
            .collect();
        if covering.len() > self.tuners {
            Ok(covering)
        } else {
            Ok(Vec::new())
        }
    }
}
