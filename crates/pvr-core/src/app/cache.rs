//! RecordingCache - unique event id → RecordingStatus の高速参照
//!
//! # 不変条件
//! - キャッシュは最適化にすぎず、正本ではない
//! - 書き込みはすべて、その瞬間に Store から読んだ Task から導出する
//! - エントリがなければ UNSCHEDULED（壊れても `rebuild()` で自己修復）

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::queries::StoreQueries;
use crate::domain::{EventId, RecordingStatus, Task, TaskId, UniqueEventId, status_of};
use crate::ports::EpgLookup;

pub struct RecordingCache {
    queries: StoreQueries,
    epg: Arc<dyn EpgLookup>,
    entries: DashMap<UniqueEventId, RecordingStatus>,
    /// Which entry a task last wrote, so a vanished task can be evicted.
    by_task: DashMap<TaskId, UniqueEventId>,
}

impl RecordingCache {
    pub fn new(queries: StoreQueries, epg: Arc<dyn EpgLookup>) -> Self {
        Self {
            queries,
            epg,
            entries: DashMap::new(),
            by_task: DashMap::new(),
        }
    }

    /// Resynchronise from every BOOKED/PROCESSING recording.
    pub async fn rebuild(&self) {
        let tasks = self.queries.cacheable_recordings().await;
        self.entries.clear();
        self.by_task.clear();
        for task in &tasks {
            self.write(task).await;
        }
        info!(tasks = tasks.len(), entries = self.entries.len(), "recording cache rebuilt");
    }

    /// Re-read one task and rewrite its entry.
    pub async fn update_one(&self, task_id: TaskId) {
        match self.queries.task_by_id(task_id).await {
            Some(task) => self.write(&task).await,
            None => {
                if let Some((_, key)) = self.by_task.remove(&task_id) {
                    self.entries.remove(&key);
                    debug!(task_id = %task_id, unique_event_id = %key, "evicted vanished task");
                }
            }
        }
    }

    pub fn lookup(&self, unique_event_id: &UniqueEventId) -> RecordingStatus {
        self.entries
            .get(unique_event_id)
            .map(|entry| *entry.value())
            .unwrap_or(RecordingStatus::Unscheduled)
    }

    pub fn is_scheduled(&self, unique_event_id: &UniqueEventId) -> bool {
        self.lookup(unique_event_id).is_scheduled_or_active()
    }

    /// Status of an EPG event, resolved through the guide.
    pub async fn status_by_event(&self, event_id: &EventId) -> RecordingStatus {
        match self.epg.event_by_id(event_id).await {
            Some(event) => self.lookup(&event.unique_event_id),
            None => RecordingStatus::Unscheduled,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn write(&self, task: &Task) {
        let Some(event_id) = task.event_id.as_ref() else {
            return;
        };
        let Some(event) = self.epg.event_by_id(event_id).await else {
            debug!(task_id = %task.task_id, event_id = %event_id, "event not in guide; skipping cache entry");
            return;
        };
        let key = event.unique_event_id;
        let status = status_of(task);
        if status == RecordingStatus::Unscheduled {
            self.entries.remove(&key);
            self.by_task.remove(&task.task_id);
        } else {
            self.entries.insert(key.clone(), status);
            self.by_task.insert(task.task_id, key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::fixtures::timed_task;
    use crate::domain::{EpgEvent, JobType, ObjectState, ServiceId};
    use crate::impls::{InMemoryStore, StaticGuide};
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    struct Fixture {
        store: Arc<InMemoryStore>,
        guide: Arc<StaticGuide>,
        cache: RecordingCache,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new(clock));
        let guide = Arc::new(StaticGuide::new());
        let cache = RecordingCache::new(StoreQueries::new(store.clone(), 10), guide.clone());
        Fixture {
            store,
            guide,
            cache,
        }
    }

    fn task_for(f: &Fixture, event: &str, state: ObjectState, job_type: JobType) -> Task {
        let mut t = timed_task(state, job_type, 0, 30);
        t.event_id = Some(EventId::new(event));
        f.guide.insert(EpgEvent {
            event_id: EventId::new(event),
            unique_event_id: UniqueEventId::new(format!("u-{event}")),
            service_id: ServiceId::new("svc-1"),
            title: event.to_string(),
            start_time: t.start_time,
            end_time: t.end_time,
            series_id: None,
            season_id: None,
            series_name: None,
        });
        f.store.insert_task(t.clone());
        t
    }

    #[tokio::test]
    async fn rebuild_matches_status_of_live_tasks() {
        let f = fixture();
        let booked = task_for(&f, "a", ObjectState::Booked, JobType::Event);
        let active = task_for(&f, "b", ObjectState::Processing, JobType::Series);
        task_for(&f, "c", ObjectState::Error, JobType::Event);
        task_for(&f, "d", ObjectState::Deleted, JobType::Event);

        f.cache.rebuild().await;

        assert_eq!(f.cache.lookup(&UniqueEventId::new("u-a")), status_of(&booked));
        assert_eq!(f.cache.lookup(&UniqueEventId::new("u-b")), status_of(&active));
        assert_eq!(f.cache.len(), 2);
        assert!(f.cache.is_scheduled(&UniqueEventId::new("u-b")));
        assert!(!f.cache.is_scheduled(&UniqueEventId::new("u-c")));
    }

    #[tokio::test]
    async fn update_one_follows_state_change() {
        let f = fixture();
        let t = task_for(&f, "a", ObjectState::Booked, JobType::Event);
        f.cache.rebuild().await;
        assert_eq!(f.cache.lookup(&UniqueEventId::new("u-a")), RecordingStatus::Scheduled);

        f.store.set_state(t.task_id, ObjectState::Processing);
        f.cache.update_one(t.task_id).await;
        assert_eq!(f.cache.lookup(&UniqueEventId::new("u-a")), RecordingStatus::Active);
    }

    #[tokio::test]
    async fn vanished_task_is_evicted() {
        let f = fixture();
        let t = task_for(&f, "a", ObjectState::Booked, JobType::Event);
        f.cache.rebuild().await;

        f.store.remove_task(t.task_id);
        f.cache.update_one(t.task_id).await;
        assert_eq!(f.cache.lookup(&UniqueEventId::new("u-a")), RecordingStatus::Unscheduled);
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn unknown_event_reads_unscheduled() {
        let f = fixture();
        assert_eq!(
            f.cache.status_by_event(&EventId::new("nope")).await,
            RecordingStatus::Unscheduled
        );
    }
}
