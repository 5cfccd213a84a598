//! StoreQueries - Store Query Layer
//!
//! filter / order を組み立てて Store に投げ、型付きの `Task` / `Job` を返します。
//!
//! # 契約
//! - query は決して失敗しない。Store がエラーを返したら log して空を返す
//! - 呼び出し側は「空」を not found として扱う（failure ではない）
//! - single-row query は sort 後の先頭を返す（DESC + single-row = "most recent"）

use std::sync::Arc;

use tracing::warn;

use crate::domain::{
    EventId, Field, Filter, Job, JobId, JobType, ObjectState, Order, Query, RecordingStatus,
    SeriesId, ServiceId, Task, TaskId, TaskKind, Value, status_of,
};
use crate::ports::SchedulerStore;

#[derive(Clone)]
pub struct StoreQueries {
    store: Arc<dyn SchedulerStore>,
    page_size: usize,
    fields: Option<Vec<Field>>,
}

impl StoreQueries {
    pub fn new(store: Arc<dyn SchedulerStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            fields: None,
        }
    }

    /// Same queries, asking the Store for `fields` only.
    pub fn with_fields(&self, fields: Vec<Field>) -> Self {
        Self {
            fields: Some(fields),
            ..self.clone()
        }
    }

    fn query(&self, filter: Filter) -> Query {
        let query = Query::new(filter);
        match &self.fields {
            Some(fields) => query.project(fields.clone()),
            None => query,
        }
    }

    // ---- low level ------------------------------------------------------

    /// Every matching task, fetched page by page until a short page arrives.
    ///
    /// `query.fields`, `query.filter` and `query.order` pass through unchanged.
    pub async fn tasks(&self, query: Query) -> Vec<Task> {
        let mut out = Vec::new();
        let mut offset = query.offset;
        loop {
            let page_query = query.clone().limit(self.page_size).offset(offset);
            match self.store.query_tasks(&page_query).await {
                Ok(page) => {
                    let short = page.len() < self.page_size;
                    offset += page.len();
                    out.extend(page);
                    if short {
                        return out;
                    }
                }
                Err(e) => {
                    warn!(error = %e, filter = %query.filter, order = %query.order, "task query failed");
                    return Vec::new();
                }
            }
        }
    }

    pub async fn jobs(&self, query: Query) -> Vec<Job> {
        let mut out = Vec::new();
        let mut offset = query.offset;
        loop {
            let page_query = query.clone().limit(self.page_size).offset(offset);
            match self.store.query_jobs(&page_query).await {
                Ok(page) => {
                    let short = page.len() < self.page_size;
                    offset += page.len();
                    out.extend(page);
                    if short {
                        return out;
                    }
                }
                Err(e) => {
                    warn!(error = %e, filter = %query.filter, order = %query.order, "job query failed");
                    return Vec::new();
                }
            }
        }
    }

    /// First task after sorting.
    pub async fn first_task(&self, query: Query) -> Option<Task> {
        match self.store.query_tasks(&query.limit(1)).await {
            Ok(rows) => rows.into_iter().next(),
            Err(e) => {
                warn!(error = %e, "single task query failed");
                None
            }
        }
    }

    pub async fn first_job(&self, query: Query) -> Option<Job> {
        match self.store.query_jobs(&query.limit(1)).await {
            Ok(rows) => rows.into_iter().next(),
            Err(e) => {
                warn!(error = %e, "single job query failed");
                None
            }
        }
    }

    pub async fn count_tasks_by_query(&self, filter: Filter) -> usize {
        let query = self.query(filter);
        match self.store.count_tasks(&query).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, filter = %query.filter, "count query failed");
                0
            }
        }
    }

    // ---- jobs -----------------------------------------------------------

    pub async fn job_by_id(&self, job_id: JobId) -> Option<Job> {
        self.first_job(self.query(Filter::eq(Field::JobId, Value::text(job_id))))
            .await
    }

    /// Most recent job for the event.
    pub async fn job_by_event(&self, event_id: &EventId) -> Option<Job> {
        self.first_job(
            self.query(Filter::eq(Field::EventId, Value::text(event_id)))
                .order(Order::desc(Field::StartTime)),
        )
        .await
    }

    /// Most recent manual (time-based) job on the service.
    pub async fn job_by_service(&self, service_id: &ServiceId) -> Option<Job> {
        let filter = Filter::eq(Field::ServiceId, Value::text(service_id)).and(
            Filter::eq(Field::ScheduleType, Value::JobType(JobType::Single))
                .or(Filter::eq(Field::ScheduleType, Value::JobType(JobType::Repeat))),
        );
        self.first_job(self.query(filter).order(Order::desc(Field::StartTime)))
            .await
    }

    pub async fn job_by_query(&self, filter: Filter, order: Order) -> Option<Job> {
        self.first_job(self.query(filter).order(order)).await
    }

    // ---- tasks ----------------------------------------------------------

    pub async fn task_by_id(&self, task_id: TaskId) -> Option<Task> {
        self.first_task(self.query(Filter::eq(Field::TaskId, Value::text(task_id))))
            .await
    }

    /// Live task for the event, earliest first.
    pub async fn task_by_event(&self, event_id: &EventId) -> Option<Task> {
        self.first_task(self.query(
            Filter::eq(Field::EventId, Value::text(event_id)).and(live()),
        ))
        .await
    }

    /// Live manual task on the service, most recent first.
    pub async fn task_by_service(&self, service_id: &ServiceId) -> Option<Task> {
        let filter = Filter::eq(Field::ServiceId, Value::text(service_id))
            .and(live())
            .and(timed());
        self.first_task(self.query(filter).order(Order::desc(Field::StartTime)))
            .await
    }

    pub async fn tasks_for_job(&self, job_id: JobId) -> Vec<Task> {
        self.tasks(self.query(Filter::eq(Field::JobId, Value::text(job_id))))
            .await
    }

    // ---- recording lists ------------------------------------------------

    /// Every recording not yet in ERROR.
    pub async fn all_recordings(&self) -> Vec<Task> {
        self.tasks(self.query(recording().and(Filter::lt(
            Field::ObjectState,
            Value::State(ObjectState::Error),
        ))))
        .await
    }

    pub async fn scheduled_recordings(&self) -> Vec<Task> {
        self.tasks(self.query(recording().and(Filter::eq(
            Field::ObjectState,
            Value::State(ObjectState::Booked),
        ))))
        .await
    }

    pub async fn active_recordings(&self) -> Vec<Task> {
        self.tasks(self.query(recording().and(Filter::eq(
            Field::ObjectState,
            Value::State(ObjectState::Processing),
        ))))
        .await
    }

    /// Past PROCESSING with partial content.
    pub async fn partial_recordings(&self) -> Vec<Task> {
        let filter = recording()
            .and(past_processing())
            .and(Filter::eq(
                Field::CompleteStatus,
                Value::Complete(crate::domain::CompleteStatus::Partial),
            ));
        self.tasks(self.query(filter)).await
    }

    /// Completed content, in the Store's default order.
    pub async fn complete_recordings(&self) -> Vec<Task> {
        self.tasks(self.query(recording().and(past_processing())))
            .await
    }

    pub async fn timed_recordings(&self) -> Vec<Task> {
        self.tasks(self.query(recording().and(timed()).and(live())))
            .await
    }

    pub async fn recordings_by_series(&self, series_id: &SeriesId) -> Vec<Task> {
        self.tasks(self.query(
            recording()
                .and(Filter::eq(Field::SeriesId, Value::text(series_id)))
                .and(Filter::lt(Field::ObjectState, Value::State(ObjectState::Error))),
        ))
        .await
    }

    /// Series recordings whose derived status is one of `statuses`.
    pub async fn series_recordings_by_status(&self, statuses: &[RecordingStatus]) -> Vec<Task> {
        let filter = recording().and(Filter::eq(
            Field::ScheduleType,
            Value::JobType(JobType::Series),
        ));
        self.tasks(self.query(filter))
            .await
            .into_iter()
            .filter(|t| statuses.contains(&status_of(t)))
            .collect()
    }

    /// BOOKED or PROCESSING recordings; the Recording Cache is built from these.
    pub async fn cacheable_recordings(&self) -> Vec<Task> {
        self.tasks(self.query(recording().and(Filter::le(
            Field::ObjectState,
            Value::State(ObjectState::Processing),
        ))))
        .await
    }
}

fn recording() -> Filter {
    Filter::eq(Field::TaskType, Value::TaskKind(TaskKind::Recording))
}

fn live() -> Filter {
    Filter::le(Field::ObjectState, Value::State(ObjectState::Processing))
}

fn past_processing() -> Filter {
    Filter::gt(Field::ObjectState, Value::State(ObjectState::Processing)).and(Filter::le(
        Field::ObjectState,
        Value::State(ObjectState::Final),
    ))
}

fn timed() -> Filter {
    Filter::eq(Field::ScheduleType, Value::JobType(JobType::Single))
        .or(Filter::eq(Field::ScheduleType, Value::JobType(JobType::Repeat)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CompleteStatus;
    use crate::domain::task::fixtures::timed_task;
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn store() -> Arc<InMemoryStore> {
        let clock = Arc::new(FixedClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        Arc::new(InMemoryStore::new(clock))
    }

    #[tokio::test]
    async fn pages_until_short_page() {
        let store = store();
        for i in 0..7 {
            store.insert_task(timed_task(ObjectState::Booked, JobType::Event, i * 60, 30));
        }
        let queries = StoreQueries::new(store.clone(), 3);

        let all = queries.scheduled_recordings().await;
        assert_eq!(all.len(), 7);
        assert!(all.windows(2).all(|w| w[0].start_time <= w[1].start_time));
        // 3 + 3 + 1
        assert_eq!(store.task_query_count(), 3);
    }

    #[tokio::test]
    async fn store_errors_read_as_empty() {
        let store = store();
        store.insert_task(timed_task(ObjectState::Booked, JobType::Event, 0, 30));
        store.fail_queries(true);
        let queries = StoreQueries::new(store.clone(), 10);

        assert!(queries.all_recordings().await.is_empty());
        assert_eq!(queries.count_tasks_by_query(Filter::All).await, 0);
        assert!(queries.task_by_id(crate::domain::TaskId::from_ulid(ulid::Ulid::new())).await.is_none());
    }

    #[tokio::test]
    async fn projection_reaches_the_store() {
        let store = store();
        let task = timed_task(ObjectState::Booked, JobType::Event, 0, 30);
        store.insert_task(task.clone());
        let queries = StoreQueries::new(store.clone(), 10);

        queries.tasks_for_job(task.job_id).await;
        assert_eq!(store.last_projection(), None);

        let fields = vec![Field::TaskId, Field::StartTime];
        let projected = queries.with_fields(fields.clone());
        let found = projected.task_by_id(task.task_id).await;
        assert_eq!(found.map(|t| t.task_id), Some(task.task_id));
        assert_eq!(store.last_projection(), Some(fields.clone()));

        projected.job_by_id(task.job_id).await;
        assert_eq!(store.last_projection(), Some(fields));
    }

    #[tokio::test]
    async fn desc_single_row_is_most_recent() {
        let store = store();
        let mut early = timed_task(ObjectState::Booked, JobType::Single, 0, 30);
        let mut late = timed_task(ObjectState::Booked, JobType::Single, 120, 30);
        early.event_id = None;
        late.event_id = None;
        store.insert_task(early);
        store.insert_task(late.clone());
        let queries = StoreQueries::new(store, 10);

        let found = queries.task_by_service(&ServiceId::new("svc-1")).await;
        assert_eq!(found.map(|t| t.task_id), Some(late.task_id));
    }

    #[tokio::test]
    async fn partial_and_complete_lists() {
        let store = store();
        let mut partial = timed_task(ObjectState::Final, JobType::Event, 0, 30);
        partial.complete_status = CompleteStatus::Partial;
        let mut full = timed_task(ObjectState::Processed, JobType::Event, 60, 30);
        full.complete_status = CompleteStatus::Full;
        let booked = timed_task(ObjectState::Booked, JobType::Event, 120, 30);
        store.insert_task(partial.clone());
        store.insert_task(full);
        store.insert_task(booked);
        let queries = StoreQueries::new(store, 10);

        let partials = queries.partial_recordings().await;
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].task_id, partial.task_id);
        assert_eq!(queries.complete_recordings().await.len(), 2);
        assert_eq!(queries.all_recordings().await.len(), 3);
    }

    #[tokio::test]
    async fn series_recordings_filtered_by_status() {
        let store = store();
        let booked = timed_task(ObjectState::Booked, JobType::Series, 0, 30);
        let active = timed_task(ObjectState::Processing, JobType::Series, 60, 30);
        store.insert_task(booked.clone());
        store.insert_task(active);
        let queries = StoreQueries::new(store, 10);

        let scheduled = queries
            .series_recordings_by_status(&[RecordingStatus::ScheduledBySeries])
            .await;
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].task_id, booked.task_id);
    }
}
