//! InMemoryStore - 開発 / テスト用の SchedulerStore
//!
//! # モデル
//! - tuner 数が限られた録画機。新しい job ほど優先され、古い予約が押し出される
//!   （録画中の Task は押し出されない）
//! - add は JobAdded → (TasksChanged) → JobCompleted の順にイベントを出す
//! - overlap query は handle を即座に返し、結果はチャネルに流す。
//!   `hold_overlaps(true)` の間は溜めておき、`release_overlap` で任意の順に返せる
//! - projection（`Query::fields`）は記録するだけで、行は常に全 field を返す

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::guide::StaticGuide;
use crate::domain::{
    CompleteStatus, EpgEvent, FailureReason, Field, Fulfillment, Job, JobId, JobRequest, JobSchedule,
    ObjectState, Padding, Query, QueryHandle, SeriesInfo, ServiceId, StoreError, StoreEvent,
    Task, TaskId, TaskKind,
};
use crate::ports::{Clock, EntryUpdate, IdGenerator, SchedulerStore, TaskUpdate, UlidGenerator};

const DEFAULT_TUNERS: usize = 2;
const REPEAT_HORIZON_DAYS: i64 = 7;

#[derive(Default)]
struct State {
    /// (insertion sequence, job)
    jobs: Vec<(u64, Job)>,
    tasks: Vec<Task>,
    next_seq: u64,
    sender: Option<mpsc::UnboundedSender<StoreEvent>>,
    hold_overlaps: bool,
    held: Vec<QueryHandle>,
    overlap_requests: Vec<(QueryHandle, TaskId)>,
    task_queries: usize,
    last_projection: Option<Vec<Field>>,
    fail_queries: bool,
    reject_next_add: Option<StoreError>,
    fail_next_add: Option<(FailureReason, String)>,
    scheduler_updates: Vec<TaskId>,
    entry_updates: Vec<TaskId>,
}

impl State {
    fn emit(&self, event: StoreEvent) {
        if let Some(tx) = &self.sender {
            // 受信側がいなくなっていても落とすだけ
            let _ = tx.send(event);
        }
    }

    fn task_mut(&mut self, task_id: TaskId) -> Result<&mut Task, StoreError> {
        self.tasks
            .iter_mut()
            .find(|t| t.task_id == task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    fn job_seq(&self, job_id: JobId) -> u64 {
        self.jobs
            .iter()
            .find(|(_, j)| j.job_id == job_id)
            .map_or(0, |(seq, _)| *seq)
    }

    fn push_job(&mut self, job: Job) {
        self.next_seq += 1;
        self.jobs.push((self.next_seq, job));
    }

    /// Live recordings overlapping `task_id`, the task itself included.
    fn overlaps_of(&self, task_id: TaskId) -> Option<Vec<Task>> {
        let task = self.tasks.iter().find(|t| t.task_id == task_id)?;
        Some(
            self.tasks
                .iter()
                .filter(|t| is_tuner_user(t) && (t.task_id == task_id || t.overlaps(task)))
                .cloned()
                .collect(),
        )
    }

    /// Re-grant tuners; returns the tasks whose fulfilment changed.
    fn recompute(&mut self, tuners: usize) -> Vec<Task> {
        let mut order: Vec<usize> = (0..self.tasks.len())
            .filter(|&i| is_tuner_user(&self.tasks[i]))
            .collect();
        order.sort_by_key(|&i| {
            let t = &self.tasks[i];
            (!t.is_active(), Reverse(self.job_seq(t.job_id)))
        });

        let mut granted: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
        let mut changed = Vec::new();
        for i in order {
            let (start, end) = (self.tasks[i].start_time, self.tasks[i].end_time);
            let fulfillment = coverage(start, end, &granted, tuners);
            if fulfillment != Fulfillment::None {
                granted.push((start, end));
            }
            if self.tasks[i].fulfillment != fulfillment {
                self.tasks[i].fulfillment = fulfillment;
                changed.push(self.tasks[i].clone());
            }
        }
        changed
    }
}

fn is_tuner_user(task: &Task) -> bool {
    task.task_type == TaskKind::Recording && task.object_state <= ObjectState::Processing
}

/// How much of `[start, end)` still finds a free tuner.
fn coverage(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granted: &[(DateTime<Utc>, DateTime<Utc>)],
    tuners: usize,
) -> Fulfillment {
    let mut points = vec![start, end];
    for (s, e) in granted {
        for p in [*s, *e] {
            if start < p && p < end {
                points.push(p);
            }
        }
    }
    points.sort();
    points.dedup();

    let (mut free, mut busy) = (false, false);
    for window in points.windows(2) {
        let at = window[0];
        let in_use = granted.iter().filter(|(s, e)| *s <= at && at < *e).count();
        if in_use >= tuners {
            busy = true;
        } else {
            free = true;
        }
    }
    match (free, busy) {
        (_, false) => Fulfillment::Full,
        (false, true) => Fulfillment::None,
        (true, true) => Fulfillment::Partial,
    }
}

pub struct InMemoryStore {
    clock: Arc<dyn Clock>,
    ids: UlidGenerator<Arc<dyn Clock>>,
    guide: Option<Arc<StaticGuide>>,
    tuners: usize,
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            ids: UlidGenerator::new(Arc::clone(&clock)),
            clock,
            guide: None,
            tuners: DEFAULT_TUNERS,
            state: Mutex::new(State::default()),
        }
    }

    /// Event and series jobs expand against this guide.
    pub fn with_guide(mut self, guide: Arc<StaticGuide>) -> Self {
        self.guide = Some(guide);
        self
    }

    pub fn with_tuners(mut self, tuners: usize) -> Self {
        self.tuners = tuners;
        self
    }

    // ---- seeding / inspection ---------------------------------------------

    /// Insert a task directly (remote-origin rows, fixtures). A job record is
    /// synthesised when missing.
    pub fn insert_task(&self, task: Task) {
        let mut st = self.state.lock();
        if !st.jobs.iter().any(|(_, j)| j.job_id == task.job_id) {
            let job = Job {
                job_id: task.job_id,
                job_type: task.schedule_type,
                task_type: task.task_type,
                padding: Padding::default(),
                keep: task.keep,
                title: task.title.clone(),
                service_id: task.service_id.clone(),
                event_id: task.event_id.clone(),
                expiration: None,
                repeat_days: None,
                time_of_day: None,
                query_filter: None,
                created_at: task.start_time,
            };
            st.push_job(job);
        }
        st.tasks.push(task);
    }

    pub fn set_state(&self, task_id: TaskId, state: ObjectState) {
        if let Some(t) = self.state.lock().tasks.iter_mut().find(|t| t.task_id == task_id) {
            t.object_state = state;
        }
    }

    pub fn remove_task(&self, task_id: TaskId) {
        self.state.lock().tasks.retain(|t| t.task_id != task_id);
    }

    pub fn job(&self, job_id: JobId) -> Option<Job> {
        self.state
            .lock()
            .jobs
            .iter()
            .find(|(_, j)| j.job_id == job_id)
            .map(|(_, j)| j.clone())
    }

    pub fn task(&self, task_id: TaskId) -> Option<Task> {
        self.state
            .lock()
            .tasks
            .iter()
            .find(|t| t.task_id == task_id)
            .cloned()
    }

    pub fn tasks_of(&self, job_id: JobId) -> Vec<Task> {
        self.state
            .lock()
            .tasks
            .iter()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Every overlap query issued so far, in issue order.
    pub fn overlap_requests(&self) -> Vec<(QueryHandle, TaskId)> {
        self.state.lock().overlap_requests.clone()
    }

    pub fn task_query_count(&self) -> usize {
        self.state.lock().task_queries
    }

    /// Projection of the most recent task or job query.
    pub fn last_projection(&self) -> Option<Vec<Field>> {
        self.state.lock().last_projection.clone()
    }

    pub fn scheduler_updates(&self) -> Vec<TaskId> {
        self.state.lock().scheduler_updates.clone()
    }

    pub fn entry_updates(&self) -> Vec<TaskId> {
        self.state.lock().entry_updates.clone()
    }

    // ---- fault injection / scripted timing --------------------------------

    pub fn hold_overlaps(&self, hold: bool) {
        self.state.lock().hold_overlaps = hold;
    }

    /// Deliver a held overlap result. Returns false for an unknown handle.
    pub fn release_overlap(&self, handle: QueryHandle) -> bool {
        let mut st = self.state.lock();
        let Some(pos) = st.held.iter().position(|h| *h == handle) else {
            return false;
        };
        st.held.remove(pos);
        let task_id = st
            .overlap_requests
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, t)| *t);
        let event = match task_id.and_then(|id| st.overlaps_of(id)) {
            Some(tasks) => StoreEvent::OverlapReady { handle, tasks },
            None => StoreEvent::OverlapFailed {
                handle,
                message: "task vanished".to_string(),
            },
        };
        st.emit(event);
        true
    }

    pub fn fail_overlap(&self, handle: QueryHandle, message: &str) -> bool {
        let mut st = self.state.lock();
        let Some(pos) = st.held.iter().position(|h| *h == handle) else {
            return false;
        };
        st.held.remove(pos);
        st.emit(StoreEvent::OverlapFailed {
            handle,
            message: message.to_string(),
        });
        true
    }

    pub fn held_overlaps(&self) -> Vec<QueryHandle> {
        self.state.lock().held.clone()
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state.lock().fail_queries = fail;
    }

    /// The next add is refused synchronously.
    pub fn reject_next_add(&self, error: StoreError) {
        self.state.lock().reject_next_add = Some(error);
    }

    /// The next add is accepted, then reported failed on the channel.
    pub fn fail_next_add(&self, reason: FailureReason, message: &str) {
        self.state.lock().fail_next_add = Some((reason, message.to_string()));
    }

    /// Recorder picked the task up.
    pub fn start_task(&self, task_id: TaskId) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let task = st.task_mut(task_id)?;
        if !task.object_state.can_transition_to(ObjectState::Processing) {
            return Err(StoreError::BadParameter(format!(
                "{task_id} cannot start from {:?}",
                task.object_state
            )));
        }
        task.object_state = ObjectState::Processing;
        st.emit(StoreEvent::TaskStarted { task_id });
        Ok(())
    }

    /// Recorder finished the task with full content.
    pub fn finish_task(&self, task_id: TaskId) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let task = st.task_mut(task_id)?;
        task.object_state = ObjectState::Final;
        task.complete_status = CompleteStatus::Full;
        st.emit(StoreEvent::TaskStopped { task_id });
        let changed = st.recompute(self.tuners);
        if !changed.is_empty() {
            st.emit(StoreEvent::TasksChanged {
                tasks: changed,
                caused_by: None,
            });
        }
        Ok(())
    }

    pub fn announce_about_to_start(&self, task_id: TaskId) {
        self.state
            .lock()
            .emit(StoreEvent::TaskAboutToStart { task_id });
    }

    /// Push an arbitrary notification.
    pub fn emit(&self, event: StoreEvent) {
        self.state.lock().emit(event);
    }

    // ---- expansion --------------------------------------------------------

    fn expand(&self, job: &Job, request: &JobRequest) -> Result<Vec<Task>, StoreError> {
        let make = |event: Option<&EpgEvent>,
                    service_id: &ServiceId,
                    start: DateTime<Utc>,
                    end: DateTime<Utc>| Task {
            task_id: self.ids.generate_task_id(),
            job_id: job.job_id,
            event_id: event.map(|e| e.event_id.clone()),
            service_id: service_id.clone(),
            title: event.map_or_else(|| job.title.clone(), |e| e.title.clone()),
            start_time: start,
            end_time: end,
            object_state: ObjectState::Booked,
            complete_status: CompleteStatus::None,
            fulfillment: Fulfillment::Full,
            schedule_type: job.job_type,
            task_type: job.task_type,
            keep: job.keep,
            bookmark_ms: 0,
            is_authorized: true,
            series: event.map_or_else(SeriesInfo::default, |e| SeriesInfo {
                series_id: e.series_id.clone(),
                season_id: e.season_id.clone(),
                series_name: e.series_name.clone(),
            }),
            ui_folder: request.ui_folder.clone(),
            is_remote: false,
            server_id: None,
        };

        match &request.schedule {
            // guide を持たない store は job だけ受け付け、task は展開しない
            JobSchedule::Event { .. } | JobSchedule::Series { .. } if self.guide.is_none() => {
                Ok(Vec::new())
            }
            JobSchedule::Event { event_id, .. } => {
                let event = self
                    .guide
                    .as_ref()
                    .and_then(|g| g.event(event_id))
                    .ok_or_else(|| StoreError::BadParameter(format!("unknown event {event_id}")))?;
                Ok(vec![make(
                    Some(&event),
                    &event.service_id,
                    event.start_time,
                    event.end_time,
                )])
            }
            JobSchedule::Series {
                event_id,
                series_id,
                filter,
                ..
            } => {
                let Some(guide) = self.guide.as_ref() else {
                    return Ok(Vec::new());
                };
                if guide.event(event_id).is_none() {
                    return Err(StoreError::BadParameter(format!("unknown event {event_id}")));
                }
                Ok(guide
                    .episodes(series_id)
                    .iter()
                    .map(|e| make(Some(e), &e.service_id, e.start_time, e.end_time))
                    .filter(|t| filter.matches(t))
                    .collect())
            }
            JobSchedule::Single {
                service_id,
                start,
                end,
            } => Ok(vec![make(None, service_id, *start, *end)]),
            JobSchedule::Repeat {
                service_id,
                first_start,
                duration_secs,
                days,
                ..
            } => Ok((0..REPEAT_HORIZON_DAYS)
                .map(|d| *first_start + chrono::Duration::days(d))
                .filter(|s| days.contains(s.weekday()))
                .map(|s| {
                    make(
                        None,
                        service_id,
                        s,
                        s + chrono::Duration::seconds(i64::from(*duration_secs)),
                    )
                })
                .collect()),
        }
    }
}

fn validate(request: &JobRequest) -> Result<(), StoreError> {
    if request.schedule.service_id().as_str().is_empty() {
        return Err(StoreError::BadParameter("missing service id".to_string()));
    }
    match &request.schedule {
        JobSchedule::Single { start, end, .. } if end <= start => {
            Err(StoreError::BadParameter("single job ends before it starts".to_string()))
        }
        JobSchedule::Repeat { days, .. } if days.is_empty() => {
            Err(StoreError::BadParameter("repeat job with empty day mask".to_string()))
        }
        JobSchedule::Repeat { duration_secs: 0, .. } => {
            Err(StoreError::BadParameter("repeat job with zero duration".to_string()))
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl SchedulerStore for InMemoryStore {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut st = self.state.lock();
        if st.sender.as_ref().is_some_and(|s| !s.is_closed()) {
            debug!("store already has a subscriber");
        } else {
            st.sender = Some(tx);
        }
        rx
    }

    fn unsubscribe(&self) {
        self.state.lock().sender = None;
    }

    async fn add_job(&self, request: JobRequest) -> Result<JobId, StoreError> {
        validate(&request)?;
        let rejected = self.state.lock().reject_next_add.take();
        if let Some(err) = rejected {
            return Err(err);
        }

        let job_id = self.ids.generate_job_id();
        let failure = self.state.lock().fail_next_add.take();
        if let Some((reason, message)) = failure {
            self.state.lock().emit(StoreEvent::JobAddFailed {
                job_id: Some(job_id),
                reason,
                message,
            });
            return Ok(job_id);
        }

        let job = Job::from_request(job_id, &request, self.clock.now());
        let tasks = self.expand(&job, &request)?;
        let new_ids: HashSet<TaskId> = tasks.iter().map(|t| t.task_id).collect();

        let mut st = self.state.lock();
        st.push_job(job);
        st.tasks.extend(tasks);
        let bumped: Vec<Task> = st
            .recompute(self.tuners)
            .into_iter()
            .filter(|t| !new_ids.contains(&t.task_id))
            .collect();

        st.emit(StoreEvent::JobAdded { job_id });
        if !bumped.is_empty() {
            st.emit(StoreEvent::TasksChanged {
                tasks: bumped,
                caused_by: Some(job_id),
            });
        }
        st.emit(StoreEvent::JobCompleted { job_id });
        debug!(job_id = %job_id, tasks = new_ids.len(), "job added");
        Ok(job_id)
    }

    async fn stop_task(&self, task_id: TaskId) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let task = st.task_mut(task_id)?;
        let was_recording = match task.object_state {
            ObjectState::Processing | ObjectState::SuspendProcessing => {
                // 途中までの content は残す
                task.object_state = ObjectState::Final;
                task.complete_status = CompleteStatus::Partial;
                true
            }
            ObjectState::Booked => {
                task.object_state = ObjectState::Error;
                false
            }
            other => {
                return Err(StoreError::BadParameter(format!(
                    "{task_id} is not running ({other:?})"
                )));
            }
        };
        if was_recording {
            st.emit(StoreEvent::TaskStopped { task_id });
        }
        st.emit(StoreEvent::TaskStopAcknowledged { task_id });
        let changed = st.recompute(self.tuners);
        if !changed.is_empty() {
            st.emit(StoreEvent::TasksChanged {
                tasks: changed,
                caused_by: None,
            });
        }
        Ok(())
    }

    async fn delete_job(&self, job_id: JobId) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let Some(pos) = st.jobs.iter().position(|(_, j)| j.job_id == job_id) else {
            return Err(StoreError::NotFound(job_id.to_string()));
        };
        st.jobs.remove(pos);
        // 予約だけ消す。録画済み content は残る
        st.tasks
            .retain(|t| !(t.job_id == job_id && t.object_state == ObjectState::Booked));
        st.emit(StoreEvent::JobDeleted { job_id });
        let changed = st.recompute(self.tuners);
        if !changed.is_empty() {
            st.emit(StoreEvent::TasksChanged {
                tasks: changed,
                caused_by: None,
            });
        }
        Ok(())
    }

    async fn delete_task(&self, task_id: TaskId) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let task = st.task_mut(task_id)?;
        if task.is_active() {
            return Err(StoreError::BadParameter(format!(
                "{task_id} is still recording"
            )));
        }
        st.tasks.retain(|t| t.task_id != task_id);
        Ok(())
    }

    async fn update_task(&self, task_id: TaskId, update: TaskUpdate) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let task = st.task_mut(task_id)?;
        if !task.object_state.is_live() {
            return Err(StoreError::BadParameter(format!(
                "{task_id} has rolled into the content store"
            )));
        }
        if let Some(keep) = update.keep {
            task.keep = keep;
        }
        st.scheduler_updates.push(task_id);
        st.emit(StoreEvent::TasksModified {
            task_ids: vec![task_id],
        });
        Ok(())
    }

    async fn update_entry(&self, task_id: TaskId, update: EntryUpdate) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        let task = st.task_mut(task_id)?;
        if let Some(keep) = update.keep {
            task.keep = keep;
        }
        if let Some(position) = update.bookmark_ms {
            task.bookmark_ms = position;
        }
        st.entry_updates.push(task_id);
        st.emit(StoreEvent::ContentModified { task_id });
        Ok(())
    }

    async fn query_jobs(&self, query: &Query) -> Result<Vec<Job>, StoreError> {
        let mut st = self.state.lock();
        if st.fail_queries {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        st.last_projection = query.fields.clone();
        let mut rows: Vec<Job> = st
            .jobs
            .iter()
            .map(|(_, j)| j)
            .filter(|j| query.filter.matches(*j))
            .cloned()
            .collect();
        rows.sort_by(|a, b| query.order.compare(a, b));
        Ok(page(rows, query))
    }

    async fn query_tasks(&self, query: &Query) -> Result<Vec<Task>, StoreError> {
        let mut st = self.state.lock();
        if st.fail_queries {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        st.task_queries += 1;
        st.last_projection = query.fields.clone();
        let mut rows: Vec<Task> = st
            .tasks
            .iter()
            .filter(|t| query.filter.matches(*t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| query.order.compare(a, b));
        Ok(page(rows, query))
    }

    async fn count_tasks(&self, query: &Query) -> Result<usize, StoreError> {
        let st = self.state.lock();
        if st.fail_queries {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(st.tasks.iter().filter(|t| query.filter.matches(*t)).count())
    }

    async fn request_overlaps(&self, task_id: TaskId) -> Result<QueryHandle, StoreError> {
        let mut st = self.state.lock();
        let Some(overlaps) = st.overlaps_of(task_id) else {
            return Err(StoreError::NotFound(task_id.to_string()));
        };
        let handle = self.ids.generate_query_handle();
        st.overlap_requests.push((handle, task_id));
        if st.hold_overlaps {
            st.held.push(handle);
        } else {
            st.emit(StoreEvent::OverlapReady {
                handle,
                tasks: overlaps,
            });
        }
        Ok(handle)
    }
}

fn page<T>(rows: Vec<T>, query: &Query) -> Vec<T> {
    rows.into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect()
}
