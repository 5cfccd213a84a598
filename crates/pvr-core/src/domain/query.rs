//! Store query model: field projection, filter predicate, sort order.
//!
//! `Filter` renders to the Store's native expression text via `Display`
//! (`objectState <= 1 AND taskType = 'RECORDING'`) and can also be evaluated
//! directly against any `Queryable` record.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{Job, JobType, TaskKind};
use super::task::{CompleteStatus, Fulfillment, ObjectState, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    TaskId,
    JobId,
    EventId,
    ServiceId,
    SeriesId,
    StartTime,
    EndTime,
    ObjectState,
    CompleteStatus,
    Fulfillment,
    ScheduleType,
    TaskType,
    Title,
    Keep,
    IsRemote,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::TaskId => "taskId",
            Field::JobId => "jobId",
            Field::EventId => "eventId",
            Field::ServiceId => "serviceId",
            Field::SeriesId => "seriesId",
            Field::StartTime => "startTime",
            Field::EndTime => "endTime",
            Field::ObjectState => "objectState",
            Field::CompleteStatus => "completeStatus",
            Field::Fulfillment => "fulfillmentStatus",
            Field::ScheduleType => "scheduleType",
            Field::TaskType => "taskType",
            Field::Title => "title",
            Field::Keep => "keep",
            Field::IsRemote => "isWHPVRTask",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Time(DateTime<Utc>),
    State(ObjectState),
    Complete(CompleteStatus),
    Fulfillment(Fulfillment),
    JobType(JobType),
    TaskKind(TaskKind),
    Bool(bool),
}

impl Value {
    pub fn text(s: impl fmt::Display) -> Self {
        Value::Text(s.to_string())
    }

    /// Only values of the same variant are comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::State(a), Value::State(b)) => Some(a.cmp(b)),
            (Value::Complete(a), Value::Complete(b)) => Some(a.cmp(b)),
            (Value::JobType(a), Value::JobType(b)) => Some(a.cmp(b)),
            (Value::TaskKind(a), Value::TaskKind(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Fulfillment(a), Value::Fulfillment(b)) => (a == b).then_some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Time(t) => write!(f, "{}", t.timestamp()),
            Value::State(s) => write!(f, "{}", s.code()),
            Value::Complete(c) => write!(f, "'{}'", screaming(c)),
            Value::Fulfillment(c) => write!(f, "'{}'", screaming(c)),
            Value::JobType(t) => write!(f, "'{}'", screaming(t)),
            Value::TaskKind(k) => write!(f, "'{}'", screaming(k)),
            Value::Bool(b) => write!(f, "{}", u8::from(*b)),
        }
    }
}

fn screaming<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
        }
    }
}

/// Filter predicate in the Store's query language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    All,
    Compare(Field, Comparison, Value),
    IsNull(Field),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: Field, value: Value) -> Self {
        Filter::Compare(field, Comparison::Eq, value)
    }

    pub fn ne(field: Field, value: Value) -> Self {
        Filter::Compare(field, Comparison::Ne, value)
    }

    pub fn lt(field: Field, value: Value) -> Self {
        Filter::Compare(field, Comparison::Lt, value)
    }

    pub fn le(field: Field, value: Value) -> Self {
        Filter::Compare(field, Comparison::Le, value)
    }

    pub fn gt(field: Field, value: Value) -> Self {
        Filter::Compare(field, Comparison::Gt, value)
    }

    pub fn ge(field: Field, value: Value) -> Self {
        Filter::Compare(field, Comparison::Ge, value)
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, g) => Filter::And(vec![f, g]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::Or(mut a), f) => {
                a.push(f);
                Filter::Or(a)
            }
            (f, g) => Filter::Or(vec![f, g]),
        }
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub fn matches<R: Queryable + ?Sized>(&self, record: &R) -> bool {
        match self {
            Filter::All => true,
            Filter::Compare(field, cmp, value) => record
                .field(*field)
                .and_then(|actual| actual.compare(value))
                .is_some_and(|ordering| cmp.holds(ordering)),
            Filter::IsNull(field) => record.field(*field).is_none(),
            Filter::And(filters) => filters.iter().all(|f| f.matches(record)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(record)),
            Filter::Not(inner) => !inner.matches(record),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, filters: &[Filter], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, filter) in filters.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{filter}")?;
            }
            write!(f, ")")
        }

        match self {
            Filter::All => write!(f, "1 = 1"),
            Filter::Compare(field, cmp, value) => {
                write!(f, "{} {} {}", field.name(), cmp.symbol(), value)
            }
            Filter::IsNull(field) => write!(f, "{} IS NULL", field.name()),
            Filter::And(filters) => join(f, filters, "AND"),
            Filter::Or(filters) => join(f, filters, "OR"),
            Filter::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub field: Field,
    pub direction: Direction,
}

impl Order {
    pub fn asc(field: Field) -> Self {
        Self {
            field,
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: Field) -> Self {
        Self {
            field,
            direction: Direction::Desc,
        }
    }

    /// Missing values sort first in ascending order.
    pub fn compare<R: Queryable>(&self, a: &R, b: &R) -> Ordering {
        let ordering = match (a.field(self.field), b.field(self.field)) {
            (Some(x), Some(y)) => x.compare(&y).unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        match self.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

impl Default for Order {
    fn default() -> Self {
        Order::asc(Field::StartTime)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        write!(f, "{} {}", self.field.name(), dir)
    }
}

/// One query against the Store.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Projection hint; `None` means every field.
    pub fields: Option<Vec<Field>>,
    pub filter: Filter,
    pub order: Order,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            fields: None,
            filter,
            order: Order::default(),
            limit: None,
            offset: 0,
        }
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn project(mut self, fields: Vec<Field>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Record the Store can filter and sort.
pub trait Queryable {
    fn field(&self, field: Field) -> Option<Value>;
}

impl Queryable for Task {
    fn field(&self, field: Field) -> Option<Value> {
        match field {
            Field::TaskId => Some(Value::text(self.task_id)),
            Field::JobId => Some(Value::text(self.job_id)),
            Field::EventId => self.event_id.as_ref().map(Value::text),
            Field::ServiceId => Some(Value::text(&self.service_id)),
            Field::SeriesId => self.series.series_id.as_ref().map(Value::text),
            Field::StartTime => Some(Value::Time(self.start_time)),
            Field::EndTime => Some(Value::Time(self.end_time)),
            Field::ObjectState => Some(Value::State(self.object_state)),
            Field::CompleteStatus => Some(Value::Complete(self.complete_status)),
            Field::Fulfillment => Some(Value::Fulfillment(self.fulfillment)),
            Field::ScheduleType => Some(Value::JobType(self.schedule_type)),
            Field::TaskType => Some(Value::TaskKind(self.task_type)),
            Field::Title => Some(Value::Text(self.title.clone())),
            Field::Keep => Some(Value::Bool(self.keep)),
            Field::IsRemote => Some(Value::Bool(self.is_remote)),
        }
    }
}

impl Queryable for Job {
    fn field(&self, field: Field) -> Option<Value> {
        match field {
            Field::JobId => Some(Value::text(self.job_id)),
            Field::EventId => self.event_id.as_ref().map(Value::text),
            Field::ServiceId => Some(Value::text(&self.service_id)),
            Field::StartTime => Some(Value::Time(self.created_at)),
            Field::ScheduleType => Some(Value::JobType(self.job_type)),
            Field::TaskType => Some(Value::TaskKind(self.task_type)),
            Field::Title => Some(Value::Text(self.title.clone())),
            Field::Keep => Some(Value::Bool(self.keep)),
            _ => None,
        }
    }
}
