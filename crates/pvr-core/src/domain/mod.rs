//! Domain model (IDs, Job / Task records, derived status, queries, events, ...).
//!
//! Store が正本（source of truth）。ここにある型は Store から読んだ値か、
//! そこから純粋関数で導出した値だけを表現します。

pub mod conflict;
pub mod epg;
pub mod errors;
pub mod events;
pub mod folder;
pub mod frequency;
pub mod ids;
pub mod job;
pub mod keys;
pub mod query;
pub mod status;
pub mod task;

pub use conflict::ConflictGroup;
pub use epg::EpgEvent;
pub use errors::{ErrorKind, PvrError, RemoteError, StoreError};
pub use events::{FailureReason, Origin, PvrEvent, PvrEventKind, RemoteEvent, StoreEvent};
pub use folder::{Folder, RecordingEntry, SortMode, group_into_folders};
pub use frequency::{DayMask, Frequency, check_repeat_days_array};
pub use ids::{JobId, QueryHandle, TaskId};
pub use job::{Job, JobRequest, JobSchedule, JobType, Padding, RecordingMetadata, TaskKind};
pub use keys::{EventId, SeriesId, ServerId, ServiceId, UniqueEventId};
pub use query::{Direction, Field, Filter, Order, Query, Queryable, Value};
pub use status::{RecordingStatus, status_of};
pub use task::{CompleteStatus, Fulfillment, ObjectState, SeriesInfo, Task};
