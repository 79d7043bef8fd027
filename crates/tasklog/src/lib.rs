//! Durable, queryable audit log of user-visible actions, stored in SQLite.

pub mod error;
pub mod query;
pub mod record;
pub mod stats;
pub mod store;

pub use error::{TaskLogError, TaskLogResult};
pub use query::{SortKey, SortOrder, TaskPage, TaskQuery};
pub use record::{action, truncate_body, NewTask, TaskRecord, TaskStatus, MAX_BODY_BYTES};
pub use stats::TaskStats;
pub use store::TaskLog;
