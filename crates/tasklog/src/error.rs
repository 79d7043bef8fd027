use thiserror::Error;

pub type TaskLogResult<T> = Result<T, TaskLogError>;

#[derive(Debug, Error)]
pub enum TaskLogError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("task log is closed")]
    Closed,
}

impl From<TaskLogError> for sb_domain::error::Error {
    fn from(e: TaskLogError) -> Self {
        match e {
            TaskLogError::InvalidQuery(msg) => Self::Validation(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}
