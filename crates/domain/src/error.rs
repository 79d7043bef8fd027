/// Shared error type used across all Switchboard crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("network: {0}")]
    Transient(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("rate limited")]
    RateLimited,

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a caller may retry the failed operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Timeout(_))
    }

    /// Process exit code for CLI commands: `1` for client errors,
    /// `2` for system errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_)
            | Error::Auth(_)
            | Error::NotFound(_)
            | Error::RateLimited => 1,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
