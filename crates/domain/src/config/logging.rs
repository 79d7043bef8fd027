use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub level: Option<String>,
    /// Log directory. Defaults to `<home>/logs`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Daily files kept on disk before the oldest is removed.
    #[serde(default = "d_max_files")]
    pub max_files: usize,
    /// Entries retained by the in-memory ring served at `/api/logs`.
    #[serde(default = "d_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            dir: None,
            max_files: d_max_files(),
            buffer_capacity: d_buffer_capacity(),
        }
    }
}

fn d_max_files() -> usize {
    7
}
fn d_buffer_capacity() -> usize {
    1000
}
