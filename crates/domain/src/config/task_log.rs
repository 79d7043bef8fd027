use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Directory holding `tasks.db`. Defaults to `<home>/state`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "d_retention_days")]
    pub retention_days: u32,
    #[serde(default = "d_max_records")]
    pub max_records: u64,
    #[serde(default = "d_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for TaskLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            retention_days: d_retention_days(),
            max_records: d_max_records(),
            cleanup_interval_secs: d_cleanup_interval(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_retention_days() -> u32 {
    30
}
fn d_max_records() -> u64 {
    10_000
}
fn d_cleanup_interval() -> u64 {
    3600
}
