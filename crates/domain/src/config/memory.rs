use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    None,
    #[default]
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackend,
    /// Directory of memory notes. Defaults to `<workspace>/memory`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "d_max_results")]
    pub max_results: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::default(),
            dir: None,
            max_results: d_max_results(),
        }
    }
}

fn d_max_results() -> usize {
    20
}
