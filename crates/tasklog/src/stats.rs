use std::collections::BTreeMap;

use serde::Serialize;

/// Aggregate view over the whole log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: u64,
    pub by_action: BTreeMap<String, u64>,
    pub by_module: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub avg_duration_ms: Option<f64>,
    pub earliest: Option<String>,
    pub latest: Option<String>,
}
