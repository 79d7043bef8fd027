//! Log ring query and runtime statistics.

use axum::extract::{Query, State};
use axum::response::Json;
use regex::Regex;
use serde::Deserialize;

use sb_domain::error::Error;

use crate::api::error::ApiResult;
use crate::logging::{LogFilter, LogQueryResult};
use crate::runtime::stats::RuntimeStats;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LogParams {
    pub level: Option<String>,
    /// Regex over the event target.
    pub target: Option<String>,
    pub contains: Option<String>,
    /// Cursor from a previous response.
    pub after: Option<u64>,
    pub limit: Option<usize>,
}

impl LogParams {
    pub fn into_filter(self) -> Result<LogFilter, Error> {
        let level = self
            .level
            .filter(|l| !l.is_empty())
            .map(|l| l.parse())
            .transpose()
            .map_err(Error::Validation)?;
        let target = self
            .target
            .filter(|t| !t.is_empty())
            .map(|t| Regex::new(&t))
            .transpose()
            .map_err(|e| Error::Validation(format!("invalid target pattern: {e}")))?;
        Ok(LogFilter {
            level,
            target,
            contains: self.contains.filter(|c| !c.is_empty()),
            after_seq: self.after,
            limit: self.limit,
        })
    }
}

/// GET /api/logs
pub async fn query_logs(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> ApiResult<Json<LogQueryResult>> {
    let filter = params.into_filter()?;
    Ok(Json(state.logs.query(&filter)))
}

/// GET /api/runtime/stats
pub async fn runtime_stats(State(state): State<AppState>) -> Json<RuntimeStats> {
    Json(RuntimeStats::collect(state.started_at))
}
