//! Task audit log endpoints.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use sb_domain::error::{Error, Result};
use sb_tasklog::{TaskPage, TaskQuery, TaskRecord, TaskStats};

use crate::api::error::ApiResult;
use crate::state::AppState;

/// String-typed query parameters shared by `GET /api/tasks` and
/// `switchboard tasks list|search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskParams {
    pub action: Option<String>,
    pub module: Option<String>,
    pub channel: Option<String>,
    pub status: Option<String>,
    #[serde(alias = "q")]
    pub search: Option<String>,
    /// RFC 3339 timestamp or a relative age such as `30m`, `24h`, `7d`.
    pub since: Option<String>,
    pub until: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl TaskParams {
    pub fn into_query(self) -> Result<TaskQuery> {
        let now = Utc::now();
        Ok(TaskQuery {
            action: non_empty(self.action),
            module: non_empty(self.module),
            channel: non_empty(self.channel),
            status: non_empty(self.status).map(|s| s.parse()).transpose()?,
            search: non_empty(self.search),
            since: non_empty(self.since)
                .map(|s| parse_time(&s, now))
                .transpose()?,
            until: non_empty(self.until)
                .map(|s| parse_time(&s, now))
                .transpose()?,
            sort: non_empty(self.sort)
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or_default(),
            order: non_empty(self.order)
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or_default(),
            limit: self.limit,
            offset: self.offset.unwrap_or(0),
        })
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

/// Absolute RFC 3339 time, or `now - <n><unit>` for `s`, `m`, `h`, `d`.
pub fn parse_time(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    let invalid = || Error::Validation(format!("invalid time '{raw}' (RFC 3339 or e.g. 24h, 7d)"));
    let raw = raw.trim();
    let (split, _) = raw.char_indices().last().ok_or_else(invalid)?;
    let (n, unit) = raw.split_at(split);
    let n: i64 = n.parse().map_err(|_| invalid())?;
    let age = match unit {
        "s" => Duration::seconds(n),
        "m" => Duration::minutes(n),
        "h" => Duration::hours(n),
        "d" => Duration::days(n),
        _ => return Err(invalid()),
    };
    Ok(now - age)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /api/tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskParams>,
) -> ApiResult<Json<TaskPage>> {
    let query = params.into_query()?;
    Ok(Json(state.audit.query(query).await?))
}

/// GET /api/tasks/stats
pub async fn task_stats(State(state): State<AppState>) -> ApiResult<Json<TaskStats>> {
    Ok(Json(state.audit.stats().await?))
}

/// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TaskRecord>> {
    Ok(Json(state.audit.get(id).await?))
}
