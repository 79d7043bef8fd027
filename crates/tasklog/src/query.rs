use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::error::TaskLogError;
use crate::record::{TaskRecord, TaskStatus};

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    CreatedAt,
    DurationMs,
    TokensInput,
    Action,
}

impl SortKey {
    fn column(self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_ms",
            SortKey::DurationMs => "duration_ms",
            SortKey::TokensInput => "tokens_input",
            SortKey::Action => "action",
        }
    }
}

impl FromStr for SortKey {
    type Err = TaskLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" => Ok(SortKey::CreatedAt),
            "duration_ms" => Ok(SortKey::DurationMs),
            "tokens_input" => Ok(SortKey::TokensInput),
            "action" => Ok(SortKey::Action),
            other => Err(TaskLogError::InvalidQuery(format!(
                "unknown sort key '{other}' (expected created_at, duration_ms, tokens_input or action)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = TaskLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(TaskLogError::InvalidQuery(format!(
                "unknown sort order '{other}'"
            ))),
        }
    }
}

/// Filter, sort and page parameters. Every filter is optional.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub action: Option<String>,
    pub module: Option<String>,
    pub channel: Option<String>,
    pub status: Option<TaskStatus>,
    /// Substring matched against request, response and note.
    pub search: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub sort: SortKey,
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
    pub records: Vec<TaskRecord>,
    pub total: u64,
}

impl TaskQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// `WHERE` clause (possibly empty) and its bound values.
    pub(crate) fn where_clause(&self) -> Result<(String, Vec<Value>), TaskLogError> {
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(TaskLogError::InvalidQuery(
                    "'since' must not be after 'until'".into(),
                ));
            }
        }

        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        let mut eq = |column: &str, v: &Option<String>| {
            if let Some(v) = v {
                values.push(Value::Text(v.clone()));
                clauses.push(format!("{column} = ?{}", values.len()));
            }
        };
        eq("action", &self.action);
        eq("module", &self.module);
        eq("channel", &self.channel);

        if let Some(status) = self.status {
            values.push(Value::Text(status.as_str().to_owned()));
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            values.push(Value::Text(format!("%{}%", escape_like(search))));
            let n = values.len();
            clauses.push(format!(
                "(request LIKE ?{n} ESCAPE '\\' OR response LIKE ?{n} ESCAPE '\\' OR note LIKE ?{n} ESCAPE '\\')"
            ));
        }
        if let Some(since) = self.since {
            values.push(Value::Integer(since.timestamp_millis()));
            clauses.push(format!("created_ms >= ?{}", values.len()));
        }
        if let Some(until) = self.until {
            values.push(Value::Integer(until.timestamp_millis()));
            clauses.push(format!("created_ms <= ?{}", values.len()));
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        Ok((sql, values))
    }

    pub(crate) fn order_clause(&self) -> String {
        let dir = match self.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        format!("ORDER BY {} {dir}, id {dir}", self.sort.column())
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
