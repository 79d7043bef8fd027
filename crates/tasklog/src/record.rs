use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TaskLogError;

/// Request and response bodies longer than this are cut at write time.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Well-known action tags.
pub mod action {
    pub const SYSTEM: &str = "system";
    pub const CHAT: &str = "chat";
    pub const CONFIG: &str = "config";
    pub const CHANNEL: &str = "channel";
    pub const SESSION: &str = "session";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Error,
    Pending,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
            TaskStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TaskStatus::Success),
            "error" => Ok(TaskStatus::Error),
            "pending" => Ok(TaskStatus::Pending),
            other => Err(TaskLogError::InvalidQuery(format!(
                "unknown status '{other}' (expected success, error or pending)"
            ))),
        }
    }
}

/// A stored audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: i64,
    /// RFC 3339 with nanoseconds, UTC.
    pub created_at: String,
    pub action: String,
    pub module: String,
    pub channel: Option<String>,
    pub session_key: Option<String>,
    pub request: String,
    pub response: String,
    pub status: TaskStatus,
    /// Short reason such as `blocked` or `cancelled`.
    pub note: Option<String>,
    pub duration_ms: Option<u64>,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
}

/// An entry to be written. The log assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub action: String,
    pub module: String,
    pub channel: Option<String>,
    pub session_key: Option<String>,
    pub request: String,
    pub response: String,
    pub status: TaskStatus,
    pub note: Option<String>,
    pub duration_ms: Option<u64>,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
}

impl NewTask {
    pub fn new(action: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            module: module.into(),
            channel: None,
            session_key: None,
            request: String::new(),
            response: String::new(),
            status: TaskStatus::Success,
            note: None,
            duration_ms: None,
            tokens_input: None,
            tokens_output: None,
        }
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn session(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    pub fn request(mut self, body: impl Into<String>) -> Self {
        self.request = body.into();
        self
    }

    pub fn response(mut self, body: impl Into<String>) -> Self {
        self.response = body.into();
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn tokens(mut self, input: u64, output: u64) -> Self {
        self.tokens_input = Some(input);
        self.tokens_output = Some(output);
        self
    }
}

/// Cut `body` to at most [`MAX_BODY_BYTES`] bytes on a char boundary,
/// appending `…` when anything was removed.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_BODY_BYTES {
        return body.to_owned();
    }
    let budget = MAX_BODY_BYTES - '…'.len_utf8();
    let mut end = budget;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + '…'.len_utf8());
    out.push_str(&body[..end]);
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_bodies_untouched() {
        assert_eq!(truncate_body("hello"), "hello");
        let exact = "a".repeat(MAX_BODY_BYTES);
        assert_eq!(truncate_body(&exact), exact);
    }

    #[test]
    fn long_bodies_cut_on_char_boundary() {
        let long = "é".repeat(MAX_BODY_BYTES);
        let cut = truncate_body(&long);
        assert!(cut.len() <= MAX_BODY_BYTES);
        assert!(cut.ends_with('…'));
        assert!(cut.trim_end_matches('…').chars().all(|c| c == 'é'));
    }

    #[test]
    fn status_parse() {
        assert_eq!("error".parse::<TaskStatus>().unwrap(), TaskStatus::Error);
        assert!("broken".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn builder_sets_fields() {
        let t = NewTask::new(action::CHAT, "telegram")
            .channel("telegram")
            .session("agent:main:telegram:42")
            .duration(Duration::from_millis(1500))
            .tokens(10, 20)
            .status(TaskStatus::Error)
            .note("blocked");
        assert_eq!(t.duration_ms, Some(1500));
        assert_eq!(t.tokens_output, Some(20));
        assert_eq!(t.note.as_deref(), Some("blocked"));
    }
}
