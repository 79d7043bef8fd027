use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sb_domain::chat::Role;

/// One message in a session history. Content is never mutated after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Channel the message travelled through (`api`, `cli`, adapter name).
    #[serde(default)]
    pub channel: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, channel: Option<&str>) -> Self {
        Self {
            role,
            content: content.into(),
            channel: channel.map(str::to_owned),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn user(content: impl Into<String>, channel: &str) -> Self {
        Self::new(Role::User, content, Some(channel))
    }

    pub fn assistant(content: impl Into<String>, channel: &str) -> Self {
        Self::new(Role::Assistant, content, Some(channel))
    }
}

/// A persistent, bounded conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub key: String,
    /// Channel that created the session.
    pub channel: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: VecDeque<Message>,
    /// Messages appended since creation or the last reset, evicted ones included.
    #[serde(default)]
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: &str, channel: &str) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_owned(),
            channel: channel.to_owned(),
            model: None,
            messages: VecDeque::new(),
            message_count: 0,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Append and evict from the front until `max` messages remain.
    /// Returns the number of evicted messages.
    pub fn push_bounded(&mut self, msg: Message, max: usize) -> usize {
        self.messages.push_back(msg);
        self.message_count += 1;
        self.last_activity_at = Utc::now();
        let mut evicted = 0;
        while self.messages.len() > max.max(1) {
            self.messages.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            key: self.key.clone(),
            channel: self.channel.clone(),
            model: self.model.clone(),
            message_count: self.message_count,
            retained: self.messages.len(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

/// Shallow descriptor returned by list operations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub key: String,
    pub channel: String,
    pub model: Option<String>,
    pub message_count: u64,
    pub retained: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}
