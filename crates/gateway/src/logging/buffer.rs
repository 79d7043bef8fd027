//! In-memory ring of recent log records.
//!
//! [`LogBufferLayer`] mirrors every `tracing` event into a [`LogBuffer`]
//! that backs `GET /api/logs` and the WebSocket `log` frames.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;
pub const MAX_BUFFER_CAPACITY: usize = 10_000;
/// Entries returned by a query without an explicit limit.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("unknown log level: {s}")),
        }
    }
}

impl From<&Level> for LogLevel {
    fn from(level: &Level) -> Self {
        match *level {
            Level::TRACE => LogLevel::Trace,
            Level::DEBUG => LogLevel::Debug,
            Level::INFO => LogLevel::Info,
            Level::WARN => LogLevel::Warn,
            Level::ERROR => LogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub seq: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filtering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    /// Minimum level, inclusive.
    pub level: Option<LogLevel>,
    /// Matched against the event target.
    pub target: Option<Regex>,
    /// Case-insensitive substring of the message.
    pub contains: Option<String>,
    /// Only entries with `seq > after_seq`.
    pub after_seq: Option<u64>,
    pub limit: Option<usize>,
}

impl LogFilter {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if self.level.is_some_and(|min| entry.level < min) {
            return false;
        }
        if self
            .target
            .as_ref()
            .is_some_and(|re| !re.is_match(&entry.target))
        {
            return false;
        }
        if let Some(needle) = &self.contains {
            if !entry
                .message
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if self.after_seq.is_some_and(|after| entry.seq <= after) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQueryResult {
    pub entries: Vec<LogEntry>,
    /// Highest `seq` returned, for the next `after` query.
    pub cursor: u64,
    /// Entries in the ring before filtering.
    pub total: usize,
    pub has_more: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ring buffer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_seq: u64,
}

pub struct LogBuffer {
    inner: RwLock<Inner>,
    live: broadcast::Sender<LogEntry>,
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_BUFFER_CAPACITY);
        let (live, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                next_seq: 1,
            }),
            live,
        }
    }

    /// Append a record, evicting the oldest when full. Returns its `seq`.
    pub fn push(
        &self,
        level: LogLevel,
        target: impl Into<String>,
        message: impl Into<String>,
        fields: Option<serde_json::Value>,
    ) -> u64 {
        let entry = {
            let mut inner = self.inner.write();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let entry = LogEntry {
                seq,
                timestamp: chrono::Utc::now().timestamp_millis(),
                level,
                target: target.into(),
                message: message.into(),
                fields,
            };
            if inner.entries.len() >= inner.capacity {
                inner.entries.pop_front();
            }
            inner.entries.push_back(entry.clone());
            entry
        };
        let seq = entry.seq;
        // No receivers is the common case.
        let _ = self.live.send(entry);
        seq
    }

    /// Most recent matching entries, oldest first.
    pub fn query(&self, filter: &LogFilter) -> LogQueryResult {
        let inner = self.inner.read();
        let total = inner.entries.len();
        let mut entries: Vec<LogEntry> = inner
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT).max(1);
        let has_more = entries.len() > limit;
        if has_more {
            entries = entries.split_off(entries.len() - limit);
        }
        let cursor = entries.last().map(|e| e.seq).unwrap_or(0);

        LogQueryResult {
            entries,
            cursor,
            total,
            has_more,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.live.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// tracing layer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields
                .insert(field.name().to_owned(), serde_json::Value::String(rendered));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            self.fields
                .insert(field.name().to_owned(), serde_json::json!(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_owned(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_owned(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_owned(), serde_json::json!(value));
    }
}

/// Mirrors events into a shared [`LogBuffer`].
pub struct LogBufferLayer {
    buffer: Arc<LogBuffer>,
}

impl LogBufferLayer {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let fields = if visitor.fields.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(visitor.fields))
        };
        self.buffer
            .push(meta.level().into(), meta.target(), visitor.message, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn evicts_oldest_and_keeps_seq_increasing() {
        let buf = LogBuffer::with_capacity(3);
        for i in 0..5 {
            buf.push(LogLevel::Info, "t", format!("m{i}"), None);
        }
        let res = buf.query(&LogFilter::default());
        let seqs: Vec<u64> = res.entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(res.total, 3);
        assert_eq!(res.cursor, 5);
    }

    #[test]
    fn filters_by_level_target_and_text() {
        let buf = LogBuffer::with_capacity(10);
        buf.push(LogLevel::Debug, "sb_sessions::store", "loaded", None);
        buf.push(LogLevel::Warn, "sb_channels::telegram", "getUpdates failed", None);
        buf.push(LogLevel::Error, "sb_gateway::api", "boom", None);

        let warn_up = buf.query(&LogFilter {
            level: Some(LogLevel::Warn),
            ..Default::default()
        });
        assert_eq!(warn_up.entries.len(), 2);

        let channels = buf.query(&LogFilter {
            target: Some(Regex::new("^sb_channels").unwrap()),
            ..Default::default()
        });
        assert_eq!(channels.entries[0].message, "getUpdates failed");

        let text = buf.query(&LogFilter {
            contains: Some("GETUPDATES".into()),
            ..Default::default()
        });
        assert_eq!(text.entries.len(), 1);
    }

    #[test]
    fn limit_returns_most_recent_and_paginates() {
        let buf = LogBuffer::with_capacity(10);
        for i in 0..6 {
            buf.push(LogLevel::Info, "t", format!("m{i}"), None);
        }
        let page = buf.query(&LogFilter {
            limit: Some(2),
            ..Default::default()
        });
        assert!(page.has_more);
        assert_eq!(page.entries[0].message, "m4");

        let after = buf.query(&LogFilter {
            after_seq: Some(5),
            ..Default::default()
        });
        assert_eq!(after.entries.len(), 1);
        assert!(!after.has_more);
    }

    #[test]
    fn layer_captures_message_and_fields() {
        let buf = Arc::new(LogBuffer::with_capacity(10));
        let mut live = buf.subscribe();
        let subscriber = tracing_subscriber::registry().with(LogBufferLayer::new(buf.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(channel = "telegram", attempts = 3u64, "send failed");
        });

        let res = buf.query(&LogFilter::default());
        assert_eq!(res.entries.len(), 1);
        let entry = &res.entries[0];
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.message, "send failed");
        let fields = entry.fields.as_ref().unwrap();
        assert_eq!(fields["channel"], "telegram");
        assert_eq!(fields["attempts"], 3);
        assert_eq!(live.try_recv().unwrap().seq, entry.seq);
    }
}
