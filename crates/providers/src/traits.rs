use std::time::Duration;

use sb_domain::chat::HistoryEntry;
use sb_domain::config::AgentConfig;
use sb_domain::error::Result;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One agent turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub session_key: String,
    /// Channel tag the message came through (`api`, `cli`, adapter name).
    pub channel: String,
    pub sender: String,
    pub message_id: String,
    /// The current user message. Not repeated in `history`.
    pub body: String,
    /// Trimmed prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Provider override (`openai`, `anthropic`, ...).
    #[serde(default)]
    pub provider: Option<String>,
    /// Model override, either `provider/model` or a bare model name.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Token usage counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub reply: String,
    pub usage: Usage,
    /// Model that actually produced the reply.
    pub model: String,
}

/// Per-call knobs taken from the `agent` config section.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            timeout: Duration::from_secs(120),
        }
    }
}

impl From<&AgentConfig> for ExecutorSettings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            system_prompt: cfg.system_prompt.clone().filter(|s| !s.trim().is_empty()),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core executor trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Produces a reply for one turn.
///
/// Implementations must not mutate the request, must return
/// [`sb_domain::error::Error::Cancelled`] promptly once `cancel` fires, and
/// must report upstream rejections as errors rather than panicking.
#[async_trait::async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<RunResult>;

    /// Identifier used in logs and audit records.
    fn name(&self) -> &str;
}
