use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session routing and history bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsConfig {
    /// Agent id embedded in every session key (`agent:<agentId>:...`).
    #[serde(default = "d_agent_id")]
    pub agent_id: String,
    /// Maximum retained messages per session; oldest are evicted first.
    #[serde(default = "d_max_messages")]
    pub max_messages: usize,
    /// Number of recent messages handed to the executor.
    #[serde(default = "d_history_limit")]
    pub history_limit: usize,
    /// Per-message cap (in characters) applied when building executor history.
    #[serde(default = "d_max_message_chars")]
    pub max_message_chars: usize,
    /// Remap peers to fixed conversation ids.
    #[serde(default)]
    pub overrides: Vec<SessionOverride>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            agent_id: d_agent_id(),
            max_messages: d_max_messages(),
            history_limit: d_history_limit(),
            max_message_chars: d_max_message_chars(),
            overrides: Vec::new(),
        }
    }
}

/// One override rule. Unset fields match anything; the rule with the most
/// constrained fields wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverride {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub peer: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    pub conversation: String,
}

impl SessionOverride {
    pub fn specificity(&self) -> usize {
        [&self.channel, &self.peer, &self.group]
            .iter()
            .filter(|f| f.is_some())
            .count()
    }
}

fn d_agent_id() -> String {
    "main".into()
}
fn d_max_messages() -> usize {
    200
}
fn d_history_limit() -> usize {
    16
}
fn d_max_message_chars() -> usize {
    3000
}
