use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Default model as `provider/model`, e.g. `openai/gpt-4o-mini`.
    #[serde(default = "d_model")]
    pub model: String,
    /// Agent workspace. Defaults to `<home>/workspace`.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Upper bound on a single executor call.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
    /// Per-provider credentials, keyed by provider name (`openai`, ...).
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderCredentials>,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: d_model(),
            workspace: None,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: d_timeout(),
            providers: BTreeMap::new(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Split `agent.model` into `(provider, model)`.
    pub fn provider_and_model(&self) -> Option<(&str, &str)> {
        split_model(&self.model)
    }
}

/// Split a `provider/model` spec. The model part may itself contain `/`
/// (e.g. `openrouter/meta-llama/llama-3-70b`).
pub fn split_model(spec: &str) -> Option<(&str, &str)> {
    let (provider, model) = spec.split_once('/')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider, model))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Tool sandbox allow/deny lists, passed through to executors that run tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

fn d_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn d_timeout() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_model_keeps_nested_slashes() {
        assert_eq!(
            split_model("openrouter/meta-llama/llama-3-70b"),
            Some(("openrouter", "meta-llama/llama-3-70b"))
        );
        assert_eq!(split_model("gpt-4o"), None);
        assert_eq!(split_model("/gpt-4o"), None);
        assert_eq!(split_model("openai/"), None);
    }
}
