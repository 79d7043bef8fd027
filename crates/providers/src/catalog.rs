//! Built-in provider catalog: wire protocol, default endpoint, credential
//! environment variable and a few well-known models per provider.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
    Echo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: &'static str,
    pub kind: ProviderKind,
    pub base_url: &'static str,
    /// Environment variable whose value overrides a configured key.
    pub env_var: Option<&'static str>,
    pub requires_key: bool,
    pub models: &'static [&'static str],
}

pub const KNOWN_PROVIDERS: &[ProviderInfo] = &[
    ProviderInfo {
        id: "openai",
        kind: ProviderKind::OpenaiCompat,
        base_url: "https://api.openai.com/v1",
        env_var: Some("OPENAI_API_KEY"),
        requires_key: true,
        models: &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini", "o3-mini"],
    },
    ProviderInfo {
        id: "anthropic",
        kind: ProviderKind::Anthropic,
        base_url: "https://api.anthropic.com",
        env_var: Some("ANTHROPIC_API_KEY"),
        requires_key: true,
        models: &[
            "claude-3-5-haiku-latest",
            "claude-3-7-sonnet-latest",
            "claude-sonnet-4-20250514",
        ],
    },
    ProviderInfo {
        id: "openrouter",
        kind: ProviderKind::OpenaiCompat,
        base_url: "https://openrouter.ai/api/v1",
        env_var: Some("OPENROUTER_API_KEY"),
        requires_key: true,
        models: &[
            "openai/gpt-4o-mini",
            "anthropic/claude-3.5-haiku",
            "meta-llama/llama-3.1-70b-instruct",
        ],
    },
    ProviderInfo {
        id: "groq",
        kind: ProviderKind::OpenaiCompat,
        base_url: "https://api.groq.com/openai/v1",
        env_var: Some("GROQ_API_KEY"),
        requires_key: true,
        models: &["llama-3.1-8b-instant", "llama-3.3-70b-versatile"],
    },
    ProviderInfo {
        id: "deepseek",
        kind: ProviderKind::OpenaiCompat,
        base_url: "https://api.deepseek.com/v1",
        env_var: Some("DEEPSEEK_API_KEY"),
        requires_key: true,
        models: &["deepseek-chat", "deepseek-reasoner"],
    },
    ProviderInfo {
        id: "ollama",
        kind: ProviderKind::OpenaiCompat,
        base_url: "http://127.0.0.1:11434/v1",
        env_var: None,
        requires_key: false,
        models: &["llama3.2", "qwen2.5"],
    },
    ProviderInfo {
        id: "echo",
        kind: ProviderKind::Echo,
        base_url: "",
        env_var: None,
        requires_key: false,
        models: &["echo"],
    },
];

pub fn lookup(id: &str) -> Option<&'static ProviderInfo> {
    KNOWN_PROVIDERS.iter().find(|p| p.id == id)
}

/// Every catalog model as `provider/model`.
pub fn all_models() -> Vec<String> {
    KNOWN_PROVIDERS
        .iter()
        .flat_map(|p| p.models.iter().map(move |m| format!("{}/{m}", p.id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<_> = KNOWN_PROVIDERS.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), KNOWN_PROVIDERS.len());
    }

    #[test]
    fn default_model_is_in_catalog() {
        let default = sb_domain::config::AgentConfig::default().model;
        assert!(all_models().contains(&default));
    }

    #[test]
    fn lookup_finds_known() {
        assert_eq!(lookup("anthropic").unwrap().kind, ProviderKind::Anthropic);
        assert!(lookup("carrier-pigeon").is_none());
    }
}
