mod agent;
mod channels;
mod gateway;
mod logging;
mod memory;
mod merge;
mod paths;
mod sessions;
mod task_log;

pub use agent::*;
pub use channels::*;
pub use gateway::*;
pub use logging::*;
pub use memory::*;
pub use merge::deep_merge;
pub use paths::HomeLayout;
pub use sessions::*;
pub use task_log::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Placeholder written over secrets in redacted views.
pub const REDACTED: &str = "***";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Channel adapters keyed by adapter name.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub task_log: TaskLogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a YAML document. An empty document yields the defaults.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// JSON view of the document, used for deep-merge patches.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild a typed document from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::Validation(e.to_string()))
    }

    /// Apply a partial document and return the merged result.
    pub fn merged_with(&self, patch: &serde_json::Value) -> Result<Self> {
        let mut value = self.to_value()?;
        deep_merge(&mut value, patch);
        Self::from_value(value)
    }

    /// JSON view with every credential replaced by [`REDACTED`].
    pub fn redacted(&self) -> Result<serde_json::Value> {
        let mut copy = self.clone();
        redact(&mut copy.gateway.auth.token);
        redact(&mut copy.gateway.auth.password);
        for creds in copy.agent.providers.values_mut() {
            redact(&mut creds.api_key);
        }
        for ch in copy.channels.values_mut() {
            redact(&mut ch.token);
            redact(&mut ch.secret);
        }
        copy.to_value()
    }

    /// Issues with severity `Error`, joined for display. `Ok` when none.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .map(|i| i.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors.join("; ")))
        }
    }
}

/// Providers that run locally and need no key.
const KEYLESS_PROVIDERS: &[&str] = &["echo", "ollama"];

/// Conventional environment variable holding `provider`'s API key.
pub fn provider_env_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"))
}

impl Config {
    fn provider_has_credentials(&self, provider: &str) -> bool {
        if KEYLESS_PROVIDERS.contains(&provider) {
            return true;
        }
        let configured = self.agent.providers.get(provider).is_some_and(|c| {
            c.api_key.as_deref().is_some_and(|k| !k.is_empty())
                || c.base_url.as_deref().is_some_and(|b| !b.is_empty())
        });
        configured
            || std::env::var(provider_env_var(provider)).is_ok_and(|v| !v.trim().is_empty())
    }
}

fn redact(field: &mut Option<String>) {
    if field.as_deref().is_some_and(|v| !v.is_empty()) {
        *field = Some(REDACTED.into());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.gateway.port == 0 {
            errors.push(ConfigError::error(
                "gateway.port",
                "port must be between 1 and 65535",
            ));
        }

        let auth = &self.gateway.auth;
        if auth.mode == AuthMode::Token
            && self.gateway.bind != BindMode::Loopback
            && auth.static_token().is_none()
        {
            errors.push(ConfigError::error(
                "gateway.auth.token",
                format!(
                    "a token is required when bind is '{}' (pairing is loopback-only)",
                    self.gateway.bind
                ),
            ));
        }
        if auth.mode == AuthMode::Password
            && auth.password.as_deref().map_or(true, str::is_empty)
        {
            errors.push(ConfigError::error(
                "gateway.auth.password",
                "password mode requires a non-empty password",
            ));
        }
        if auth.mode == AuthMode::None && self.gateway.bind != BindMode::Loopback {
            errors.push(ConfigError::warning(
                "gateway.auth.mode",
                "control plane is reachable from the network without authentication",
            ));
        }

        if self.agent.model.trim().is_empty() {
            errors.push(ConfigError::error("agent.model", "model must not be empty"));
        } else if self.agent.provider_and_model().is_none() {
            errors.push(ConfigError::error(
                "agent.model",
                format!("'{}' must have the form provider/model", self.agent.model),
            ));
        }

        if let Some((provider, _)) = self.agent.provider_and_model() {
            if !self.provider_has_credentials(provider) {
                errors.push(ConfigError::warning(
                    format!("agent.providers.{provider}"),
                    format!(
                        "no credentials for '{provider}' (set {} or agent.providers.{provider}.apiKey)",
                        provider_env_var(provider)
                    ),
                ));
            }
        }

        if self.sessions.max_messages == 0 {
            errors.push(ConfigError::error(
                "sessions.maxMessages",
                "must be at least 1",
            ));
        }

        for (name, ch) in &self.channels {
            let kind = ch.kind_for(name);
            if !KNOWN_CHANNEL_KINDS.contains(&kind) {
                errors.push(ConfigError::error(
                    format!("channels.{name}.kind"),
                    format!(
                        "unknown channel kind '{kind}' (known: {})",
                        KNOWN_CHANNEL_KINDS.join(", ")
                    ),
                ));
                continue;
            }
            if ch.is_active(name)
                && ch.allow_users.is_empty()
                && ch.allow_groups.is_empty()
                && !ch.require_bind
            {
                errors.push(ConfigError::warning(
                    format!("channels.{name}.allowUsers"),
                    "allowlist is empty and requireBind is off: every message will be dropped",
                ));
            }
        }

        if self.task_log.enabled && self.task_log.max_records == 0 {
            errors.push(ConfigError::error(
                "taskLog.maxRecords",
                "must be greater than 0 when the task log is enabled",
            ));
        }

        if self.gateway.cors.allowed_origins.len() == 1
            && self.gateway.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "gateway.cors.allowedOrigins",
                "wildcard \"*\" allows all origins",
            ));
        }

        errors
    }
}
