use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transport kinds the gateway knows how to construct.
pub const KNOWN_CHANNEL_KINDS: &[&str] = &["telegram", "webhook"];

/// One entry under `channels:`. The map key is the adapter name; `kind`
/// defaults to that name so `channels.telegram` needs no `kind` line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default = "d_true")]
    pub enabled: bool,

    // ── Restart-sensitive ────────────────────────────────────────────
    /// Bot token or equivalent credential.
    #[serde(default)]
    pub token: Option<String>,
    /// Override of the transport API endpoint.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Listen address for push transports (`127.0.0.1:8788`).
    #[serde(default)]
    pub listen: Option<String>,
    /// Shared secret used to sign or authenticate inbound pushes.
    #[serde(default)]
    pub secret: Option<String>,
    /// Where asynchronous replies are delivered, for push transports.
    #[serde(default)]
    pub reply_url: Option<String>,
    /// Require a peer to echo a bind code before anything is accepted.
    #[serde(default)]
    pub require_bind: bool,

    // ── Hot-update ───────────────────────────────────────────────────
    #[serde(default)]
    pub allow_users: Vec<String>,
    #[serde(default)]
    pub allow_groups: Vec<String>,
    /// Reply sent to peers outside the allowlist. Silent when unset.
    #[serde(default)]
    pub deny_message: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: None,
            enabled: true,
            token: None,
            api_base: None,
            listen: None,
            secret: None,
            reply_url: None,
            require_bind: false,
            allow_users: Vec::new(),
            allow_groups: Vec::new(),
            deny_message: None,
        }
    }
}

/// The fields whose change forces a stop/start of the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartKey {
    pub kind: String,
    pub token: Option<String>,
    pub api_base: Option<String>,
    pub listen: Option<String>,
    pub secret: Option<String>,
    pub reply_url: Option<String>,
    pub require_bind: bool,
}

/// The fields an adapter can absorb without reconnecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotFields {
    pub allow_users: Vec<String>,
    pub allow_groups: Vec<String>,
    pub deny_message: Option<String>,
}

impl ChannelConfig {
    /// The transport kind for an adapter registered under `name`.
    pub fn kind_for<'a>(&'a self, name: &'a str) -> &'a str {
        self.kind.as_deref().unwrap_or(name)
    }

    /// Whether the credentials this kind needs are present.
    pub fn has_credentials(&self, name: &str) -> bool {
        match self.kind_for(name) {
            "webhook" => non_empty(&self.listen),
            _ => non_empty(&self.token),
        }
    }

    /// Desired state: enabled and carrying credentials.
    pub fn is_active(&self, name: &str) -> bool {
        self.enabled && self.has_credentials(name)
    }

    pub fn restart_key(&self, name: &str) -> RestartKey {
        RestartKey {
            kind: self.kind_for(name).to_owned(),
            token: self.token.clone(),
            api_base: self.api_base.clone(),
            listen: self.listen.clone(),
            secret: self.secret.clone(),
            reply_url: self.reply_url.clone(),
            require_bind: self.require_bind,
        }
    }

    pub fn hot_fields(&self) -> HotFields {
        HotFields {
            allow_users: self.allow_users.clone(),
            allow_groups: self.allow_groups.clone(),
            deny_message: self.deny_message.clone(),
        }
    }
}

fn non_empty(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_defaults_to_name() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.kind_for("telegram"), "telegram");
        let cfg = ChannelConfig {
            kind: Some("webhook".into()),
            ..Default::default()
        };
        assert_eq!(cfg.kind_for("ops-hook"), "webhook");
    }

    #[test]
    fn credentials_depend_on_kind() {
        let tg = ChannelConfig {
            token: Some("123:abc".into()),
            ..Default::default()
        };
        assert!(tg.is_active("telegram"));
        assert!(!ChannelConfig::default().is_active("telegram"));

        let hook = ChannelConfig {
            listen: Some("127.0.0.1:8788".into()),
            ..Default::default()
        };
        assert!(hook.is_active("webhook"));

        let disabled = ChannelConfig {
            enabled: false,
            ..tg
        };
        assert!(!disabled.is_active("telegram"));
    }

    #[test]
    fn allowlist_change_keeps_restart_key() {
        let a = ChannelConfig {
            token: Some("T1".into()),
            allow_users: vec!["alice".into()],
            ..Default::default()
        };
        let b = ChannelConfig {
            allow_users: vec!["alice".into(), "carol".into()],
            ..a.clone()
        };
        assert_eq!(a.restart_key("x"), b.restart_key("x"));
        assert_ne!(a.hot_fields(), b.hot_fields());

        let c = ChannelConfig {
            token: Some("T2".into()),
            ..a.clone()
        };
        assert_ne!(a.restart_key("x"), c.restart_key("x"));
    }
}
