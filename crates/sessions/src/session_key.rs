//! Session key computation.
//!
//! Key template: `agent:<agentId>:<conversationId>` where the conversation id is
//! - `<channel>:<peerId>` for direct chats,
//! - `<channel>:grp:<groupId>` for group chats,
//! - or a fixed id chosen by a configured override.

use std::fmt;
use std::str::FromStr;

use sb_domain::channel::{ChatType, PeerContext};
use sb_domain::config::{SessionOverride, SessionsConfig};
use sb_domain::error::Error;

/// Structured session address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub agent_id: String,
    pub conversation: String,
}

impl SessionKey {
    pub fn new(agent_id: impl Into<String>, conversation: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            conversation: conversation.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent:{}:{}", self.agent_id, self.conversation)
    }
}

impl FromStr for SessionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("agent:")
            .ok_or_else(|| Error::Validation(format!("session key '{s}' must start with 'agent:'")))?;
        let (agent_id, conversation) = rest
            .split_once(':')
            .ok_or_else(|| Error::Validation(format!("session key '{s}' has no conversation id")))?;
        if agent_id.is_empty() || conversation.is_empty() {
            return Err(Error::Validation(format!(
                "session key '{s}' has an empty segment"
            )));
        }
        Ok(Self::new(agent_id, conversation))
    }
}

/// Accept either a full key or a bare conversation label (`family`), which
/// is expanded under `agent_id`.
pub fn normalize_key(agent_id: &str, input: &str) -> Result<String, Error> {
    if input.starts_with("agent:") {
        Ok(input.parse::<SessionKey>()?.to_string())
    } else if input.trim().is_empty() {
        Err(Error::Validation("session key must not be empty".into()))
    } else {
        Ok(SessionKey::new(agent_id, input.trim()).to_string())
    }
}

/// The conversation id a peer gets without any override.
pub fn default_conversation(peer: &PeerContext) -> String {
    match (peer.kind, peer.group_id.as_deref()) {
        (ChatType::Group, Some(group)) => format!("{}:grp:{group}", peer.channel),
        _ => format!("{}:{}", peer.channel, peer.peer_id),
    }
}

/// The per-channel half of a binding: the peer id for direct chats,
/// `grp:<groupId>` for groups.
pub fn binding_conversation(peer: &PeerContext) -> String {
    match (peer.kind, peer.group_id.as_deref()) {
        (ChatType::Group, Some(group)) => format!("grp:{group}"),
        _ => peer.peer_id.clone(),
    }
}

fn override_matches(rule: &SessionOverride, peer: &PeerContext) -> bool {
    if let Some(channel) = &rule.channel {
        if channel != &peer.channel {
            return false;
        }
    }
    if let Some(p) = &rule.peer {
        if p != &peer.peer_id {
            return false;
        }
    }
    if let Some(g) = &rule.group {
        if peer.kind != ChatType::Group || peer.group_id.as_deref() != Some(g.as_str()) {
            return false;
        }
    }
    true
}

/// Pick the most specific matching override. Ties go to the earlier rule.
pub fn find_override<'a>(
    overrides: &'a [SessionOverride],
    peer: &PeerContext,
) -> Option<&'a SessionOverride> {
    let mut best: Option<&SessionOverride> = None;
    for rule in overrides.iter().filter(|r| override_matches(r, peer)) {
        match best {
            Some(b) if b.specificity() >= rule.specificity() => {}
            _ => best = Some(rule),
        }
    }
    best
}

/// Resolve a peer to its session key using only configuration.
pub fn resolve_session_from_config(peer: &PeerContext, config: &SessionsConfig) -> SessionKey {
    let conversation = find_override(&config.overrides, peer)
        .map(|o| o.conversation.clone())
        .unwrap_or_else(|| default_conversation(peer));
    SessionKey::new(config.agent_id.clone(), conversation)
}
