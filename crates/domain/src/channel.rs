use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whether a message arrived in a one-to-one chat or a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    #[default]
    Direct,
    Group,
}

/// Opaque attachment carried alongside a message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub mime: String,
    /// Raw bytes, base64 when serialized by the transport that produced it.
    pub data: Vec<u8>,
}

/// The normalized record every channel adapter produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    /// Adapter instance name (the key under `channels:`).
    pub channel: String,
    /// Adapter-assigned id, unique within the adapter.
    pub message_id: String,
    /// Sender principal as the transport identifies it.
    pub sender: String,
    pub chat_type: ChatType,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Transport-level conversation to reply into (chat id, thread id).
    /// Defaults to the sender for direct chats.
    #[serde(default)]
    pub reply_to: Option<String>,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    /// Convenience constructor for a direct text message received now.
    pub fn direct(channel: &str, message_id: &str, sender: &str, body: &str) -> Self {
        Self {
            channel: channel.to_owned(),
            message_id: message_id.to_owned(),
            sender: sender.to_owned(),
            chat_type: ChatType::Direct,
            group_id: None,
            reply_to: None,
            body: body.to_owned(),
            attachments: Vec::new(),
            received_at: Utc::now(),
        }
    }

    /// Where a reply should be delivered on the transport.
    pub fn reply_target(&self) -> &str {
        self.reply_to
            .as_deref()
            .or(self.group_id.as_deref())
            .unwrap_or(&self.sender)
    }

    /// Build the peer context used for session resolution.
    pub fn peer(&self) -> PeerContext {
        PeerContext {
            channel: self.channel.clone(),
            peer_id: self.sender.clone(),
            kind: self.chat_type,
            group_id: self.group_id.clone(),
        }
    }
}

/// Input to session resolution: `(channel, principal, kind, group?)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerContext {
    pub channel: String,
    pub peer_id: String,
    pub kind: ChatType,
    #[serde(default)]
    pub group_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reported state of one channel adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Starting,
    Running,
    Bound,
    AwaitingBind,
    Stopped,
    Error,
    Disabled,
    Restarted,
    Updated,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::Starting => "starting",
            ChannelState::Running => "running",
            ChannelState::Bound => "bound",
            ChannelState::AwaitingBind => "awaiting_bind",
            ChannelState::Stopped => "stopped",
            ChannelState::Error => "error",
            ChannelState::Disabled => "disabled",
            ChannelState::Restarted => "restarted",
            ChannelState::Updated => "updated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub status: ChannelState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelStatus {
    pub fn new(status: ChannelState) -> Self {
        Self {
            status,
            bind_code: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ChannelState::Error,
            bind_code: None,
            error: Some(message.into()),
        }
    }

    pub fn with_bind_code(mut self, code: Option<String>) -> Self {
        self.bind_code = code;
        self
    }
}
