use std::sync::Arc;

use async_trait::async_trait;
use sb_domain::channel::{ChannelStatus, IncomingMessage};
use sb_domain::config::ChannelConfig;
use sb_domain::error::Result;
use tokio_util::sync::CancellationToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter capability set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One transport connection.
///
/// Lifecycle: `Created → Starting → (Running | AwaitingBind → Bound) →
/// Stopped`, with `Error` on a fatal failure. `start` returns once the
/// transport is connected; the receive loop keeps running until `stop` or
/// the token passed to `start` is cancelled.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Adapter instance name (the key under `channels:`).
    fn name(&self) -> &str;

    fn kind(&self) -> &str;

    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// Disconnect. Idempotent.
    async fn stop(&self) -> Result<()>;

    fn status(&self) -> ChannelStatus;

    fn is_bound(&self) -> bool;

    fn bind_code(&self) -> Option<String>;

    /// Replace the allowlist without reconnecting.
    fn update_allowlist(&self, users: &[String], groups: &[String]);

    fn set_deny_message(&self, message: Option<String>);

    fn set_message_handler(&self, handler: Arc<dyn InboundHandler>);
}

/// Receives admitted inbound messages. Implemented by the gateway pipeline.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Run one turn and return the reply text. An empty reply sends nothing.
    async fn handle(&self, msg: IncomingMessage, cancel: CancellationToken) -> Result<String>;

    /// Record a message rejected by the allowlist.
    async fn denied(&self, msg: &IncomingMessage);
}

/// Builds adapters from configuration. The manager's only way to construct
/// one, so tests can substitute their own.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, name: &str, config: &ChannelConfig) -> Result<Arc<dyn ChannelAdapter>>;
}
