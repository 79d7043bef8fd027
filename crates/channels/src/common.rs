//! State shared by every adapter: allowlist, bind gate, lifecycle status,
//! and the installed inbound handler.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sb_domain::channel::{ChannelState, ChannelStatus, IncomingMessage};
use sb_domain::config::ChannelConfig;
use sb_domain::error::Error;
use sb_domain::trace::TraceEvent;
use tokio_util::sync::CancellationToken;

use crate::adapter::InboundHandler;
use crate::allowlist::Allowlist;
use crate::bind::{BindGate, BindOutcome};
use crate::retry::SendRetry;

const BOUND_REPLY: &str = "Bound. This chat can now talk to the assistant.";

/// Verdict for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Hand to the inbound handler.
    Admit,
    /// The message carried the bind code; reply with the confirmation.
    Bound(String),
    /// Outside the allowlist; reply with the deny message if any.
    Deny(Option<String>),
    /// Adapter awaiting bind; drop without a trace.
    Drop,
}

pub struct AdapterCore {
    name: String,
    kind: String,
    allowlist: RwLock<Allowlist>,
    bind: BindGate,
    state: Mutex<ChannelState>,
    last_error: Mutex<Option<String>>,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
    deny_message: RwLock<Option<String>>,
    retry: SendRetry,
}

impl AdapterCore {
    pub fn new(name: &str, config: &ChannelConfig) -> Self {
        let bind = if config.require_bind {
            BindGate::generate()
        } else {
            BindGate::disabled()
        };
        Self::with_bind_gate(name, config, bind)
    }

    pub fn with_bind_gate(name: &str, config: &ChannelConfig, bind: BindGate) -> Self {
        Self {
            name: name.to_owned(),
            kind: config.kind_for(name).to_owned(),
            allowlist: RwLock::new(Allowlist::new(&config.allow_users, &config.allow_groups)),
            bind,
            state: Mutex::new(ChannelState::Stopped),
            last_error: Mutex::new(None),
            handler: RwLock::new(None),
            deny_message: RwLock::new(config.deny_message.clone()),
            retry: SendRetry::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn retry(&self) -> &SendRetry {
        &self.retry
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    pub fn set_state(&self, to: ChannelState) {
        let from = std::mem::replace(&mut *self.state.lock(), to);
        if from != to {
            TraceEvent::AdapterTransition {
                channel: self.name.clone(),
                kind: self.kind.clone(),
                from: from.to_string(),
                to: to.to_string(),
            }
            .emit();
        }
        if to != ChannelState::Error {
            *self.last_error.lock() = None;
        }
    }

    pub fn fail(&self, err: &Error) {
        tracing::error!(channel = %self.name, kind = %self.kind, error = %err, "adapter failed");
        self.set_state(ChannelState::Error);
        *self.last_error.lock() = Some(err.to_string());
    }

    /// State to enter once the transport is connected.
    pub fn mark_connected(&self) {
        let state = if !self.bind.is_enabled() {
            ChannelState::Running
        } else if self.bind.is_bound() {
            ChannelState::Bound
        } else {
            ChannelState::AwaitingBind
        };
        self.set_state(state);
    }

    pub fn status(&self) -> ChannelStatus {
        let state = self.state();
        let status = match self.last_error.lock().clone() {
            Some(e) if state == ChannelState::Error => ChannelStatus::error(e),
            _ => ChannelStatus::new(state),
        };
        status.with_bind_code(self.bind_code())
    }

    pub fn is_bound(&self) -> bool {
        self.bind.is_bound()
    }

    pub fn bind_code(&self) -> Option<String> {
        self.bind.pending_code()
    }

    // ── Hot updates ──────────────────────────────────────────────────

    pub fn update_allowlist(&self, users: &[String], groups: &[String]) {
        *self.allowlist.write() = Allowlist::new(users, groups);
        tracing::info!(
            channel = %self.name,
            users = users.len(),
            groups = groups.len(),
            "allowlist updated"
        );
    }

    pub fn allowlist(&self) -> Allowlist {
        self.allowlist.read().clone()
    }

    pub fn set_deny_message(&self, message: Option<String>) {
        *self.deny_message.write() = message.filter(|m| !m.trim().is_empty());
    }

    pub fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self.handler.write() = Some(handler);
    }

    // ── Inbound ──────────────────────────────────────────────────────

    pub fn admit(&self, msg: &IncomingMessage, aliases: &[String]) -> Admission {
        match self.bind.check(msg) {
            BindOutcome::JustBound(principal) => {
                tracing::info!(channel = %self.name, principal = %principal, "adapter bound");
                self.set_state(ChannelState::Bound);
                return Admission::Bound(BOUND_REPLY.to_owned());
            }
            BindOutcome::Drop => return Admission::Drop,
            BindOutcome::Pass if self.bind.is_principal_bound(msg) => return Admission::Admit,
            BindOutcome::Pass => {}
        }
        if self.allowlist.read().admits(msg, aliases) {
            Admission::Admit
        } else {
            Admission::Deny(self.deny_message.read().clone())
        }
    }

    /// Admit `msg` and run it through the handler. Returns the text to send
    /// back over the transport, if any.
    pub async fn dispatch(
        &self,
        msg: IncomingMessage,
        aliases: &[String],
        cancel: CancellationToken,
    ) -> Option<String> {
        let handler = self.handler.read().clone();
        match self.admit(&msg, aliases) {
            Admission::Bound(reply) => Some(reply),
            Admission::Drop => {
                tracing::debug!(channel = %self.name, sender = %msg.sender, "dropped before bind");
                None
            }
            Admission::Deny(reply) => {
                TraceEvent::InboundDenied {
                    channel: self.name.clone(),
                    sender: msg.sender.clone(),
                }
                .emit();
                if let Some(h) = handler {
                    h.denied(&msg).await;
                }
                reply
            }
            Admission::Admit => {
                let Some(h) = handler else {
                    tracing::warn!(channel = %self.name, "no message handler installed, dropping");
                    return None;
                };
                match h.handle(msg, cancel).await {
                    Ok(reply) if reply.trim().is_empty() => None,
                    Ok(reply) => Some(reply),
                    Err(Error::Cancelled) => None,
                    Err(e) => Some(format!("Sorry, that failed: {e}")),
                }
            }
        }
    }
}
