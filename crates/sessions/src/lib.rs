//! Session management for Switchboard.
//!
//! Sessions are addressed by `agent:<agentId>:<conversationId>` keys,
//! owned by the gateway, bounded in length, and mirrored to one JSON file
//! per session with debounced atomic writes.

pub mod bindings;
pub mod history;
pub mod persist;
pub mod session;
pub mod session_key;
pub mod store;

pub use bindings::{SessionBinding, SessionBindings};
pub use history::{trim_history, truncate_chars};
pub use session::{Message, Session, SessionSummary};
pub use session_key::{
    binding_conversation, normalize_key, resolve_session_from_config, SessionKey,
};
pub use store::SessionManager;
