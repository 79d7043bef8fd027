//! Channel adapters and their supervisor.
//!
//! Every transport implements [`ChannelAdapter`] on top of the shared
//! [`AdapterCore`] (allowlist, bind gate, status, send retry). The
//! [`AdapterManager`] reconciles the running set against configuration.

pub mod adapter;
pub mod allowlist;
pub mod bind;
pub mod common;
pub mod factory;
pub mod manager;
pub mod retry;
pub mod telegram;
pub mod webhook;

pub use adapter::{AdapterFactory, ChannelAdapter, InboundHandler};
pub use allowlist::Allowlist;
pub use bind::{BindGate, BindOutcome};
pub use common::{AdapterCore, Admission};
pub use factory::DefaultAdapterFactory;
pub use manager::{AdapterManager, AdapterView, ReloadAction, ReloadEntry, ReloadReport};
pub use retry::SendRetry;
pub use telegram::TelegramAdapter;
pub use webhook::WebhookAdapter;
