//! The Switchboard gateway: control plane, inbound pipeline and CLI.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod logging;
pub mod runtime;
pub mod server;
pub mod state;
