//! Shared types for the Switchboard gateway: error taxonomy, the
//! configuration document, and the normalized channel records every
//! adapter produces.

pub mod channel;
pub mod chat;
pub mod config;
pub mod error;
pub mod trace;
