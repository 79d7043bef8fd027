//! Gateway runtime services wired together by [`crate::bootstrap`].

pub mod audit;
pub mod bind;
pub mod catalog;
pub mod config_store;
pub mod memory;
pub mod pairing;
pub mod pipeline;
pub mod ratelimit;
pub mod session_lock;
pub mod stats;

pub use audit::Audit;
pub use config_store::ConfigStore;
pub use memory::MemoryStore;
pub use pairing::{PairingGuard, PairingState};
pub use pipeline::{ChatEvent, Pipeline, Turn, TurnOutcome};
pub use ratelimit::SlidingWindow;
