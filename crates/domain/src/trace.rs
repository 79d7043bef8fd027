use serde::Serialize;

/// Structured trace events emitted across all Switchboard crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_key: String,
        channel: String,
        is_new: bool,
    },
    SessionReset {
        session_key: String,
        dropped_messages: usize,
    },
    SessionEvicted {
        session_key: String,
        evicted: usize,
    },
    AdapterTransition {
        channel: String,
        kind: String,
        from: String,
        to: String,
    },
    ReloadApplied {
        started: usize,
        stopped: usize,
        restarted: usize,
        updated: usize,
        failed: usize,
    },
    InboundDenied {
        channel: String,
        sender: String,
    },
    ExecutorCall {
        provider: String,
        model: String,
        duration_ms: u64,
        input_tokens: u64,
        output_tokens: u64,
    },
    PairingExchanged {
        client_ip: String,
        ok: bool,
    },
    ConfigSwapped {
        source: String,
    },
}

impl TraceEvent {
    /// Emit this event as a structured `tracing` info event.
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            tracing::info!(trace_event = %json, "sb_event");
        }
    }
}
