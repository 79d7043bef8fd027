//! Liveness and component status.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

use sb_domain::channel::ChannelState;
use sb_domain::config::AuthMode;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Component {
    fn ok(detail: impl Into<String>) -> Self {
        Self {
            healthy: true,
            detail: Some(detail.into()),
        }
    }

    fn failing(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub session_count: usize,
    pub bind_address: Option<String>,
    pub auth_mode: AuthMode,
    pub model: String,
    pub components: BTreeMap<&'static str, Component>,
}

/// Assemble the status report. Shared with `/api/internal/status`.
pub fn status_report(state: &AppState) -> StatusReport {
    let config = state.snapshot();
    let mut components = BTreeMap::new();

    components.insert(
        "config",
        Component::ok(state.config.path().display().to_string()),
    );
    components.insert(
        "sessions",
        Component::ok(format!("{} pending writes", state.sessions.pending_writes())),
    );
    components.insert(
        "taskLog",
        match state.audit.task_log() {
            Some(log) if log.is_closed() => Component::failing("closed"),
            Some(log) => Component::ok(log.db_path().display().to_string()),
            None => Component {
                healthy: true,
                detail: Some("disabled".into()),
            },
        },
    );

    let statuses = state.channels.statuses();
    let failing: Vec<&str> = statuses
        .iter()
        .filter(|(_, v)| v.status.status == ChannelState::Error)
        .map(|(k, _)| k.as_str())
        .collect();
    components.insert(
        "channels",
        if failing.is_empty() {
            Component::ok(format!("{} configured", statuses.len()))
        } else {
            Component::failing(format!("failing: {}", failing.join(", ")))
        },
    );
    components.insert("executor", Component::ok(state.pipeline.executor_name()));

    StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        session_count: state.sessions.len(),
        bind_address: state.listen_addr.read().map(|a| a.to_string()),
        auth_mode: state.pairing.mode(),
        model: config.agent.model.clone(),
        components,
    }
}

pub async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(status_report(&state))
}
