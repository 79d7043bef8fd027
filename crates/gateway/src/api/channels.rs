//! Channel adapter configuration and live status.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

use sb_channels::{AdapterView, ReloadReport};

use crate::api::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    pub name: String,
    pub kind: String,
    pub enabled: bool,
    pub has_credentials: bool,
    pub require_bind: bool,
    pub allow_users: Vec<String>,
    pub allow_groups: Vec<String>,
    /// Live adapter state, absent for channels the manager has not seen.
    pub live: Option<AdapterView>,
}

/// GET /api/channels: configured channels joined with their live state.
/// Credentials are never included.
pub async fn list_channels(State(state): State<AppState>) -> Json<Vec<ChannelEntry>> {
    let config = state.snapshot();
    let mut live = state.channels.statuses();
    let entries = config
        .channels
        .iter()
        .map(|(name, ch)| ChannelEntry {
            name: name.clone(),
            kind: ch.kind_for(name).to_owned(),
            enabled: ch.enabled,
            has_credentials: ch.has_credentials(name),
            require_bind: ch.require_bind,
            allow_users: ch.allow_users.clone(),
            allow_groups: ch.allow_groups.clone(),
            live: live.remove(name),
        })
        .collect();
    Json(entries)
}

/// GET /api/channels/status and /api/internal/channel-status.
pub async fn channel_status(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, AdapterView>> {
    Json(state.channels.statuses())
}

/// POST /api/channels/reload and /api/internal/reload: re-read
/// `config.yaml` and reconcile adapters.
pub async fn reload(State(state): State<AppState>) -> ApiResult<Json<ReloadReport>> {
    Ok(Json(state.reload("api").await?))
}
