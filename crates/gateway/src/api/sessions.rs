//! Session management endpoints.
//!
//! Path keys may be full (`agent:main:telegram:42`) or a bare conversation
//! label (`family`), which expands under `sessions.agentId`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use sb_sessions::{normalize_key, Session, SessionSummary};

use crate::api::error::ApiResult;
use crate::state::AppState;

fn full_key(state: &AppState, raw: &str) -> ApiResult<String> {
    Ok(normalize_key(&state.snapshot().sessions.agent_id, raw)?)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionList {
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
    pub current: Option<String>,
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionList> {
    let sessions = state.sessions.list();
    Json(SessionList {
        count: sessions.len(),
        sessions,
        current: state.sessions.current(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// /api/sessions/:key
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Session>> {
    let key = full_key(&state, &key)?;
    Ok(Json(state.sessions.get(&key)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Create the session if absent. 201 when created, 200 when it existed.
pub async fn create_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<CreateSessionBody>>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let key = full_key(&state, &key)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let channel = body.channel.as_deref().unwrap_or("api");
    let (_, created) = state.sessions.get_or_create(&key, channel);
    if let Some(model) = body.model.filter(|m| !m.is_empty()) {
        state.sessions.set_model(&key, Some(model))?;
    }
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(state.sessions.get(&key)?)))
}

#[derive(Debug, Default, Deserialize)]
pub struct PatchSessionBody {
    /// New model override; an empty string clears it.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reset: bool,
}

pub async fn patch_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<PatchSessionBody>,
) -> ApiResult<Json<Session>> {
    let key = full_key(&state, &key)?;
    if body.reset {
        state.sessions.reset(&key)?;
    }
    if let Some(model) = body.model {
        let model = (!model.is_empty()).then_some(model);
        state.sessions.set_model(&key, model)?;
    }
    Ok(Json(state.sessions.get(&key)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    #[serde(default)]
    pub missing_ok: bool,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub deleted: bool,
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> ApiResult<Json<Deleted>> {
    let key = full_key(&state, &key)?;
    let deleted = state.sessions.delete(&key, q.missing_ok)?;
    Ok(Json(Deleted { deleted }))
}
