//! Synchronous chat turns over HTTP.

use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use sb_domain::error::Error;
use sb_providers::Usage;
use sb_sessions::normalize_key;

use crate::api::error::ApiResult;
use crate::runtime::Turn;
use crate::state::AppState;

/// Conversation used when a request names no session.
pub const DEFAULT_CONVERSATION: &str = "api";

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    /// Session key or bare conversation label.
    #[serde(default)]
    pub session: Option<String>,
    pub message: String,
    /// `provider/model` for this turn only.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub usage: Usage,
    pub session_key: String,
    pub model: String,
    pub duration_ms: u64,
}

/// POST /api/chat: run one turn and wait for the reply.
///
/// The turn runs on its own task. When the client goes away or the route
/// deadline fires, the handler future is dropped and its guard cancels that
/// task, so the pipeline still records the cancelled turn.
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<ChatResponse>> {
    let agent_id = state.snapshot().sessions.agent_id.clone();
    let key = normalize_key(
        &agent_id,
        body.session.as_deref().unwrap_or(DEFAULT_CONVERSATION),
    )?;

    let mut turn = Turn::new(&key, "api", &body.message);
    turn.model = body.model.filter(|m| !m.is_empty());

    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();
    let pipeline = state.pipeline.clone();
    let task_cancel = cancel.clone();
    let outcome = tokio::spawn(async move { pipeline.run_turn(turn, &task_cancel).await })
        .await
        .map_err(|e| Error::Other(format!("chat turn task failed: {e}")))??;

    Ok(Json(ChatResponse {
        response: outcome.reply,
        usage: outcome.usage,
        session_key: outcome.session_key,
        model: outcome.model,
        duration_ms: outcome.duration.as_millis() as u64,
    }))
}
