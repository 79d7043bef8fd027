//! Configuration read/merge endpoints.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

use sb_channels::ReloadReport;
use sb_domain::error::Error;

use crate::api::error::ApiResult;
use crate::state::AppState;

/// GET /api/config: the live document with secrets redacted.
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(state.snapshot().redacted()?))
}

#[derive(Debug, Serialize)]
pub struct PatchResponse {
    pub config: serde_json::Value,
    pub reload: ReloadReport,
}

/// PATCH /api/config: deep-merge a partial document, persist it and
/// reconcile live components. Redacted placeholders in the patch are
/// ignored, so a GET → edit → PATCH round trip keeps stored secrets.
pub async fn patch_config(
    State(state): State<AppState>,
    Json(patch): Json<serde_json::Value>,
) -> ApiResult<Json<PatchResponse>> {
    if !patch.is_object() {
        return Err(Error::Validation("config patch must be a JSON object".into()).into());
    }
    let (config, reload) = state.patch_config(&patch).await?;
    Ok(Json(PatchResponse {
        config: config.redacted()?,
        reload,
    }))
}
