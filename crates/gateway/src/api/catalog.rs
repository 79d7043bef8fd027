//! Read-only catalog surfaces.

use axum::extract::State;
use axum::response::Json;

use crate::runtime::catalog::{self, ModelEntry, ProviderView, SkillEntry};
use crate::state::AppState;

/// GET /api/models
pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelEntry>> {
    Json(catalog::models(&state.snapshot()))
}

/// GET /api/providers
pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderView>> {
    Json(catalog::providers(&state.snapshot()))
}

/// GET /api/skills
pub async fn list_skills(State(state): State<AppState>) -> Json<Vec<SkillEntry>> {
    Json(catalog::skills(&state.layout))
}
