pub mod auth;
pub mod catalog;
pub mod channels;
pub mod chat;
pub mod config;
pub mod error;
pub mod health;
pub mod logs;
pub mod pairing;
pub mod sessions;
pub mod tasks;
pub mod ws;

use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth), **internal** (loopback
/// peers only, used by the CLI) and **protected** (bearer token plus the
/// per-IP API rate limit). Every route except `/ws` carries a request
/// deadline; `/api/chat` gets the longer chat deadline.
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let gateway = state.snapshot().gateway.clone();
    let request_timeout = Duration::from_secs(gateway.request_timeout_secs.max(1));
    let chat_timeout = Duration::from_secs(gateway.chat_timeout_secs.max(1));

    let public = Router::new()
        .route("/api/health", get(health::health))
        .route("/api/pairing", get(pairing::pairing_state))
        .route("/api/pair", post(pairing::pair))
        .route("/api/auth/login", post(pairing::login))
        .layer(TimeoutLayer::new(request_timeout));

    let internal = Router::new()
        .route("/api/internal/reload", post(channels::reload))
        .route("/api/internal/channel-status", get(channels::channel_status))
        .route("/api/internal/status", get(health::status))
        .route_layer(middleware::from_fn(auth::require_loopback))
        .layer(TimeoutLayer::new(request_timeout));

    let chat = Router::new()
        .route("/api/chat", post(chat::chat))
        .layer(TimeoutLayer::new(chat_timeout));

    let protected = Router::new()
        // Status & configuration
        .route("/api/status", get(health::status))
        .route(
            "/api/config",
            get(config::get_config).patch(config::patch_config),
        )
        // Sessions
        .route("/api/sessions", get(sessions::list_sessions))
        .route(
            "/api/sessions/:key",
            get(sessions::get_session)
                .post(sessions::create_session)
                .patch(sessions::patch_session)
                .delete(sessions::delete_session),
        )
        // Channels
        .route("/api/channels", get(channels::list_channels))
        .route("/api/channels/status", get(channels::channel_status))
        .route("/api/channels/reload", post(channels::reload))
        // Catalog
        .route("/api/models", get(catalog::list_models))
        .route("/api/providers", get(catalog::list_providers))
        .route("/api/skills", get(catalog::list_skills))
        // Observability
        .route("/api/logs", get(logs::query_logs))
        .route("/api/runtime/stats", get(logs::runtime_stats))
        .route("/api/tasks", get(tasks::list_tasks))
        .route("/api/tasks/stats", get(tasks::task_stats))
        .route("/api/tasks/:id", get(tasks::get_task))
        .layer(TimeoutLayer::new(request_timeout))
        .merge(chat)
        // Long-lived: no deadline.
        .route("/ws", get(ws::ws_upgrade))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(internal).merge(protected)
}
