//! Pairing-code exchange and password login.
//!
//! A wrong pairing code consumes one slot of the per-IP pairing window; a
//! correct one consumes none. Once the window is full every attempt is
//! refused with 429 until slots expire.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use sb_domain::error::Error;
use sb_domain::trace::TraceEvent;
use sb_tasklog::{action, NewTask, TaskStatus};

use crate::api::auth::client_ip;
use crate::api::error::{ApiError, ApiResult};
use crate::runtime::PairingState;
use crate::state::AppState;

pub const PAIRING_HEADER: &str = "x-pairing-code";

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/pairing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn pairing_state(State(state): State<AppState>) -> Json<PairingState> {
    Json(state.pairing.state())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/pair
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
struct PairBody {
    #[serde(default)]
    code: Option<String>,
}

/// Exchange the pairing code (header `X-Pairing-Code`, or `{"code": ..}`)
/// for a bearer token.
pub async fn pair(State(state): State<AppState>, req: Request<Body>) -> ApiResult<Json<TokenResponse>> {
    let ip = client_ip(&req);
    state.pair_limiter.ensure_available(ip)?;

    let header_code = req
        .headers()
        .get(PAIRING_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let code = match header_code {
        Some(c) => c,
        None => {
            let bytes = axum::body::to_bytes(req.into_body(), 4096)
                .await
                .map_err(|e| ApiError::bad_request(e.to_string()))?;
            let body: PairBody = if bytes.is_empty() {
                PairBody::default()
            } else {
                serde_json::from_slice(&bytes).map_err(Error::from)?
            };
            body.code.unwrap_or_default()
        }
    };
    if code.trim().is_empty() {
        return Err(ApiError::bad_request("missing X-Pairing-Code header"));
    }

    match state.pairing.exchange(&code) {
        Ok(token) => {
            TraceEvent::PairingExchanged {
                client_ip: ip.to_string(),
                ok: true,
            }
            .emit();
            state
                .audit
                .record(
                    NewTask::new(action::SYSTEM, "pairing")
                        .request(ip.to_string())
                        .response("token issued"),
                )
                .await;
            Ok(Json(TokenResponse { token }))
        }
        Err(e) => {
            TraceEvent::PairingExchanged {
                client_ip: ip.to_string(),
                ok: false,
            }
            .emit();
            // Full window between the check and here: still a 401.
            let _ = state.pair_limiter.try_acquire(ip);
            state
                .audit
                .record(
                    NewTask::new(action::SYSTEM, "pairing")
                        .request(ip.to_string())
                        .response(e.to_string())
                        .status(TaskStatus::Error),
                )
                .await;
            Err(e.into())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/auth/login
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    req: Request<Body>,
) -> ApiResult<Json<TokenResponse>> {
    let ip = client_ip(&req);
    state.pair_limiter.ensure_available(ip)?;
    let bytes = axum::body::to_bytes(req.into_body(), 4096)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let body: LoginBody = serde_json::from_slice(&bytes).map_err(Error::from)?;

    match state.pairing.login(&body.username, &body.password) {
        Ok(token) => Ok(Json(TokenResponse { token })),
        Err(e) => {
            let _ = state.pair_limiter.try_acquire(ip);
            Err(e.into())
        }
    }
}
