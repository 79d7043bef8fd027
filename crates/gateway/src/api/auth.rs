//! Request guards for the control plane.
//!
//! - [`require_api_token`] gates every protected route behind a bearer token
//!   issued by the pairing guard (or the static `gateway.auth.token`), and
//!   charges the per-IP API rate limit.
//! - [`require_loopback`] restricts `/api/internal/*` to local callers,
//!   regardless of bind mode. A request without peer information is refused.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::runtime::bind::is_local;
use crate::state::AppState;

/// Peer address recorded by `into_make_service_with_connect_info`.
pub fn peer_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Client IP used as the rate-limit key. In-process callers without
/// connection info share the loopback bucket.
pub fn client_ip<B>(req: &Request<B>) -> IpAddr {
    peer_addr(req)
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// `Authorization: Bearer <token>`, falling back to a `token` query
/// parameter (browsers cannot set headers on WebSocket upgrades).
pub fn bearer_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty());
    header.or_else(|| {
        query?
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "token")
            .map(|(_, v)| v.to_owned())
            .filter(|v| !v.is_empty())
    })
}

/// Axum middleware enforcing bearer-token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    if let Err(e) = state.api_limiter.try_acquire(ip) {
        return ApiError::from(e).into_response();
    }

    let token = bearer_token(req.headers(), req.uri().query());
    if !state.pairing.authorize(token.as_deref()) {
        return ApiError::unauthorized("invalid or missing API token").into_response();
    }

    next.run(req).await
}

/// Axum middleware admitting only loopback peers.
pub async fn require_loopback(req: Request<Body>, next: Next) -> Response {
    match peer_addr(&req) {
        Some(addr) if is_local(addr.ip()) => next.run(req).await,
        Some(addr) => {
            tracing::warn!(peer = %addr, path = %req.uri().path(), "internal endpoint refused");
            ApiError::forbidden("internal endpoints are localhost-only").into_response()
        }
        None => ApiError::forbidden("peer address unavailable").into_response(),
    }
}
