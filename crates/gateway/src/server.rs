//! HTTP listener, middleware stack and process lifecycle for
//! `switchboard gateway`.

use std::any::Any;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

use sb_domain::config::CorsConfig;

use crate::api;
use crate::api::auth::peer_addr;
use crate::api::error::ApiError;
use crate::bootstrap;
use crate::runtime::bind::resolve_bind_addr;
use crate::state::AppState;

/// Request bodies above this size are rejected with 413.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;
/// In-flight requests allowed before callers queue.
pub const MAX_CONCURRENT_REQUESTS: usize = 256;
/// How long in-flight requests may run after shutdown begins.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
/// Window in which an early listener failure is reported synchronously.
const STARTUP_GRACE: Duration = Duration::from_millis(200);

/// The complete application: API routes plus the middleware stack.
pub fn build_app(state: AppState) -> Router {
    let cors_layer = build_cors_layer(&state.snapshot().gateway.cors);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            let client_ip = peer_addr(req)
                .map(|a| a.ip().to_string())
                .unwrap_or_default();
            tracing::info_span!(
                "http",
                method = %req.method(),
                path = %req.uri().path(),
                client_ip = %client_ip,
            )
        })
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    api::router(state.clone())
        .fallback(not_found)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(trace_layer)
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::new(axum::http::StatusCode::NOT_FOUND, "no such endpoint")
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| (*s).to_owned()))
        .unwrap_or_else(|| "unknown panic".into());
    tracing::error!(panic = %detail, "request handler panicked");
    ApiError::new(
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        "internal server error",
    )
    .into_response()
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may end in `:*` to match any port on that host
/// (e.g. `http://localhost:*`). A lone `"*"` allows all origins.
pub fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];

    // allow_credentials is incompatible with wildcard origins.
    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\", all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if let Some(prefix) = origin.strip_suffix('*').filter(|_| origin.ends_with(":*")) {
            wildcard_prefixes.push(prefix.to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin = origin.to_str().unwrap_or("");
            wildcard_prefixes.iter().any(|prefix| {
                origin
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bind, start adapters and background tasks, serve until a shutdown
/// signal, then drain and flush.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let config = state.snapshot();
    let addr = resolve_bind_addr(config.gateway.bind, config.gateway.port);

    // ── Bind ─────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| bind_error(addr, e))?;
    let local = listener.local_addr().context("reading listener address")?;
    *state.listen_addr.write() = Some(local);

    let app = build_app(state.clone());
    let cancel = state.shutdown.clone();
    // `axum::serve` has no connection-level read, write or idle timeouts.
    // Request deadlines come from the per-route `TimeoutLayer`s instead.
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
    });

    // An accept loop that dies immediately is a startup failure.
    tokio::select! {
        res = &mut server => {
            return match res {
                Ok(Ok(())) => Err(anyhow::anyhow!("server exited during startup")),
                Ok(Err(e)) => Err(e).context("server failed during startup"),
                Err(e) => Err(e).context("server task failed during startup"),
            };
        }
        () = tokio::time::sleep(STARTUP_GRACE) => {}
    }
    tracing::info!(addr = %local, bind = %config.gateway.bind, "switchboard listening");

    // ── Channels & background work ───────────────────────────────────
    announce_pairing(&state);
    bootstrap::start_channels(&state).await;
    let background = bootstrap::spawn_background_tasks(&state);
    let hangup = spawn_reload_on_hangup(&state);

    // ── Wait for shutdown ────────────────────────────────────────────
    tokio::select! {
        () = shutdown_signal() => state.shutdown.cancel(),
        () = state.shutdown.cancelled() => {}
        res = &mut server => {
            state.shutdown.cancel();
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "server stopped unexpectedly"),
                Err(e) => tracing::error!(error = %e, "server task panicked"),
            }
        }
    }

    // ── Drain ────────────────────────────────────────────────────────
    if !server.is_finished() {
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut server).await {
            Ok(_) => tracing::info!("in-flight requests drained"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = DRAIN_TIMEOUT.as_secs(),
                    "drain timed out, closing remaining connections"
                );
                server.abort();
            }
        }
    }
    hangup.abort();

    // ── Post-shutdown flush ──────────────────────────────────────────
    tracing::info!("server stopped, stopping channels and flushing stores");
    state.channels.stop_all().await;
    for handle in background {
        if let Err(e) = handle.await {
            if e.is_panic() {
                tracing::error!(error = %e, "background task panicked");
            }
        }
    }
    match state.sessions.flush() {
        Ok(n) => tracing::debug!(written = n, "sessions flushed"),
        Err(e) => tracing::warn!(error = %e, "session flush on shutdown failed"),
    }
    if let Some(log) = state.audit.task_log() {
        log.close();
    }
    tracing::info!("shutdown complete");
    Ok(())
}

fn bind_error(addr: SocketAddr, e: std::io::Error) -> anyhow::Error {
    let hint = match e.kind() {
        std::io::ErrorKind::AddrInUse => format!(
            " (is another gateway running? stop it with `switchboard daemon stop` or change gateway.port from {})",
            addr.port()
        ),
        std::io::ErrorKind::PermissionDenied => {
            " (ports below 1024 need elevated privileges)".to_owned()
        }
        _ => String::new(),
    };
    anyhow::anyhow!("binding to {addr}: {e}{hint}")
}

fn announce_pairing(state: &AppState) {
    if let Some(code) = state.pairing.pending_code() {
        let file = state
            .pairing
            .code_file()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        tracing::info!(
            code = %code,
            file = %file,
            "pairing code issued; exchange it with POST /api/pair (header X-Pairing-Code)"
        );
    }
}

/// SIGHUP re-reads `config.yaml` and applies it without a restart.
fn spawn_reload_on_hangup(state: &AppState) -> tokio::task::JoinHandle<()> {
    let state = state.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut hup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "SIGHUP handler unavailable");
                    return;
                }
            };
            loop {
                tokio::select! {
                    () = state.shutdown.cancelled() => break,
                    received = hup.recv() => {
                        if received.is_none() {
                            break;
                        }
                        tracing::info!("received SIGHUP, reloading configuration");
                        if let Err(e) = state.reload("sighup").await {
                            tracing::error!(error = %e, "reload rejected, keeping current configuration");
                        }
                    }
                }
            }
        }
        #[cfg(not(unix))]
        state.shutdown.cancelled().await;
    })
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cors(origins: &[&str]) -> CorsConfig {
        CorsConfig {
            allowed_origins: origins.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[tokio::test]
    async fn cors_port_wildcard_matches_digits_only() {
        use tower::{ServiceExt, service_fn};

        let layer = build_cors_layer(&cors(&["http://localhost:*", "https://console.example"]));
        let svc = tower::ServiceBuilder::new().layer(layer).service(service_fn(
            |_req: Request<Body>| async { Ok::<_, std::convert::Infallible>(Response::new(Body::empty())) },
        ));

        for (origin, allowed) in [
            ("http://localhost:5173", true),
            ("https://console.example", true),
            ("http://localhost:abc", false),
            ("http://evil.example", false),
        ] {
            let req = Request::builder()
                .uri("/api/health")
                .header(header::ORIGIN, origin)
                .body(Body::empty())
                .unwrap();
            let resp = svc.clone().oneshot(req).await.unwrap();
            let got = resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN);
            assert_eq!(got.is_some(), allowed, "{origin}");
        }
    }

    #[test]
    fn addr_in_use_gets_a_hint() {
        let addr: SocketAddr = "127.0.0.1:7420".parse().unwrap();
        let err = bind_error(addr, std::io::Error::from(std::io::ErrorKind::AddrInUse));
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:7420"));
        assert!(msg.contains("daemon stop"));
    }
}
