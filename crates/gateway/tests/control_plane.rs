//! End-to-end checks of the HTTP control plane against an in-process
//! router with a scripted executor.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use sb_channels::InboundHandler;
use sb_domain::channel::IncomingMessage;
use sb_domain::chat::Role;
use sb_domain::error::{Error, Result};
use sb_providers::{AgentExecutor, RunRequest, RunResult};
use sb_tasklog::{TaskQuery, TaskStatus};

use common::{harness, harness_with, request, send, token_harness, LOCAL, TOKEN};

// ── Public and protected routes ──────────────────────────────────────

#[tokio::test]
async fn health_is_public() {
    let h = token_harness().await;
    let (status, body) = send(&h.app, request(Method::GET, "/api/health", LOCAL, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_object());
}

#[tokio::test]
async fn protected_route_requires_token() {
    let h = token_harness().await;
    let (status, _) = send(&h.app, request(Method::GET, "/api/status", LOCAL, None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.app, request(Method::GET, "/api/status", LOCAL, Some("nope"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.app, request(Method::GET, "/api/status", LOCAL, Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let h = token_harness().await;
    let (status, body) = send(&h.app, request(Method::GET, "/api/nope", LOCAL, Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

// ── Pairing ──────────────────────────────────────────────────────────

#[tokio::test]
async fn pairing_code_is_single_use() {
    let h = harness("gateway:\n  port: 7420\n").await;
    let code = h.state.pairing.pending_code().expect("pairing code generated");
    let on_disk = std::fs::read_to_string(h.state.layout.pairing_code_file()).unwrap();
    assert_eq!(on_disk.trim(), code);

    let (status, _) = send(
        &h.app,
        request(Method::POST, "/api/pair", LOCAL, None, Some(json!({"code": "WRONG"}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.state.pair_limiter.used("127.0.0.1".parse().unwrap()), 1);

    let (status, body) = send(
        &h.app,
        request(Method::POST, "/api/pair", LOCAL, None, Some(json!({"code": code}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_owned();
    // A successful exchange does not consume a slot.
    assert_eq!(h.state.pair_limiter.used("127.0.0.1".parse().unwrap()), 1);

    let (status, _) = send(&h.app, request(Method::GET, "/api/status", LOCAL, Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &h.app,
        request(Method::POST, "/api/pair", LOCAL, None, Some(json!({"code": code}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn pairing_window_fills_up() {
    let h = harness("gateway:\n  port: 7420\n").await;
    let peer = Some("10.0.0.9:5000");
    let limit = h.state.pair_limiter.limit();
    for _ in 0..limit {
        let (status, _) = send(
            &h.app,
            request(Method::POST, "/api/pair", peer, None, Some(json!({"code": "WRONG"}))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let code = h.state.pairing.pending_code().unwrap();
    let (status, _) = send(
        &h.app,
        request(Method::POST, "/api/pair", peer, None, Some(json!({"code": code}))),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Other peers keep their own window.
    let (status, _) = send(
        &h.app,
        request(Method::POST, "/api/pair", LOCAL, None, Some(json!({"code": code}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ── Chat ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_turn_updates_session_and_audit() {
    let h = token_harness().await;
    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            "/api/chat",
            LOCAL,
            Some(TOKEN),
            Some(json!({"session": "family", "message": "hello"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "re: hello");
    assert_eq!(body["sessionKey"], "agent:main:family");
    assert_eq!(body["model"], "scripted-1");
    assert!(body["durationMs"].is_u64());

    let session = h.state.sessions.get("agent:main:family").unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.message_count, 2);

    let (status, body) = send(
        &h.app,
        request(Method::GET, "/api/sessions/family", LOCAL, Some(TOKEN), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        &h.app,
        request(Method::GET, "/api/tasks?action=chat", LOCAL, Some(TOKEN), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["total"].as_u64().unwrap() >= 1);
    assert_eq!(body["records"][0]["action"], "chat");
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let h = token_harness().await;
    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            "/api/chat",
            LOCAL,
            Some(TOKEN),
            Some(json!({"message": "   "})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert!(h.state.sessions.is_empty());
}

#[tokio::test]
async fn session_history_is_bounded() {
    let h = harness(&format!(
        "gateway:\n  auth:\n    token: {TOKEN}\nsessions:\n  maxMessages: 4\n"
    ))
    .await;
    for i in 0..3 {
        let (status, _) = send(
            &h.app,
            request(
                Method::POST,
                "/api/chat",
                LOCAL,
                Some(TOKEN),
                Some(json!({"session": "loop", "message": format!("m{i}")})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let session = h.state.sessions.get("agent:main:loop").unwrap();
    assert_eq!(session.messages.len(), 4);
    assert_eq!(session.message_count, 6);
    assert_eq!(session.messages[0].content, "m1");
}

/// Takes five seconds unless cancelled first.
struct Slow;

#[async_trait]
impl AgentExecutor for Slow {
    async fn run(&self, _req: &RunRequest, cancel: &CancellationToken) -> Result<RunResult> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(5)) => Err(Error::Timeout("slow executor".into())),
        }
    }

    fn name(&self) -> &str {
        "slow"
    }
}

#[tokio::test]
async fn chat_deadline_cancels_and_audits_the_turn() {
    let h = harness_with(
        &format!("gateway:\n  chatTimeoutSecs: 1\n  auth:\n    token: {TOKEN}\n"),
        Arc::new(Slow),
    )
    .await;

    let (status, _) = send(
        &h.app,
        request(
            Method::POST,
            "/api/chat",
            LOCAL,
            Some(TOKEN),
            Some(json!({"session": "slow", "message": "hello"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

    // The audit write finishes on the turn's own task after the response.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let record = loop {
        let page = h.state.audit.query(TaskQuery::default()).await.unwrap();
        let found = page
            .records
            .into_iter()
            .find(|r| r.action == "chat" && r.note.as_deref() == Some("cancelled"));
        if let Some(r) = found {
            break r;
        }
        assert!(tokio::time::Instant::now() < deadline, "cancelled turn was never audited");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(record.status, TaskStatus::Success);
    assert_eq!(record.session_key.as_deref(), Some("agent:main:slow"));

    let session = h.state.sessions.get("agent:main:slow").unwrap();
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages[0].role, Role::User);
}

// ── Internal endpoints ───────────────────────────────────────────────

#[tokio::test]
async fn internal_status_is_loopback_only() {
    let h = token_harness().await;
    let (status, body) = send(&h.app, request(Method::GET, "/api/internal/status", LOCAL, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["uptimeSecs"].is_u64());

    let (status, _) = send(
        &h.app,
        request(Method::GET, "/api/internal/status", Some("10.0.0.5:1234"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&h.app, request(Method::GET, "/api/internal/status", None, None, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ── Config ───────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_config_patch_is_rejected_and_not_persisted() {
    let h = token_harness().await;
    let before = std::fs::read_to_string(h.state.config.path()).unwrap();

    let (status, _) = send(
        &h.app,
        request(
            Method::PATCH,
            "/api/config",
            LOCAL,
            Some(TOKEN),
            Some(json!({"gateway": {"port": 0}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(std::fs::read_to_string(h.state.config.path()).unwrap(), before);
    assert_ne!(h.state.snapshot().gateway.port, 0);
}

#[tokio::test]
async fn config_get_redacts_token() {
    let h = token_harness().await;
    let (status, body) = send(&h.app, request(Method::GET, "/api/config", LOCAL, Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["gateway"]["auth"]["token"], TOKEN);
}

// ── Inbound pipeline ─────────────────────────────────────────────────

#[tokio::test]
async fn denied_peer_is_audited_as_blocked() {
    let h = token_harness().await;
    let msg = IncomingMessage::direct("telegram", "m1", "mallory", "let me in");
    h.state.pipeline.denied(&msg).await;

    assert!(h.state.sessions.is_empty());
    let page = h.state.audit.query(TaskQuery::default()).await.unwrap();
    let blocked = page
        .records
        .iter()
        .find(|r| r.note.as_deref() == Some("blocked"))
        .expect("blocked record");
    assert_eq!(blocked.status, TaskStatus::Error);
}
