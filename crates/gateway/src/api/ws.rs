//! WebSocket endpoint for the web console.
//!
//! Flow:
//! 1. Client connects to `/ws` (bearer token in the header or `?token=`).
//!    Browsers must send an `Origin` matching the request `Host`, or a
//!    loopback origin.
//! 2. Server pushes `{type, payload}` frames: `status_update` every 5 s,
//!    `chat_message` for every message appended to any session, and `log`
//!    for every record entering the log ring.
//! 3. Client may send `{"type":"chat_message","payload":{"session":..,"message":..}}`
//!    to run a turn; the resulting messages arrive as `chat_message` frames.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use sb_domain::chat::Role;
use sb_sessions::normalize_key;

use crate::api::chat::DEFAULT_CONVERSATION;
use crate::api::error::ApiError;
use crate::api::health::{status_report, StatusReport};
use crate::logging::LogEntry;
use crate::runtime::{ChatEvent, Turn};
use crate::state::AppState;

const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const OUTBOUND_CAPACITY: usize = 128;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    StatusUpdate(StatusReport),
    ChatMessage(ChatEvent),
    Log(LogEntry),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    ChatMessage {
        #[serde(default)]
        session: Option<String>,
        message: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Origin check
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn strip_port(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    authority.rsplit_once(':').map_or(authority, |(h, _)| h)
}

/// Whether a browser `Origin` may open a socket on `host`.
pub fn origin_allowed(origin: &str, host: Option<&str>) -> bool {
    let authority = origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest)
        .trim_end_matches('/');
    if host.is_some_and(|h| h.eq_ignore_ascii_case(authority)) {
        return true;
    }
    matches!(
        strip_port(authority).to_ascii_lowercase().as_str(),
        "127.0.0.1" | "localhost" | "::1"
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /ws: upgrade to WebSocket. Authentication is enforced by the
/// protected-router middleware before this runs.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
        if !origin_allowed(origin, host) {
            return ApiError::forbidden(format!("origin '{origin}' not allowed")).into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);
    let conn_cancel = state.shutdown.child_token();
    tracing::debug!("console socket connected");

    // Writer task: forwards outbound frames to the WS sink.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Status ticker.
    let ticker = {
        let tx = outbound_tx.clone();
        let state = state.clone();
        let cancel = conn_cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATUS_INTERVAL);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(ServerFrame::StatusUpdate(status_report(&state))).await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    };

    let chat_fwd = forward(state.pipeline.subscribe(), outbound_tx.clone(), conn_cancel.clone(), ServerFrame::ChatMessage);
    let log_fwd = forward(state.logs.subscribe(), outbound_tx.clone(), conn_cancel.clone(), ServerFrame::Log);

    // Reader loop: client-initiated turns.
    loop {
        let msg = tokio::select! {
            () = conn_cancel.cancelled() => break,
            msg = ws_stream.next() => msg,
        };
        let Some(Ok(msg)) = msg else { break };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::ChatMessage { session, message }) => {
                    spawn_turn(&state, session, message, outbound_tx.clone(), conn_cancel.child_token());
                }
                Err(e) => tracing::debug!(error = %e, "ignoring unparseable frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    conn_cancel.cancel();
    for task in [ticker, chat_fwd, log_fwd] {
        task.abort();
    }
    drop(outbound_tx);
    writer.abort();
    tracing::debug!("console socket disconnected");
}

/// Relay a broadcast stream into the socket's outbound queue. Lagged
/// receivers skip the missed entries.
fn forward<T, F>(
    mut rx: broadcast::Receiver<T>,
    tx: mpsc::Sender<ServerFrame>,
    cancel: tokio_util::sync::CancellationToken,
    wrap: F,
) -> tokio::task::JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> ServerFrame + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                () = cancel.cancelled() => break,
                item = rx.recv() => item,
            };
            match item {
                Ok(item) => {
                    if tx.send(wrap(item)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "socket lagging behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_turn(
    state: &AppState,
    session: Option<String>,
    message: String,
    tx: mpsc::Sender<ServerFrame>,
    cancel: tokio_util::sync::CancellationToken,
) {
    let state = state.clone();
    tokio::spawn(async move {
        let agent_id = state.snapshot().sessions.agent_id.clone();
        let raw = session.as_deref().unwrap_or(DEFAULT_CONVERSATION);
        let result = match normalize_key(&agent_id, raw) {
            Ok(key) => state
                .pipeline
                .run_turn(Turn::new(&key, "ws", &message), &cancel)
                .await
                .map(|_| ())
                .map_err(|e| (key, e)),
            Err(e) => Err((raw.to_owned(), e)),
        };
        // Successful turns reach the client through the chat broadcast.
        if let Err((key, e)) = result {
            let _ = tx
                .send(ServerFrame::ChatMessage(ChatEvent {
                    session_key: key,
                    role: Role::System,
                    content: format!("error: {e}"),
                    channel: "ws".into(),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                }))
                .await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_matching_host_or_loopback() {
        assert!(origin_allowed("http://gw.tailnet:7420", Some("gw.tailnet:7420")));
        assert!(origin_allowed("http://localhost:5173", Some("gw.tailnet:7420")));
        assert!(origin_allowed("http://127.0.0.1:3000", None));
        assert!(origin_allowed("http://[::1]:3000", None));
        assert!(!origin_allowed("https://evil.example", Some("gw.tailnet:7420")));
        assert!(!origin_allowed("http://localhost.evil.example", Some("127.0.0.1:7420")));
    }

    #[test]
    fn frames_are_tagged() {
        let frame = ServerFrame::ChatMessage(ChatEvent {
            session_key: "agent:main:api".into(),
            role: Role::Assistant,
            content: "hi".into(),
            channel: "api".into(),
            timestamp: 1,
        });
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "chat_message");
        assert_eq!(v["payload"]["sessionKey"], "agent:main:api");

        let client: ClientFrame = serde_json::from_str(
            r#"{"type":"chat_message","payload":{"session":"family","message":"hello"}}"#,
        )
        .unwrap();
        let ClientFrame::ChatMessage { session, message } = client;
        assert_eq!(session.as_deref(), Some("family"));
        assert_eq!(message, "hello");
    }
}
