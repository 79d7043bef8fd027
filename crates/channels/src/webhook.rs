//! Generic HTTP webhook adapter.
//!
//! Serves `POST /inbound` on the configured `listen` address. Payload:
//! `{ "sender": "...", "text": "...", "chatId"?: "...", "group"?: "...",
//! "messageId"?: "..." }`.
//!
//! When `secret` is set the caller must present it either verbatim in
//! `X-Webhook-Secret` or as an HMAC-SHA256 of the body in
//! `X-Hub-Signature-256: sha256=<hex>`. Replies are returned inline as
//! `{ "reply": "..." }`, or, when `replyUrl` is set, the request is
//! acknowledged with `202` and the reply POSTed to `replyUrl` as
//! `{ "chatId": "...", "text": "..." }`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sb_domain::channel::{ChannelState, ChannelStatus, ChatType, IncomingMessage};
use sb_domain::config::ChannelConfig;
use sb_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::{ChannelAdapter, InboundHandler};
use crate::common::AdapterCore;
use crate::retry::{from_reqwest, from_status};

type HmacSha256 = Hmac<Sha256>;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundPayload {
    sender: String,
    text: String,
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundReply<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl InboundPayload {
    fn into_message(self, channel: &str) -> IncomingMessage {
        let id = self
            .message_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut msg = IncomingMessage::direct(channel, &id, &self.sender, &self.text);
        if let Some(group) = self.group.filter(|g| !g.is_empty()) {
            msg.chat_type = ChatType::Group;
            msg.group_id = Some(group);
        }
        msg.reply_to = self.chat_id.filter(|c| !c.is_empty());
        msg
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Accept either the shared secret verbatim or an HMAC signature of `body`.
fn verify_secret(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    if let Some(given) = headers.get("x-webhook-secret").and_then(|v| v.to_str().ok()) {
        return given.as_bytes().ct_eq(secret.as_bytes()).into();
    }
    let Some(sig_header) = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let sig_hex = sig_header.strip_prefix("sha256=").unwrap_or(sig_header);
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());
    computed.as_bytes().ct_eq(sig_hex.as_bytes()).into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    core: AdapterCore,
    secret: Option<String>,
    reply_url: Option<String>,
    http: reqwest::Client,
}

#[derive(Clone)]
struct ServeState {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    addr: SocketAddr,
}

pub struct WebhookAdapter {
    inner: Arc<Inner>,
    listen: String,
    running: Mutex<Option<Running>>,
}

impl WebhookAdapter {
    pub fn new(name: &str, config: &ChannelConfig) -> Result<Self> {
        let listen = config
            .listen
            .clone()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| Error::Validation(format!("channels.{name}.listen is required")))?;
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            inner: Arc::new(Inner {
                core: AdapterCore::new(name, config),
                secret: config.secret.clone().filter(|s| !s.is_empty()),
                reply_url: config.reply_url.clone().filter(|u| !u.is_empty()),
                http,
            }),
            listen,
            running: Mutex::new(None),
        })
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.addr)
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn name(&self) -> &str {
        self.inner.core.name()
    }

    fn kind(&self) -> &str {
        self.inner.core.kind()
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let core = &self.inner.core;
        core.set_state(ChannelState::Starting);
        let listener = match tokio::net::TcpListener::bind(&self.listen).await {
            Ok(l) => l,
            Err(e) => {
                let err = Error::Io(e);
                core.fail(&err);
                return Err(err);
            }
        };
        let addr = listener.local_addr()?;

        let child = cancel.child_token();
        let app = Router::new()
            .route("/inbound", post(inbound))
            .with_state(ServeState {
                inner: self.inner.clone(),
                cancel: child.clone(),
            });
        let shutdown = {
            let token = child.clone();
            async move { token.cancelled().await }
        };
        let name = core.name().to_owned();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(channel = %name, error = %e, "webhook server failed");
            }
        });
        tracing::info!(channel = %core.name(), addr = %addr, "webhook listening");

        if let Some(old) = self.running.lock().replace(Running {
            cancel: child,
            task,
            addr,
        }) {
            old.cancel.cancel();
        }
        core.mark_connected();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(run) = self.running.lock().take() else {
            return Ok(());
        };
        run.cancel.cancel();
        if tokio::time::timeout(STOP_TIMEOUT, run.task).await.is_err() {
            tracing::warn!(channel = %self.name(), "webhook server did not stop in time");
        }
        self.inner.core.set_state(ChannelState::Stopped);
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.inner.core.status()
    }

    fn is_bound(&self) -> bool {
        self.inner.core.is_bound()
    }

    fn bind_code(&self) -> Option<String> {
        self.inner.core.bind_code()
    }

    fn update_allowlist(&self, users: &[String], groups: &[String]) {
        self.inner.core.update_allowlist(users, groups);
    }

    fn set_deny_message(&self, message: Option<String>) {
        self.inner.core.set_deny_message(message);
    }

    fn set_message_handler(&self, handler: Arc<dyn InboundHandler>) {
        self.inner.core.set_handler(handler);
    }
}

async fn inbound(State(st): State<ServeState>, headers: HeaderMap, body: Bytes) -> Response {
    let inner = st.inner;
    if let Some(secret) = inner.secret.as_deref() {
        if !verify_secret(secret, &headers, &body) {
            tracing::warn!(channel = %inner.core.name(), "webhook request with bad secret");
            return api_error(StatusCode::UNAUTHORIZED, "invalid webhook secret");
        }
    }
    let payload: InboundPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("invalid payload: {e}")),
    };
    if payload.sender.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "sender is required");
    }
    let msg = payload.into_message(inner.core.name());

    if inner.reply_url.is_some() {
        tokio::spawn(deliver_async(inner, msg, st.cancel));
        return (StatusCode::ACCEPTED, Json(serde_json::json!({ "accepted": true }))).into_response();
    }

    // The turn runs on its own task so a dropped request cancels it
    // instead of abandoning it halfway.
    let cancel = st.cancel.child_token();
    let _guard = cancel.clone().drop_guard();
    let turn = tokio::spawn({
        let inner = inner.clone();
        async move { inner.core.dispatch(msg, &[], cancel).await }
    });
    match turn.await {
        Ok(Some(reply)) => Json(serde_json::json!({ "reply": reply })).into_response(),
        Ok(None) => (StatusCode::ACCEPTED, Json(serde_json::json!({ "accepted": true }))).into_response(),
        Err(e) => {
            tracing::error!(channel = %inner.core.name(), error = %e, "webhook turn task failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn deliver_async(inner: Arc<Inner>, msg: IncomingMessage, cancel: CancellationToken) {
    let Some(url) = inner.reply_url.clone() else {
        return;
    };
    let chat_id = msg.reply_target().to_owned();
    let Some(reply) = inner.core.dispatch(msg, &[], cancel.clone()).await else {
        return;
    };
    let payload = OutboundReply {
        chat_id: &chat_id,
        text: &reply,
    };
    let (http, url, payload) = (&inner.http, url.as_str(), &payload);
    let sent = inner
        .core
        .retry()
        .run(&cancel, || async move {
            let resp = http
                .post(url)
                .json(payload)
                .send()
                .await
                .map_err(from_reqwest)?;
            let status = resp.status();
            if status.is_success() {
                Ok(())
            } else {
                let text = resp.text().await.unwrap_or_default();
                Err(from_status("webhook reply", status, &text))
            }
        })
        .await;
    if let Err(e) = sent {
        tracing::error!(channel = %inner.core.name(), chat_id = %chat_id, error = %e, "webhook reply not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl InboundHandler for Echo {
        async fn handle(&self, msg: IncomingMessage, _c: CancellationToken) -> Result<String> {
            Ok(format!("echo: {}", msg.body))
        }
        async fn denied(&self, _msg: &IncomingMessage) {}
    }

    async fn started(config: ChannelConfig) -> (WebhookAdapter, String) {
        let adapter = WebhookAdapter::new("hook", &config).unwrap();
        adapter.set_message_handler(Arc::new(Echo));
        adapter.start(CancellationToken::new()).await.unwrap();
        let url = format!("http://{}/inbound", adapter.local_addr().unwrap());
        (adapter, url)
    }

    fn config() -> ChannelConfig {
        ChannelConfig {
            kind: Some("webhook".into()),
            listen: Some("127.0.0.1:0".into()),
            allow_users: vec!["alice".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn inline_reply_for_allowed_sender() {
        let (adapter, url) = started(config()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(&url)
            .json(&json!({"sender": "alice", "text": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["reply"], "echo: hi");

        let resp = client
            .post(&url)
            .json(&json!({"sender": "mallory", "text": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);

        let resp = client.post(&url).body("not json").send().await.unwrap();
        assert_eq!(resp.status(), 400);

        adapter.stop().await.unwrap();
        assert_eq!(adapter.status().status, ChannelState::Stopped);
    }

    #[tokio::test]
    async fn secret_is_enforced() {
        let (adapter, url) = started(ChannelConfig {
            secret: Some("s3cret".into()),
            ..config()
        })
        .await;
        let client = reqwest::Client::new();
        let body = json!({"sender": "alice", "text": "hi"}).to_string();

        let resp = client.post(&url).body(body.clone()).send().await.unwrap();
        assert_eq!(resp.status(), 401);

        let resp = client
            .post(&url)
            .header("x-webhook-secret", "s3cret")
            .body(body.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let mut mac = HmacSha256::new_from_slice(b"s3cret").unwrap();
        mac.update(body.as_bytes());
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        let resp = client
            .post(&url)
            .header("x-hub-signature-256", sig)
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        adapter.stop().await.unwrap();
    }

    /// Waits for cancellation and reports when it sees it.
    struct Parked(tokio::sync::mpsc::UnboundedSender<()>);

    #[async_trait]
    impl InboundHandler for Parked {
        async fn handle(&self, _msg: IncomingMessage, cancel: CancellationToken) -> Result<String> {
            cancel.cancelled().await;
            let _ = self.0.send(());
            Err(Error::Cancelled)
        }
        async fn denied(&self, _msg: &IncomingMessage) {}
    }

    #[tokio::test]
    async fn dropped_request_cancels_inline_turn() {
        let adapter = WebhookAdapter::new("hook", &config()).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        adapter.set_message_handler(Arc::new(Parked(tx)));
        let st = ServeState {
            inner: adapter.inner.clone(),
            cancel: CancellationToken::new(),
        };
        let body = Bytes::from(json!({"sender": "alice", "text": "hi"}).to_string());

        let pending = tokio::time::timeout(
            Duration::from_millis(50),
            inbound(State(st), HeaderMap::new(), body),
        )
        .await;
        assert!(pending.is_err());

        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("turn cancelled after the request was dropped")
            .unwrap();
    }

    #[test]
    fn group_payload_maps_to_group_message() {
        let p: InboundPayload = serde_json::from_value(json!({
            "sender": "alice", "text": "x", "group": "ops", "chatId": "c1"
        }))
        .unwrap();
        let msg = p.into_message("hook");
        assert_eq!(msg.chat_type, ChatType::Group);
        assert_eq!(msg.group_id.as_deref(), Some("ops"));
        assert_eq!(msg.reply_target(), "c1");
        assert!(!msg.message_id.is_empty());
    }

    #[test]
    fn listen_is_required() {
        assert!(matches!(
            WebhookAdapter::new("hook", &ChannelConfig::default()),
            Err(Error::Validation(_))
        ));
    }
}
