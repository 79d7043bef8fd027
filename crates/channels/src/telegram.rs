//! Telegram adapter: validates the bot token with `getMe`, long-polls
//! `getUpdates`, and replies through `sendMessage`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sb_domain::channel::{ChannelState, ChannelStatus, ChatType, IncomingMessage};
use sb_domain::config::ChannelConfig;
use sb_domain::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::{ChannelAdapter, InboundHandler};
use crate::common::AdapterCore;
use crate::retry::{from_reqwest, from_status, SendRetry};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
/// `sendMessage` rejects longer texts.
const MAX_MESSAGE_CHARS: usize = 4096;

// ── Bot API payloads ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl TelegramMessage {
    /// Normalize a text message. Returns the message plus the sender's
    /// `@username` alias, or `None` for non-text updates.
    fn normalize(&self, channel: &str) -> Option<(IncomingMessage, Vec<String>)> {
        let text = self.text.as_deref()?;
        let chat_id = self.chat.id.to_string();
        let sender = self
            .from
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_else(|| chat_id.clone());
        let aliases = self
            .from
            .as_ref()
            .and_then(|u| u.username.as_deref())
            .map(|u| vec![format!("@{u}")])
            .unwrap_or_default();

        let mut msg = IncomingMessage::direct(channel, &self.message_id.to_string(), &sender, text);
        if self.chat.kind != "private" {
            msg.chat_type = ChatType::Group;
            msg.group_id = Some(chat_id.clone());
        }
        msg.reply_to = Some(chat_id);
        Some((msg, aliases))
    }
}

/// Split `text` into chunks of at most `limit` characters.
fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(limit).map(|c| c.iter().collect()).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct BotClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl BotClient {
    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base.trim_end_matches('/'), self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T> {
        let resp = self
            .http
            .post(self.url(method))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            // A malformed token yields 404 rather than 401.
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(Error::Auth(format!("telegram {method}: bot token rejected")));
            }
            return Err(from_status(&format!("telegram {method}"), status, &text));
        }
        let parsed: ApiResponse<T> = resp.json().await.map_err(from_reqwest)?;
        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(Error::Other(format!(
                "telegram {method}: {}",
                parsed.description.unwrap_or_else(|| "ok=false".into())
            ))),
        }
    }

    async fn get_me(&self) -> Result<TelegramUser> {
        self.call("getMe", serde_json::json!({}), CONNECT_TIMEOUT).await
    }

    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<TelegramUpdate>> {
        let mut body = serde_json::json!({
            "timeout": LONG_POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            body["offset"] = off.into();
        }
        let timeout = Duration::from_secs(LONG_POLL_TIMEOUT_SECS) + CONNECT_TIMEOUT;
        self.call("getUpdates", body, timeout).await
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let _: serde_json::Value = self.call("sendMessage", body, CONNECT_TIMEOUT).await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    core: AdapterCore,
    bot: BotClient,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct TelegramAdapter {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl TelegramAdapter {
    pub fn new(name: &str, config: &ChannelConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Validation(format!("channels.{name}.token is required")))?;
        Self::with_core(AdapterCore::new(name, config), config, token)
    }

    pub fn with_core(core: AdapterCore, config: &ChannelConfig, token: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(from_reqwest)?;
        let api_base = config
            .api_base
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| TELEGRAM_API_BASE.to_owned());
        Ok(Self {
            inner: Arc::new(Inner {
                core,
                bot: BotClient {
                    http,
                    api_base,
                    token,
                },
            }),
            running: Mutex::new(None),
        })
    }

    pub fn core(&self) -> &AdapterCore {
        &self.inner.core
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn name(&self) -> &str {
        self.inner.core.name()
    }

    fn kind(&self) -> &str {
        self.inner.core.kind()
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let core = &self.inner.core;
        core.set_state(ChannelState::Starting);
        let me = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = self.inner.bot.get_me() => res,
        };
        let me = match me {
            Ok(me) => me,
            Err(e) => {
                core.fail(&e);
                return Err(e);
            }
        };
        tracing::info!(
            channel = %core.name(),
            bot_id = me.id,
            username = me.username.as_deref().unwrap_or(""),
            "telegram bot connected"
        );

        let child = cancel.child_token();
        let task = tokio::spawn(poll_loop(self.inner.clone(), child.clone()));
        if let Some(old) = self.running.lock().replace(Running {
            cancel: child,
            task,
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
            tracing::warn!(channel = %self.name(), "telegram poll loop did not stop in time");
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

async fn poll_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let backoff = SendRetry::default();
    let mut offset: Option<i64> = None;
    let mut failures = 0u32;
    loop {
        let res = tokio::select! {
            _ = cancel.cancelled() => break,
            res = inner.bot.get_updates(offset) => res,
        };
        match res {
            Ok(updates) => {
                failures = 0;
                if let Some(max) = updates.iter().map(|u| u.update_id).max() {
                    offset = Some(max + 1);
                }
                for update in updates {
                    let Some((msg, aliases)) = update
                        .message
                        .as_ref()
                        .and_then(|m| m.normalize(inner.core.name()))
                    else {
                        continue;
                    };
                    tokio::spawn(handle_message(inner.clone(), msg, aliases, cancel.clone()));
                }
            }
            Err(e @ Error::Auth(_)) => {
                inner.core.fail(&e);
                return;
            }
            Err(e) => {
                let delay = backoff.delay_for_attempt(failures);
                failures = failures.saturating_add(1);
                tracing::warn!(
                    channel = %inner.core.name(),
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "telegram getUpdates failed"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    tracing::info!(channel = %inner.core.name(), "telegram poll loop stopped");
}

async fn handle_message(
    inner: Arc<Inner>,
    msg: IncomingMessage,
    aliases: Vec<String>,
    cancel: CancellationToken,
) {
    let chat_id = msg.reply_target().to_owned();
    let Some(reply) = inner.core.dispatch(msg, &aliases, cancel.clone()).await else {
        return;
    };
    let (bot, chat) = (&inner.bot, chat_id.as_str());
    for chunk in split_chunks(&reply, MAX_MESSAGE_CHARS) {
        let text = chunk.as_str();
        let sent = inner
            .core
            .retry()
            .run(&cancel, || bot.send_message(chat, text))
            .await;
        if let Err(e) = sent {
            tracing::error!(channel = %inner.core.name(), chat_id = %chat_id, error = %e, "telegram reply not delivered");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct MockBot {
        delivered: AtomicBool,
        sent: Mutex<Vec<Value>>,
    }

    async fn get_me() -> Json<Value> {
        Json(json!({"ok": true, "result": {"id": 7, "username": "sb_bot"}}))
    }

    async fn get_updates(State(bot): State<Arc<MockBot>>) -> Json<Value> {
        if bot.delivered.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            return Json(json!({"ok": true, "result": []}));
        }
        Json(json!({"ok": true, "result": [
            {"update_id": 10, "message": {
                "message_id": 1,
                "from": {"id": 42, "username": "alice"},
                "chat": {"id": 42, "type": "private"},
                "text": "hello"
            }},
            {"update_id": 11, "message": {
                "message_id": 2,
                "from": {"id": 99},
                "chat": {"id": 99, "type": "private"},
                "text": "let me in"
            }}
        ]}))
    }

    async fn send_message(State(bot): State<Arc<MockBot>>, Json(body): Json<Value>) -> Json<Value> {
        bot.sent.lock().push(body);
        Json(json!({"ok": true, "result": {"message_id": 3}}))
    }

    async fn mock_server(bot: Arc<MockBot>, authorized: bool) -> String {
        let app = if authorized {
            Router::new()
                .route("/:bot/getMe", post(get_me))
                .route("/:bot/getUpdates", post(get_updates))
                .route("/:bot/sendMessage", post(send_message))
                .with_state(bot)
        } else {
            Router::new().route(
                "/:bot/getMe",
                post(|| async {
                    (
                        axum::http::StatusCode::UNAUTHORIZED,
                        Json(json!({"ok": false, "description": "Unauthorized"})),
                    )
                }),
            )
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    struct Echo;

    #[async_trait]
    impl InboundHandler for Echo {
        async fn handle(&self, msg: IncomingMessage, _c: CancellationToken) -> Result<String> {
            Ok(format!("echo: {}", msg.body))
        }
        async fn denied(&self, _msg: &IncomingMessage) {}
    }

    fn config(api_base: String) -> ChannelConfig {
        ChannelConfig {
            token: Some("123:abc".into()),
            api_base: Some(api_base),
            allow_users: vec!["@alice".into()],
            ..Default::default()
        }
    }

    #[test]
    fn group_chats_are_normalized() {
        let raw = json!({
            "message_id": 5,
            "from": {"id": 42, "username": "alice"},
            "chat": {"id": -100, "type": "supergroup"},
            "text": "hi all"
        });
        let m: TelegramMessage = serde_json::from_value(raw).unwrap();
        let (msg, aliases) = m.normalize("telegram").unwrap();
        assert_eq!(msg.sender, "42");
        assert_eq!(msg.chat_type, ChatType::Group);
        assert_eq!(msg.group_id.as_deref(), Some("-100"));
        assert_eq!(msg.reply_target(), "-100");
        assert_eq!(aliases, vec!["@alice".to_string()]);
    }

    #[test]
    fn long_replies_are_split() {
        let text = "x".repeat(MAX_MESSAGE_CHARS * 2 + 1);
        let chunks = split_chunks(&text, MAX_MESSAGE_CHARS);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], "x");
    }

    #[tokio::test]
    async fn replies_to_allowed_sender_only() {
        let bot = Arc::new(MockBot::default());
        let base = mock_server(bot.clone(), true).await;
        let adapter = TelegramAdapter::new("telegram", &config(base)).unwrap();
        adapter.set_message_handler(Arc::new(Echo));
        let cancel = CancellationToken::new();
        adapter.start(cancel.clone()).await.unwrap();
        assert_eq!(adapter.status().status, ChannelState::Running);

        for _ in 0..100 {
            if !bot.sent.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = bot.sent.lock().clone();
        assert_eq!(sent.len(), 1, "{sent:?}");
        assert_eq!(sent[0]["chat_id"], "42");
        assert_eq!(sent[0]["text"], "echo: hello");

        adapter.stop().await.unwrap();
        assert_eq!(adapter.status().status, ChannelState::Stopped);
        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_token_fails_start() {
        let base = mock_server(Arc::new(MockBot::default()), false).await;
        let adapter = TelegramAdapter::new("telegram", &config(base)).unwrap();
        let err = adapter.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)), "{err}");
        assert_eq!(adapter.status().status, ChannelState::Error);
    }

    #[test]
    fn missing_token_is_validation_error() {
        let err = TelegramAdapter::new("telegram", &ChannelConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Validation(_)));
    }
}
