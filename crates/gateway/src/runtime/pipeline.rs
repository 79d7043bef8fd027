//! The inbound turn pipeline shared by channel adapters, `/api/chat`, the
//! WebSocket and the CLI.
//!
//! 1. serialize on the session key
//! 2. snapshot history, then append the user message
//! 3. run the executor
//! 4. on success append the reply; audit either way

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sb_channels::InboundHandler;
use sb_domain::channel::IncomingMessage;
use sb_domain::chat::Role;
use sb_domain::error::{Error, Result};
use sb_providers::{AgentExecutor, RunRequest, Usage};
use sb_sessions::{trim_history, Message, SessionManager};
use sb_tasklog::{action, NewTask, TaskStatus};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::audit::Audit;
use super::config_store::ConfigStore;
use super::session_lock::SessionLocks;

const EVENT_CAPACITY: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One user message to run against a session.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub session_key: String,
    /// `api`, `cli`, `ws` or the adapter name.
    pub channel: String,
    pub sender: String,
    pub message_id: String,
    pub body: String,
    /// Model override for this turn only; falls back to the session's.
    pub model: Option<String>,
}

impl Turn {
    pub fn new(session_key: &str, channel: &str, body: &str) -> Self {
        Self {
            session_key: session_key.to_owned(),
            channel: channel.to_owned(),
            sender: channel.to_owned(),
            message_id: uuid::Uuid::new_v4().to_string(),
            body: body.to_owned(),
            model: None,
        }
    }

    fn from_incoming(session_key: String, msg: &IncomingMessage) -> Self {
        Self {
            session_key,
            channel: msg.channel.clone(),
            sender: msg.sender.clone(),
            message_id: msg.message_id.clone(),
            body: msg.body.clone(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub session_key: String,
    pub reply: String,
    pub usage: Usage,
    pub model: String,
    #[serde(rename = "durationMs", serialize_with = "as_millis")]
    pub duration: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// A message appended to some session, fanned out to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub session_key: String,
    pub role: Role,
    pub content: String,
    pub channel: String,
    pub timestamp: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Pipeline {
    config: Arc<ConfigStore>,
    sessions: Arc<SessionManager>,
    executor: Arc<dyn AgentExecutor>,
    audit: Audit,
    locks: SessionLocks,
    events: broadcast::Sender<ChatEvent>,
}

impl Pipeline {
    pub fn new(
        config: Arc<ConfigStore>,
        sessions: Arc<SessionManager>,
        executor: Arc<dyn AgentExecutor>,
        audit: Audit,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            sessions,
            executor,
            audit,
            locks: SessionLocks::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    fn publish(&self, key: &str, msg: &Message) {
        // No receivers is fine.
        let _ = self.events.send(ChatEvent {
            session_key: key.to_owned(),
            role: msg.role,
            content: msg.content.clone(),
            channel: msg.channel.clone().unwrap_or_default(),
            timestamp: msg.timestamp,
        });
    }

    pub async fn run_turn(&self, turn: Turn, cancel: &CancellationToken) -> Result<TurnOutcome> {
        if turn.body.trim().is_empty() {
            return Err(Error::Validation("message must not be empty".into()));
        }
        let started = Instant::now();
        let cfg = self.config.snapshot();
        let key = turn.session_key.clone();

        let _permit = self.locks.acquire(&key, cancel).await?;

        // History is taken before the append so it never repeats the body.
        let (session, _) = self.sessions.get_or_create(&key, &turn.channel);
        let history = trim_history(
            &session.messages,
            cfg.sessions.history_limit,
            cfg.sessions.max_message_chars,
        );

        let user_msg = Message::user(turn.body.as_str(), &turn.channel);
        self.sessions.append_message(&key, user_msg.clone())?;
        self.publish(&key, &user_msg);

        let request = RunRequest {
            session_key: key.clone(),
            channel: turn.channel.clone(),
            sender: turn.sender.clone(),
            message_id: turn.message_id.clone(),
            body: turn.body.clone(),
            history,
            provider: None,
            model: turn.model.clone().or(session.model),
            temperature: cfg.agent.temperature,
        };

        let result = self.executor.run(&request, cancel).await;
        let duration = started.elapsed();
        let record = NewTask::new(action::CHAT, turn.channel.as_str())
            .channel(turn.channel.as_str())
            .session(key.as_str())
            .request(turn.body.as_str())
            .duration(duration);

        match result {
            Ok(run) => {
                let reply = Message::assistant(run.reply.as_str(), &turn.channel);
                self.sessions.append_message(&key, reply.clone())?;
                self.publish(&key, &reply);
                self.audit
                    .record(
                        record
                            .response(run.reply.as_str())
                            .status(TaskStatus::Success)
                            .tokens(run.usage.input_tokens, run.usage.output_tokens),
                    )
                    .await;
                tracing::debug!(
                    session_key = %key,
                    model = %run.model,
                    duration_ms = duration.as_millis() as u64,
                    "turn complete"
                );
                Ok(TurnOutcome {
                    session_key: key,
                    reply: run.reply,
                    usage: run.usage,
                    model: run.model,
                    duration,
                })
            }
            Err(Error::Cancelled) => {
                self.audit
                    .record(record.status(TaskStatus::Success).note("cancelled"))
                    .await;
                tracing::info!(session_key = %key, "turn cancelled");
                Err(Error::Cancelled)
            }
            Err(e) => {
                self.audit
                    .record(record.response(e.to_string()).status(TaskStatus::Error))
                    .await;
                tracing::warn!(session_key = %key, error = %e, "turn failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl InboundHandler for Pipeline {
    async fn handle(&self, msg: IncomingMessage, cancel: CancellationToken) -> Result<String> {
        let cfg = self.config.snapshot();
        let key = self.sessions.resolve(&msg.peer(), &cfg.sessions);
        let outcome = self.run_turn(Turn::from_incoming(key, &msg), &cancel).await?;
        Ok(outcome.reply)
    }

    async fn denied(&self, msg: &IncomingMessage) {
        self.audit
            .record(
                NewTask::new(action::CHAT, msg.channel.as_str())
                    .channel(msg.channel.as_str())
                    .request(msg.body.as_str())
                    .status(TaskStatus::Error)
                    .note("blocked"),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sb_domain::channel::IncomingMessage;
    use sb_providers::RunResult;
    use sb_tasklog::{TaskLog, TaskQuery};

    /// Replies `re: <body>` and remembers every request.
    #[derive(Default)]
    struct Scripted {
        seen: Mutex<Vec<RunRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl AgentExecutor for Scripted {
        async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<RunResult> {
            self.seen.lock().push(req.clone());
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.fail {
                return Err(Error::Provider {
                    provider: "scripted".into(),
                    message: "quota exceeded".into(),
                });
            }
            Ok(RunResult {
                reply: format!("re: {}", req.body),
                usage: Usage {
                    input_tokens: 3,
                    output_tokens: 2,
                },
                model: "scripted-1".into(),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        sessions: Arc<SessionManager>,
        audit: Audit,
        pipeline: Pipeline,
        executor: Arc<Scripted>,
    }

    fn fixture(max_messages: usize, fail: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::new(
            &dir.path().join("config.yaml"),
            Default::default(),
        ));
        let sessions =
            Arc::new(SessionManager::open(&dir.path().join("sessions"), max_messages).unwrap());
        let audit = Audit::new(Arc::new(TaskLog::open(dir.path()).unwrap()));
        let executor = Arc::new(Scripted {
            fail,
            ..Default::default()
        });
        let pipeline = Pipeline::new(config, sessions.clone(), executor.clone(), audit.clone());
        Fixture {
            _dir: dir,
            sessions,
            audit,
            pipeline,
            executor,
        }
    }

    #[tokio::test]
    async fn first_direct_message_creates_session_and_audits() {
        let fx = fixture(200, false);
        let msg = IncomingMessage::direct("X", "m1", "alice", "hello");
        let reply = fx
            .pipeline
            .handle(msg, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "re: hello");

        let session = fx.sessions.get("agent:main:X:alice").unwrap();
        let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(session.messages[0].content, "hello");

        let page = fx.audit.query(TaskQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        let rec = &page.records[0];
        assert_eq!(rec.action, "chat");
        assert_eq!(rec.module, "X");
        assert_eq!(rec.status, TaskStatus::Success);
        assert_eq!(rec.session_key.as_deref(), Some("agent:main:X:alice"));
        assert!(rec.tokens_input.unwrap_or(0) > 0);
    }

    #[tokio::test]
    async fn history_excludes_current_body() {
        let fx = fixture(200, false);
        let cancel = CancellationToken::new();
        fx.pipeline
            .run_turn(Turn::new("agent:main:t", "api", "one"), &cancel)
            .await
            .unwrap();
        fx.pipeline
            .run_turn(Turn::new("agent:main:t", "api", "two"), &cancel)
            .await
            .unwrap();

        let seen = fx.executor.seen.lock();
        assert!(seen[0].history.is_empty());
        let contents: Vec<&str> = seen[1].history.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "re: one"]);
        assert_eq!(seen[1].body, "two");
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_pairs() {
        let fx = fixture(4, false);
        let cancel = CancellationToken::new();
        for i in 1..=6 {
            fx.pipeline
                .run_turn(Turn::new("agent:main:o", "api", &format!("q{i}")), &cancel)
                .await
                .unwrap();
        }
        let session = fx.sessions.get("agent:main:o").unwrap();
        let contents: Vec<&str> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q5", "re: q5", "q6", "re: q6"]);
        assert_eq!(session.message_count, 12);
    }

    #[tokio::test]
    async fn executor_error_keeps_user_message_only() {
        let fx = fixture(200, true);
        let err = fx
            .pipeline
            .run_turn(Turn::new("agent:main:e", "api", "hi"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));

        let session = fx.sessions.get("agent:main:e").unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, Role::User);

        let page = fx.audit.query(TaskQuery::default()).await.unwrap();
        assert_eq!(page.records[0].status, TaskStatus::Error);
        assert!(page.records[0].response.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn cancelled_turn_is_audited_as_success_with_note() {
        let fx = fixture(200, false);
        let mut rx = fx.pipeline.subscribe();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // A free lock is taken before the token is checked, so the
        // cancellation surfaces from the executor.
        let result = fx
            .pipeline
            .run_turn(Turn::new("agent:main:c", "api", "hi"), &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));

        let page = fx.audit.query(TaskQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].status, TaskStatus::Success);
        assert_eq!(page.records[0].note.as_deref(), Some("cancelled"));
        assert_eq!(rx.try_recv().unwrap().role, Role::User);
        assert_eq!(fx.sessions.get("agent:main:c").unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn denied_peer_is_audited_without_session() {
        let fx = fixture(200, false);
        let msg = IncomingMessage::direct("X", "m2", "bob", "let me in");
        fx.pipeline.denied(&msg).await;

        assert!(fx.sessions.is_empty());
        assert!(fx.executor.seen.lock().is_empty());
        let page = fx.audit.query(TaskQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].status, TaskStatus::Error);
        assert_eq!(page.records[0].note.as_deref(), Some("blocked"));
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let fx = fixture(200, false);
        let err = fx
            .pipeline
            .run_turn(Turn::new("agent:main:x", "api", "  "), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(fx.sessions.is_empty());
    }
}
