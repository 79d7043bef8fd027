use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use sb_channels::{AdapterManager, ReloadReport};
use sb_domain::channel::ChannelState;
use sb_domain::config::{Config, HomeLayout};
use sb_domain::error::Result;
use sb_providers::{AgentExecutor, ExecutorRouter};
use sb_sessions::SessionManager;
use sb_tasklog::{action, NewTask, TaskStatus};
use tokio_util::sync::CancellationToken;

use crate::logging::LogBuffer;
use crate::runtime::{Audit, ConfigStore, PairingGuard, Pipeline, SlidingWindow};

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Configuration**: live document and home layout
/// - **Conversation**: sessions, executor, pipeline, channel adapters
/// - **Observability**: audit log and in-memory log ring
/// - **Security**: pairing guard and rate limiters
/// - **Process**: start time, listen address, shutdown token
#[derive(Clone)]
pub struct AppState {
    // ── Configuration ─────────────────────────────────────────────────
    pub config: Arc<ConfigStore>,
    pub layout: HomeLayout,

    // ── Conversation ──────────────────────────────────────────────────
    pub sessions: Arc<SessionManager>,
    pub executor: Arc<dyn AgentExecutor>,
    /// Set when `executor` is the config-driven router, so reloads can
    /// push new `agent` settings into it.
    pub router: Option<Arc<ExecutorRouter>>,
    pub pipeline: Arc<Pipeline>,
    pub channels: Arc<AdapterManager>,

    // ── Observability ─────────────────────────────────────────────────
    pub audit: Audit,
    pub logs: Arc<LogBuffer>,

    // ── Security ──────────────────────────────────────────────────────
    pub pairing: Arc<PairingGuard>,
    /// Pairing-code attempts per client IP.
    pub pair_limiter: Arc<SlidingWindow>,
    /// Authenticated API calls per client IP.
    pub api_limiter: Arc<SlidingWindow>,

    // ── Process ───────────────────────────────────────────────────────
    pub started_at: Instant,
    /// Bound address, set once the listener is up.
    pub listen_addr: Arc<RwLock<Option<SocketAddr>>>,
    /// Root cancellation token; cancelling it shuts the gateway down.
    pub shutdown: CancellationToken,
    /// Serializes config re-read + apply so reloads never interleave.
    pub(crate) reload_lock: Arc<tokio::sync::Mutex<()>>,
}

impl AppState {
    pub fn snapshot(&self) -> Arc<Config> {
        self.config.snapshot()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Re-read `config.yaml` and reconcile every live component with it.
    /// An invalid file is rejected and nothing changes.
    pub async fn reload(&self, source: &str) -> Result<ReloadReport> {
        let _guard = self.reload_lock.lock().await;
        let config = match self.config.reload(source) {
            Ok(c) => c,
            Err(e) => {
                self.audit
                    .record(
                        NewTask::new(action::CONFIG, "reload")
                            .request(source)
                            .response(e.to_string())
                            .status(TaskStatus::Error),
                    )
                    .await;
                return Err(e);
            }
        };
        Ok(self.apply_locked(&config, source).await)
    }

    /// Deep-merge `patch` into the live document, persist it and apply it.
    pub async fn patch_config(
        &self,
        patch: &serde_json::Value,
    ) -> Result<(Arc<Config>, ReloadReport)> {
        let _guard = self.reload_lock.lock().await;
        let config = self.config.patch(patch)?;
        let report = self.apply_locked(&config, "patch").await;
        Ok((config, report))
    }

    /// Push `config` into the executor router, session manager and channel
    /// adapters. Returns the adapter reload report.
    pub async fn apply_config(&self, config: &Config) -> ReloadReport {
        let _guard = self.reload_lock.lock().await;
        self.apply_locked(config, "apply").await
    }

    async fn apply_locked(&self, config: &Config, source: &str) -> ReloadReport {
        if let Some(router) = &self.router {
            router.update(&config.agent);
        }
        self.sessions.set_max_messages(config.sessions.max_messages);
        let report = self.channels.apply(&config.channels).await;

        let delta = report.delta();
        // Repeated identical start failures are `unchanged` but still errors.
        let failed = report
            .channels
            .values()
            .filter(|e| e.status.status == ChannelState::Error)
            .count();
        let summary = serde_json::to_string(&delta).unwrap_or_default();
        self.audit
            .record(
                NewTask::new(action::CHANNEL, "reload")
                    .request(source)
                    .response(summary)
                    .status(if failed == 0 {
                        TaskStatus::Success
                    } else {
                        TaskStatus::Error
                    }),
            )
            .await;
        tracing::info!(
            source = %source,
            changed = delta.len(),
            failed,
            "configuration applied"
        );
        report
    }
}
