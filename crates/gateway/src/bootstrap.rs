//! AppState construction and background-task spawning.
//!
//! `build_app_state` is shared by `switchboard gateway`, `agent chat` and
//! the integration tests; only the server calls `start_channels` and
//! `spawn_background_tasks`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::RwLock;
use sb_channels::{AdapterFactory, AdapterManager, DefaultAdapterFactory, InboundHandler};
use sb_domain::config::{Config, ConfigSeverity, HomeLayout};
use sb_providers::{AgentExecutor, ExecutorRouter};
use sb_sessions::SessionManager;
use sb_tasklog::TaskLog;
use tokio_util::sync::CancellationToken;

use crate::logging::LogBuffer;
use crate::runtime::{Audit, ConfigStore, PairingGuard, Pipeline, SlidingWindow};
use crate::state::AppState;

/// Substitutes for the production executor and adapter factory.
#[derive(Default)]
pub struct Overrides {
    pub executor: Option<Arc<dyn AgentExecutor>>,
    pub adapters: Option<Arc<dyn AdapterFactory>>,
}

/// Log every validation issue and fail when any is an error.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`]. Channel adapters are created but not started.
pub async fn build_app_state(
    layout: HomeLayout,
    config_path: &Path,
    logs: Arc<LogBuffer>,
    overrides: Overrides,
) -> anyhow::Result<AppState> {
    // ── Config ───────────────────────────────────────────────────────
    let config = Arc::new(
        ConfigStore::load(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?,
    );
    let cfg = config.snapshot();
    check_config(&cfg)?;
    tracing::info!(path = %config_path.display(), "config loaded");

    // ── Home layout ──────────────────────────────────────────────────
    for dir in layout.required_dirs(&cfg) {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    // ── Sessions ─────────────────────────────────────────────────────
    let sessions = Arc::new(
        SessionManager::open(&layout.sessions_dir(), cfg.sessions.max_messages)
            .context("opening session store")?,
    );
    tracing::info!(
        sessions = sessions.len(),
        max_messages = cfg.sessions.max_messages,
        "session manager ready"
    );

    // ── Task log ─────────────────────────────────────────────────────
    let audit = if cfg.task_log.enabled {
        let dir = layout.task_log_dir(&cfg);
        let log = TaskLog::open(&dir)
            .with_context(|| format!("opening task log in {}", dir.display()))?;
        tracing::info!(path = %log.db_path().display(), "task log ready");
        Audit::new(Arc::new(log))
    } else {
        tracing::info!("task log disabled");
        Audit::disabled()
    };

    // ── Executor ─────────────────────────────────────────────────────
    let (executor, router): (Arc<dyn AgentExecutor>, Option<Arc<ExecutorRouter>>) =
        match overrides.executor {
            Some(exec) => (exec, None),
            None => {
                let router = Arc::new(ExecutorRouter::new(&cfg.agent));
                (router.clone(), Some(router))
            }
        };
    tracing::info!(executor = %executor.name(), model = %cfg.agent.model, "executor ready");

    // ── Pipeline + channels ──────────────────────────────────────────
    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        sessions.clone(),
        executor.clone(),
        audit.clone(),
    ));
    let shutdown = CancellationToken::new();
    let factory = overrides
        .adapters
        .unwrap_or_else(|| Arc::new(DefaultAdapterFactory));
    let handler: Arc<dyn InboundHandler> = pipeline.clone();
    let channels = Arc::new(AdapterManager::new(factory, handler, shutdown.clone()));
    tracing::info!(configured = cfg.channels.len(), "adapter manager ready");

    // ── Pairing ──────────────────────────────────────────────────────
    let pairing = Arc::new(
        PairingGuard::from_config(&cfg.gateway.auth, &layout)
            .context("initializing pairing guard")?,
    );
    tracing::info!(mode = %pairing.mode(), "pairing guard ready");

    Ok(AppState {
        config,
        layout,
        sessions,
        executor,
        router,
        pipeline,
        channels,
        audit,
        logs,
        pairing,
        pair_limiter: Arc::new(SlidingWindow::pairing()),
        api_limiter: Arc::new(SlidingWindow::api()),
        started_at: Instant::now(),
        listen_addr: Arc::new(RwLock::new(None)),
        shutdown,
        reload_lock: Arc::new(tokio::sync::Mutex::new(())),
    })
}

/// Start the configured channel adapters.
pub async fn start_channels(state: &AppState) {
    let report = state.apply_config(&state.snapshot()).await;
    for (name, entry) in &report.channels {
        tracing::info!(
            channel = %name,
            kind = %entry.kind,
            action = %entry.action,
            status = %entry.status.status,
            "channel"
        );
    }
}

/// Spawn the long-running background tasks (session persistence, task-log
/// cleanup, lock pruning). Each stops when `state.shutdown` is cancelled.
pub fn spawn_background_tasks(state: &AppState) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    // ── Session persistence ──────────────────────────────────────────
    handles.push(
        state
            .sessions
            .clone()
            .spawn_persister(state.shutdown.child_token()),
    );

    // ── Task log retention ───────────────────────────────────────────
    if let Some(h) = state
        .audit
        .spawn_cleanup(state.config.clone(), state.shutdown.child_token())
    {
        handles.push(h);
    }

    // ── Session lock pruning ─────────────────────────────────────────
    {
        let pipeline = state.pipeline.clone();
        let cancel = state.shutdown.child_token();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        pipeline.locks().prune_idle();
                    }
                }
            }
        }));
    }

    tracing::info!(tasks = handles.len(), "background tasks spawned");
    handles
}
