//! Adapter supervisor.
//!
//! [`AdapterManager::apply`] is the only way the running adapter set
//! changes. Each call diffs the desired configuration against what is
//! live: restart-sensitive changes stop and rebuild an adapter, allowlist
//! changes are pushed in place. Work for different transport kinds runs
//! concurrently; work within one kind runs in order. Calls are serialized.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use sb_domain::channel::{ChannelState, ChannelStatus};
use sb_domain::config::{ChannelConfig, HotFields, RestartKey};
use sb_domain::error::Error;
use sb_domain::trace::TraceEvent;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterFactory, ChannelAdapter, InboundHandler};

const START_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reload report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadAction {
    Started,
    Stopped,
    Restarted,
    Updated,
    Unchanged,
    Failed,
}

impl fmt::Display for ReloadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReloadAction::Started => "started",
            ReloadAction::Stopped => "stopped",
            ReloadAction::Restarted => "restarted",
            ReloadAction::Updated => "updated",
            ReloadAction::Unchanged => "unchanged",
            ReloadAction::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadEntry {
    pub kind: String,
    pub action: ReloadAction,
    #[serde(flatten)]
    pub status: ChannelStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub channels: BTreeMap<String, ReloadEntry>,
}

impl ReloadReport {
    /// Entries whose action is anything but `unchanged`.
    pub fn delta(&self) -> BTreeMap<&str, &ReloadEntry> {
        self.channels
            .iter()
            .filter(|(_, e)| e.action != ReloadAction::Unchanged)
            .map(|(k, e)| (k.as_str(), e))
            .collect()
    }

    pub fn count(&self, action: ReloadAction) -> usize {
        self.channels.values().filter(|e| e.action == action).count()
    }

    pub fn action(&self, name: &str) -> Option<ReloadAction> {
        self.channels.get(name).map(|e| e.action)
    }

    fn emit(&self) {
        TraceEvent::ReloadApplied {
            started: self.count(ReloadAction::Started),
            stopped: self.count(ReloadAction::Stopped),
            restarted: self.count(ReloadAction::Restarted),
            updated: self.count(ReloadAction::Updated),
            failed: self.count(ReloadAction::Failed),
        }
        .emit();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Live {
    adapter: Arc<dyn ChannelAdapter>,
    restart_key: RestartKey,
    hot: HotFields,
    cancel: CancellationToken,
}

/// What `statuses()` sees for one configured channel.
#[derive(Clone)]
enum View {
    Live(Arc<dyn ChannelAdapter>),
    Idle { kind: String, status: ChannelStatus },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterView {
    pub kind: String,
    #[serde(flatten)]
    pub status: ChannelStatus,
}

enum Op {
    Start(String, ChannelConfig),
    Stop(String, Live),
    Restart(String, Live, ChannelConfig),
}

type OpResult = (String, ReloadEntry, Option<Live>);

pub struct AdapterManager {
    factory: Arc<dyn AdapterFactory>,
    handler: Arc<dyn InboundHandler>,
    root: CancellationToken,
    live: tokio::sync::Mutex<BTreeMap<String, Live>>,
    view: RwLock<BTreeMap<String, View>>,
    /// Last failed start per channel, with the settings it was tried with.
    failures: Mutex<BTreeMap<String, (RestartKey, Option<String>)>>,
    start_timeout: Duration,
    stop_timeout: Duration,
}

impl AdapterManager {
    pub fn new(
        factory: Arc<dyn AdapterFactory>,
        handler: Arc<dyn InboundHandler>,
        root: CancellationToken,
    ) -> Self {
        Self {
            factory,
            handler,
            root,
            live: tokio::sync::Mutex::new(BTreeMap::new()),
            view: RwLock::new(BTreeMap::new()),
            failures: Mutex::new(BTreeMap::new()),
            start_timeout: START_TIMEOUT,
            stop_timeout: STOP_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, start: Duration, stop: Duration) -> Self {
        self.start_timeout = start;
        self.stop_timeout = stop;
        self
    }

    /// Reconcile the running set against `channels`.
    ///
    /// A channel that failed to start is tried again on every call. When
    /// the retry fails with the same settings and the same error as the
    /// previous attempt it is reported `unchanged`, so an idle reload has
    /// an empty delta.
    pub async fn apply(&self, channels: &BTreeMap<String, ChannelConfig>) -> ReloadReport {
        let mut live = self.live.lock().await;
        let mut report = ReloadReport::default();
        let mut groups: BTreeMap<String, Vec<Op>> = BTreeMap::new();

        // Live adapters no longer wanted.
        let unwanted: Vec<String> = live
            .keys()
            .filter(|name| !channels.get(*name).is_some_and(|c| c.is_active(name)))
            .cloned()
            .collect();
        for name in unwanted {
            if let Some(entry) = live.remove(&name) {
                let kind = entry.restart_key.kind.clone();
                groups.entry(kind).or_default().push(Op::Stop(name, entry));
            }
        }

        for (name, cfg) in channels {
            let kind = cfg.kind_for(name).to_owned();
            if !cfg.is_active(name) {
                if groups.values().flatten().any(|op| op.name() == name.as_str()) {
                    continue;
                }
                let mut status = ChannelStatus::new(ChannelState::Disabled);
                if cfg.enabled {
                    status.error = Some("missing credentials".into());
                }
                report.channels.insert(
                    name.clone(),
                    ReloadEntry {
                        kind,
                        action: ReloadAction::Unchanged,
                        status,
                    },
                );
                continue;
            }

            let restart_key = cfg.restart_key(name);
            let changed = match live.get(name) {
                None => {
                    groups
                        .entry(kind)
                        .or_default()
                        .push(Op::Start(name.clone(), cfg.clone()));
                    continue;
                }
                Some(current) => current.restart_key != restart_key,
            };
            if changed {
                if let Some(old) = live.remove(name) {
                    groups
                        .entry(kind)
                        .or_default()
                        .push(Op::Restart(name.clone(), old, cfg.clone()));
                }
                continue;
            }

            let Some(current) = live.get_mut(name) else {
                continue;
            };
            let hot = cfg.hot_fields();
            let action = if current.hot != hot {
                current
                    .adapter
                    .update_allowlist(&hot.allow_users, &hot.allow_groups);
                current.adapter.set_deny_message(hot.deny_message.clone());
                current.hot = hot;
                ReloadAction::Updated
            } else {
                ReloadAction::Unchanged
            };
            report.channels.insert(
                name.clone(),
                ReloadEntry {
                    kind,
                    action,
                    status: current.adapter.status(),
                },
            );
        }

        let results = join_all(groups.into_values().map(|ops| async move {
            let mut out = Vec::with_capacity(ops.len());
            for op in ops {
                out.push(self.run_op(op).await);
            }
            out
        }))
        .await;

        let mut idle = BTreeMap::new();
        let mut failures = self.failures.lock();
        failures.retain(|name, _| channels.get(name).is_some_and(|c| c.is_active(name)));
        for (name, mut entry, kept) in results.into_iter().flatten() {
            if entry.action == ReloadAction::Failed {
                if let Some(cfg) = channels.get(&name) {
                    let attempt = (cfg.restart_key(&name), entry.status.error.clone());
                    if failures.get(&name) == Some(&attempt) {
                        entry.action = ReloadAction::Unchanged;
                    }
                    failures.insert(name.clone(), attempt);
                }
            } else {
                failures.remove(&name);
            }
            match kept {
                Some(l) => {
                    live.insert(name.clone(), l);
                }
                None => {
                    idle.insert(name.clone(), (entry.kind.clone(), entry.status.clone()));
                }
            }
            report.channels.insert(name, entry);
        }
        drop(failures);
        for (name, entry) in &report.channels {
            if !live.contains_key(name) && !idle.contains_key(name) {
                idle.insert(name.clone(), (entry.kind.clone(), entry.status.clone()));
            }
        }

        let mut view = BTreeMap::new();
        for (name, l) in live.iter() {
            view.insert(name.clone(), View::Live(l.adapter.clone()));
        }
        for (name, (kind, status)) in idle {
            // Removed from configuration entirely: forget it.
            if channels.contains_key(&name) {
                view.insert(name, View::Idle { kind, status });
            }
        }
        *self.view.write() = view;

        for (name, entry) in report.delta() {
            tracing::info!(
                channel = %name,
                kind = %entry.kind,
                action = %entry.action,
                status = %entry.status.status,
                "channel reconciled"
            );
        }
        report.emit();
        report
    }

    async fn run_op(&self, op: Op) -> OpResult {
        match op {
            Op::Stop(name, old) => {
                let kind = old.restart_key.kind.clone();
                self.stop_live(&name, old).await;
                (
                    name,
                    ReloadEntry {
                        kind,
                        action: ReloadAction::Stopped,
                        status: ChannelStatus::new(ChannelState::Stopped),
                    },
                    None,
                )
            }
            Op::Start(name, cfg) => self.start(name, cfg, ReloadAction::Started).await,
            Op::Restart(name, old, cfg) => {
                self.stop_live(&name, old).await;
                self.start(name, cfg, ReloadAction::Restarted).await
            }
        }
    }

    async fn start(&self, name: String, cfg: ChannelConfig, action: ReloadAction) -> OpResult {
        let kind = cfg.kind_for(&name).to_owned();
        let failed = |kind: String, err: &Error| ReloadEntry {
            kind,
            action: ReloadAction::Failed,
            status: ChannelStatus::error(err.to_string()),
        };

        let adapter = match self.factory.create(&name, &cfg) {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(channel = %name, error = %e, "channel construction failed");
                return (name, failed(kind, &e), None);
            }
        };
        adapter.set_message_handler(self.handler.clone());
        let cancel = self.root.child_token();

        let started = match tokio::time::timeout(self.start_timeout, adapter.start(cancel.clone())).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(format!(
                "start did not finish within {}ms",
                self.start_timeout.as_millis()
            ))),
        };
        if let Err(e) = started {
            tracing::error!(channel = %name, kind = %kind, error = %e, "channel failed to start");
            cancel.cancel();
            let _ = tokio::time::timeout(self.stop_timeout, adapter.stop()).await;
            return (name, failed(kind, &e), None);
        }

        let entry = ReloadEntry {
            kind,
            action,
            status: adapter.status(),
        };
        let live = Live {
            restart_key: cfg.restart_key(&name),
            hot: cfg.hot_fields(),
            adapter,
            cancel,
        };
        (name, entry, Some(live))
    }

    async fn stop_live(&self, name: &str, old: Live) {
        match tokio::time::timeout(self.stop_timeout, old.adapter.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(channel = %name, error = %e, "channel stop failed"),
            Err(_) => tracing::warn!(channel = %name, "channel stop timed out"),
        }
        old.cancel.cancel();
    }

    /// Live status of every configured channel.
    pub fn statuses(&self) -> BTreeMap<String, AdapterView> {
        self.view
            .read()
            .iter()
            .map(|(name, v)| {
                let view = match v {
                    View::Live(a) => AdapterView {
                        kind: a.kind().to_owned(),
                        status: a.status(),
                    },
                    View::Idle { kind, status } => AdapterView {
                        kind: kind.clone(),
                        status: status.clone(),
                    },
                };
                (name.clone(), view)
            })
            .collect()
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn ChannelAdapter>> {
        match self.view.read().get(name) {
            Some(View::Live(a)) => Some(a.clone()),
            _ => None,
        }
    }

    /// Stop every live adapter. Used on shutdown.
    pub async fn stop_all(&self) {
        let mut live = self.live.lock().await;
        let drained: Vec<(String, Live)> = std::mem::take(&mut *live).into_iter().collect();
        join_all(
            drained
                .into_iter()
                .map(|(name, l)| async move { self.stop_live(&name, l).await }),
        )
        .await;
        let mut view = self.view.write();
        for v in view.values_mut() {
            if let View::Live(a) = v {
                let kind = a.kind().to_owned();
                *v = View::Idle {
                    kind,
                    status: ChannelStatus::new(ChannelState::Stopped),
                };
            }
        }
        tracing::info!("all channels stopped");
    }
}

impl Op {
    fn name(&self) -> &str {
        match self {
            Op::Start(n, _) | Op::Stop(n, _) | Op::Restart(n, _, _) => n,
        }
    }
}
