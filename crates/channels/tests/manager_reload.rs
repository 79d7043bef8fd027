use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sb_channels::{
    AdapterCore, AdapterFactory, AdapterManager, ChannelAdapter, InboundHandler, ReloadAction,
};
use sb_domain::channel::{ChannelState, ChannelStatus, IncomingMessage};
use sb_domain::config::ChannelConfig;
use sb_domain::error::{Error, Result};
use tokio_util::sync::CancellationToken;

// ── Scripted transport ───────────────────────────────────────────────

struct MockAdapter {
    core: AdapterCore,
    instance: usize,
    token: Option<String>,
    stops: AtomicUsize,
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    fn name(&self) -> &str {
        self.core.name()
    }
    fn kind(&self) -> &str {
        self.core.kind()
    }
    async fn start(&self, _cancel: CancellationToken) -> Result<()> {
        self.core.set_state(ChannelState::Starting);
        if self.token.as_deref() == Some("BAD") {
            let err = Error::Auth("401 Unauthorized".into());
            self.core.fail(&err);
            return Err(err);
        }
        if self.token.as_deref() == Some("SLOW") {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.core.mark_connected();
        Ok(())
    }
    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.core.set_state(ChannelState::Stopped);
        Ok(())
    }
    fn status(&self) -> ChannelStatus {
        self.core.status()
    }
    fn is_bound(&self) -> bool {
        self.core.is_bound()
    }
    fn bind_code(&self) -> Option<String> {
        self.core.bind_code()
    }
    fn update_allowlist(&self, users: &[String], groups: &[String]) {
        self.core.update_allowlist(users, groups);
    }
    fn set_deny_message(&self, message: Option<String>) {
        self.core.set_deny_message(message);
    }
    fn set_message_handler(&self, handler: Arc<dyn InboundHandler>) {
        self.core.set_handler(handler);
    }
}

#[derive(Default)]
struct MockFactory {
    created: AtomicUsize,
    instances: Mutex<Vec<Arc<MockAdapter>>>,
}

impl MockFactory {
    fn latest(&self, name: &str) -> Arc<MockAdapter> {
        self.instances
            .lock()
            .iter()
            .rev()
            .find(|a| a.core.name() == name)
            .cloned()
            .unwrap()
    }
}

impl AdapterFactory for MockFactory {
    fn create(&self, name: &str, config: &ChannelConfig) -> Result<Arc<dyn ChannelAdapter>> {
        let instance = self.created.fetch_add(1, Ordering::SeqCst);
        let adapter = Arc::new(MockAdapter {
            core: AdapterCore::new(name, config),
            instance,
            token: config.token.clone(),
            stops: AtomicUsize::new(0),
        });
        self.instances.lock().push(adapter.clone());
        Ok(adapter)
    }
}

struct Echo;

#[async_trait]
impl InboundHandler for Echo {
    async fn handle(&self, msg: IncomingMessage, _cancel: CancellationToken) -> Result<String> {
        Ok(format!("echo: {}", msg.body))
    }
    async fn denied(&self, _msg: &IncomingMessage) {}
}

fn manager(factory: Arc<MockFactory>) -> AdapterManager {
    AdapterManager::new(factory, Arc::new(Echo), CancellationToken::new())
        .with_timeouts(Duration::from_millis(200), Duration::from_millis(200))
}

fn tg(token: &str, users: &[&str]) -> ChannelConfig {
    ChannelConfig {
        token: Some(token.into()),
        allow_users: users.iter().map(|u| u.to_string()).collect(),
        ..Default::default()
    }
}

fn channels(entries: &[(&str, ChannelConfig)]) -> BTreeMap<String, ChannelConfig> {
    entries
        .iter()
        .map(|(n, c)| (n.to_string(), c.clone()))
        .collect()
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn credential_change_restarts_with_new_instance() {
    let factory = Arc::new(MockFactory::default());
    let mgr = manager(factory.clone());

    let first = mgr.apply(&channels(&[("telegram", tg("T1", &["alice"]))])).await;
    assert_eq!(first.action("telegram"), Some(ReloadAction::Started));
    let old = factory.latest("telegram");

    let report = mgr.apply(&channels(&[("telegram", tg("T2", &["alice"]))])).await;
    assert_eq!(report.action("telegram"), Some(ReloadAction::Restarted));
    assert_eq!(old.stops.load(Ordering::SeqCst), 1);
    let new = factory.latest("telegram");
    assert_ne!(old.instance, new.instance);
    assert_eq!(new.token.as_deref(), Some("T2"));
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    assert_eq!(
        mgr.adapter("telegram").unwrap().status().status,
        ChannelState::Running
    );
}

#[tokio::test]
async fn allowlist_change_updates_in_place() {
    let factory = Arc::new(MockFactory::default());
    let mgr = manager(factory.clone());
    mgr.apply(&channels(&[("telegram", tg("T1", &["alice"]))])).await;
    let adapter = factory.latest("telegram");

    let report = mgr
        .apply(&channels(&[("telegram", tg("T1", &["alice", "carol"]))]))
        .await;
    assert_eq!(report.action("telegram"), Some(ReloadAction::Updated));
    assert_eq!(adapter.stops.load(Ordering::SeqCst), 0);
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);

    let reply = adapter
        .core
        .dispatch(
            IncomingMessage::direct("telegram", "1", "carol", "hi"),
            &[],
            CancellationToken::new(),
        )
        .await;
    assert_eq!(reply.as_deref(), Some("echo: hi"));
}

#[tokio::test]
async fn reapplying_same_config_is_a_no_op() {
    let factory = Arc::new(MockFactory::default());
    let mgr = manager(factory.clone());
    let cfg = channels(&[
        ("telegram", tg("T1", &["alice"])),
        (
            "hook",
            ChannelConfig {
                kind: Some("webhook".into()),
                listen: Some("127.0.0.1:0".into()),
                ..Default::default()
            },
        ),
    ]);
    let first = mgr.apply(&cfg).await;
    assert_eq!(first.count(ReloadAction::Started), 2);

    let second = mgr.apply(&cfg).await;
    assert!(second.delta().is_empty(), "{:?}", second.delta());
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn disabling_or_removing_stops_the_adapter() {
    let factory = Arc::new(MockFactory::default());
    let mgr = manager(factory.clone());
    mgr.apply(&channels(&[("telegram", tg("T1", &[]))])).await;

    let disabled = ChannelConfig {
        enabled: false,
        ..tg("T1", &[])
    };
    let report = mgr.apply(&channels(&[("telegram", disabled.clone())])).await;
    assert_eq!(report.action("telegram"), Some(ReloadAction::Stopped));
    assert_eq!(
        mgr.statuses()["telegram"].status.status,
        ChannelState::Stopped
    );

    let again = mgr.apply(&channels(&[("telegram", disabled)])).await;
    assert_eq!(again.action("telegram"), Some(ReloadAction::Unchanged));
    assert_eq!(
        again.channels["telegram"].status.status,
        ChannelState::Disabled
    );

    mgr.apply(&channels(&[("telegram", tg("T1", &[]))])).await;
    let removed = mgr.apply(&BTreeMap::new()).await;
    assert_eq!(removed.action("telegram"), Some(ReloadAction::Stopped));
    assert!(mgr.statuses().is_empty());
}

#[tokio::test]
async fn failed_start_is_reported_and_retried() {
    let factory = Arc::new(MockFactory::default());
    let mgr = manager(factory.clone());
    let bad = channels(&[("telegram", tg("BAD", &[]))]);

    let report = mgr.apply(&bad).await;
    assert_eq!(report.action("telegram"), Some(ReloadAction::Failed));
    let status = &mgr.statuses()["telegram"].status;
    assert_eq!(status.status, ChannelState::Error);
    assert!(status.error.as_deref().unwrap().contains("401"));
    assert!(mgr.adapter("telegram").is_none());

    // Same settings, same error: retried but not reported as a change.
    let retry = mgr.apply(&bad).await;
    assert_eq!(retry.action("telegram"), Some(ReloadAction::Unchanged));
    assert!(retry.delta().is_empty(), "{:?}", retry.delta());
    assert_eq!(retry.channels["telegram"].status.status, ChannelState::Error);
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);

    let fixed = mgr.apply(&channels(&[("telegram", tg("T1", &[]))])).await;
    assert_eq!(fixed.action("telegram"), Some(ReloadAction::Started));

    // A fresh failure after a successful start is a change again.
    let broken = mgr.apply(&bad).await;
    assert_eq!(broken.action("telegram"), Some(ReloadAction::Failed));
}

#[tokio::test]
async fn start_timeout_fails_the_adapter() {
    let factory = Arc::new(MockFactory::default());
    let mgr = manager(factory.clone());
    let report = mgr.apply(&channels(&[("telegram", tg("SLOW", &[]))])).await;
    assert_eq!(report.action("telegram"), Some(ReloadAction::Failed));
    assert!(report.channels["telegram"]
        .status
        .error
        .as_deref()
        .unwrap()
        .contains("within"));
}

#[tokio::test]
async fn bind_code_is_reported_on_start() {
    let factory = Arc::new(MockFactory::default());
    let mgr = manager(factory);
    let cfg = ChannelConfig {
        require_bind: true,
        ..tg("T1", &[])
    };
    let report = mgr.apply(&channels(&[("telegram", cfg)])).await;
    let entry = &report.channels["telegram"];
    assert_eq!(entry.status.status, ChannelState::AwaitingBind);
    assert_eq!(entry.status.bind_code.as_deref().map(str::len), Some(6));
}

#[tokio::test]
async fn stop_all_stops_everything() {
    let factory = Arc::new(MockFactory::default());
    let mgr = manager(factory.clone());
    mgr.apply(&channels(&[("a", tg("T1", &[])), ("b", tg("T2", &[]))]))
        .await;
    mgr.stop_all().await;
    assert_eq!(factory.latest("a").stops.load(Ordering::SeqCst), 1);
    assert_eq!(factory.latest("b").stops.load(Ordering::SeqCst), 1);
    assert!(mgr
        .statuses()
        .values()
        .all(|v| v.status.status == ChannelState::Stopped));
}
