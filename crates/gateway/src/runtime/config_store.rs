//! The live configuration document.
//!
//! Readers take lock-free snapshots; writers validate, persist atomically,
//! swap the pointer and notify subscribers.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use sb_domain::config::{Config, REDACTED};
use sb_domain::error::{Error, Result};
use sb_domain::trace::TraceEvent;
use tokio::sync::watch;

pub struct ConfigStore {
    path: PathBuf,
    current: ArcSwap<Config>,
    changes: watch::Sender<Arc<Config>>,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(path, read_config_file(path)?))
    }

    /// Wrap an already-built document. Nothing is written until the first
    /// `patch` or `replace`.
    pub fn new(path: &Path, config: Config) -> Self {
        let config = Arc::new(config);
        let (changes, _) = watch::channel(config.clone());
        Self {
            path: path.to_owned(),
            current: ArcSwap::new(config),
            changes,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Receiver notified after every swap.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.changes.subscribe()
    }

    /// Deep-merge a partial document, validate, persist and publish.
    ///
    /// String values equal to the redaction placeholder are ignored so a
    /// document fetched from `GET /api/config` can be sent back unchanged.
    pub fn patch(&self, patch: &serde_json::Value) -> Result<Arc<Config>> {
        let _guard = self.write_lock.lock();
        let mut patch = patch.clone();
        strip_redacted(&mut patch);
        let merged = self.snapshot().merged_with(&patch)?;
        self.commit(merged, "patch")
    }

    /// Validate, persist and publish a whole document.
    pub fn replace(&self, config: Config, source: &str) -> Result<Arc<Config>> {
        let _guard = self.write_lock.lock();
        self.commit(config, source)
    }

    /// Re-read the file. An invalid file leaves the current snapshot in place.
    pub fn reload(&self, source: &str) -> Result<Arc<Config>> {
        let _guard = self.write_lock.lock();
        let config = read_config_file(&self.path)?;
        config.ensure_valid()?;
        Ok(self.swap(config, source))
    }

    fn commit(&self, config: Config, source: &str) -> Result<Arc<Config>> {
        config.ensure_valid()?;
        write_config_file(&self.path, &config)?;
        Ok(self.swap(config, source))
    }

    fn swap(&self, config: Config, source: &str) -> Arc<Config> {
        let config = Arc::new(config);
        self.current.store(config.clone());
        self.changes.send_replace(config.clone());
        TraceEvent::ConfigSwapped {
            source: source.to_owned(),
        }
        .emit();
        config
    }
}

fn strip_redacted(value: &mut serde_json::Value) {
    if let serde_json::Value::Object(map) = value {
        map.retain(|_, v| v.as_str() != Some(REDACTED));
        for v in map.values_mut() {
            strip_redacted(v);
        }
    }
}

// ── File helpers ────────────────────────────────────────────────────

pub fn read_config_file(path: &Path) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Config::from_yaml_str(&raw)
            .map_err(|e| Error::Validation(format!("parsing {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(Error::Storage(format!("reading {}: {e}", path.display()))),
    }
}

/// Write `config` as YAML via temp file and rename, readable by the owner only.
pub fn write_config_file(path: &Path, config: &Config) -> Result<()> {
    let yaml = config.to_yaml_string()?;
    write_private(path, yaml.as_bytes())
}

/// Atomic write with mode 0600 on Unix.
pub fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let storage = |e: std::io::Error| Error::Storage(format!("writing {}: {e}", path.display()));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(storage)?;
    }
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    {
        let mut opts = std::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&tmp).map_err(storage)?;
        file.write_all(bytes).map_err(storage)?;
        file.sync_all().map_err(storage)?;
    }
    std::fs::rename(&tmp, path).map_err(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_domain::config::deep_merge;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(&dir.path().join("config.yaml")).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_file_loads_defaults() {
        let (_dir, store) = store();
        assert_eq!(store.snapshot().gateway.port, 7420);
        assert!(!store.path().exists());
    }

    #[test]
    fn sequential_patches_equal_nested_merge() {
        let (_dir, store) = store();
        let base = store.snapshot().to_value().unwrap();
        let p1 = json!({"gateway": {"port": 8000}, "sessions": {"maxMessages": 50}});
        let p2 = json!({"gateway": {"port": 9000}, "agent": {"model": "echo/echo"}});
        store.patch(&p1).unwrap();
        let after = store.patch(&p2).unwrap();

        let mut expected = base;
        deep_merge(&mut expected, &p1);
        deep_merge(&mut expected, &p2);
        assert_eq!(after.to_value().unwrap(), expected);

        let on_disk = read_config_file(store.path()).unwrap();
        assert_eq!(on_disk.gateway.port, 9000);
        assert_eq!(on_disk.sessions.max_messages, 50);
    }

    #[test]
    fn invalid_patch_is_rejected_and_not_applied() {
        let (_dir, store) = store();
        let mut rx = store.subscribe();
        let err = store.patch(&json!({"gateway": {"port": 0}})).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.snapshot().gateway.port, 7420);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn patch_notifies_subscribers() {
        let (_dir, store) = store();
        let mut rx = store.subscribe();
        store.patch(&json!({"gateway": {"port": 8123}})).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().gateway.port, 8123);
    }

    #[test]
    fn redacted_placeholders_keep_secrets() {
        let (_dir, store) = store();
        store
            .patch(&json!({"channels": {"telegram": {"token": "123:abc", "allowUsers": ["alice"]}}}))
            .unwrap();
        let redacted = store.snapshot().redacted().unwrap();
        store.patch(&redacted).unwrap();
        assert_eq!(
            store.snapshot().channels["telegram"].token.as_deref(),
            Some("123:abc")
        );
    }

    #[test]
    fn reload_picks_up_edits_and_rejects_invalid_files() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "gateway:\n  port: 7555\n").unwrap();
        assert_eq!(store.reload("test").unwrap().gateway.port, 7555);

        std::fs::write(store.path(), "gateway:\n  port: 0\n").unwrap();
        assert!(store.reload("test").is_err());
        assert_eq!(store.snapshot().gateway.port, 7555);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, store) = store();
        store.patch(&json!({"gateway": {"port": 8001}})).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
