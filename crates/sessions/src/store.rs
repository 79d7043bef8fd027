//! Gateway-owned session manager.
//!
//! Every session lives in memory behind its own mutex and is mirrored to
//! `sessions/<sha>.json`. Structural changes (create, delete) take the map
//! lock; appends and resets take only the per-session lock. Writes are
//! coalesced through a [`DirtySet`] and performed by [`SessionManager::flush_due`]
//! (driven by [`SessionManager::spawn_persister`]) or [`SessionManager::flush`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use sb_domain::channel::PeerContext;
use sb_domain::config::SessionsConfig;
use sb_domain::error::{Error, Result};
use sb_domain::trace::TraceEvent;

use crate::bindings::SessionBindings;
use crate::persist::{session_file_name, write_atomic, DirtySet};
use crate::session::{Message, Session, SessionSummary};
use crate::session_key::{binding_conversation, resolve_session_from_config};

const BINDINGS_FILE: &str = "_bindings.json";
const CURRENT_FILE: &str = "_current";
const PERSIST_TICK: Duration = Duration::from_millis(50);

type SessionCell = Arc<Mutex<Session>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionManager {
    dir: PathBuf,
    max_messages: AtomicUsize,
    sessions: Mutex<HashMap<String, SessionCell>>,
    dirty: Mutex<DirtySet>,
    /// Serializes file writes and deletes so a late write cannot resurrect
    /// a deleted session.
    write_lock: Mutex<()>,
    bindings: SessionBindings,
    current: RwLock<Option<String>>,
}

impl SessionManager {
    /// Open (or create) the sessions directory and load every session file.
    ///
    /// A file that fails to parse is renamed to `*.corrupt` and skipped so
    /// one bad file cannot keep the gateway from starting.
    pub fn open(dir: &Path, max_messages: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("creating {}: {e}", dir.display())))?;

        let mut sessions = HashMap::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::Storage(format!("listing {}: {e}", dir.display())))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_session_file = path.extension().is_some_and(|e| e == "json")
                && !entry.file_name().to_string_lossy().starts_with('_');
            if !is_session_file {
                continue;
            }
            match load_session_file(&path) {
                Ok(session) => {
                    sessions.insert(session.key.clone(), Arc::new(Mutex::new(session)));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable session file");
                    let _ = std::fs::rename(&path, path.with_extension("json.corrupt"));
                }
            }
        }

        let bindings = SessionBindings::load(&dir.join(BINDINGS_FILE))?;
        let current = std::fs::read_to_string(dir.join(CURRENT_FILE))
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty());

        tracing::info!(
            sessions = sessions.len(),
            bindings = bindings.list().len(),
            path = %dir.display(),
            "session store loaded"
        );

        Ok(Self {
            dir: dir.to_owned(),
            max_messages: AtomicUsize::new(max_messages.max(1)),
            sessions: Mutex::new(sessions),
            dirty: Mutex::new(DirtySet::default()),
            write_lock: Mutex::new(()),
            bindings,
            current: RwLock::new(current),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages.load(Ordering::Relaxed)
    }

    /// Apply a new history bound; takes effect on the next append.
    pub fn set_max_messages(&self, max: usize) {
        self.max_messages.store(max.max(1), Ordering::Relaxed);
    }

    fn cell(&self, key: &str) -> Result<SessionCell> {
        self.sessions
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session '{key}'")))
    }

    fn mark_dirty(&self, key: &str) {
        self.dirty.lock().mark(key, Instant::now());
    }

    // ── Lookup & creation ────────────────────────────────────────────

    /// Return the session for `key`, creating it if absent.
    /// Returns `(snapshot, is_new)`.
    pub fn get_or_create(&self, key: &str, channel: &str) -> (Session, bool) {
        let (cell, is_new) = {
            let mut sessions = self.sessions.lock();
            match sessions.get(key) {
                Some(cell) => (cell.clone(), false),
                None => {
                    let cell = Arc::new(Mutex::new(Session::new(key, channel)));
                    sessions.insert(key.to_owned(), cell.clone());
                    (cell, true)
                }
            }
        };

        if is_new {
            self.mark_dirty(key);
            TraceEvent::SessionResolved {
                session_key: key.to_owned(),
                channel: channel.to_owned(),
                is_new: true,
            }
            .emit();
        }

        let snapshot = cell.lock().clone();
        (snapshot, is_new)
    }

    pub fn get(&self, key: &str) -> Result<Session> {
        let cell = self.cell(key)?;
        let snapshot = cell.lock().clone();
        Ok(snapshot)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shallow descriptors, most recently active first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let cells: Vec<SessionCell> = self.sessions.lock().values().cloned().collect();
        let mut out: Vec<SessionSummary> = cells.iter().map(|c| c.lock().summary()).collect();
        out.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        out
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Append a message, evicting the oldest beyond the history bound.
    pub fn append_message(&self, key: &str, msg: Message) -> Result<()> {
        let cell = self.cell(key)?;
        let evicted = cell.lock().push_bounded(msg, self.max_messages());
        self.mark_dirty(key);
        if evicted > 0 {
            TraceEvent::SessionEvicted {
                session_key: key.to_owned(),
                evicted,
            }
            .emit();
        }
        Ok(())
    }

    /// Empty the history; key and model override are preserved.
    pub fn reset(&self, key: &str) -> Result<()> {
        let cell = self.cell(key)?;
        let dropped = {
            let mut session = cell.lock();
            let dropped = session.messages.len();
            session.messages.clear();
            session.message_count = 0;
            session.last_activity_at = chrono::Utc::now();
            dropped
        };
        self.mark_dirty(key);
        TraceEvent::SessionReset {
            session_key: key.to_owned(),
            dropped_messages: dropped,
        }
        .emit();
        Ok(())
    }

    /// Set or clear the per-session model override.
    pub fn set_model(&self, key: &str, model: Option<String>) -> Result<()> {
        let cell = self.cell(key)?;
        cell.lock().model = model;
        self.mark_dirty(key);
        Ok(())
    }

    /// Delete a session and its file. With `missing_ok`, deleting an absent
    /// key succeeds and returns `false`.
    pub fn delete(&self, key: &str, missing_ok: bool) -> Result<bool> {
        let removed = self.sessions.lock().remove(key).is_some();
        self.dirty.lock().clear(key);

        if !removed {
            return if missing_ok {
                Ok(false)
            } else {
                Err(Error::NotFound(format!("session '{key}'")))
            };
        }

        {
            let _guard = self.write_lock.lock();
            let path = self.dir.join(session_file_name(key));
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::Storage(format!("removing {}: {e}", path.display())))
                }
            }
        }

        let was_current = self.current.read().as_deref() == Some(key);
        if was_current {
            self.write_current(None)?;
        }
        Ok(true)
    }

    // ── Resolution & bindings ────────────────────────────────────────

    /// Resolve a peer to a session key. A binding beats configuration.
    pub fn resolve(&self, peer: &PeerContext, config: &SessionsConfig) -> String {
        if let Some(bound) = self
            .bindings
            .get(&peer.channel, &binding_conversation(peer))
        {
            return bound;
        }
        resolve_session_from_config(peer, config).to_string()
    }

    pub fn bindings(&self) -> &SessionBindings {
        &self.bindings
    }

    // ── Current selection ────────────────────────────────────────────

    pub fn current(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// Select a session for CLI use. The session must exist.
    pub fn set_current(&self, key: &str) -> Result<()> {
        if !self.contains(key) {
            return Err(Error::NotFound(format!("session '{key}'")));
        }
        self.write_current(Some(key))
    }

    fn write_current(&self, key: Option<&str>) -> Result<()> {
        let path = self.dir.join(CURRENT_FILE);
        match key {
            Some(k) => write_atomic(&path, k.as_bytes())?,
            None => match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Storage(format!("removing {}: {e}", path.display()))),
            },
        }
        *self.current.write() = key.map(str::to_owned);
        Ok(())
    }

    // ── Persistence ──────────────────────────────────────────────────

    fn persist_one(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        // Deleted after being marked: nothing to write.
        let cell = match self.sessions.lock().get(key).cloned() {
            Some(c) => c,
            None => return Ok(()),
        };
        let snapshot = cell.lock().clone();
        let json = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(&self.dir.join(session_file_name(key)), &json)
    }

    fn persist_batch(&self, batch: Vec<(String, u32)>) -> (usize, Option<Error>) {
        let mut written = 0;
        let mut last_err = None;
        for (key, attempts) in batch {
            match self.persist_one(&key) {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(session_key = %key, attempts, error = %e, "session write failed, will retry");
                    self.dirty.lock().retry(&key, attempts, Instant::now());
                    last_err = Some(e);
                }
            }
        }
        (written, last_err)
    }

    /// Write every session whose coalesce window has elapsed.
    pub fn flush_due(&self) -> usize {
        let due = self.dirty.lock().take_due(Instant::now());
        self.persist_batch(due).0
    }

    /// Write every dirty session now. Returns the number written; the last
    /// failure is surfaced after all keys were attempted.
    pub fn flush(&self) -> Result<usize> {
        let all = self.dirty.lock().take_all();
        match self.persist_batch(all) {
            (_, Some(e)) => Err(e),
            (n, None) => Ok(n),
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.dirty.lock().len()
    }

    /// Run the debounced writer until `cancel` fires, then flush everything.
    pub fn spawn_persister(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(PERSIST_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if self.pending_writes() == 0 {
                            continue;
                        }
                        let mgr = self.clone();
                        match tokio::task::spawn_blocking(move || mgr.flush_due()).await {
                            Ok(n) if n > 0 => tracing::debug!(written = n, "sessions persisted"),
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "session persister panicked"),
                        }
                    }
                }
            }
            let mgr = self.clone();
            match tokio::task::spawn_blocking(move || mgr.flush()).await {
                Ok(Ok(n)) => tracing::info!(written = n, "session store flushed"),
                Ok(Err(e)) => tracing::error!(error = %e, "final session flush failed"),
                Err(e) => tracing::error!(error = %e, "final session flush panicked"),
            }
        })
    }
}

/// Read one session file. Malformed JSON is a `StorageError`.
pub fn load_session_file(path: &Path) -> Result<Session> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Storage(format!("reading {}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| Error::Storage(format!("parsing {}: {e}", path.display())))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
