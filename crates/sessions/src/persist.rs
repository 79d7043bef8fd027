//! Atomic file writes and the debounce bookkeeping for session persistence.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use sb_domain::error::{Error, Result};

/// Coalesce window between the first unsaved change and the write.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(250);

/// Upper bound for the retry delay after a failed write.
pub const PERSIST_RETRY_CAP: Duration = Duration::from_secs(10);

/// Write `bytes` to `path` via a temp file in the same directory, fsync, then
/// rename over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("{} has no parent directory", path.display())))?;
    let storage = |e: std::io::Error| Error::Storage(format!("writing {}: {e}", path.display()));

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(storage)?;
    tmp.write_all(bytes).map_err(storage)?;
    tmp.as_file().sync_all().map_err(storage)?;
    tmp.persist(path).map_err(|e| storage(e.error))?;
    Ok(())
}

/// File name for a session key: a hex SHA-256 prefix, which keeps arbitrary
/// key characters out of the filesystem.
pub fn session_file_name(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{}.json", &hex::encode(digest)[..32])
}

#[derive(Debug, Clone, Copy)]
struct DirtyMark {
    due: Instant,
    attempts: u32,
}

/// Keys with unsaved changes and when each should be written.
#[derive(Debug, Default)]
pub(crate) struct DirtySet {
    marks: HashMap<String, DirtyMark>,
}

impl DirtySet {
    /// Mark a key dirty. A key already waiting keeps its original deadline,
    /// so a burst of appends is written once.
    pub fn mark(&mut self, key: &str, now: Instant) {
        self.marks.entry(key.to_owned()).or_insert(DirtyMark {
            due: now + PERSIST_DEBOUNCE,
            attempts: 0,
        });
    }

    pub fn clear(&mut self, key: &str) {
        self.marks.remove(key);
    }

    /// Remove and return every key whose deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Vec<(String, u32)> {
        let due: Vec<(String, u32)> = self
            .marks
            .iter()
            .filter(|(_, m)| m.due <= now)
            .map(|(k, m)| (k.clone(), m.attempts))
            .collect();
        for (k, _) in &due {
            self.marks.remove(k);
        }
        due
    }

    /// Remove and return every key regardless of deadline.
    pub fn take_all(&mut self) -> Vec<(String, u32)> {
        self.marks
            .drain()
            .map(|(k, m)| (k, m.attempts))
            .collect()
    }

    /// Re-queue a key after a failed write with exponential backoff.
    pub fn retry(&mut self, key: &str, attempts: u32, now: Instant) {
        let attempts = attempts.saturating_add(1);
        let delay = PERSIST_DEBOUNCE
            .saturating_mul(1u32 << attempts.min(8))
            .min(PERSIST_RETRY_CAP);
        let mark = self.marks.entry(key.to_owned()).or_insert(DirtyMark {
            due: now + delay,
            attempts,
        });
        mark.attempts = mark.attempts.max(attempts);
        mark.due = mark.due.max(now + delay);
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }
}
