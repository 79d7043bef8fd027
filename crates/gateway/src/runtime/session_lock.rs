//! One turn at a time per session.
//!
//! Turns for the same session key queue behind a `Semaphore(1)`, which
//! keeps each user message immediately followed by its reply in history.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sb_domain::error::{Error, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the session's turn. Fails with `Cancelled` if `cancel`
    /// fires first.
    pub async fn acquire(
        &self,
        session_key: &str,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        let sem = self
            .locks
            .lock()
            .entry(session_key.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();

        tokio::select! {
            biased;
            permit = sem.acquire_owned() => {
                permit.map_err(|_| Error::Other("session lock closed".into()))
            }
            () = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget sessions with no turn running or queued.
    pub fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        // The map holds one reference; anything more is a waiter or holder.
        locks.retain(|_, sem| Arc::strong_count(sem) > 1 || sem.available_permits() == 0);
        before - locks.len()
    }
}
