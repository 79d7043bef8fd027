//! Audit writes from async code.
//!
//! SQLite calls run on the blocking pool. A failed write is logged and
//! never fails the action being audited.

use std::sync::Arc;
use std::time::Duration;

use sb_domain::error::{Error, Result};
use sb_tasklog::{NewTask, TaskLog, TaskPage, TaskQuery, TaskRecord, TaskStats};
use tokio_util::sync::CancellationToken;

use super::config_store::ConfigStore;

#[derive(Clone, Default)]
pub struct Audit {
    log: Option<Arc<TaskLog>>,
}

impl Audit {
    pub fn new(log: Arc<TaskLog>) -> Self {
        Self { log: Some(log) }
    }

    /// Audit sink that drops every record (`taskLog.enabled: false`).
    pub fn disabled() -> Self {
        Self { log: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.log.is_some()
    }

    pub fn task_log(&self) -> Option<&Arc<TaskLog>> {
        self.log.as_ref()
    }

    /// Write one record. Returns its id, or `None` when disabled or failed.
    pub async fn record(&self, task: NewTask) -> Option<i64> {
        let log = self.log.clone()?;
        let action = task.action.clone();
        match tokio::task::spawn_blocking(move || log.log(task)).await {
            Ok(Ok(id)) => Some(id),
            Ok(Err(e)) => {
                tracing::warn!(action = %action, error = %e, "audit write failed");
                None
            }
            Err(e) => {
                tracing::error!(action = %action, error = %e, "audit task panicked");
                None
            }
        }
    }

    fn require(&self) -> Result<Arc<TaskLog>> {
        self.log
            .clone()
            .ok_or_else(|| Error::NotFound("the task log is disabled".into()))
    }

    pub async fn query(&self, query: TaskQuery) -> Result<TaskPage> {
        let log = self.require()?;
        blocking(move || Ok(log.query(&query)?)).await
    }

    pub async fn get(&self, id: i64) -> Result<TaskRecord> {
        let log = self.require()?;
        blocking(move || log.get(id)?.ok_or_else(|| Error::NotFound(format!("task {id}")))).await
    }

    pub async fn stats(&self) -> Result<TaskStats> {
        let log = self.require()?;
        blocking(move || Ok(log.stats()?)).await
    }

    pub async fn cleanup(&self, max_age_days: u32, max_records: u64) -> Result<u64> {
        let log = self.require()?;
        blocking(move || Ok(log.cleanup(max_age_days, max_records)?)).await
    }

    /// Apply `taskLog.retentionDays` / `maxRecords` on a timer until
    /// `cancel` fires. The interval is re-read from the live config after
    /// each run.
    pub fn spawn_cleanup(
        &self,
        config: Arc<ConfigStore>,
        cancel: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let audit = self.clone();
        Some(tokio::spawn(async move {
            loop {
                let cfg = config.snapshot();
                let every = Duration::from_secs(cfg.task_log.cleanup_interval_secs.max(60));
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(every) => {}
                }
                let cfg = config.snapshot();
                match audit
                    .cleanup(cfg.task_log.retention_days, cfg.task_log.max_records)
                    .await
                {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(deleted = n, "task log cleanup"),
                    Err(e) => tracing::warn!(error = %e, "task log cleanup failed"),
                }
            }
        }))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Storage(format!("task log worker failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_tasklog::{action, TaskStatus};

    #[tokio::test]
    async fn records_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Audit::new(Arc::new(TaskLog::open(dir.path()).unwrap()));
        let id = audit
            .record(NewTask::new(action::CHAT, "api").status(TaskStatus::Success))
            .await
            .unwrap();
        let rec = audit.get(id).await.unwrap();
        assert_eq!(rec.module, "api");
        assert_eq!(audit.stats().await.unwrap().total, 1);
        assert!(matches!(audit.get(id + 100).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn disabled_sink_drops_records() {
        let audit = Audit::disabled();
        assert!(audit.record(NewTask::new(action::SYSTEM, "x")).await.is_none());
        assert!(matches!(
            audit.query(TaskQuery::default()).await,
            Err(Error::NotFound(_))
        ));
    }
}
