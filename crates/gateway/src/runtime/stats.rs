//! Process and runtime figures for `/api/runtime/stats`.

use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStats {
    pub uptime_secs: u64,
    pub rss_bytes: Option<u64>,
    pub threads: Option<u64>,
    pub tokio_workers: usize,
    pub tokio_alive_tasks: usize,
    pub open_fds: Option<u64>,
}

impl RuntimeStats {
    /// Sample now. Must be called from inside a tokio runtime.
    pub fn collect(started_at: Instant) -> Self {
        let metrics = tokio::runtime::Handle::current().metrics();
        let status = proc_status();
        Self {
            uptime_secs: started_at.elapsed().as_secs(),
            rss_bytes: status
                .as_deref()
                .and_then(|s| status_field(s, "VmRSS:"))
                .map(|kb| kb * 1024),
            threads: status.as_deref().and_then(|s| status_field(s, "Threads:")),
            tokio_workers: metrics.num_workers(),
            tokio_alive_tasks: metrics.num_alive_tasks(),
            open_fds: open_fd_count(),
        }
    }
}

#[cfg(target_os = "linux")]
fn proc_status() -> Option<String> {
    std::fs::read_to_string("/proc/self/status").ok()
}

#[cfg(not(target_os = "linux"))]
fn proc_status() -> Option<String> {
    None
}

#[cfg(target_os = "linux")]
fn open_fd_count() -> Option<u64> {
    std::fs::read_dir("/proc/self/fd")
        .ok()
        .map(|entries| entries.count() as u64)
}

#[cfg(not(target_os = "linux"))]
fn open_fd_count() -> Option<u64> {
    None
}

/// First number after `key` in `/proc/self/status` (`VmRSS:   1234 kB`).
fn status_field(status: &str, key: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
}
