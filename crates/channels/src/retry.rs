use std::future::Future;
use std::time::Duration;

use rand::Rng;
use sb_domain::error::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Capped exponential backoff for outbound sends.
#[derive(Debug, Clone)]
pub struct SendRetry {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub factor: f64,
    /// Relative jitter, `0.2` = ±20 %.
    pub jitter: f64,
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl Default for SendRetry {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            jitter: 0.2,
            max_attempts: 8,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl SendRetry {
    /// Delay before retry number `attempt` (0-indexed), without jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = base_ms * self.factor.powi(attempt as i32);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Nominal delay scaled by a uniform factor in `[1 - jitter, 1 + jitter]`,
    /// still bounded by `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_millis() as f64;
        let spread = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        let jittered = (nominal * (1.0 + spread)).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(jittered.max(0.0) as u64)
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires. Only [`Error::is_transient`] failures are retried.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            attempt += 1;
            if !err.is_transient() || attempt >= self.max_attempts {
                return Err(err);
            }
            let delay = self.delay_for_attempt(attempt - 1);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "send failed, retrying");
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Convert a transport-level [`reqwest::Error`]. Every failure here is
/// retryable.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Transient(e.to_string())
    }
}

/// Classify a non-2xx response: credential failures are [`Error::Auth`],
/// throttling and server errors are retryable, anything else is permanent.
pub(crate) fn from_status(what: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let snippet: String = body.chars().take(256).collect();
    let msg = format!("{what}: HTTP {} {}", status.as_u16(), snippet.trim());
    match status.as_u16() {
        401 | 403 => Error::Auth(msg),
        429 | 500..=599 => Error::Transient(msg),
        _ => Error::Other(msg),
    }
}
