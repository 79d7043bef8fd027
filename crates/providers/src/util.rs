//! Shared helpers for executor implementations.

use std::future::Future;

use sb_domain::error::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Longest upstream error body quoted back to the caller.
const MAX_ERROR_BODY: usize = 512;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeouts map to [`Error::Timeout`]; connection and body failures are
/// [`Error::Transient`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Transient(e.to_string())
    }
}

/// Error for a non-2xx provider response.
pub(crate) fn http_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let mut snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    if body.chars().count() > MAX_ERROR_BODY {
        snippet.push('…');
    }
    Error::Provider {
        provider: provider.to_owned(),
        message: format!("HTTP {} - {}", status.as_u16(), snippet.trim()),
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

/// Whitespace-delimited word count, the echo executor's token estimate.
pub(crate) fn word_count(s: &str) -> u64 {
    s.split_whitespace().count() as u64
}

pub(crate) fn build_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(from_reqwest)
}
