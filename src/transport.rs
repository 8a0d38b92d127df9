//! HTTP transport with per-attempt timeouts and linear backoff.
//!
//! Every attempt is wrapped in [`tokio::time::timeout`]; dropping the timed-out
//! future aborts the in-flight request. Retries are unconditional: a timeout,
//! a non-2xx status, a connection error and an unparsable body all count as a
//! failed attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use thiserror::Error;

/// Shared HTTP client configuration
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 5;
const HTTP_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Cause of a single failed attempt
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid JSON body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// All attempts failed; carries the cause of the last one
#[derive(Error, Debug)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct NetworkError {
    attempts: u32,
    #[source]
    last: TransportError,
}

impl NetworkError {
    pub fn new(attempts: u32, last: TransportError) -> Self {
        Self { attempts, last }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> &TransportError {
        &self.last
    }

    /// HTTP status of the last attempt, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        self.last.status()
    }
}

/// Performs one GET and decodes the body as JSON
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn get_json(&self, url: &Url) -> Result<Value, TransportError>;
}

/// Production backend on top of a shared reqwest client
pub struct ReqwestBackend {
    client: Client,
}

impl ReqwestBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn get_json(&self, url: &Url) -> Result<Value, TransportError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        tracing::trace!(status = %status, path = %url.path(), "Received API response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Create shared HTTP client with connection pooling.
///
/// Request deadlines are enforced per attempt by [`HttpTransport`], so the
/// client itself only bounds connection setup.
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECS))
        .pool_max_idle_per_host(10)
        .build()
}

/// Attempt budget, per-attempt timeout and backoff step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-indexed): linear, not exponential
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}

#[derive(Clone)]
pub struct HttpTransport {
    backend: Arc<dyn HttpBackend>,
    policy: RetryPolicy,
}

impl HttpTransport {
    pub fn new(backend: Arc<dyn HttpBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// GET `url` and decode JSON, retrying up to `max_attempts` times.
    pub async fn fetch_json(&self, url: &Url) -> Result<Value, NetworkError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome =
                match tokio::time::timeout(self.policy.timeout, self.backend.get_json(url)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(self.policy.timeout)),
                };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(path = %url.path(), attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= max_attempts => {
                    metrics::counter!("weatherdash_transport_failures_total").increment(1);
                    tracing::warn!(
                        path = %url.path(),
                        attempts = attempt,
                        error = %err,
                        "All transport attempts exhausted"
                    );
                    return Err(NetworkError::new(attempt, err));
                }
                Err(err) => {
                    let delay = self.policy.delay_after(attempt);
                    metrics::counter!("weatherdash_transport_retries_total").increment(1);
                    tracing::debug!(
                        path = %url.path(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transport attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedBackend};
    use serde_json::json;

    fn transport(backend: Arc<ScriptedBackend>) -> HttpTransport {
        HttpTransport::new(backend, RetryPolicy::default())
    }

    fn url() -> Url {
        Url::parse("https://example.test/data").unwrap()
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_first_try() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push("/data", Reply::Json(json!({"ok": true})));

        let value = transport(backend.clone()).fetch_json(&url()).await.unwrap();

        assert_eq!(value, json!({"ok": true}));
        assert_eq!(backend.call_count("/data"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_with_linear_backoff() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push("/data", Reply::Status(503, "busy".into()));
        backend.push("/data", Reply::Status(502, "bad gateway".into()));
        backend.push("/data", Reply::Json(json!({"temp": 21})));

        let value = transport(backend.clone()).fetch_json(&url()).await.unwrap();
        assert_eq!(value, json!({"temp": 21}));

        let calls = backend.calls("/data");
        assert_eq!(calls.len(), 3);

        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1050));
        assert!(second_gap >= Duration::from_millis(2000) && second_gap < Duration::from_millis(2050));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_carry_last_cause() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push("/data", Reply::Status(500, "first".into()));
        backend.push("/data", Reply::Status(500, "second".into()));
        backend.push("/data", Reply::Status(404, "last".into()));

        let err = transport(backend.clone()).fetch_json(&url()).await.unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert_eq!(err.status(), Some(404));
        assert_eq!(backend.call_count("/data"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push("/data", Reply::Hang);
        backend.push("/data", Reply::Json(json!([1, 2, 3])));

        let start = tokio::time::Instant::now();
        let value = transport(backend.clone()).fetch_json(&url()).await.unwrap();

        assert_eq!(value, json!([1, 2, 3]));
        assert_eq!(backend.call_count("/data"), 2);
        // 5s timeout + 1s backoff
        assert!(start.elapsed() >= Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_timeouts_report_timeout() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push("/data", Reply::Hang);

        let err = transport(backend.clone()).fetch_json(&url()).await.unwrap_err();

        assert!(matches!(err.last_error(), TransportError::Timeout(_)));
        assert_eq!(backend.call_count("/data"), 3);
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");
        let long = "x".repeat(300);
        assert_eq!(truncate_body(&long).len(), 203);
    }
}
