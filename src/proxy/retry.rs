//! Retry policy shared by every provider adapter.
//!
//! Each upstream call runs through [`call_with_retry`]:
//! - every attempt is bounded by the policy's timeout
//! - a 2xx result returns immediately
//! - a 4xx result fails immediately (bad key or payload, retrying won't help)
//! - 5xx, timeouts, transport and decode failures are retried with
//!   exponential backoff until `max_attempts` attempts have been made

use std::future::Future;
use std::time::Duration;

use crate::config::DispatchConfig;

/// Failure of a single upstream attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    #[error("HTTP {status}: {body}")]
    Client { status: u16, body: String },

    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl CallError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if (400..500).contains(&status) {
            CallError::Client { status, body }
        } else {
            CallError::Server { status, body }
        }
    }

    /// Whether another attempt may succeed. Only client errors are permanent.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CallError::Client { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            CallError::Client { status, .. } | CallError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Attempt budget, per-attempt timeout and backoff base.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub timeout: Duration,
    /// Wait after failed attempt `n` (0-based) is `backoff_base * 2^n`
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            timeout: config.timeout(),
            backoff_base: config.backoff_base(),
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Run `send` under `policy`, returning the first success or the last error.
///
/// `target` only labels log events.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    target: &str,
    send: F,
) -> Result<T, CallError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match tokio::time::timeout(policy.timeout, send()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => CallError::Timeout(policy.timeout),
        };

        if !err.is_retryable() {
            tracing::warn!(target_name = %target, error = %err, "Upstream rejected request, not retrying");
            return Err(err);
        }

        if attempt + 1 >= max_attempts {
            tracing::warn!(
                target_name = %target,
                attempts = attempt + 1,
                error = %err,
                "Upstream call failed, attempts exhausted"
            );
            return Err(err);
        }

        let wait = policy.backoff(attempt);
        tracing::debug!(
            target_name = %target,
            attempt = attempt + 1,
            backoff_ms = wait.as_millis() as u64,
            error = %err,
            "Upstream call failed, retrying"
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    /// Run `call_with_retry` with a closure that yields `responses[n]` on call n
    /// (repeating the last entry), returning the outcome and the call count.
    async fn run(
        policy: RetryPolicy,
        responses: Vec<Result<&'static str, CallError>>,
    ) -> (Result<&'static str, CallError>, u32) {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();
        let responses = Arc::new(responses);

        let outcome = call_with_retry(&policy, "test", || {
            let n = calls_inner.fetch_add(1, Ordering::SeqCst) as usize;
            let responses = responses.clone();
            async move { responses[n.min(responses.len() - 1)].clone() }
        })
        .await;

        (outcome, calls.load(Ordering::SeqCst))
    }

    #[test]
    fn test_classification() {
        assert!(!CallError::from_status(400, "").is_retryable());
        assert!(!CallError::from_status(401, "").is_retryable());
        assert!(!CallError::from_status(429, "").is_retryable());
        assert!(CallError::from_status(500, "").is_retryable());
        assert!(CallError::from_status(501, "").is_retryable());
        assert!(CallError::from_status(503, "").is_retryable());
        assert!(CallError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(CallError::Transport("reset".into()).is_retryable());
        assert!(CallError::Decode("eof".into()).is_retryable());
        assert_eq!(CallError::from_status(502, "").status_code(), Some(502));
        assert_eq!(CallError::Transport("x".into()).status_code(), None);
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let (outcome, calls) = run(policy(2), vec![Ok("done")]).await;
        assert_eq!(outcome, Ok("done"));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_client_error_makes_exactly_one_attempt() {
        let (outcome, calls) = run(policy(5), vec![Err(CallError::from_status(401, "bad key"))]).await;
        assert_eq!(outcome.unwrap_err().status_code(), Some(401));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_uses_every_attempt() {
        let (outcome, calls) = run(policy(2), vec![Err(CallError::from_status(503, ""))]).await;
        assert_eq!(outcome.unwrap_err().status_code(), Some(503));
        assert_eq!(calls, 2);

        let (_, calls) = run(policy(4), vec![Err(CallError::from_status(500, ""))]).await;
        assert_eq!(calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let (outcome, calls) = run(
            policy(3),
            vec![Err(CallError::Transport("reset".into())), Ok("recovered")],
        )
        .await;
        assert_eq!(outcome, Ok("recovered"));
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays() {
        let start = tokio::time::Instant::now();
        let (_, calls) = run(policy(3), vec![Err(CallError::from_status(502, ""))]).await;
        assert_eq!(calls, 3);
        // 1s after the first failure, 2s after the second, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_and_surfaced() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();
        let p = RetryPolicy {
            max_attempts: 2,
            timeout: Duration::from_millis(100),
            backoff_base: Duration::from_millis(10),
        };

        let outcome: Result<(), CallError> = call_with_retry(&p, "slow", || {
            calls_inner.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;

        assert_eq!(outcome, Err(CallError::Timeout(Duration::from_millis(100))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
