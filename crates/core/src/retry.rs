use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::{DispatchError, RenderError};

/// Errors that may succeed when the whole operation is run again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for RenderError {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryable for DispatchError {
    fn is_retryable(&self) -> bool {
        DispatchError::is_retryable(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Single attempt.
    pub fn none() -> Self {
        Self { max_retries: 0, base_delay_ms: 250, max_delay_ms: 5_000 }
    }

    pub fn with_retries(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self { max_retries, base_delay_ms, max_delay_ms }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. Each attempt re-runs the operation from scratch.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        event_name = "pipeline.retry.scheduled",
                        operation = label,
                        attempt,
                        max_retries = self.max_retries,
                        error = %error,
                        "retrying failed operation"
                    );
                    let delay = self.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::RetryPolicy;
    use crate::errors::{DispatchError, MailError, RenderError, RenderStage};
    use crate::mail::Audience;

    fn timeout() -> RenderError {
        RenderError::Timeout { stage: RenderStage::Export, after: Duration::from_millis(1) }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy::with_retries(5, 100, 1_000);
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn default_policy_makes_a_single_attempt() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), RenderError> = RetryPolicy::default()
            .run("render", |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::with_retries(3, 0, 0);
        let result = policy
            .run("render", |attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(timeout())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::with_retries(3, 0, 0);
        let result: Result<(), DispatchError> = policy
            .run("send", |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(DispatchError::MissingRecipient { audience: Audience::Customer }) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_failures_are_retried() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::with_retries(1, 0, 0);
        let result: Result<(), DispatchError> = policy
            .run("send", |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(DispatchError::Send {
                        audience: Audience::Internal,
                        source: MailError::Transport("421".to_string()),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
