//! Bounded exponential backoff for calls that cross a network boundary.
//!
//! Every external call in the pipeline (LLM, embeddings, TTS, uploads) goes
//! through a [`RetryPolicy`]. Retries never span more than one call; once the
//! attempts are exhausted the last error is returned to the caller.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::{EmbeddingError, LlmError, ObjectStoreError, SpeechError};

/// Attempts and delays for one retryable call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let scaled = self.base_delay.saturating_mul(1u32 << exponent);
        scaled.max(self.base_delay).min(self.max_delay)
    }

    /// Runs `thunk` until it succeeds or attempts run out, retrying every error.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, thunk: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(operation, |_| true, thunk).await
    }

    /// Like [`run`](Self::run), but gives up immediately on errors for which
    /// `should_retry` returns false.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        operation: &str,
        should_retry: P,
        mut thunk: F,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match thunk().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && should_retry(&err) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = %operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Call failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Errors worth retrying: transport failures, rate limits, and 5xx responses.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

fn transient_status(code: u16) -> bool {
    code == 408 || code == 429 || code >= 500
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::RateLimited(_) | LlmError::EmptyResponse => {
                true
            }
            LlmError::ApiError { code, .. } => transient_status(*code),
            LlmError::MissingApiKey(_) | LlmError::ParseError(_) => false,
        }
    }
}

impl Transient for EmbeddingError {
    fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::RequestFailed(_) | EmbeddingError::RateLimited(_) => true,
            EmbeddingError::ApiError { code, .. } => transient_status(*code),
            EmbeddingError::ParseError(_) | EmbeddingError::CountMismatch { .. } => false,
        }
    }
}

impl Transient for SpeechError {
    fn is_transient(&self) -> bool {
        match self {
            SpeechError::RequestFailed(_) | SpeechError::RateLimited(_) | SpeechError::EmptyAudio => {
                true
            }
            SpeechError::ApiError { code, .. } => transient_status(*code),
        }
    }
}

impl Transient for ObjectStoreError {
    fn is_transient(&self) -> bool {
        !matches!(self, ObjectStoreError::InvalidKey(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_new_clamps_inputs() {
        let policy = RetryPolicy::new(0, Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, String> = instant_policy(3)
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("boom".to_string())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reraises_after_exhaustion() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = instant_policy(3)
            .run("always-fails", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("failure {}", n))
            })
            .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_if_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = instant_policy(5)
            .run_if("permanent", LlmError::is_transient, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::ParseError("bad json".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::RateLimited("slow down".into()).is_transient());
        assert!(LlmError::ApiError {
            code: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!LlmError::ApiError {
            code: 400,
            message: String::new()
        }
        .is_transient());
        assert!(!EmbeddingError::CountMismatch {
            expected: 2,
            actual: 1
        }
        .is_transient());
        assert!(SpeechError::EmptyAudio.is_transient());
        assert!(!ObjectStoreError::InvalidKey("..".into()).is_transient());
    }
}
