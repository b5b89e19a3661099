//! Bounded Retry Policy
//!
//! Runs an async operation, retrying failures the caller classifies as
//! retryable, up to a fixed number of retries with a fixed delay between
//! attempts.
//!
//! # Ordering
//!
//! For every retry the policy logs the failure, runs the hook (if any), and
//! only then waits the delay. A hook failure aborts the loop immediately.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use kis_realtime_feed::infrastructure::resilience::{RetryError, RetryPolicy};
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::new(2, Duration::from_millis(1));
//! let result: Result<(), RetryError<std::io::Error>> = policy
//!     .execute("probe", || async { Err(std::io::Error::other("down")) }, |_| true)
//!     .await;
//!
//! assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
//! # });
//! ```

use std::future::Future;
use std::time::Duration;

use crate::infrastructure::metrics;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

// =============================================================================
// Errors
// =============================================================================

/// Failure of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed; carries the last failure.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Operation name.
        operation: String,
        /// Total invocations, including the first.
        attempts: u32,
        /// Last failure.
        #[source]
        source: E,
    },

    /// The failure was classified as not retryable.
    #[error("{operation} failed: {source}")]
    NotRetryable {
        /// Operation name.
        operation: String,
        /// The failure.
        #[source]
        source: E,
    },

    /// The pre-retry hook failed, so no further attempt was made.
    #[error("retry hook for {operation} failed before retry {attempt}: {source}")]
    HookFailed {
        /// Operation name.
        operation: String,
        /// Retry number the hook was preparing.
        attempt: u32,
        /// Hook failure.
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// Borrow the underlying failure.
    #[must_use]
    pub fn source_error(&self) -> &E {
        match self {
            Self::Exhausted { source, .. }
            | Self::NotRetryable { source, .. }
            | Self::HookFailed { source, .. } => source,
        }
    }

    /// Take the underlying failure.
    #[must_use]
    pub fn into_source(self) -> E {
        match self {
            Self::Exhausted { source, .. }
            | Self::NotRetryable { source, .. }
            | Self::HookFailed { source, .. } => source,
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Fixed-delay bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom values.
    #[must_use]
    pub const fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Run `op`, retrying failures for which `is_retryable` returns `true`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::NotRetryable`] on the first non-retryable failure
    /// and [`RetryError::Exhausted`] once `max_retries` retries have failed.
    pub async fn execute<T, E, Op, Fut, P>(
        &self,
        operation: &str,
        op: Op,
        is_retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        self.execute_with_hook(operation, op, is_retryable, || async { Ok(()) })
            .await
    }

    /// Like [`execute`](Self::execute), awaiting `on_retry` before each retry.
    ///
    /// # Errors
    ///
    /// In addition to the errors of [`execute`](Self::execute), returns
    /// [`RetryError::HookFailed`] if the hook fails.
    pub async fn execute_with_hook<T, E, Op, Fut, P, H, HFut>(
        &self,
        operation: &str,
        mut op: Op,
        is_retryable: P,
        mut on_retry: H,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        H: FnMut() -> HFut,
        HFut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let mut retries = 0u32;

        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !is_retryable(&error) {
                tracing::debug!(operation, error = %error, "Operation failed, not retryable");
                return Err(RetryError::NotRetryable {
                    operation: operation.to_string(),
                    source: error,
                });
            }

            if retries >= self.max_retries {
                tracing::error!(
                    operation,
                    attempts = retries + 1,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts: retries + 1,
                    source: error,
                });
            }

            retries += 1;
            tracing::warn!(
                operation,
                attempt = retries,
                max_retries = self.max_retries,
                delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Operation failed, retrying"
            );
            metrics::record_retry(operation);

            if let Err(hook_error) = on_retry().await {
                tracing::error!(
                    operation,
                    attempt = retries,
                    error = %hook_error,
                    "Retry hook failed"
                );
                return Err(RetryError::HookFailed {
                    operation: operation.to_string(),
                    attempt: retries,
                    source: hook_error,
                });
            }

            tokio::time::sleep(self.delay).await;
        }
    }

    /// Like [`execute`](Self::execute) for operations whose value is unused.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_discarding<T, E, Op, Fut, P>(
        &self,
        operation: &str,
        mut op: Op,
        is_retryable: P,
    ) -> Result<(), RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        self.execute(
            operation,
            || {
                let attempt = op();
                async move { attempt.await.map(|_| ()) }
            },
            is_retryable,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, PartialEq, Eq, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
        #[error("hook")]
        Hook,
    }

    const fn is_transient(error: &TestError) -> bool {
        matches!(error, TestError::Transient)
    }

    const fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[test]
    fn default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let calls = AtomicU32::new(0);

        let result: Result<u32, RetryError<TestError>> = fast_policy(3)
            .execute(
                "op",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(7) }
                },
                is_transient,
            )
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_failing_operation_invoked_max_plus_one_times() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast_policy(3)
            .execute(
                "op",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Transient) }
                },
                is_transient,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(RetryError::Exhausted {
                operation,
                attempts,
                source,
            }) => {
                assert_eq!(operation, "op");
                assert_eq!(attempts, 4);
                assert_eq!(source, TestError::Transient);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = fast_policy(3)
            .execute(
                "op",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(TestError::Transient)
                        } else {
                            Ok("done")
                        }
                    }
                },
                is_transient,
            )
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_returns_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast_policy(3)
            .execute(
                "op",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Fatal) }
                },
                is_transient,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(RetryError::NotRetryable {
                source: TestError::Fatal,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast_policy(0)
            .execute(
                "op",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Transient) }
                },
                is_transient,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn hook_runs_before_each_retry() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let result: Result<(), _> = fast_policy(2)
            .execute_with_hook(
                "op",
                || {
                    log.lock().push("op");
                    async { Err(TestError::Transient) }
                },
                is_transient,
                || {
                    log.lock().push("hook");
                    async { Ok(()) }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(*log.lock(), vec!["op", "hook", "op", "hook", "op"]);
    }

    #[tokio::test]
    async fn hook_failure_aborts_and_is_surfaced() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast_policy(3)
            .execute_with_hook(
                "op",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Transient) }
                },
                is_transient,
                || async { Err(TestError::Hook) },
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(RetryError::HookFailed {
                attempt, source, ..
            }) => {
                assert_eq!(attempt, 1);
                assert_eq!(source, TestError::Hook);
            }
            other => panic!("expected HookFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delay_is_applied_between_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(20));
        let start = std::time::Instant::now();

        let _: Result<(), _> = policy
            .execute("op", || async { Err(TestError::Transient) }, is_transient)
            .await;

        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn execute_discarding_drops_value() {
        let result: Result<(), RetryError<TestError>> = fast_policy(1)
            .execute_discarding("op", || async { Ok(42u64) }, is_transient)
            .await;

        assert!(result.is_ok());
    }

    #[test]
    fn error_accessors_return_source() {
        let error = RetryError::Exhausted {
            operation: "send".to_string(),
            attempts: 4,
            source: TestError::Transient,
        };
        assert_eq!(error.source_error(), &TestError::Transient);
        assert_eq!(error.to_string(), "send failed after 4 attempts: transient");
        assert_eq!(error.into_source(), TestError::Transient);
    }
}
