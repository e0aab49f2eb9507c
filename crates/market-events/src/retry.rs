//! Single-retry policy for cross-context writes.
//!
//! Handlers that write into another bounded context (e.g., "create a
//! profile for this new user") run under at-least-once delivery, so the same
//! write can arrive twice. This module runs such a write with a narrow,
//! predictable policy:
//!
//! - success is returned as-is
//! - a duplicate-resource error means the write already happened and is
//!   reported as success ([`RetryOutcome::AlreadyApplied`])
//! - a connectivity error is retried exactly once after a fixed backoff
//! - everything else is permanent and returned immediately
//!
//! There is no exponential growth, no jitter and no retry budget beyond the
//! one extra attempt.
//!
//! # Example
//!
//! ```rust,no_run
//! use market_events::retry::{retry_with_backoff, RetryContext};
//! use market_events::OperationError;
//!
//! async fn create_profile(user_id: &str) -> Result<(), OperationError> {
//!     // Your write here
//!     Ok(())
//! }
//!
//! async fn example() -> Result<(), OperationError> {
//!     let ctx = RetryContext::new("create_profile");
//!     retry_with_backoff(|| create_profile("user-1"), &ctx).await?;
//!     Ok(())
//! }
//! ```

use crate::config::{BusConfig, DEFAULT_RETRY_BACKOFF_MS};
use crate::error::{BusError, OperationError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How a failure is treated by [`retry_with_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient infrastructure failure; worth one more attempt
    Retryable,
    /// Will fail the same way again
    Permanent,
    /// The effect already exists; counts as success
    Duplicate,
}

/// Classification of an error for the retry policy.
pub trait RetryClassify {
    /// Classify this error.
    fn retry_class(&self) -> RetryClass;
}

impl RetryClassify for OperationError {
    fn retry_class(&self) -> RetryClass {
        match self {
            OperationError::DuplicateResource => RetryClass::Duplicate,
            OperationError::DatabaseConnection(_) | OperationError::Transport(_) => {
                RetryClass::Retryable
            }
            OperationError::Validation(_)
            | OperationError::NotFound
            | OperationError::Query(_)
            | OperationError::Unexpected(_) => RetryClass::Permanent,
        }
    }
}

impl RetryClassify for BusError {
    fn retry_class(&self) -> RetryClass {
        if self.is_connection_error() {
            RetryClass::Retryable
        } else {
            RetryClass::Permanent
        }
    }
}

/// Check if an error is worth one more attempt.
pub fn retryable_error<E: RetryClassify + ?Sized>(error: &E) -> bool {
    error.retry_class() == RetryClass::Retryable
}

/// Check if an error is a hard failure.
///
/// Disjoint from [`retryable_error`]; duplicates are neither.
pub fn permanent_error<E: RetryClassify + ?Sized>(error: &E) -> bool {
    error.retry_class() == RetryClass::Permanent
}

/// Check if an error reports an already-applied write.
pub fn duplicate_error<E: RetryClassify + ?Sized>(error: &E) -> bool {
    error.retry_class() == RetryClass::Duplicate
}

/// Per-call retry context.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Operation name for logs
    pub operation_name: String,

    /// Correlation id tying the attempt logs together
    pub correlation_id: String,

    /// Pause before the retry
    pub backoff: Duration,
}

impl RetryContext {
    /// Create a context with a fresh correlation id and the default backoff.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            correlation_id: uuid::Uuid::now_v7().to_string(),
            backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }

    /// Create a context using the backoff from `config`.
    pub fn from_config(operation_name: impl Into<String>, config: &BusConfig) -> Self {
        Self::new(operation_name).with_backoff(config.retry_backoff())
    }

    /// Set the correlation id (e.g., the id of the event being handled).
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Set the backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Successful result of [`retry_with_backoff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The operation ran and returned a value
    Completed(T),
    /// The operation reported a duplicate; its effect already exists
    AlreadyApplied,
}

impl<T> RetryOutcome<T> {
    /// Get the value, if the operation produced one.
    pub fn into_value(self) -> Option<T> {
        match self {
            RetryOutcome::Completed(value) => Some(value),
            RetryOutcome::AlreadyApplied => None,
        }
    }

    /// Check if the write had already been applied.
    pub fn is_already_applied(&self) -> bool {
        matches!(self, RetryOutcome::AlreadyApplied)
    }
}

/// Run `operation` with at most one retry.
///
/// # Arguments
///
/// * `operation` - Zero-argument async operation (called once or twice)
/// * `ctx` - Operation name, correlation id and backoff
///
/// # Returns
///
/// The operation's value, [`RetryOutcome::AlreadyApplied`] on a duplicate,
/// or the error. When the retry also fails, the **first** attempt's error is
/// returned.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    ctx: &RetryContext,
) -> Result<RetryOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClassify + std::fmt::Display,
{
    let error = match operation().await {
        Ok(value) => return Ok(RetryOutcome::Completed(value)),
        Err(e) => e,
    };

    match error.retry_class() {
        RetryClass::Duplicate => {
            tracing::debug!(
                operation = %ctx.operation_name,
                correlation_id = %ctx.correlation_id,
                "Resource already exists, treating as success"
            );
            Ok(RetryOutcome::AlreadyApplied)
        }
        RetryClass::Permanent => {
            tracing::error!(
                operation = %ctx.operation_name,
                correlation_id = %ctx.correlation_id,
                error = %error,
                "Operation failed with permanent error, not retrying"
            );
            Err(error)
        }
        RetryClass::Retryable => {
            tracing::warn!(
                operation = %ctx.operation_name,
                correlation_id = %ctx.correlation_id,
                delay_ms = millis(ctx.backoff),
                error = %error,
                "Operation failed with retryable error, retrying once"
            );

            sleep(ctx.backoff).await;

            match operation().await {
                Ok(value) => {
                    tracing::info!(
                        operation = %ctx.operation_name,
                        correlation_id = %ctx.correlation_id,
                        "Operation succeeded on retry"
                    );
                    Ok(RetryOutcome::Completed(value))
                }
                Err(retry_error) if duplicate_error(&retry_error) => {
                    tracing::debug!(
                        operation = %ctx.operation_name,
                        correlation_id = %ctx.correlation_id,
                        "Resource already exists on retry, treating as success"
                    );
                    Ok(RetryOutcome::AlreadyApplied)
                }
                Err(retry_error) => {
                    tracing::error!(
                        operation = %ctx.operation_name,
                        correlation_id = %ctx.correlation_id,
                        error = %error,
                        retry_error = %retry_error,
                        "Operation failed after retry"
                    );
                    Err(error)
                }
            }
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn ctx() -> RetryContext {
        RetryContext::new("create_profile").with_correlation_id("corr-1")
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(100)), 100);
        assert_eq!(millis(Duration::from_micros(1_500)), 1);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_retry_context_default() {
        let ctx = RetryContext::new("op");
        assert_eq!(ctx.operation_name, "op");
        assert_eq!(ctx.backoff, Duration::from_millis(100));
        assert!(!ctx.correlation_id.is_empty());
        assert_ne!(ctx.correlation_id, RetryContext::new("op").correlation_id);
    }

    #[test]
    fn test_retry_context_from_config() {
        let config = BusConfig {
            retry_backoff_ms: 5,
            ..BusConfig::default()
        };
        let ctx = RetryContext::from_config("op", &config);
        assert_eq!(ctx.backoff, Duration::from_millis(5));
    }

    #[test]
    fn test_classification() {
        let retryable = [
            OperationError::DatabaseConnection("pool timeout".into()),
            OperationError::Transport("reset by peer".into()),
        ];
        let permanent = [
            OperationError::Validation("email".into()),
            OperationError::NotFound,
            OperationError::Query("syntax".into()),
            OperationError::Unexpected("boom".into()),
        ];

        for e in &retryable {
            assert!(retryable_error(e), "{e} should be retryable");
            assert!(!permanent_error(e));
        }
        for e in &permanent {
            assert!(permanent_error(e), "{e} should be permanent");
            assert!(!retryable_error(e));
        }

        let dup = OperationError::DuplicateResource;
        assert!(!retryable_error(&dup));
        assert!(!permanent_error(&dup));
        assert!(duplicate_error(&dup));
    }

    #[test]
    fn test_bus_error_classification() {
        assert!(retryable_error(&BusError::ConnectionError("down".into())));
        assert!(permanent_error(&BusError::PublishError("rejected".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_first_try() {
        let counter = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, OperationError>(42)
                }
            },
            &ctx(),
        )
        .await;

        assert_eq!(result, Ok(RetryOutcome::Completed(42)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_is_success_without_sleep() {
        let counter = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(OperationError::DuplicateResource)
                }
            },
            &ctx(),
        )
        .await;

        assert_eq!(result, Ok(RetryOutcome::AlreadyApplied));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_retried_once_returns_original() {
        let counter = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(OperationError::DatabaseConnection(format!(
                        "attempt {attempt}"
                    )))
                }
            },
            &ctx(),
        )
        .await;

        assert_eq!(
            result,
            Err(OperationError::DatabaseConnection("attempt 0".into()))
        );
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(101), "slept {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_retry() {
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(OperationError::Transport("reset".into()))
                    } else {
                        Ok("profile-1")
                    }
                }
            },
            &ctx().with_backoff(Duration::from_millis(20)),
        )
        .await;

        assert_eq!(result, Ok(RetryOutcome::Completed("profile-1")));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_on_retry_is_success() {
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err::<(), _>(OperationError::DatabaseConnection("gone".into()))
                    } else {
                        Err(OperationError::DuplicateResource)
                    }
                }
            },
            &ctx(),
        )
        .await;

        assert_eq!(result, Ok(RetryOutcome::AlreadyApplied));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_short_circuits() {
        let counter = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(OperationError::NotFound)
                }
            },
            &ctx(),
        )
        .await;

        assert_eq!(result, Err(OperationError::NotFound));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_outcome_helpers() {
        assert_eq!(RetryOutcome::Completed(1).into_value(), Some(1));
        assert!(RetryOutcome::<()>::AlreadyApplied.is_already_applied());
        assert_eq!(RetryOutcome::<u8>::AlreadyApplied.into_value(), None);
    }
}
