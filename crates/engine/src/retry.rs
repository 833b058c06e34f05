//! Retry configuration and policies
//!
//! Contains RetryConfig for transaction and shard-transition retry behavior,
//! and FallbackPolicy which decides when a transactional state invocation is
//! re-run outside of a transaction.

use churn_core::{ChurnError, ChurnResult, ErrorCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

// ============================================================================
// Retry Configuration
// ============================================================================

/// Configuration for retry behavior
///
/// Used both for retrying transactions on transient errors and for retrying
/// bare state invocations while shards are added or removed.
///
/// # Example
/// ```ignore
/// let config = RetryConfig::new()
///     .with_max_retries(5)
///     .with_base_delay_ms(10)
///     .with_retry_on_killed_session(true);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts allowed after the first one fails; 0 disables retrying
    pub max_retries: usize,
    /// Backoff before the first retry, doubled for each retry after it
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff
    pub max_delay_ms: u64,
    /// Also retry when the session running the transaction was killed
    pub retry_on_killed_session: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            retry_on_killed_session: false,
        }
    }
}

impl RetryConfig {
    /// Transaction retry defaults (3 retries, 10ms-100ms)
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on the first error
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Defaults for retrying through shard add/remove (10 retries, 100ms-2s)
    pub fn shard_transition() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            retry_on_killed_session: false,
        }
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the first backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Override the backoff ceiling
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Set whether killed-session errors are retried
    pub fn with_retry_on_killed_session(mut self, retry: bool) -> Self {
        self.retry_on_killed_session = retry;
        self
    }

    /// Whether a failed transaction attempt should be retried as a whole
    pub fn is_retryable(&self, err: &ChurnError) -> bool {
        err.is_transient() || (self.retry_on_killed_session && err.is_killed_session())
    }

    /// Backoff before retry `attempt` (0-based): `base_delay_ms * 2^attempt`,
    /// never more than `max_delay_ms`
    pub(crate) fn calculate_delay(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|n| 1u64.checked_shl(n))
            .unwrap_or(u64::MAX);
        let backoff = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(backoff.min(self.max_delay_ms))
    }
}

/// Run `f` until it succeeds, fails with a non shard-transition error, or
/// retries are exhausted
///
/// Returns the number of retries that were needed.
pub fn retry_on_shard_transition<F>(config: &RetryConfig, mut f: F) -> ChurnResult<usize>
where
    F: FnMut() -> ChurnResult<()>,
{
    let mut attempt = 0;
    loop {
        match f() {
            Ok(()) => return Ok(attempt),
            Err(e) if e.is_shard_transition() && attempt < config.max_retries => {
                warn!(
                    target: "churn::runner",
                    attempt,
                    error = %e,
                    "Retrying state after shard transition error"
                );
                std::thread::sleep(config.calculate_delay(attempt));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Fallback Policy
// ============================================================================

/// Error codes that make a transactional invocation fall back to running
/// outside of a transaction
///
/// Connection cache reads inside a transaction always fall back, whatever
/// codes are configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPolicy {
    codes: Vec<ErrorCode>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            codes: vec![
                ErrorCode::OperationNotSupportedInTransaction,
                ErrorCode::InvalidOptions,
            ],
        }
    }
}

impl FallbackPolicy {
    /// Policy falling back on exactly `codes`
    pub fn new(codes: impl IntoIterator<Item = ErrorCode>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    /// Add a code to the policy
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        if !self.codes.contains(&code) {
            self.codes.push(code);
        }
        self
    }

    /// Configured codes
    pub fn codes(&self) -> &[ErrorCode] {
        &self.codes
    }

    /// Whether `err` should trigger non-transactional fallback
    pub fn should_fall_back(&self, err: &ChurnError) -> bool {
        match err {
            ChurnError::NotSupportedInTransaction { .. } => true,
            ChurnError::Command { code, .. } => self.codes.contains(code),
            _ => false,
        }
    }
}
