//! Bounded-attempt retry execution for provider-mediated operations.
//!
//! Provider calls fail transiently; the executor re-runs them up to a fixed
//! budget, records each failure before the next attempt, and reports
//! exhaustion as an explicit outcome rather than an error bubble so callers
//! decide whether giving up is fatal or merely skips a unit of work.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Largest exponent applied while scaling the backoff delay.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Classified failure of a single attempt.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AttemptError {
    /// The provider refused the call (malformed request, throttling, denied).
    #[error("provider rejected {operation}: {message}")]
    ProviderRejected {
        /// Operation that was attempted.
        operation: String,
        /// Message reported by the provider.
        message: String,
    },
    /// A local assertion about the produced resource did not hold.
    #[error("precondition failed during {operation}: {message}")]
    PreconditionFailed {
        /// Operation that was attempted.
        operation: String,
        /// Description of the assertion that failed.
        message: String,
    },
    /// Cooperative cancellation was observed mid-attempt.
    #[error("cancelled during {operation}")]
    Cancelled {
        /// Operation that was attempted.
        operation: String,
    },
}

impl AttemptError {
    /// Wraps a provider-side failure.
    pub fn provider(operation: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::ProviderRejected {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Wraps a failed local assertion.
    pub fn precondition(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Marks an attempt abandoned by cancellation.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Taxonomy tag used when logging the failure.
    #[must_use]
    pub const fn classification(&self) -> &'static str {
        match self {
            Self::ProviderRejected { .. } => "provider-rejected",
            Self::PreconditionFailed { .. } => "precondition-failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Result of driving an operation through a [`RetryPolicy`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RetryOutcome<T> {
    /// An attempt succeeded.
    Success {
        /// Value produced by the successful attempt.
        value: T,
        /// Total attempts made, including the successful one.
        attempts: u32,
    },
    /// Every attempt in the budget failed.
    Exhausted {
        /// Total attempts made.
        attempts: u32,
    },
    /// Cancellation stopped the loop before the budget was consumed.
    Cancelled {
        /// Attempts made before cancellation was observed.
        attempts: u32,
    },
}

impl<T> RetryOutcome<T> {
    /// Returns the produced value, discarding attempt bookkeeping.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Exhausted { .. } | Self::Cancelled { .. } => None,
        }
    }
}

/// Bounded-attempt retry with exponential backoff and jitter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` attempts with the given base
    /// backoff delay.
    ///
    /// A zero base delay disables backoff entirely, which keeps tests
    /// instant; production configuration supplies a non-zero base.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Returns the attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Drives `attempt_fn` until it succeeds, the budget is exhausted, or
    /// cancellation is observed.
    ///
    /// Each failed attempt is logged with its taxonomy tag before the next
    /// one runs. The first success short-circuits the loop.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                debug!(operation, attempt, "cancellation observed before attempt");
                return RetryOutcome::Cancelled {
                    attempts: attempt.saturating_sub(1),
                };
            }

            match attempt_fn().await {
                Ok(value) => {
                    return RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(AttemptError::Cancelled { operation: op }) => {
                    debug!(operation = %op, attempt, "attempt abandoned by cancellation");
                    return RetryOutcome::Cancelled { attempts: attempt };
                }
                Err(err) => {
                    warn!(
                        operation,
                        attempt,
                        budget = self.max_attempts,
                        class = err.classification(),
                        error = %err,
                        "attempt failed"
                    );
                }
            }

            if attempt < self.max_attempts {
                let delay = self.backoff_delay(attempt);
                if !delay.is_zero() {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            return RetryOutcome::Cancelled { attempts: attempt };
                        }
                        () = sleep(delay) => {}
                    }
                }
            }
        }

        RetryOutcome::Exhausted {
            attempts: self.max_attempts,
        }
    }

    /// Delay before the attempt following `completed` failed attempts.
    ///
    /// Scales the base delay exponentially and adds up to 50% random jitter
    /// so concurrent runs do not hammer a rate-limited provider in lockstep.
    fn backoff_delay(&self, completed: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = completed.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        let scaled = self.base_delay.saturating_mul(1_u32 << exponent);
        let jitter_cap = u64::try_from(
            scaled
                .checked_div(2)
                .unwrap_or(Duration::ZERO)
                .as_millis(),
        )
        .unwrap_or(u64::MAX);
        let jitter = if jitter_cap == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
        };
        scaled.saturating_add(jitter)
    }
}
