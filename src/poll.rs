//! Poll-to-completion driving of asynchronous provider resources.
//!
//! Snapshot creation and instance launch are eventually consistent: the
//! provider acknowledges the request and the resource drifts towards a
//! terminal status on its own time. The driver refreshes the resource at a
//! fixed interval until it observes a terminal status, the deadline passes,
//! or the caller cancels the wait.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Classification of one refreshed observation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollState<T> {
    /// The resource has not reached a terminal status yet.
    Pending,
    /// The resource reached its success-terminal status.
    Success(T),
    /// The resource reached a failure-terminal status it can never leave.
    Failed(String),
}

/// Errors raised while waiting on an asynchronous resource.
#[derive(Debug, Error)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// The resource itself reported a failure-terminal status.
    #[error("{subject} reached failure state {status}")]
    TerminalFailure {
        /// Description of the resource being waited on.
        subject: String,
        /// The observed failure-terminal status.
        status: String,
    },
    /// The deadline passed before a terminal status was observed.
    #[error("timed out after {waited_secs}s waiting for {subject}")]
    Timeout {
        /// Description of the resource being waited on.
        subject: String,
        /// Seconds spent waiting before giving up.
        waited_secs: u64,
    },
    /// The caller cancelled the wait.
    #[error("cancelled while waiting for {subject}")]
    Cancelled {
        /// Description of the resource being waited on.
        subject: String,
    },
    /// Refreshing the resource's status failed.
    #[error("failed to refresh {subject}: {source}")]
    Refresh {
        /// Description of the resource being waited on.
        subject: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
}

/// Fixed-interval, deadline-bounded poll loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollDriver {
    interval: Duration,
    timeout: Duration,
}

impl PollDriver {
    /// Creates a driver polling every `interval` with an overall `timeout`.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Returns the polling interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Refreshes the resource until a terminal status is observed.
    ///
    /// A failure-terminal status aborts immediately; there is no retry at
    /// this layer. Cancellation is cooperative: it abandons the wait without
    /// touching the provider-side resource.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::TerminalFailure`] on a failure-terminal status,
    /// [`PollError::Timeout`] when the deadline passes,
    /// [`PollError::Cancelled`] when the token fires, and
    /// [`PollError::Refresh`] when a status refresh itself fails.
    pub async fn run<T, E, F, Fut>(
        &self,
        subject: &str,
        cancel: &CancellationToken,
        mut refresh: F,
    ) -> Result<T, PollError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollState<T>, E>>,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled {
                    subject: subject.to_owned(),
                });
            }

            match refresh().await {
                Err(source) => {
                    return Err(PollError::Refresh {
                        subject: subject.to_owned(),
                        source,
                    });
                }
                Ok(PollState::Success(value)) => {
                    debug!(subject, waited = ?started.elapsed(), "terminal success observed");
                    return Ok(value);
                }
                Ok(PollState::Failed(status)) => {
                    return Err(PollError::TerminalFailure {
                        subject: subject.to_owned(),
                        status,
                    });
                }
                Ok(PollState::Pending) => {}
            }

            if Instant::now() + self.interval > deadline {
                return Err(PollError::Timeout {
                    subject: subject.to_owned(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(PollError::Cancelled {
                        subject: subject.to_owned(),
                    });
                }
                () = sleep(self.interval) => {}
            }
        }
    }
}
