//! Clone orchestration: seeding a new container from an existing one.
//!
//! A clone attaches to whatever job the copy tool already knows for the
//! destination container. Finished jobs are reported as-is, missing jobs are
//! submitted once, and running jobs are polled until they finish or the poll
//! deadline passes. The poll loop is bound to the calling request: its
//! deadline is the earlier of the configured copy timeout and the caller's
//! own deadline.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::OperationContext;
use crate::copy::{CopyTool, JobStatus};

pub mod machine;

pub use machine::{CloneAction, CloneEvent, CloneFailure, CloneState, step};

/// Default interval between job queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default bound on a single clone.
pub const DEFAULT_COPY_TIMEOUT: Duration = Duration::from_secs(180);

/// Future returned by [`Ticker::sleep`].
pub type TickFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Clock and timer used by the poll loop.
pub trait Ticker: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Completes after `duration`.
    fn sleep(&self, duration: Duration) -> TickFuture<'_>;
}

/// [`Ticker`] backed by the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTicker;

impl Ticker for TokioTicker {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> TickFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Errors raised by a clone.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CloneError {
    /// Source or destination container name is empty.
    #[error("srcContainerName({source_container}) or dstContainerName({destination_container}) is empty")]
    EmptyContainer {
        /// Source container.
        source_container: String,
        /// Destination container.
        destination_container: String,
    },
    /// The poll deadline passed before the job finished.
    #[error("timeout waiting for copy blob container {source_container} to {destination_container} succeed")]
    Timeout {
        /// Source container.
        source_container: String,
        /// Destination container.
        destination_container: String,
    },
    /// The copy job ended in an error state.
    #[error("copy job into container {destination_container} failed: {message}")]
    JobErrored {
        /// Destination container.
        destination_container: String,
        /// Tool-reported status.
        message: String,
    },
    /// The submitted copy exited unsuccessfully.
    #[error("copy blob container {source_container} to {destination_container} failed: {message}")]
    CopyFailed {
        /// Source container.
        source_container: String,
        /// Destination container.
        destination_container: String,
        /// Tool output.
        message: String,
    },
    /// The orchestration received an event it cannot handle.
    #[error("clone into container {destination_container} stopped in state {state}: {event}")]
    Unexpected {
        /// Destination container.
        destination_container: String,
        /// State at the time.
        state: CloneState,
        /// Event description.
        event: String,
    },
}

/// Source and destination of a clone within one account.
#[derive(Clone, Eq, PartialEq)]
pub struct CopyPlan {
    source_container: String,
    destination_container: String,
    source_url: String,
    destination_url: String,
}

impl CopyPlan {
    /// Builds container URLs for `account`, each carrying `sas_token`.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError::EmptyContainer`] when either container name is
    /// empty.
    pub fn new(
        account: &str,
        endpoint_suffix: &str,
        source_container: &str,
        destination_container: &str,
        sas_token: &str,
    ) -> Result<Self, CloneError> {
        if source_container.is_empty() || destination_container.is_empty() {
            return Err(CloneError::EmptyContainer {
                source_container: source_container.to_owned(),
                destination_container: destination_container.to_owned(),
            });
        }
        let url = |container: &str| format!("https://{account}.blob.{endpoint_suffix}/{container}{sas_token}");
        Ok(Self {
            source_url: url(source_container),
            destination_url: url(destination_container),
            source_container: source_container.to_owned(),
            destination_container: destination_container.to_owned(),
        })
    }

    /// Source container name.
    #[must_use]
    pub fn source_container(&self) -> &str {
        &self.source_container
    }

    /// Destination container name.
    #[must_use]
    pub fn destination_container(&self) -> &str {
        &self.destination_container
    }

    /// Source URL including the token.
    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Destination URL including the token.
    #[must_use]
    pub fn destination_url(&self) -> &str {
        &self.destination_url
    }
}

impl fmt::Debug for CopyPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyPlan")
            .field("source_container", &self.source_container)
            .field("destination_container", &self.destination_container)
            .finish_non_exhaustive()
    }
}

/// Poll loop timing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CloneSettings {
    /// Interval between job queries.
    pub poll_interval: Duration,
    /// Upper bound on a single clone.
    pub timeout: Duration,
}

impl Default for CloneSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_COPY_TIMEOUT,
        }
    }
}

/// Drives [`step`] against a copy tool and a ticker.
#[derive(Debug)]
pub struct CloneOrchestrator<'a, C, T> {
    tool: &'a C,
    ticker: &'a T,
    settings: CloneSettings,
}

impl<'a, C: CopyTool, T: Ticker> CloneOrchestrator<'a, C, T> {
    /// Creates an orchestrator over `tool` and `ticker`.
    #[must_use]
    pub const fn new(tool: &'a C, ticker: &'a T, settings: CloneSettings) -> Self {
        Self {
            tool,
            ticker,
            settings,
        }
    }

    /// Runs the clone described by `plan` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError`] when the job errors, the submitted copy fails,
    /// or the deadline passes while polling.
    pub async fn run(&self, ctx: &OperationContext, plan: &CopyPlan) -> Result<(), CloneError> {
        let deadline = ctx.clamp(self.ticker.now() + self.settings.timeout);
        let destination = plan.destination_container();
        let mut state = CloneState::Querying;
        let mut event = CloneEvent::Observed(self.query(destination).await);

        loop {
            let (next, action) = step(state, event);
            state = next;
            event = match action {
                CloneAction::Succeed => {
                    info!(
                        source_container = plan.source_container(),
                        destination_container = destination,
                        "clone finished"
                    );
                    return Ok(());
                }
                CloneAction::Fail(failure) => return Err(Self::failure(plan, failure)),
                CloneAction::Submit => {
                    info!(
                        source_container = plan.source_container(),
                        destination_container = destination,
                        "submitting container copy"
                    );
                    let result = self
                        .tool
                        .copy(plan.source_url(), plan.destination_url())
                        .await
                        .map_err(|err| err.to_string());
                    CloneEvent::SubmitFinished(result)
                }
                CloneAction::WaitThenQuery => self.wait_then_query(deadline, destination).await,
            };
        }
    }

    async fn wait_then_query(&self, deadline: Instant, destination: &str) -> CloneEvent {
        let remaining = deadline.saturating_duration_since(self.ticker.now());
        self.ticker
            .sleep(self.settings.poll_interval.min(remaining))
            .await;
        if self.ticker.now() >= deadline {
            warn!(destination_container = destination, "clone poll deadline reached");
            return CloneEvent::DeadlineReached;
        }
        CloneEvent::Observed(self.query(destination).await)
    }

    async fn query(&self, destination: &str) -> JobStatus {
        let status = self.tool.job_status(destination).await;
        debug!(destination_container = destination, status = ?status, "copy job status");
        status
    }

    fn failure(plan: &CopyPlan, failure: CloneFailure) -> CloneError {
        let source_container = plan.source_container().to_owned();
        let destination_container = plan.destination_container().to_owned();
        match failure {
            CloneFailure::JobErrored(message) => CloneError::JobErrored {
                destination_container,
                message,
            },
            CloneFailure::CopyFailed(message) => {
                warn!(
                    source_container = %source_container,
                    destination_container = %destination_container,
                    "container copy failed"
                );
                CloneError::CopyFailed {
                    source_container,
                    destination_container,
                    message,
                }
            }
            CloneFailure::Timeout => CloneError::Timeout {
                source_container,
                destination_container,
            },
            CloneFailure::Unexpected { state, event } => CloneError::Unexpected {
                destination_container,
                state,
                event,
            },
        }
    }
}

#[cfg(test)]
mod tests;
