//! Bounded exponential backoff for remote calls.
//!
//! Each attempt classifies its own outcome as done, retryable or terminal.
//! Retryable outcomes sleep for the current delay, grow it by the configured
//! factor up to the cap, and try again until the step budget or the caller's
//! deadline runs out.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::warn;

use crate::context::OperationContext;

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The operation finished; stop retrying.
    Done(T),
    /// The operation failed transiently; try again after backing off.
    Retry(E),
    /// The operation failed permanently; stop retrying.
    Fail(E),
}

/// Error returned once retrying stops without success.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// An attempt failed with an error the caller classified as permanent.
    #[error(transparent)]
    Terminal(E),
    /// Every allowed attempt failed transiently.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last: E,
    },
    /// The caller's deadline passed before an attempt succeeded.
    #[error("deadline exceeded after {attempts} attempts: {last}")]
    DeadlineExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last: E,
    },
}

/// Exponential backoff parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Growth applied to the delay after every retry, in percent.
    pub factor_percent: u32,
    /// Maximum number of attempts, including the first.
    pub steps: u32,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            factor_percent: 150,
            steps: 6,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to use after `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.factor_percent)
            .checked_div(100)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `attempt` until it reports [`Attempt::Done`] or [`Attempt::Fail`],
    /// the step budget is spent, or the caller's deadline passes.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Terminal`] for failures classified as permanent,
    /// [`RetryError::Exhausted`] when the step budget runs out, and
    /// [`RetryError::DeadlineExceeded`] when the next sleep would end past the
    /// caller's deadline.
    pub async fn run<T, E, F, Fut>(
        &self,
        ctx: &OperationContext,
        description: &str,
        mut attempt: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
        E: std::error::Error + Display + 'static,
    {
        let steps = self.steps.max(1);
        let mut delay = self.initial_delay;
        let mut attempts = 0_u32;

        loop {
            attempts = attempts.saturating_add(1);
            let last = match attempt().await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(err) => return Err(RetryError::Terminal(err)),
                Attempt::Retry(err) => err,
            };

            if attempts >= steps {
                return Err(RetryError::Exhausted { attempts, last });
            }
            if let Some(deadline) = ctx.deadline()
                && Instant::now() + delay >= deadline
            {
                return Err(RetryError::DeadlineExceeded { attempts, last });
            }

            warn!(
                attempt = attempts,
                steps,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                description,
                error = %last,
                "attempt failed, retrying with backoff"
            );
            sleep(delay).await;
            delay = self.next_delay(delay);
        }
    }
}
