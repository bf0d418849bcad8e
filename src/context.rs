//! Caller-supplied deadline threaded through every operation.

use std::time::Duration;

use tokio::time::Instant;

/// Per-call context carrying the caller's deadline, if any.
///
/// Retry and poll loops consult it between attempts and stop once the
/// deadline has passed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OperationContext {
    deadline: Option<Instant>,
}

impl OperationContext {
    /// Context with no deadline.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { deadline: None }
    }

    /// Context expiring at `deadline`.
    #[must_use]
    pub const fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Context expiring `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Deadline supplied by the caller.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Earlier of the caller's deadline and `own`.
    #[must_use]
    pub fn clamp(&self, own: Instant) -> Instant {
        self.deadline.map_or(own, |deadline| deadline.min(own))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn context_expires_after_timeout() {
        let ctx = OperationContext::with_timeout(Duration::from_secs(5));
        let passed = |ctx: &OperationContext| {
            ctx.deadline()
                .is_some_and(|deadline| Instant::now() >= deadline)
        };
        assert!(!passed(&ctx));

        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(passed(&ctx));
    }

    #[tokio::test(start_paused = true)]
    async fn clamp_picks_earlier_deadline() {
        let now = Instant::now();
        let ctx = OperationContext::with_deadline(now + Duration::from_secs(10));

        assert_eq!(ctx.clamp(now + Duration::from_secs(60)), now + Duration::from_secs(10));
        assert_eq!(ctx.clamp(now + Duration::from_secs(1)), now + Duration::from_secs(1));
        assert_eq!(
            OperationContext::unbounded().clamp(now + Duration::from_secs(60)),
            now + Duration::from_secs(60)
        );
    }
}
