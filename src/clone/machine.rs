//! Pure transition function for clone orchestration.
//!
//! The driver in the parent module owns timers and the copy tool; this module
//! only decides what happens next given the current state and what was
//! observed.

use std::fmt;

use crate::copy::JobStatus;

/// Where the orchestration currently is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloneState {
    /// Waiting for the first job query.
    Querying,
    /// Attached to a running job and polling it.
    Polling,
    /// A copy has been submitted; its exit status decides the outcome.
    Submitting,
    /// Finished; no further events are expected.
    Done,
}

impl fmt::Display for CloneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Querying => "querying",
            Self::Polling => "polling",
            Self::Submitting => "submitting",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// Input to [`step`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CloneEvent {
    /// The copy tool reported a job state.
    Observed(JobStatus),
    /// A submitted copy exited.
    SubmitFinished(Result<(), String>),
    /// The poll deadline passed.
    DeadlineReached,
}

/// Why a clone failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CloneFailure {
    /// The job finished in an error state.
    JobErrored(String),
    /// The submitted copy exited unsuccessfully.
    CopyFailed(String),
    /// No terminal state was reached before the deadline.
    Timeout,
    /// An event arrived that the current state cannot accept.
    Unexpected {
        /// State at the time.
        state: CloneState,
        /// Description of the event.
        event: String,
    },
}

/// What the driver must do next.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CloneAction {
    /// Submit the copy exactly once.
    Submit,
    /// Wait one poll interval, then query the job again.
    WaitThenQuery,
    /// Report success.
    Succeed,
    /// Report failure.
    Fail(CloneFailure),
}

/// Advances the clone state machine by one event.
#[must_use]
pub fn step(state: CloneState, event: CloneEvent) -> (CloneState, CloneAction) {
    match (state, event) {
        (CloneState::Querying | CloneState::Polling, CloneEvent::Observed(JobStatus::Completed))
        | (CloneState::Submitting, CloneEvent::SubmitFinished(Ok(()))) => {
            (CloneState::Done, CloneAction::Succeed)
        }
        (
            CloneState::Querying | CloneState::Polling,
            CloneEvent::Observed(JobStatus::Errored { message }),
        ) => (
            CloneState::Done,
            CloneAction::Fail(CloneFailure::JobErrored(message)),
        ),
        (CloneState::Querying | CloneState::Polling, CloneEvent::Observed(JobStatus::NotFound)) => {
            (CloneState::Submitting, CloneAction::Submit)
        }
        (
            CloneState::Querying | CloneState::Polling,
            CloneEvent::Observed(JobStatus::Running { .. }),
        ) => (CloneState::Polling, CloneAction::WaitThenQuery),
        (CloneState::Polling, CloneEvent::DeadlineReached) => {
            (CloneState::Done, CloneAction::Fail(CloneFailure::Timeout))
        }
        (CloneState::Submitting, CloneEvent::SubmitFinished(Err(message))) => (
            CloneState::Done,
            CloneAction::Fail(CloneFailure::CopyFailed(message)),
        ),
        (current, other) => (
            CloneState::Done,
            CloneAction::Fail(CloneFailure::Unexpected {
                state: current,
                event: format!("{other:?}"),
            }),
        ),
    }
}
