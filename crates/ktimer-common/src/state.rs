//! Lifecycle of a context that goes to sleep on the timer.
//!
//! RUNNING → QUEUED → RUNNABLE → RUNNING
//!
//! A context only enters QUEUED for sleeps of at least one tick; shorter
//! delays are absorbed by a busy-wait and never leave RUNNING.

use crate::error::{TimerError, TimerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling state of an execution context, as seen by the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextState {
    /// Executing (or eligible to execute without waiting on the timer).
    #[default]
    Running,
    /// Parked in the sleep queue until its wake tick.
    Queued,
    /// Released by the timer interrupt, waiting to be resumed.
    Runnable,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Queued => write!(f, "QUEUED"),
            Self::Runnable => write!(f, "RUNNABLE"),
        }
    }
}

impl ContextState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: ContextState) -> bool {
        use ContextState::{Queued, Runnable, Running};

        matches!(
            (self, target),
            (Running, Queued) | (Queued, Runnable) | (Runnable, Running)
        )
    }

    /// Attempt to transition to `target`, returning error if invalid.
    pub fn transition_to(&mut self, target: ContextState) -> TimerResult<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(TimerError::InvalidStateTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Returns true while the context is waiting on the timer.
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// State plus a count of completed sleep cycles.
#[derive(Debug, Clone, Default)]
pub struct ContextStatus {
    current: ContextState,
    wakeups: u64,
}

impl ContextStatus {
    /// A context that has never slept.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ContextState {
        self.current
    }

    /// Number of times the context has been released from the queue.
    #[must_use]
    pub fn wakeups(&self) -> u64 {
        self.wakeups
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: ContextState) -> TimerResult<()> {
        self.current.transition_to(target)?;
        if target == ContextState::Runnable {
            self.wakeups += 1;
        }
        Ok(())
    }
}
