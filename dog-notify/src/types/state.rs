use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QueueError, QueueResult};

/// Lifecycle state of a notification job
///
/// Allowed transitions:
///
/// ```text
/// Waiting -> Active
/// Active  -> Completed | Delayed | Failed
/// Delayed -> Waiting
/// ```
///
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    /// Every state, in reporting order
    pub const ALL: [JobState; 5] = [
        Self::Waiting,
        Self::Active,
        Self::Completed,
        Self::Failed,
        Self::Delayed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Delayed)
                | (Self::Active, Self::Failed)
                | (Self::Delayed, Self::Waiting)
        )
    }

    /// Validate a transition against the table, returning the new state
    pub fn transition(self, next: JobState) -> QueueResult<JobState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(QueueError::InvalidTransition { from: self, to: next })
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.name() == s)
            .ok_or_else(|| format!("Invalid job state: {}", s))
    }
}
