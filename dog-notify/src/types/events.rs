use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeliveryResult, JobId, JobRecord, JobState, WorkerId};

/// Job lifecycle events published on the outcome channel.
///
/// Workers emit these instead of invoking callbacks; the status tracker,
/// metrics and any telemetry collaborator consume them independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Enqueued {
        job_id: JobId,
        recipients: usize,
        at: DateTime<Utc>,
    },

    /// A worker took the job
    Active {
        job_id: JobId,
        worker: WorkerId,
        attempt: u32,
        at: DateTime<Utc>,
    },

    /// One recipient of the job was attempted
    Progress {
        job_id: JobId,
        progress: u8,
        delivery: DeliveryResult,
        at: DateTime<Utc>,
    },

    /// The attempt failed and the job waits for its backoff
    Delayed {
        job_id: JobId,
        attempt: u32,
        retry_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    Completed {
        job_id: JobId,
        result: Vec<DeliveryResult>,
        at: DateTime<Utc>,
    },

    /// Terminal failure - attempts exhausted or permanent error
    Failed {
        job_id: JobId,
        attempts: u32,
        reason: String,
        at: DateTime<Utc>,
    },

    /// Removed before it was processed, or purged by the caller
    Removed {
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Active { .. } => "active",
            Self::Progress { .. } => "progress",
            Self::Delayed { .. } => "delayed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Removed { .. } => "removed",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Active { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Delayed { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Removed { job_id, .. } => job_id,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. }
            | Self::Active { at, .. }
            | Self::Progress { at, .. }
            | Self::Delayed { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::Removed { at, .. } => at,
        }
    }

    /// The job state this event leaves the job in, if it still exists
    pub fn state(&self) -> Option<JobState> {
        match self {
            Self::Enqueued { .. } => Some(JobState::Waiting),
            Self::Active { .. } | Self::Progress { .. } => Some(JobState::Active),
            Self::Delayed { .. } => Some(JobState::Delayed),
            Self::Completed { .. } => Some(JobState::Completed),
            Self::Failed { .. } => Some(JobState::Failed),
            Self::Removed { .. } => None,
        }
    }

    /// Event for a record that just left Active after a failed attempt
    pub fn after_failure(record: &JobRecord, at: DateTime<Utc>) -> Self {
        match (record.state, record.delay_until) {
            (JobState::Delayed, Some(retry_at)) => Self::Delayed {
                job_id: record.id.clone(),
                attempt: record.attempts_made,
                retry_at,
                error: record.last_error.clone().unwrap_or_default(),
                at,
            },
            _ => Self::Failed {
                job_id: record.id.clone(),
                attempts: record.attempts_made,
                reason: record
                    .fail_reason
                    .clone()
                    .or_else(|| record.last_error.clone())
                    .unwrap_or_default(),
                at,
            },
        }
    }

    /// Whether this event ends the job's lifecycle
    pub fn is_outcome(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}
