use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeliveryResult, JobId, JobPriority, JobState, LeaseToken, NotificationPayload, WorkerId};
use crate::error::{QueueError, QueueResult};

/// A job as submitted, before the queue assigns it an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub payload: NotificationPayload,
    pub priority: JobPriority,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn new(payload: NotificationPayload) -> Self {
        Self {
            payload,
            priority: JobPriority::default(),
            max_attempts: 3,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Job record - mutable runtime state stored by the backend.
///
/// Field names follow the persisted format read by external inspection
/// tooling (`data`, `returnvalue`, `failReason`, `attemptsMade`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub data: NotificationPayload,
    pub state: JobState,
    pub priority: JobPriority,
    /// Submission ordinal; jobs from one bulk enqueue are contiguous
    pub order: u64,
    pub progress: u8,
    #[serde(rename = "returnvalue", default)]
    pub result: Vec<DeliveryResult>,
    #[serde(default)]
    pub fail_reason: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub attempts_made: u32,
    pub max_attempts: u32,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds_option", default)]
    pub processed_on: Option<DateTime<Utc>>,
    #[serde(with = "ts_milliseconds_option", default)]
    pub finished_on: Option<DateTime<Utc>>,
    #[serde(with = "ts_milliseconds_option", default)]
    pub delay_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lease_token: Option<LeaseToken>,
    #[serde(with = "ts_milliseconds_option", default)]
    pub lease_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub worker: Option<WorkerId>,
}

impl JobRecord {
    /// Create a waiting record for a freshly enqueued job
    pub fn new(id: JobId, job: NewJob, order: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            data: job.payload,
            state: JobState::Waiting,
            priority: job.priority,
            order,
            progress: 0,
            result: Vec::new(),
            fail_reason: None,
            last_error: None,
            attempts_made: 0,
            max_attempts: job.max_attempts.max(1),
            created_at: now,
            processed_on: None,
            finished_on: None,
            delay_until: None,
            lease_token: None,
            lease_until: None,
            worker: None,
        }
    }

    /// Whether another attempt is allowed after the current one
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    pub fn recipient_count(&self) -> usize {
        self.data.recipient_count()
    }

    pub fn holds_lease(&self, token: &LeaseToken) -> bool {
        self.lease_token.as_ref() == Some(token)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.state, self.lease_until) {
            (JobState::Active, Some(lease_until)) => lease_until < now,
            _ => false,
        }
    }

    /// Hand the job to a worker: Waiting -> Active, one more attempt, fresh result sequence
    pub fn start(
        &mut self,
        worker: WorkerId,
        lease_token: LeaseToken,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        self.state = self.state.transition(JobState::Active)?;
        self.attempts_made += 1;
        self.result.clear();
        self.progress = 0;
        self.processed_on = Some(now);
        self.finished_on = None;
        self.lease_token = Some(lease_token);
        self.lease_until = Some(lease_until);
        self.worker = Some(worker);
        Ok(())
    }

    /// Append one recipient's outcome and extend the lease
    pub fn record_delivery(&mut self, result: DeliveryResult, lease_until: DateTime<Utc>) -> QueueResult<()> {
        if self.state != JobState::Active {
            return Err(QueueError::InvalidTransition {
                from: self.state,
                to: JobState::Active,
            });
        }
        self.result.push(result);
        self.progress = percent(self.result.len(), self.recipient_count());
        self.lease_until = Some(lease_until);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.state = self.state.transition(JobState::Completed)?;
        self.finished_on = Some(now);
        self.release_lease();
        Ok(())
    }

    /// Park the job until its backoff elapses
    pub fn delay(&mut self, error: String, until: DateTime<Utc>) -> QueueResult<()> {
        self.state = self.state.transition(JobState::Delayed)?;
        self.last_error = Some(error);
        self.delay_until = Some(until);
        self.release_lease();
        Ok(())
    }

    /// Fail the job permanently
    pub fn fail(&mut self, reason: String, now: DateTime<Utc>) -> QueueResult<()> {
        self.state = self.state.transition(JobState::Failed)?;
        self.last_error = Some(reason.clone());
        self.fail_reason = Some(reason);
        self.finished_on = Some(now);
        self.release_lease();
        Ok(())
    }

    /// Delayed -> Waiting once the backoff has elapsed
    pub fn promote(&mut self) -> QueueResult<()> {
        self.state = self.state.transition(JobState::Waiting)?;
        self.delay_until = None;
        Ok(())
    }

    /// Export in the persisted JSON format
    pub fn to_json(&self) -> QueueResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn release_lease(&mut self) {
        self.lease_token = None;
        self.lease_until = None;
        self.worker = None;
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// A job that has been leased for processing
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub record: JobRecord,
    pub lease_token: LeaseToken,
    pub lease_until: DateTime<Utc>,
}

impl LeasedJob {
    pub fn new(record: JobRecord, lease_token: LeaseToken, lease_until: DateTime<Utc>) -> Self {
        Self {
            record,
            lease_token,
            lease_until,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.record.id
    }

    pub fn payload(&self) -> &NotificationPayload {
        &self.record.data
    }

    pub fn attempt(&self) -> u32 {
        self.record.attempts_made
    }
}
