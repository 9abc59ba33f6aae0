#[cfg(feature = "memory")]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;
use std::time::Duration;

use crate::{
    QueueResult, QueueError, JobId, JobRecord, JobState, JobCounts, LeasedJob, NewJob, DeliveryResult,
    types::{LeaseToken, WorkerId},
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Counts and pending records taken from the same instant
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub counts: JobCounts,
    pub pending: Vec<JobRecord>,
}

/// Backend trait for job queue storage primitives.
///
/// Every operation fails with `QueueError::QueueUnavailable` when the store
/// cannot be reached; `Ok(None)` from `dequeue` only ever means "no job ready".
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a new Waiting job
    async fn enqueue(&self, job: NewJob) -> QueueResult<JobId>;

    /// Store several jobs with contiguous submission order, returned in input order
    async fn enqueue_bulk(&self, jobs: Vec<NewJob>) -> QueueResult<Vec<JobId>>;

    /// Atomically hand the next ready job to `worker`.
    ///
    /// Due Delayed jobs are promoted first. The job becomes Active with one more
    /// attempt counted, an empty result sequence and a fresh lease.
    async fn dequeue(&self, worker: &WorkerId, lease: Duration) -> QueueResult<Option<LeasedJob>>;

    /// Append one recipient's outcome and extend the lease; returns the new progress
    async fn record_delivery(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        result: DeliveryResult,
        lease: Duration,
    ) -> QueueResult<u8>;

    /// Active -> Completed (lease token required)
    async fn ack_complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<JobRecord>;

    /// Active -> Delayed when `retry_at` is given and attempts remain, otherwise Active -> Failed.
    /// retry_at is computed by the retry policy, not by the backend
    async fn ack_fail(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<JobRecord>;

    /// Full job record, if the job still exists
    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Number of jobs in each of `states` (other states are left at zero)
    async fn get_counts(&self, states: &[JobState]) -> QueueResult<JobCounts>;

    /// Records in any of `states`, ordered by submission order
    async fn get_jobs(&self, states: &[JobState]) -> QueueResult<Vec<JobRecord>>;

    /// Counts for every state plus the records in `pending`, read as one consistent view
    async fn snapshot(&self, pending: &[JobState]) -> QueueResult<QueueSnapshot>;

    /// Delete a Waiting, Delayed or finished job. Active jobs are locked.
    async fn remove(&self, job_id: &JobId) -> QueueResult<bool>;

    /// Move Delayed jobs whose backoff has elapsed back to Waiting
    async fn promote_delayed(&self, now: DateTime<Utc>) -> QueueResult<usize>;

    /// Active jobs whose lease expired before `now`
    async fn stalled_jobs(&self, now: DateTime<Utc>) -> QueueResult<Vec<LeasedJob>>;

    /// Reachability check
    async fn ping(&self) -> QueueResult<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Absolute deadline `lease` from `now`; a lease past chrono's range is a config error
pub(crate) fn deadline(now: DateTime<Utc>, lease: Duration) -> QueueResult<DateTime<Utc>> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .ok_or_else(|| QueueError::Config(format!("lease duration {:?} is out of range", lease)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_adds_the_lease() {
        let now = Utc::now();
        let until = deadline(now, Duration::from_secs(30)).unwrap();
        assert_eq!(until - now, chrono::Duration::seconds(30));
    }

    #[test]
    fn oversized_lease_is_a_config_error() {
        let err = deadline(Utc::now(), Duration::from_secs(10_000_000_000_000)).unwrap_err();
        assert!(matches!(err, QueueError::Config(msg) if msg.contains("lease duration")));

        let err = deadline(Utc::now(), Duration::MAX).unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }
}
