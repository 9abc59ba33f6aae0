use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    QueueResult, QueueError, JobId, JobRecord, JobState, JobCounts, LeasedJob, NewJob, DeliveryResult,
    backend::{deadline, QueueBackend, QueueSnapshot},
    config::RetentionPolicy,
    types::{JobPriority, LeaseToken, WorkerId},
};

// Waiting jobs: higher priority first, then FIFO by queue sequence
type WaitKey = (Reverse<JobPriority>, u64);
// Delayed jobs: earliest due first
type DelayKey = (DateTime<Utc>, u64);

#[derive(Debug, Clone, Copy)]
enum Slot {
    Waiting(WaitKey),
    Delayed(DelayKey),
}

#[derive(Debug, Default)]
pub(crate) struct Store {
    pub(crate) jobs: HashMap<JobId, JobRecord>,
    waiting: BTreeMap<WaitKey, JobId>,
    delayed: BTreeMap<DelayKey, JobId>,
    slots: HashMap<JobId, Slot>,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    next_order: u64,
    next_seq: u64,
}

impl Store {
    fn insert(&mut self, job: NewJob, now: DateTime<Utc>) -> JobId {
        self.next_order += 1;
        let job_id = JobId::new();
        let priority = job.priority;
        let record = JobRecord::new(job_id.clone(), job, self.next_order, now);
        self.jobs.insert(job_id.clone(), record);
        self.push_waiting(job_id.clone(), priority);
        job_id
    }

    fn push_waiting(&mut self, job_id: JobId, priority: JobPriority) {
        self.next_seq += 1;
        let key = (Reverse(priority), self.next_seq);
        self.slots.insert(job_id.clone(), Slot::Waiting(key));
        self.waiting.insert(key, job_id);
    }

    fn push_delayed(&mut self, job_id: JobId, until: DateTime<Utc>) {
        self.next_seq += 1;
        let key = (until, self.next_seq);
        self.slots.insert(job_id.clone(), Slot::Delayed(key));
        self.delayed.insert(key, job_id);
    }

    fn counts(&self, states: &[JobState]) -> JobCounts {
        let mut counts = JobCounts::default();
        for record in self.jobs.values() {
            if states.contains(&record.state) {
                counts.increment(record.state);
            }
        }
        counts
    }

    fn records_in(&self, states: &[JobState]) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .jobs
            .values()
            .filter(|r| states.contains(&r.state))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.order);
        records
    }

    fn pop_waiting(&mut self) -> Option<JobId> {
        let (_, job_id) = self.waiting.pop_first()?;
        self.slots.remove(&job_id);
        Some(job_id)
    }

    /// Delayed -> Waiting for every job due at `now`
    fn promote_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut promoted = 0;
        while let Some((&(due, _), _)) = self.delayed.first_key_value() {
            if due > now {
                break;
            }
            let Some((_, job_id)) = self.delayed.pop_first() else {
                break;
            };
            self.slots.remove(&job_id);

            let Some(record) = self.jobs.get_mut(&job_id) else {
                continue;
            };
            if let Err(e) = record.promote() {
                warn!("Skipping promotion of job {}: {}", job_id, e);
                continue;
            }
            let priority = record.priority;
            self.push_waiting(job_id, priority);
            promoted += 1;
        }
        promoted
    }

    /// Drop a job from whichever ready index holds it
    fn detach(&mut self, job_id: &JobId) {
        match self.slots.remove(job_id) {
            Some(Slot::Waiting(key)) => {
                self.waiting.remove(&key);
            }
            Some(Slot::Delayed(key)) => {
                self.delayed.remove(&key);
            }
            None => {}
        }
    }

    /// Active job owned by `lease_token`
    fn leased_mut(&mut self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<&mut JobRecord> {
        let record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if record.state.is_terminal() {
            return Err(QueueError::JobAlreadyTerminal);
        }
        if !record.holds_lease(lease_token) {
            return Err(QueueError::InvalidLeaseToken);
        }
        Ok(record)
    }

    /// Track a finished job and purge the oldest beyond the retention bound
    fn retire(&mut self, job_id: JobId, state: JobState, retention: &RetentionPolicy) {
        let (finished, keep) = match state {
            JobState::Completed => (&mut self.completed, retention.keep_completed),
            JobState::Failed => (&mut self.failed, retention.keep_failed),
            _ => return,
        };

        finished.push_back(job_id);
        if let Some(keep) = keep {
            while finished.len() > keep {
                if let Some(purged) = finished.pop_front() {
                    debug!("Retention purged job {}", purged);
                    self.jobs.remove(&purged);
                }
            }
        }
    }
}

/// In-memory backend for testing and development
#[derive(Clone)]
pub struct MemoryBackend {
    pub(crate) store: Arc<RwLock<Store>>,
    retention: RetentionPolicy,
    available: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_retention(RetentionPolicy::default())
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            retention,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the store going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of job records currently held
    pub fn len(&self) -> usize {
        self.store.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force a lease to expire (test helper)
    pub fn force_lease_expiry(&self, job_id: &JobId) -> QueueResult<()> {
        let mut store = self.store.write();
        let record = store
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        if record.state == JobState::Active {
            record.lease_until = Some(Utc::now() - chrono::Duration::seconds(1));
        }
        Ok(())
    }

    /// Make a delayed job due immediately (test helper)
    pub fn force_due(&self, job_id: &JobId) -> QueueResult<()> {
        let mut store = self.store.write();
        let until = store
            .jobs
            .get(job_id)
            .filter(|r| r.state == JobState::Delayed)
            .map(|_| Utc::now() - chrono::Duration::milliseconds(1));
        if let Some(until) = until {
            store.detach(job_id);
            if let Some(record) = store.jobs.get_mut(job_id) {
                record.delay_until = Some(until);
            }
            store.push_delayed(job_id.clone(), until);
        }
        Ok(())
    }

    fn check(&self) -> QueueResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::QueueUnavailable("memory store is offline".into()))
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue(&self, job: NewJob) -> QueueResult<JobId> {
        self.check()?;
        let job_id = self.store.write().insert(job, Utc::now());
        debug!("Enqueued job {}", job_id);
        Ok(job_id)
    }

    async fn enqueue_bulk(&self, jobs: Vec<NewJob>) -> QueueResult<Vec<JobId>> {
        self.check()?;
        let now = Utc::now();
        // one write lock for the whole batch keeps its orders contiguous
        let mut store = self.store.write();
        let ids: Vec<JobId> = jobs.into_iter().map(|job| store.insert(job, now)).collect();
        debug!("Enqueued {} jobs in bulk", ids.len());
        Ok(ids)
    }

    async fn dequeue(&self, worker: &WorkerId, lease: Duration) -> QueueResult<Option<LeasedJob>> {
        self.check()?;
        let now = Utc::now();
        let lease_until = deadline(now, lease)?;
        let mut store = self.store.write();

        store.promote_due(now);
        let Some(job_id) = store.pop_waiting() else {
            return Ok(None);
        };

        let lease_token = LeaseToken::new();
        let record = store
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::Internal(format!("waiting index references missing job {}", job_id)))?;
        record.start(worker.clone(), lease_token.clone(), lease_until, now)?;

        Ok(Some(LeasedJob::new(record.clone(), lease_token, lease_until)))
    }

    async fn record_delivery(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        result: DeliveryResult,
        lease: Duration,
    ) -> QueueResult<u8> {
        self.check()?;
        let lease_until = deadline(Utc::now(), lease)?;
        let mut store = self.store.write();
        let record = store.leased_mut(job_id, lease_token)?;
        record.record_delivery(result, lease_until)?;
        Ok(record.progress)
    }

    async fn ack_complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<JobRecord> {
        self.check()?;
        let mut store = self.store.write();
        let record = store.leased_mut(job_id, lease_token)?;
        record.complete(Utc::now())?;
        let snapshot = record.clone();

        store.retire(job_id.clone(), JobState::Completed, &self.retention);
        Ok(snapshot)
    }

    async fn ack_fail(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<JobRecord> {
        self.check()?;
        let now = Utc::now();
        let mut store = self.store.write();
        let record = store.leased_mut(job_id, lease_token)?;

        let retry_at = retry_at.filter(|_| record.can_retry());
        match retry_at {
            Some(until) => record.delay(error, until)?,
            None => record.fail(error, now)?,
        }
        let snapshot = record.clone();

        match retry_at {
            Some(until) => store.push_delayed(job_id.clone(), until),
            None => store.retire(job_id.clone(), JobState::Failed, &self.retention),
        }
        Ok(snapshot)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        self.check()?;
        Ok(self.store.read().jobs.get(job_id).cloned())
    }

    async fn get_counts(&self, states: &[JobState]) -> QueueResult<JobCounts> {
        self.check()?;
        Ok(self.store.read().counts(states))
    }

    async fn get_jobs(&self, states: &[JobState]) -> QueueResult<Vec<JobRecord>> {
        self.check()?;
        Ok(self.store.read().records_in(states))
    }

    async fn snapshot(&self, pending: &[JobState]) -> QueueResult<QueueSnapshot> {
        self.check()?;
        let store = self.store.read();
        Ok(QueueSnapshot {
            counts: store.counts(&JobState::ALL),
            pending: store.records_in(pending),
        })
    }

    async fn remove(&self, job_id: &JobId) -> QueueResult<bool> {
        self.check()?;
        let mut store = self.store.write();
        let Some(record) = store.jobs.get(job_id) else {
            return Ok(false);
        };
        if record.state == JobState::Active {
            return Err(QueueError::JobLocked(job_id.to_string()));
        }

        store.detach(job_id);
        store.jobs.remove(job_id);
        store.completed.retain(|id| id != job_id);
        store.failed.retain(|id| id != job_id);
        Ok(true)
    }

    async fn promote_delayed(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        self.check()?;
        Ok(self.store.write().promote_due(now))
    }

    async fn stalled_jobs(&self, now: DateTime<Utc>) -> QueueResult<Vec<LeasedJob>> {
        self.check()?;
        let store = self.store.read();
        let mut stalled: Vec<LeasedJob> = store
            .jobs
            .values()
            .filter(|r| r.lease_expired(now))
            .filter_map(|r| {
                let token = r.lease_token.clone()?;
                let until = r.lease_until?;
                Some(LeasedJob::new(r.clone(), token, until))
            })
            .collect();
        stalled.sort_by_key(|j| j.record.order);
        Ok(stalled)
    }

    async fn ping(&self) -> QueueResult<()> {
        self.check()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}
