use std::sync::Arc;

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    backend::{QueueBackend, QueueSnapshot},
    DeliveryResult, JobCounts, JobId, JobRecord, JobState, QueueResult,
};

/// Caller-facing view of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: JobId,
    pub state: JobState,
    pub progress: u8,
    pub result: Vec<DeliveryResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fail_reason: Option<String>,
    #[serde(with = "ts_milliseconds_option", default)]
    pub processed_on: Option<DateTime<Utc>>,
    #[serde(with = "ts_milliseconds_option", default)]
    pub finished_on: Option<DateTime<Utc>>,
    pub attempts_made: u32,
}

impl From<JobRecord> for JobStatusView {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            state: record.state,
            progress: record.progress,
            result: record.result,
            fail_reason: record.fail_reason,
            processed_on: record.processed_on,
            finished_on: record.finished_on,
            attempts_made: record.attempts_made,
        }
    }
}

/// Queue-wide summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueAggregate {
    pub counts: JobCounts,
    pub active_jobs_count: usize,
    /// Mean progress over Active and Waiting jobs; 100 when there are none
    pub average_progress: f64,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Read-only projection over the job queue; holds no state of its own
#[derive(Clone)]
pub struct StatusTracker {
    backend: Arc<dyn QueueBackend>,
}

impl StatusTracker {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    /// Status of one job; unknown (or purged) ids are `Ok(None)`
    #[instrument(skip(self, job_id), fields(job_id = %job_id))]
    pub async fn status(&self, job_id: &JobId) -> QueueResult<Option<JobStatusView>> {
        Ok(self.backend.get(job_id).await?.map(JobStatusView::from))
    }

    #[instrument(skip(self))]
    pub async fn aggregate(&self) -> QueueResult<QueueAggregate> {
        let QueueSnapshot { counts, pending } = self
            .backend
            .snapshot(&[JobState::Active, JobState::Waiting])
            .await?;

        let average_progress = if pending.is_empty() {
            100.0
        } else {
            pending.iter().map(|r| f64::from(r.progress)).sum::<f64>() / pending.len() as f64
        };

        Ok(QueueAggregate {
            counts,
            active_jobs_count: counts.active,
            average_progress,
            timestamp: Utc::now(),
        })
    }
}
