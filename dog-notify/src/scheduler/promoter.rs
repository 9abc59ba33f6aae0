use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{retry_at, RetryDecision, RetryPolicy};
use crate::{
    backend::QueueBackend,
    observability::ObservabilityLayer,
    JobError, JobEvent, QueueError, QueueResult,
};

/// What one promoter tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Delayed jobs moved back to Waiting
    pub promoted: usize,
    /// Stalled jobs scheduled for another attempt
    pub recovered: usize,
    /// Stalled jobs that had no attempts left
    pub failed: usize,
}

/// Background task that returns due Delayed jobs to Waiting and recovers
/// Active jobs whose worker stopped renewing its lease
pub struct DelayedJobPromoter {
    backend: Arc<dyn QueueBackend>,
    policy: RetryPolicy,
    observability: ObservabilityLayer,
    interval: Duration,
}

impl DelayedJobPromoter {
    pub fn new(backend: Arc<dyn QueueBackend>, policy: RetryPolicy, observability: ObservabilityLayer) -> Self {
        Self {
            backend,
            policy,
            observability,
            interval: Duration::from_millis(250),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one promoter cycle
    pub async fn tick(&self) -> QueueResult<TickReport> {
        let now = Utc::now();
        let mut report = TickReport {
            promoted: self.backend.promote_delayed(now).await?,
            ..TickReport::default()
        };

        for job in self.backend.stalled_jobs(now).await? {
            let worker = job
                .record
                .worker
                .as_ref()
                .map(|w| w.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let error = JobError::retryable(format!("lease expired: worker {} stopped responding", worker));
            let retry = match self.policy.decide(job.attempt(), job.record.max_attempts, &error) {
                RetryDecision::RetryAfter(delay) => Some(retry_at(now, delay)?),
                RetryDecision::GiveUp => None,
            };

            match self
                .backend
                .ack_fail(job.job_id(), &job.lease_token, error.message().to_string(), retry)
                .await
            {
                Ok(record) => {
                    if record.state.is_terminal() {
                        report.failed += 1;
                    } else {
                        report.recovered += 1;
                    }
                    self.observability.record(JobEvent::after_failure(&record, Utc::now()));
                }
                // the worker finished (or another promoter got there) in the meantime
                Err(QueueError::InvalidLeaseToken) | Err(QueueError::JobAlreadyTerminal) | Err(QueueError::JobNotFound(_)) => {
                    debug!("Stalled job {} settled before recovery", job.job_id());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Start the promoter background task
    pub fn spawn(self) -> PromoterHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join_handle = tokio::spawn(self.run(shutdown_rx));
        PromoterHandle {
            shutdown_tx,
            join_handle,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting delayed job promoter with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if report != TickReport::default() => {
                            debug!(
                                promoted = report.promoted,
                                recovered = report.recovered,
                                failed = report.failed,
                                "promoter tick"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Error during delayed job promotion: {}", e),
                    }
                }
            }
        }

        info!("Delayed job promoter stopped");
    }
}

/// Handle for stopping the promoter
pub struct PromoterHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handle: JoinHandle<()>,
}

impl PromoterHandle {
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Promoter join error: {}", e)))
    }
}
