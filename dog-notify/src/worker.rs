use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::{
    backend::QueueBackend,
    observability::{job_span, ObservabilityLayer},
    rate_limit::RateLimiter,
    scheduler::{retry_at, RetryDecision, RetryPolicy},
    sender::{NotificationSender, OutboundMessage},
    types::{DeliveryResult, LeasedJob, WorkerId},
    JobError, JobEvent, JobRecord, QueueError, QueueResult,
};

/// Everything the workers of one pool share
pub(crate) struct WorkerContext {
    pub backend: Arc<dyn QueueBackend>,
    pub sender: Arc<dyn NotificationSender>,
    pub limiter: Arc<RateLimiter>,
    pub observability: ObservabilityLayer,
    pub policy: RetryPolicy,
    pub require_full_batch_success: bool,
    pub lease_duration: Duration,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
}

/// One consumer of the queue
pub(crate) struct Worker {
    id: WorkerId,
    ctx: Arc<WorkerContext>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(id: WorkerId, ctx: Arc<WorkerContext>, shutdown: watch::Receiver<bool>) -> Self {
        Self { id, ctx, shutdown }
    }

    /// Run the worker loop until shutdown is requested.
    ///
    /// Shutdown is only observed between jobs; a job that has been dequeued is
    /// always carried to Completed, Delayed or Failed.
    pub async fn run(mut self) -> QueueResult<()> {
        info!(worker = %self.id, "Worker started");

        while !self.stopping() {
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    // No jobs available, wait a bit
                    self.idle(self.ctx.poll_interval).await;
                }
                Err(e) => {
                    error!(worker = %self.id, "Error processing job: {}", e);
                    self.idle(self.ctx.error_backoff).await;
                }
            }
        }

        info!(worker = %self.id, "Worker stopped");
        Ok(())
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    async fn idle(&mut self, duration: Duration) {
        tokio::select! {
            _ = self.shutdown.changed() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    /// Process the next available job
    async fn process_next_job(&self) -> QueueResult<bool> {
        let job = match self.ctx.backend.dequeue(&self.id, self.ctx.lease_duration).await? {
            Some(job) => job,
            None => return Ok(false),
        };

        let span = job_span(&job, &self.id);
        self.execute(job).instrument(span).await?;
        Ok(true)
    }

    async fn execute(&self, job: LeasedJob) -> QueueResult<()> {
        let started = Utc::now();
        self.ctx.observability.record(JobEvent::Active {
            job_id: job.job_id().clone(),
            worker: self.id.clone(),
            attempt: job.attempt(),
            at: started,
        });

        let outcome = self.deliver(&job).await;
        let settled = match outcome {
            Ok(()) => self.complete(&job).await,
            Err(job_error) => self.fail(&job, job_error).await,
        };

        self.ctx
            .observability
            .metrics()
            .record_attempt_time(Utc::now() - started);

        match settled {
            Ok(()) => Ok(()),
            // the promoter already reclaimed this attempt
            Err(QueueError::InvalidLeaseToken) | Err(QueueError::JobAlreadyTerminal) => {
                warn!(job_id = %job.job_id(), "Lease lost before the attempt could be acknowledged");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Send to every recipient of the job, recording each outcome as it happens
    async fn deliver(&self, job: &LeasedJob) -> Result<(), JobError> {
        let payload = job.payload();
        let envelopes = payload.recipients.envelopes();
        let mut failures: Vec<(String, JobError)> = Vec::new();

        debug!(job_id = %job.job_id(), recipients = envelopes.len(), "Processing job");

        for envelope in envelopes {
            let message = OutboundMessage::from_envelope(&payload.subject, envelope);
            let sent = {
                let _permit = self.ctx.limiter.acquire().await;
                self.ctx.sender.send(&message).await
            };

            let delivery = match sent {
                Ok(receipt) => DeliveryResult::delivered(&envelope.to, receipt),
                Err(send_error) => {
                    let delivery = DeliveryResult::failed(&envelope.to, send_error.message.clone());
                    failures.push((envelope.to.clone(), JobError::from(send_error)));
                    delivery
                }
            };

            let progress = self
                .ctx
                .backend
                .record_delivery(job.job_id(), &job.lease_token, delivery.clone(), self.ctx.lease_duration)
                .await
                .map_err(|e| JobError::retryable(format!("failed to record delivery: {}", e)))?;

            self.ctx.observability.record(JobEvent::Progress {
                job_id: job.job_id().clone(),
                progress,
                delivery,
                at: Utc::now(),
            });
        }

        if failures.is_empty() {
            return Ok(());
        }

        if payload.recipients.is_single() {
            let (_, error) = failures.remove(0);
            return Err(error);
        }

        if self.ctx.require_full_batch_success {
            let permanent = failures.iter().all(|(_, e)| !e.is_retryable());
            let detail = failures
                .iter()
                .map(|(to, e)| format!("{}: {}", to, e.message()))
                .collect::<Vec<_>>()
                .join("; ");
            let message = format!("{} of {} recipients failed ({})", failures.len(), envelopes.len(), detail);
            return Err(if permanent {
                JobError::permanent(message)
            } else {
                JobError::retryable(message)
            });
        }

        // mixed batch results are reported, not retried
        Ok(())
    }

    async fn complete(&self, job: &LeasedJob) -> QueueResult<()> {
        let record: JobRecord = self.ctx.backend.ack_complete(job.job_id(), &job.lease_token).await?;
        self.ctx.observability.record(JobEvent::Completed {
            job_id: record.id,
            result: record.result,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn fail(&self, job: &LeasedJob, job_error: JobError) -> QueueResult<()> {
        let now = Utc::now();
        let retry = match self.ctx.policy.decide(job.attempt(), job.record.max_attempts, &job_error) {
            RetryDecision::RetryAfter(delay) => Some(retry_at(now, delay)?),
            RetryDecision::GiveUp => None,
        };

        let record = self
            .ctx
            .backend
            .ack_fail(job.job_id(), &job.lease_token, job_error.message().to_string(), retry)
            .await?;
        self.ctx.observability.record(JobEvent::after_failure(&record, Utc::now()));
        Ok(())
    }
}
