use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::{
    QueueResult, QueueError, JobId, JobEvent,
    backend::{BoxStream, QueueBackend},
    batcher::{Batcher, BulkSubmission},
    config::DispatchConfig,
    observability::{LiveMetrics, ObservabilityLayer},
    rate_limit::RateLimiter,
    scheduler::{DelayedJobPromoter, PromoterHandle},
    sender::NotificationSender,
    status::{JobStatusView, QueueAggregate, StatusTracker},
    types::WorkerId,
    worker::{Worker, WorkerContext},
};

/// Handle for managing the worker pool lifecycle
pub struct WorkerPoolHandle {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<(WorkerId, JoinHandle<QueueResult<()>>)>,
    promoter: PromoterHandle,
    sender: Arc<dyn NotificationSender>,
}

impl std::fmt::Debug for WorkerPoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPoolHandle")
            .field("worker_ids", &self.worker_ids())
            .finish_non_exhaustive()
    }
}

impl WorkerPoolHandle {
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Gracefully shut the pool down.
    ///
    /// Workers finish the job they hold and exit, the promoter stops, then the
    /// sender is closed.
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);

        let (ids, handles): (Vec<_>, Vec<_>) = self.workers.into_iter().unzip();
        let results = join_all(handles).await;

        let mut first_error = None;
        for (id, result) in ids.iter().zip(results) {
            let result = result
                .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))
                .and_then(|r| r);
            if let Err(e) = result {
                error!(worker = %id, "Worker ended with error: {}", e);
                first_error.get_or_insert(e);
            }
        }

        self.promoter.shutdown().await?;
        self.sender.close().await?;
        info!("Worker pool stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Bulk notification dispatch: submission, worker pool and status queries
#[derive(Clone)]
pub struct DispatchAdapter {
    backend: Arc<dyn QueueBackend>,
    sender: Arc<dyn NotificationSender>,
    limiter: Arc<RateLimiter>,
    batcher: Batcher,
    status: StatusTracker,
    observability: ObservabilityLayer,
    config: DispatchConfig,
}

impl DispatchAdapter {
    /// Create a new dispatch adapter
    pub fn new<B, S>(backend: B, sender: S, config: DispatchConfig) -> QueueResult<Self>
    where
        B: QueueBackend + 'static,
        S: NotificationSender + 'static,
    {
        Self::from_shared(Arc::new(backend), Arc::new(sender), config)
    }

    /// Create an adapter over a fresh in-memory queue sized by `config.retention`
    #[cfg(feature = "memory")]
    pub fn in_memory<S>(sender: S, config: DispatchConfig) -> QueueResult<Self>
    where
        S: NotificationSender + 'static,
    {
        let backend = crate::backend::memory::MemoryBackend::with_retention(config.retention);
        Self::new(backend, sender, config)
    }

    /// Create adapter around already shared collaborators
    pub fn from_shared(
        backend: Arc<dyn QueueBackend>,
        sender: Arc<dyn NotificationSender>,
        config: DispatchConfig,
    ) -> QueueResult<Self> {
        config.validate()?;
        Ok(Self {
            status: StatusTracker::new(backend.clone()),
            limiter: RateLimiter::from_config(&config.rate_limit),
            batcher: Batcher::from_config(&config),
            observability: ObservabilityLayer::new(),
            backend,
            sender,
            config,
        })
    }

    /// Create adapter with an existing observability layer
    pub fn with_observability(mut self, observability: ObservabilityLayer) -> Self {
        self.observability = observability;
        self
    }

    /// Validate, batch and enqueue a bulk submission; ids come back in submission order
    #[instrument(skip(self, submission), fields(recipients = submission.recipients.len()))]
    pub async fn submit(&self, submission: BulkSubmission) -> QueueResult<Vec<JobId>> {
        let jobs = self.batcher.build_jobs(&submission)?;
        let sizes: Vec<usize> = jobs.iter().map(|j| j.payload.recipient_count()).collect();

        let job_ids = self.backend.enqueue_bulk(jobs).await?;

        let now = Utc::now();
        for (job_id, recipients) in job_ids.iter().zip(sizes) {
            self.observability.record(JobEvent::Enqueued {
                job_id: job_id.clone(),
                recipients,
                at: now,
            });
        }

        info!(jobs = job_ids.len(), "Enqueued bulk submission");
        Ok(job_ids)
    }

    /// Enqueue a single-recipient notification
    #[instrument(skip(self, subject, content))]
    pub async fn submit_one(&self, to: &str, subject: &str, content: &str) -> QueueResult<JobId> {
        let job = self.batcher.build_single(to, subject, content)?;
        let job_id = self.backend.enqueue(job).await?;

        self.observability.record(JobEvent::Enqueued {
            job_id: job_id.clone(),
            recipients: 1,
            at: Utc::now(),
        });
        Ok(job_id)
    }

    /// Initialize the sender and start the worker pool and promoter
    #[instrument(skip(self), fields(workers = self.config.workers, sender = self.sender.name(), backend = self.backend.name()))]
    pub async fn start(&self) -> QueueResult<WorkerPoolHandle> {
        self.backend.ping().await?;
        self.sender.init().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(WorkerContext {
            backend: self.backend.clone(),
            sender: self.sender.clone(),
            limiter: self.limiter.clone(),
            observability: self.observability.clone(),
            policy: self.config.retry,
            require_full_batch_success: self.config.require_full_batch_success,
            lease_duration: self.config.lease_duration,
            poll_interval: self.config.poll_interval,
            error_backoff: self.config.error_backoff,
        });

        let workers = (0..self.config.workers)
            .map(|index| {
                let id = WorkerId::indexed(index);
                let worker = Worker::new(id.clone(), ctx.clone(), shutdown_rx.clone());
                (id, tokio::spawn(worker.run()))
            })
            .collect();

        let promoter = DelayedJobPromoter::new(
            self.backend.clone(),
            self.config.retry,
            self.observability.clone(),
        )
        .with_interval(self.config.promote_interval)
        .spawn();

        info!("Started {} workers", self.config.workers);

        Ok(WorkerPoolHandle {
            shutdown_tx,
            workers,
            promoter,
            sender: self.sender.clone(),
        })
    }

    pub async fn job_status(&self, job_id: &JobId) -> QueueResult<Option<JobStatusView>> {
        self.status.status(job_id).await
    }

    pub async fn queue_aggregate(&self) -> QueueResult<QueueAggregate> {
        self.status.aggregate().await
    }

    /// Remove a job that is not currently being processed
    #[instrument(skip(self, job_id), fields(job_id = %job_id))]
    pub async fn remove(&self, job_id: &JobId) -> QueueResult<bool> {
        let removed = self.backend.remove(job_id).await?;
        if removed {
            self.observability.record(JobEvent::Removed {
                job_id: job_id.clone(),
                at: Utc::now(),
            });
        }
        Ok(removed)
    }

    /// Stream of lifecycle events from now on
    pub fn subscribe(&self) -> BoxStream<JobEvent> {
        self.observability.subscribe()
    }

    /// Get backend reference
    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn batcher(&self) -> &Batcher {
        &self.batcher
    }

    /// Get observability layer
    pub fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }

    pub fn metrics(&self) -> &LiveMetrics {
        self.observability.metrics()
    }

    /// Get configuration
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }
}
