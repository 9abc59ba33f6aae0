use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, info, warn};

use crate::backend::BoxStream;
use crate::JobEvent;

/// Outcome channel for job lifecycle events.
///
/// Every transition is broadcast to subscribers and folded into [`LiveMetrics`].
/// Publishing never blocks; a lagging subscriber loses the oldest events.
///
/// [`LiveMetrics`]: super::LiveMetrics
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<JobEvent>,
    metrics: Arc<super::LiveMetrics>,
}

impl ObservabilityLayer {
    pub fn new() -> Self {
        Self::with_capacity(10000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (event_broadcaster, _) = broadcast::channel(capacity.max(1));

        Self {
            event_broadcaster,
            metrics: Arc::new(super::LiveMetrics::new()),
        }
    }

    /// Publish an event and update the counters
    pub fn record(&self, event: JobEvent) {
        self.metrics.observe(&event);
        log_event(&event);
        // no subscribers is fine
        let _ = self.event_broadcaster.send(event);
    }

    /// Event stream; lagged events are skipped
    pub fn subscribe(&self) -> BoxStream<JobEvent> {
        let stream = BroadcastStream::new(self.event_broadcaster.subscribe())
            .filter_map(|result| result.ok());
        Box::pin(stream)
    }

    /// Raw receiver for callers that want to observe lag themselves
    pub fn event_receiver(&self) -> broadcast::Receiver<JobEvent> {
        self.event_broadcaster.subscribe()
    }

    pub fn metrics(&self) -> &super::LiveMetrics {
        &self.metrics
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}

fn log_event(event: &JobEvent) {
    match event {
        JobEvent::Enqueued { job_id, recipients, .. } => {
            debug!(job_id = %job_id, recipients, "job enqueued");
        }
        JobEvent::Active { job_id, worker, attempt, .. } => {
            debug!(job_id = %job_id, worker = %worker, attempt, "job active");
        }
        JobEvent::Progress { job_id, progress, delivery, .. } => {
            if delivery.success {
                debug!(job_id = %job_id, progress, recipient = %delivery.recipient, "delivered");
            } else {
                warn!(
                    job_id = %job_id,
                    progress,
                    recipient = %delivery.recipient,
                    error = delivery.error_message.as_deref().unwrap_or("unknown"),
                    "delivery failed"
                );
            }
        }
        JobEvent::Delayed { job_id, attempt, retry_at, error, .. } => {
            warn!(job_id = %job_id, attempt, retry_at = %retry_at, "job failed, will retry: {}", error);
        }
        JobEvent::Completed { job_id, result, .. } => {
            let failed = result.iter().filter(|r| !r.success).count();
            info!(job_id = %job_id, recipients = result.len(), failed, "job completed");
        }
        JobEvent::Failed { job_id, attempts, reason, .. } => {
            warn!(job_id = %job_id, attempts, "job failed permanently: {}", reason);
        }
        JobEvent::Removed { job_id, .. } => {
            debug!(job_id = %job_id, "job removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobId;
    use chrono::Utc;

    #[tokio::test]
    async fn subscribers_receive_recorded_events() {
        let layer = ObservabilityLayer::new();
        let mut events = layer.subscribe();

        let job_id = JobId::new();
        layer.record(JobEvent::Enqueued { job_id: job_id.clone(), recipients: 3, at: Utc::now() });
        layer.record(JobEvent::Completed { job_id: job_id.clone(), result: Vec::new(), at: Utc::now() });

        let first = events.next().await.unwrap();
        let second = events.next().await.unwrap();
        assert_eq!(first.event_name(), "enqueued");
        assert!(second.is_outcome());
        assert_eq!(second.job_id(), &job_id);
        assert_eq!(layer.metrics().jobs_completed(), 1);
    }

    #[test]
    fn rates_without_activity() {
        let global = ObservabilityLayer::new().metrics().snapshot().global;
        assert_eq!(global.success_rate(), 100.0);
        assert_eq!(global.retry_rate(), 0.0);
    }
}
