//! End-to-end dispatch: submission, worker pool, retries and status

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;

use dog_notify::{
    backend::BoxStream, BulkSubmission, DeliveryResult, DispatchAdapter, DispatchConfig, JobEvent,
    JobId, JobState, MemoryBackend, MockSender, QueueError, RetryPolicy,
};

/// Fast settings so retries and polling finish in milliseconds
fn fast_config() -> DispatchConfig {
    DispatchConfig::default()
        .with_workers(3)
        .with_rate_limit(10, Duration::from_millis(50))
        .with_retry(RetryPolicy::new(3, Duration::from_millis(10)))
        .with_poll_interval(Duration::from_millis(5))
        .with_promote_interval(Duration::from_millis(5))
        .with_error_backoff(Duration::from_millis(10))
}

fn addresses(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("user{}@example.com", i)).collect()
}

/// Collect the terminal event of every job in `ids`
async fn wait_for_outcomes(events: &mut BoxStream<JobEvent>, ids: &[JobId]) -> HashMap<JobId, JobEvent> {
    let mut outcomes = HashMap::new();
    while outcomes.len() < ids.len() {
        let event = tokio::time::timeout(Duration::from_secs(10), events.next())
            .await
            .expect("Timeout waiting for job outcome")
            .expect("Event stream ended");
        if event.is_outcome() && ids.contains(event.job_id()) {
            outcomes.insert(event.job_id().clone(), event);
        }
    }
    outcomes
}

#[test_log::test(tokio::test)]
async fn test_bulk_submission_delivers_every_recipient() {
    let sender = MockSender::new();
    let adapter = DispatchAdapter::new(MemoryBackend::new(), sender.clone(), fast_config()).unwrap();
    let mut events = adapter.subscribe();
    let pool = adapter.start().await.unwrap();

    let names: Vec<String> = (0..25).map(|i| format!("Name{}", i)).collect();
    let submission = BulkSubmission::new(addresses(25), "Welcome", "Hi [Recipient Name]!").with_names(names);
    let ids = adapter.submit(submission).await.unwrap();
    assert_eq!(ids.len(), 3);

    let outcomes = wait_for_outcomes(&mut events, &ids).await;
    assert!(outcomes.values().all(|e| matches!(e, JobEvent::Completed { .. })));

    let mut sizes = Vec::new();
    for id in &ids {
        let record = adapter.backend().get(id).await.unwrap().unwrap();
        sizes.push(record.recipient_count());

        let status = adapter.job_status(id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress, 100);
        assert_eq!(status.attempts_made, 1);
        assert!(status.result.iter().all(|r| r.success));
    }
    assert_eq!(sizes, vec![10, 10, 5]);

    assert_eq!(sender.recipients().len(), 25);
    let personalized = sender
        .sent()
        .into_iter()
        .find(|s| s.message.to == "user3@example.com")
        .unwrap();
    assert_eq!(personalized.message.text_body, "Hi Name3!");
    assert_eq!(personalized.message.subject, "Welcome");

    let aggregate = adapter.queue_aggregate().await.unwrap();
    assert_eq!(aggregate.counts.completed, 3);
    assert_eq!(aggregate.active_jobs_count, 0);
    assert_eq!(aggregate.average_progress, 100.0);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_single_job_retries_until_success() {
    let sender = MockSender::fail_first(2);
    let adapter = DispatchAdapter::new(MemoryBackend::new(), sender.clone(), fast_config()).unwrap();
    let mut events = adapter.subscribe();
    let pool = adapter.start().await.unwrap();

    let id = adapter.submit_one("a@example.com", "Reset", "Your code is 1234").await.unwrap();
    let outcomes = wait_for_outcomes(&mut events, &[id.clone()]).await;
    assert!(matches!(outcomes[&id], JobEvent::Completed { .. }));

    let status = adapter.job_status(&id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.attempts_made, 3);
    assert!(status.fail_reason.is_none());
    assert_eq!(sender.attempts_for("a@example.com"), 3);
    assert_eq!(adapter.metrics().jobs_retried(), 2);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_job() {
    let sender = MockSender::failing("smtp down");
    let adapter = DispatchAdapter::new(MemoryBackend::new(), sender.clone(), fast_config()).unwrap();
    let mut events = adapter.subscribe();
    let pool = adapter.start().await.unwrap();

    let id = adapter.submit_one("a@example.com", "Reset", "Code").await.unwrap();
    let outcomes = wait_for_outcomes(&mut events, &[id.clone()]).await;
    match &outcomes[&id] {
        JobEvent::Failed { attempts, reason, .. } => {
            assert_eq!(*attempts, 3);
            assert!(reason.contains("smtp down"));
        }
        other => panic!("expected failure, got {:?}", other),
    }

    // several promoter cycles pass; a failed job must stay failed
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sender.calls(), 3);
    assert_eq!(adapter.metrics().jobs_retried(), 2);

    let status = adapter.job_status(&id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.attempts_made, 3);
    assert!(status.fail_reason.as_deref().unwrap().contains("smtp down"));
    assert!(status.finished_on.is_some());
    assert_eq!(adapter.job_status(&id).await.unwrap().unwrap(), status);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_permanent_rejection_is_not_retried() {
    let sender = MockSender::new().reject_permanently("gone@example.com");
    let adapter = DispatchAdapter::new(MemoryBackend::new(), sender.clone(), fast_config()).unwrap();
    let mut events = adapter.subscribe();
    let pool = adapter.start().await.unwrap();

    let id = adapter.submit_one("gone@example.com", "Hi", "Hello").await.unwrap();
    wait_for_outcomes(&mut events, &[id.clone()]).await;

    let status = adapter.job_status(&id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.attempts_made, 1);
    assert_eq!(sender.attempts_for("gone@example.com"), 1);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_mixed_batch_completes_with_partial_results() {
    let sender = MockSender::new().fail_for("user1@example.com");
    let adapter = DispatchAdapter::new(MemoryBackend::new(), sender.clone(), fast_config()).unwrap();
    let mut events = adapter.subscribe();
    let pool = adapter.start().await.unwrap();

    let ids = adapter
        .submit(BulkSubmission::new(addresses(3), "News", "Issue 42"))
        .await
        .unwrap();
    wait_for_outcomes(&mut events, &ids).await;

    let status = adapter.job_status(&ids[0]).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.attempts_made, 1);

    let by_recipient: HashMap<&str, &DeliveryResult> =
        status.result.iter().map(|r| (r.recipient.as_str(), r)).collect();
    assert!(by_recipient["user0@example.com"].success);
    assert!(!by_recipient["user1@example.com"].success);
    assert!(by_recipient["user1@example.com"].error_message.is_some());
    assert!(by_recipient["user2@example.com"].success);
    assert_eq!(sender.attempts_for("user1@example.com"), 1);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_batch_success_retries_the_batch() {
    let sender = MockSender::new().fail_first_for("user1@example.com", 1);
    let config = fast_config().require_full_batch_success();
    let adapter = DispatchAdapter::new(MemoryBackend::new(), sender.clone(), config).unwrap();
    let mut events = adapter.subscribe();
    let pool = adapter.start().await.unwrap();

    let ids = adapter
        .submit(BulkSubmission::new(addresses(3), "News", "Issue 42"))
        .await
        .unwrap();
    wait_for_outcomes(&mut events, &ids).await;

    let status = adapter.job_status(&ids[0]).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.attempts_made, 2);
    // the retry re-sends to recipients that already succeeded
    assert_eq!(sender.attempts_for("user0@example.com"), 2);
    assert_eq!(status.result.len(), 3);
    assert!(status.result.iter().all(|r| r.success));

    pool.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sends_never_exceed_the_window_budget() {
    let sender = MockSender::new().with_delay(Duration::from_millis(5));
    let config = fast_config().with_workers(4).with_rate_limit(3, Duration::from_millis(60));
    let adapter = DispatchAdapter::new(MemoryBackend::new(), sender.clone(), config).unwrap();
    assert_eq!(adapter.batcher().chunk_size(), 3);

    let mut events = adapter.subscribe();
    let pool = adapter.start().await.unwrap();
    let ids = adapter
        .submit(BulkSubmission::new(addresses(12), "Hi", "Hello"))
        .await
        .unwrap();
    assert_eq!(ids.len(), 4);
    wait_for_outcomes(&mut events, &ids).await;

    assert!(sender.max_in_flight() <= 3);
    let mut sent_at: Vec<_> = sender.sent().into_iter().map(|s| s.sent_at).collect();
    sent_at.sort();
    assert_eq!(sent_at.len(), 12);
    for window in sent_at.windows(4) {
        assert!(window[3] - window[0] >= Duration::from_millis(60));
    }

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_job_and_closes_sender() {
    let sender = MockSender::new().with_delay(Duration::from_millis(30));
    let config = fast_config().with_workers(1);
    let adapter = DispatchAdapter::new(MemoryBackend::new(), sender.clone(), config).unwrap();
    let mut events = adapter.subscribe();
    let pool = adapter.start().await.unwrap();
    assert!(sender.is_initialized());
    assert_eq!(pool.worker_ids().len(), 1);

    let ids = adapter
        .submit(BulkSubmission::new(addresses(3), "Hi", "Hello"))
        .await
        .unwrap();

    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .unwrap()
            .unwrap();
        if matches!(event, JobEvent::Active { .. }) {
            break;
        }
    }

    pool.shutdown().await.unwrap();

    let status = adapter.job_status(&ids[0]).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(sender.sent_count(), 3);
    assert!(sender.is_closed());
}

#[tokio::test]
async fn test_status_of_unknown_job_is_none() {
    let adapter = DispatchAdapter::new(MemoryBackend::new(), MockSender::new(), fast_config()).unwrap();
    assert!(adapter.job_status(&JobId::from("missing")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_waiting_job_can_be_removed() {
    let adapter = DispatchAdapter::new(MemoryBackend::new(), MockSender::new(), fast_config()).unwrap();
    let id = adapter.submit_one("a@example.com", "Hi", "Hello").await.unwrap();

    assert!(adapter.remove(&id).await.unwrap());
    assert!(adapter.job_status(&id).await.unwrap().is_none());
    assert!(!adapter.remove(&id).await.unwrap());
    assert_eq!(adapter.metrics().jobs_removed(), 1);
}

#[tokio::test]
async fn test_store_outage_is_surfaced() {
    let backend = MemoryBackend::new();
    let adapter = DispatchAdapter::new(backend.clone(), MockSender::new(), fast_config()).unwrap();
    backend.set_available(false);

    let submit = adapter.submit(BulkSubmission::new(addresses(2), "Hi", "Hello")).await;
    assert!(matches!(submit, Err(QueueError::QueueUnavailable(_))));
    assert!(adapter.job_status(&JobId::new()).await.unwrap_err().is_unavailable());
    assert!(adapter.start().await.unwrap_err().is_unavailable());
}
