//! In-process sender that captures messages, for tests and local runs

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{NotificationSender, OutboundMessage};
use crate::error::{QueueError, QueueResult, SendError};
use crate::types::DeliveryReceipt;

/// A message the mock accepted, with the instant its send finished
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: OutboundMessage,
    pub sent_at: Instant,
}

/// Mock sender that records every delivery.
///
/// Failures can be scripted globally, for the first `n` calls, or per address
/// (optionally only for that address's first `n` calls).
#[derive(Clone, Default)]
pub struct MockSender {
    inner: Arc<MockState>,
}

#[derive(Debug, Clone, Copy)]
enum AddressScript {
    Always,
    First(usize),
    Permanent,
}

#[derive(Default)]
struct MockState {
    sent: Mutex<Vec<SentMessage>>,
    attempts: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    fail_all: Option<String>,
    fail_first: usize,
    fail_addresses: Mutex<HashMap<String, AddressScript>>,
    refuse_init: bool,
    delay: Option<Duration>,
    initialized: AtomicBool,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock sender that always fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self::from_state(MockState {
            fail_all: Some(message.into()),
            ..MockState::default()
        })
    }

    /// Fail the first `n` send calls, then succeed
    pub fn fail_first(n: usize) -> Self {
        Self::from_state(MockState {
            fail_first: n,
            ..MockState::default()
        })
    }

    /// Create a mock whose `init` is refused
    pub fn refusing_init() -> Self {
        Self::from_state(MockState {
            refuse_init: true,
            ..MockState::default()
        })
    }

    /// Simulate transport latency on every send
    pub fn with_delay(self, delay: Duration) -> Self {
        let mut state = self.into_state();
        state.delay = Some(delay);
        Self::from_state(state)
    }

    /// Always reject sends to `address` (retryable)
    pub fn fail_for(self, address: impl Into<String>) -> Self {
        self.script(address, AddressScript::Always)
    }

    /// Reject the first `n` sends to `address`
    pub fn fail_first_for(self, address: impl Into<String>, n: usize) -> Self {
        self.script(address, AddressScript::First(n))
    }

    /// Reject `address` with a permanent error
    pub fn reject_permanently(self, address: impl Into<String>) -> Self {
        self.script(address, AddressScript::Permanent)
    }

    /// All messages accepted so far, in completion order
    pub fn sent(&self) -> Vec<SentMessage> {
        self.inner.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.inner.sent.lock().len()
    }

    /// Number of send calls, successful or not
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Number of send calls made for one address
    pub fn attempts_for(&self, address: &str) -> usize {
        self.inner.attempts.lock().get(address).copied().unwrap_or(0)
    }

    pub fn was_sent_to(&self, address: &str) -> bool {
        self.inner.sent.lock().iter().any(|s| s.message.to == address)
    }

    /// Distinct addresses that received at least one message
    pub fn recipients(&self) -> HashSet<String> {
        self.inner
            .sent
            .lock()
            .iter()
            .map(|s| s.message.to.clone())
            .collect()
    }

    /// Highest number of sends observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn script(self, address: impl Into<String>, script: AddressScript) -> Self {
        self.inner.fail_addresses.lock().insert(address.into(), script);
        self
    }

    fn from_state(state: MockState) -> Self {
        Self {
            inner: Arc::new(state),
        }
    }

    fn into_state(self) -> MockState {
        match Arc::try_unwrap(self.inner) {
            Ok(state) => state,
            Err(shared) => MockState {
                fail_all: shared.fail_all.clone(),
                fail_first: shared.fail_first,
                fail_addresses: Mutex::new(shared.fail_addresses.lock().clone()),
                refuse_init: shared.refuse_init,
                delay: shared.delay,
                ..MockState::default()
            },
        }
    }

    fn scripted_failure(&self, to: &str, call: usize, attempt: usize) -> Option<SendError> {
        if let Some(message) = &self.inner.fail_all {
            return Some(SendError::new(message.clone()));
        }
        if call < self.inner.fail_first {
            return Some(SendError::new(format!("mock failure #{}", call + 1)));
        }
        match self.inner.fail_addresses.lock().get(to) {
            Some(AddressScript::Always) => Some(SendError::new(format!("mailbox unavailable: {}", to))),
            Some(AddressScript::First(n)) if attempt < *n => {
                Some(SendError::new(format!("temporary failure for {}", to)))
            }
            Some(AddressScript::Permanent) => Some(SendError::permanent(format!("no such mailbox: {}", to))),
            _ => None,
        }
    }
}

#[async_trait]
impl NotificationSender for MockSender {
    async fn init(&self) -> QueueResult<()> {
        if self.inner.refuse_init {
            return Err(QueueError::SenderInit("mock transport refused connection".into()));
        }
        self.inner.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, SendError> {
        let call = self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.inner.attempts.lock();
            let entry = attempts.entry(message.to.clone()).or_insert(0);
            *entry += 1;
            *entry - 1
        };

        let running = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.inner.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.scripted_failure(&message.to, call, attempt) {
            return Err(error);
        }

        self.inner.sent.lock().push(SentMessage {
            message: message.clone(),
            sent_at: Instant::now(),
        });

        Ok(DeliveryReceipt::new("250 OK").with_message_id(format!("mock-{}", call + 1)))
    }

    async fn close(&self) -> QueueResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str) -> OutboundMessage {
        OutboundMessage {
            to: to.to_string(),
            subject: "Test Subject".to_string(),
            text_body: "Body".to_string(),
            html_body: "Body".to_string(),
        }
    }

    #[tokio::test]
    async fn records_successful_sends() {
        let sender = MockSender::new();
        let receipt = sender.send(&message("a@example.com")).await.unwrap();

        assert_eq!(receipt.response, "250 OK");
        assert!(sender.was_sent_to("a@example.com"));
        assert_eq!(sender.sent_count(), 1);
    }

    #[tokio::test]
    async fn failing_sender_rejects_everything() {
        let sender = MockSender::failing("Simulated failure");
        let err = sender.send(&message("a@example.com")).await.unwrap_err();

        assert!(err.to_string().contains("Simulated failure"));
        assert_eq!(sender.sent_count(), 0);
        assert_eq!(sender.calls(), 1);
    }

    #[tokio::test]
    async fn fail_first_recovers_after_n_calls() {
        let sender = MockSender::fail_first(2);
        assert!(sender.send(&message("a@example.com")).await.is_err());
        assert!(sender.send(&message("a@example.com")).await.is_err());
        assert!(sender.send(&message("a@example.com")).await.is_ok());
        assert_eq!(sender.attempts_for("a@example.com"), 3);
    }

    #[tokio::test]
    async fn per_address_failures_leave_others_alone() {
        let sender = MockSender::new()
            .fail_for("bad@example.com")
            .fail_first_for("flaky@example.com", 1);

        assert!(sender.send(&message("bad@example.com")).await.is_err());
        assert!(sender.send(&message("flaky@example.com")).await.is_err());
        assert!(sender.send(&message("flaky@example.com")).await.is_ok());
        assert!(sender.send(&message("good@example.com")).await.is_ok());
        assert!(!sender.was_sent_to("bad@example.com"));
    }

    #[tokio::test]
    async fn permanent_rejection_is_flagged() {
        let sender = MockSender::new().reject_permanently("gone@example.com");
        let err = sender.send(&message("gone@example.com")).await.unwrap_err();
        assert!(err.permanent);
    }

    #[tokio::test]
    async fn lifecycle_flags() {
        let sender = MockSender::new();
        sender.init().await.unwrap();
        sender.close().await.unwrap();
        assert!(sender.is_initialized());
        assert!(sender.is_closed());

        let refusing = MockSender::refusing_init();
        assert!(matches!(refusing.init().await, Err(QueueError::SenderInit(_))));
    }
}
