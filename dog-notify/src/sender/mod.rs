//! Notification sender seam
//!
//! The transport that delivers a single message (SMTP client, HTTP API, ...)
//! lives outside this crate and plugs in through [`NotificationSender`].

pub mod mock;

pub use mock::{MockSender, SentMessage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{QueueResult, SendError};
use crate::types::{DeliveryReceipt, Envelope};

/// One message for one recipient, as handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

impl OutboundMessage {
    /// Build the message for one envelope; the HTML part mirrors the text part
    pub fn from_envelope(subject: &str, envelope: &Envelope) -> Self {
        Self {
            to: envelope.to.clone(),
            subject: subject.to_string(),
            text_body: envelope.body.clone(),
            html_body: envelope.body.clone(),
        }
    }
}

/// Delivers one message to one recipient
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Prepare the transport; called once before the first job is processed
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Send a single message
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, SendError>;

    /// Release transport resources; called after the worker pool has drained
    async fn close(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Transport name for logs
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_body_mirrors_text_body() {
        let envelope = Envelope::new("a@example.com", "Hello Ada");
        let message = OutboundMessage::from_envelope("Greetings", &envelope);
        assert_eq!(message.to, "a@example.com");
        assert_eq!(message.subject, "Greetings");
        assert_eq!(message.text_body, message.html_body);
    }
}
