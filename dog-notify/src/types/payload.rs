use serde::{Deserialize, Serialize};

/// One rendered message for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: String,
    /// Body with the recipient placeholder already substituted
    pub body: String,
}

impl Envelope {
    pub fn new(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            body: body.into(),
        }
    }
}

/// Who a job delivers to.
///
/// A `Single` job fails as a whole when its send fails. A `Batch` job records
/// each recipient's outcome independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "envelopes", rename_all = "lowercase")]
pub enum Recipients {
    Single(Envelope),
    Batch(Vec<Envelope>),
}

impl Recipients {
    pub fn envelopes(&self) -> &[Envelope] {
        match self {
            Self::Single(envelope) => std::slice::from_ref(envelope),
            Self::Batch(envelopes) => envelopes,
        }
    }

    pub fn len(&self) -> usize {
        self.envelopes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes().is_empty()
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}

/// Job payload (`data` in the persisted record)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub subject: String,
    pub recipients: Recipients,
}

impl NotificationPayload {
    pub fn single(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            recipients: Recipients::Single(Envelope::new(to, body)),
        }
    }

    pub fn batch(subject: impl Into<String>, envelopes: Vec<Envelope>) -> Self {
        Self {
            subject: subject.into(),
            recipients: Recipients::Batch(envelopes),
        }
    }

    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.recipients.envelopes().iter().map(|e| e.to.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_payload_exposes_one_envelope() {
        let payload = NotificationPayload::single("a@example.com", "Hi", "Hello");
        assert!(payload.recipients.is_single());
        assert_eq!(payload.recipient_count(), 1);
        assert_eq!(payload.addresses().collect::<Vec<_>>(), vec!["a@example.com"]);
    }

    #[test]
    fn batch_payload_serializes_with_kind_tag() {
        let payload = NotificationPayload::batch(
            "Hi",
            vec![Envelope::new("a@example.com", "A"), Envelope::new("b@example.com", "B")],
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["recipients"]["kind"], "batch");
        assert_eq!(json["recipients"]["envelopes"][1]["to"], "b@example.com");
    }
}
