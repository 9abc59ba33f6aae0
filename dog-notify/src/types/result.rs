use serde::{Deserialize, Serialize};

/// What the transport reported for a successful delivery
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    /// Provider message id, when the transport returns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Raw transport response (e.g. the SMTP "250 OK" line)
    pub response: String,
}

impl DeliveryReceipt {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            message_id: None,
            response: response.into(),
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// Outcome of one recipient within one attempt of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub recipient: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<DeliveryReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DeliveryResult {
    pub fn delivered(recipient: impl Into<String>, receipt: DeliveryReceipt) -> Self {
        Self {
            recipient: recipient.into(),
            success: true,
            info: Some(receipt),
            error_message: None,
        }
    }

    pub fn failed(recipient: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            success: false,
            info: None,
            error_message: Some(error.into()),
        }
    }
}
