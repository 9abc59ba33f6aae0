use thiserror::Error;

use crate::types::JobState;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue, worker and status operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// The backing store could not be reached. Never reported as "no job".
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid lease token")]
    InvalidLeaseToken,

    #[error("Job is already in terminal state")]
    JobAlreadyTerminal,

    /// Active jobs are owned by a worker and cannot be removed.
    #[error("Job {0} is active and locked by a worker")]
    JobLocked(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job execution failed: {0}")]
    JobFailed(#[from] JobError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Notification sender failed to initialize: {0}")]
    SenderInit(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Worker shutdown")]
    WorkerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Check if this error means the store itself is unreachable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::QueueUnavailable(_))
    }
}

/// Malformed submission, rejected before any job is created
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("recipients must be a non-empty list")]
    EmptyRecipients,

    #[error("recipient at position {0} is blank")]
    BlankRecipient(usize),

    #[error("subject is required")]
    MissingSubject,

    #[error("content is required")]
    MissingContent,

    #[error("names length ({names}) does not match recipients length ({recipients})")]
    NamesMismatch { recipients: usize, names: usize },
}

/// A single recipient's delivery attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SendError {
    pub message: String,
    /// The transport rejected the message outright; another attempt cannot succeed
    pub permanent: bool,
}

impl SendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }
}

/// Job execution outcome - determines retry behavior
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// Retryable error - will schedule retry if attempts remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent error - fail immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<SendError> for JobError {
    fn from(err: SendError) -> Self {
        if err.permanent {
            Self::Permanent(err.message)
        } else {
            Self::Retryable(err.message)
        }
    }
}
