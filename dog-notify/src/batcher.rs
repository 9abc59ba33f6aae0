use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{DispatchConfig, DEFAULT_PLACEHOLDER};
use crate::error::ValidationError;
use crate::types::{Envelope, JobPriority, NewJob, NotificationPayload};

/// A bulk send request as received from the submission front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSubmission {
    pub recipients: Vec<String>,
    pub subject: String,
    /// Body template; may contain the recipient placeholder
    pub content: String,
    /// Per-recipient names, index-aligned with `recipients`
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub priority: JobPriority,
}

impl BulkSubmission {
    pub fn new<I, S>(recipients: I, subject: impl Into<String>, content: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipients: recipients.into_iter().map(Into::into).collect(),
            subject: subject.into(),
            content: content.into(),
            names: None,
            priority: JobPriority::default(),
        }
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Reject malformed submissions before anything is enqueued
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.recipients.is_empty() {
            return Err(ValidationError::EmptyRecipients);
        }
        if let Some(index) = self.recipients.iter().position(|r| r.trim().is_empty()) {
            return Err(ValidationError::BlankRecipient(index));
        }
        if self.subject.trim().is_empty() {
            return Err(ValidationError::MissingSubject);
        }
        if self.content.trim().is_empty() {
            return Err(ValidationError::MissingContent);
        }
        if let Some(names) = &self.names {
            if names.len() != self.recipients.len() {
                return Err(ValidationError::NamesMismatch {
                    recipients: self.recipients.len(),
                    names: names.len(),
                });
            }
        }
        Ok(())
    }
}

/// Splits bulk submissions into bounded jobs and renders each recipient's body
#[derive(Debug, Clone)]
pub struct Batcher {
    chunk_size: usize,
    placeholder: String,
    max_attempts: u32,
}

impl Batcher {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            max_attempts: 3,
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        let chunk_size = config.effective_chunk_size();
        if chunk_size < config.max_chunk_size {
            warn!(
                configured = config.max_chunk_size,
                window_capacity = config.rate_limit.max,
                "max_chunk_size exceeds rate limit window capacity, clamping to {}",
                chunk_size
            );
        }
        Self {
            chunk_size,
            placeholder: config.placeholder.clone(),
            max_attempts: config.retry.max_attempts,
        }
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// One job per chunk, in submission order
    pub fn build_jobs(&self, submission: &BulkSubmission) -> Result<Vec<NewJob>, ValidationError> {
        submission.validate()?;

        let envelopes: Vec<Envelope> = submission
            .recipients
            .iter()
            .enumerate()
            .map(|(i, to)| {
                let name = submission.names.as_ref().map(|names| names[i].as_str());
                Envelope::new(to.trim(), self.render(&submission.content, name))
            })
            .collect();

        let jobs: Vec<NewJob> = envelopes
            .chunks(self.chunk_size)
            .map(|chunk| {
                NewJob::new(NotificationPayload::batch(submission.subject.clone(), chunk.to_vec()))
                    .with_priority(submission.priority)
                    .with_max_attempts(self.max_attempts)
            })
            .collect();

        debug!(
            recipients = submission.recipients.len(),
            jobs = jobs.len(),
            chunk_size = self.chunk_size,
            "batched submission"
        );
        Ok(jobs)
    }

    /// A single-recipient job; its send failure fails the whole job
    pub fn build_single(&self, to: &str, subject: &str, content: &str) -> Result<NewJob, ValidationError> {
        let submission = BulkSubmission::new([to], subject, content);
        submission.validate()?;
        Ok(NewJob::new(NotificationPayload::single(to.trim(), subject, content))
            .with_max_attempts(self.max_attempts))
    }

    /// Substitute every occurrence of the placeholder; without a name the template is used as is
    pub fn render(&self, template: &str, name: Option<&str>) -> String {
        match name {
            Some(name) => template.replace(&self.placeholder, name),
            None => template.to_string(),
        }
    }
}

impl Default for Batcher {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}
