use tracing::{info_span, Span};

use crate::types::{LeasedJob, WorkerId};

/// Span wrapping one attempt of one job
pub fn job_span(job: &LeasedJob, worker: &WorkerId) -> Span {
    info_span!(
        "notification_job",
        job_id = %job.job_id(),
        worker = %worker,
        attempt = job.attempt(),
        max_attempts = job.record.max_attempts,
        recipients = job.record.recipient_count(),
    )
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, for log aggregation
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Install a global subscriber filtered by `RUST_LOG` (default `dog_notify=info`).
///
/// Safe to call multiple times; returns false when a subscriber was already set.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(format: LogFormat) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dog_notify=info"));

    let result = match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .try_init(),
    };

    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobId, JobRecord, LeaseToken, NewJob, NotificationPayload};
    use chrono::Utc;

    #[test]
    fn parses_log_format() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn job_span_is_named() {
        let record = JobRecord::new(
            JobId::new(),
            NewJob::new(NotificationPayload::single("a@x.io", "S", "B")),
            1,
            Utc::now(),
        );
        let job = LeasedJob::new(record, LeaseToken::new(), Utc::now());
        let span = job_span(&job, &WorkerId::from("w-1"));
        // disabled without a subscriber, but the metadata is still there
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "notification_job");
        }
    }

    #[cfg(feature = "tracing-basic")]
    #[test]
    fn second_init_is_a_no_op() {
        let _ = init_tracing(LogFormat::Text);
        assert!(!init_tracing(LogFormat::Json));
    }
}
