use std::str::FromStr;
use std::time::Duration;

use crate::error::{QueueError, QueueResult};
use crate::scheduler::RetryPolicy;

/// Placeholder substituted with the recipient's name at batching time
pub const DEFAULT_PLACEHOLDER: &str = "[Recipient Name]";

/// Longest lease a worker may hold on one job
pub const MAX_LEASE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound for both the base and the capped retry delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration for the dispatch adapter and its worker pool
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of concurrent workers draining the queue
    pub workers: usize,
    /// Global send budget shared by all workers
    pub rate_limit: RateLimitConfig,
    /// Retry/backoff policy for failed jobs
    pub retry: RetryPolicy,
    /// Maximum recipients per job; clamped to `rate_limit.max`
    pub max_chunk_size: usize,
    /// Template placeholder replaced by each recipient's name
    pub placeholder: String,
    /// When true, any failed recipient fails the whole batch job
    pub require_full_batch_success: bool,
    /// How many finished jobs the backend keeps around for status queries
    pub retention: RetentionPolicy,
    /// How long a worker owns a job without reporting progress
    pub lease_duration: Duration,
    /// Idle sleep between dequeue attempts when no job is ready
    pub poll_interval: Duration,
    /// Tick of the delayed-job promoter
    pub promote_interval: Duration,
    /// Pause after a store error before a worker tries again
    pub error_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            max_chunk_size: 10,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            require_full_batch_success: false,
            retention: RetentionPolicy::default(),
            lease_duration: Duration::from_secs(300), // 5 minutes
            poll_interval: Duration::from_millis(100),
            promote_interval: Duration::from_millis(250),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// At most `max` sends per sliding window of `duration`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max: u32,
    pub duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max: 10,
            duration: Duration::from_millis(1000),
        }
    }
}

/// Bounded retention of finished jobs (`None` keeps everything, a limit must be at least 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_completed: Option<usize>,
    pub keep_failed: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_completed: Some(1000),
            keep_failed: Some(5000),
        }
    }
}

impl RetentionPolicy {
    pub fn keep_all() -> Self {
        Self {
            keep_completed: None,
            keep_failed: None,
        }
    }
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `NOTIFY_*` environment variables, falling back to defaults
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, rules table, test map)
    pub fn from_lookup<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let keep = |key: &str, default: Option<usize>| -> QueueResult<Option<usize>> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) if raw.trim().eq_ignore_ascii_case("all") => Ok(None),
                Some(raw) => parse_value(key, &raw).map(Some),
            }
        };

        let config = Self {
            workers: read(&lookup, "NOTIFY_WORKERS", defaults.workers)?,
            rate_limit: RateLimitConfig {
                max: read(&lookup, "NOTIFY_RATE_LIMIT_MAX", defaults.rate_limit.max)?,
                duration: Duration::from_millis(read(
                    &lookup,
                    "NOTIFY_RATE_LIMIT_DURATION_MS",
                    defaults.rate_limit.duration.as_millis() as u64,
                )?),
            },
            retry: RetryPolicy {
                max_attempts: read(&lookup, "NOTIFY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                base_delay: Duration::from_millis(read(
                    &lookup,
                    "NOTIFY_BACKOFF_BASE_MS",
                    defaults.retry.base_delay.as_millis() as u64,
                )?),
                max_delay: Duration::from_millis(read(
                    &lookup,
                    "NOTIFY_BACKOFF_MAX_MS",
                    defaults.retry.max_delay.as_millis() as u64,
                )?),
                jitter: read(&lookup, "NOTIFY_BACKOFF_JITTER", defaults.retry.jitter)?,
            },
            max_chunk_size: read(&lookup, "NOTIFY_CHUNK_SIZE", defaults.max_chunk_size)?,
            placeholder: lookup("NOTIFY_PLACEHOLDER").unwrap_or(defaults.placeholder),
            require_full_batch_success: read(
                &lookup,
                "NOTIFY_REQUIRE_FULL_BATCH",
                defaults.require_full_batch_success,
            )?,
            retention: RetentionPolicy {
                keep_completed: keep("NOTIFY_KEEP_COMPLETED", defaults.retention.keep_completed)?,
                keep_failed: keep("NOTIFY_KEEP_FAILED", defaults.retention.keep_failed)?,
            },
            lease_duration: Duration::from_secs(read(
                &lookup,
                "NOTIFY_LEASE_SECS",
                defaults.lease_duration.as_secs(),
            )?),
            poll_interval: Duration::from_millis(read(
                &lookup,
                "NOTIFY_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            promote_interval: Duration::from_millis(read(
                &lookup,
                "NOTIFY_PROMOTE_INTERVAL_MS",
                defaults.promote_interval.as_millis() as u64,
            )?),
            error_backoff: defaults.error_backoff,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the worker pool cannot run with
    pub fn validate(&self) -> QueueResult<()> {
        if self.workers == 0 {
            return Err(QueueError::Config("workers must be at least 1".into()));
        }
        if self.rate_limit.max == 0 || self.rate_limit.duration.is_zero() {
            return Err(QueueError::Config("rate limit must allow at least one send per non-zero window".into()));
        }
        if self.max_chunk_size == 0 {
            return Err(QueueError::Config("max_chunk_size must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(QueueError::Config("max_attempts must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(QueueError::Config("backoff jitter must be within 0.0..=1.0".into()));
        }
        if self.retry.base_delay > MAX_RETRY_DELAY || self.retry.max_delay > MAX_RETRY_DELAY {
            return Err(QueueError::Config(format!(
                "backoff delays must not exceed {}s",
                MAX_RETRY_DELAY.as_secs()
            )));
        }
        if self.lease_duration.is_zero() || self.lease_duration > MAX_LEASE_DURATION {
            return Err(QueueError::Config(format!(
                "lease duration must be within 1..={}s",
                MAX_LEASE_DURATION.as_secs()
            )));
        }
        if self.placeholder.is_empty() {
            return Err(QueueError::Config("placeholder must not be empty".into()));
        }
        if self.retention.keep_completed == Some(0) || self.retention.keep_failed == Some(0) {
            return Err(QueueError::Config(
                "retention must keep at least one finished job; use `all` for no limit".into(),
            ));
        }
        Ok(())
    }

    /// Chunk size actually used by the batcher: never more than one window's budget
    pub fn effective_chunk_size(&self) -> usize {
        self.max_chunk_size.min(self.rate_limit.max as usize).max(1)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_rate_limit(mut self, max: u32, duration: Duration) -> Self {
        self.rate_limit = RateLimitConfig { max, duration };
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn require_full_batch_success(mut self) -> Self {
        self.require_full_batch_success = true;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_promote_interval(mut self, interval: Duration) -> Self {
        self.promote_interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

fn read<T, F>(lookup: &F, key: &str, default: T) -> QueueResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> QueueResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| QueueError::Config(format!("{} has an invalid value: {:?}", key, raw)))
}
