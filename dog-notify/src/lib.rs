//! # dog-notify: Bulk Notification Dispatch
//!
//! **Batched, rate-limited, retried delivery of one message to many recipients**
//!
//! A bulk submission is validated, personalized and split into batch jobs.
//! A pool of workers drains the job queue under one shared sliding-window rate
//! limit, retries failed jobs with exponential backoff, and records per-recipient
//! outcomes that callers can poll or subscribe to.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_notify::prelude::*;
//!
//! # async fn run() -> QueueResult<()> {
//! let adapter = DispatchAdapter::new(
//!     MemoryBackend::new(),
//!     MockSender::new(),
//!     DispatchConfig::from_env()?,
//! )?;
//! let pool = adapter.start().await?;
//!
//! let submission = BulkSubmission::new(["ada@example.com", "alan@example.com"], "Hello", "Hi [Recipient Name]!")
//!     .with_names(["Ada", "Alan"]);
//! let job_ids = adapter.submit(submission).await?;
//!
//! if let Some(status) = adapter.job_status(&job_ids[0]).await? {
//!     println!("{} is {} ({}%)", status.id, status.state, status.progress);
//! }
//!
//! pool.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod sender;
pub mod rate_limit;
pub mod batcher;
pub mod scheduler;
pub mod backend;
pub mod status;
pub mod adapter;
pub mod observability;

mod worker;

// Core API exports
pub use adapter::{DispatchAdapter, WorkerPoolHandle};
pub use types::{
    JobId, JobPriority, JobState, JobRecord, JobCounts, JobEvent, LeasedJob, NewJob,
    Envelope, NotificationPayload, Recipients, DeliveryReceipt, DeliveryResult,
};
pub use error::{QueueError, QueueResult, JobError, SendError, ValidationError};
pub use config::{DispatchConfig, RateLimitConfig, RetentionPolicy};
pub use batcher::{Batcher, BulkSubmission};
pub use rate_limit::{RateLimiter, RateLimitPermit};
pub use scheduler::{RetryPolicy, RetryDecision, DelayedJobPromoter};
pub use status::{StatusTracker, JobStatusView, QueueAggregate};
pub use backend::QueueBackend;
pub use sender::{NotificationSender, OutboundMessage, MockSender};

#[cfg(feature = "memory")]
pub use backend::memory::MemoryBackend;

// Observability exports
pub use observability::{ObservabilityLayer, LiveMetrics};

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

/// Everything needed to submit notifications and run a worker pool
pub mod prelude {
    pub use crate::{
        DispatchAdapter, DispatchConfig, WorkerPoolHandle, BulkSubmission, QueueBackend,
        NotificationSender, OutboundMessage,
    };

    pub use crate::{
        JobId, JobPriority, JobState, JobEvent, JobStatusView, DeliveryReceipt, DeliveryResult,
        QueueError, QueueResult, JobError, SendError,
    };

    #[cfg(feature = "memory")]
    pub use crate::MemoryBackend;
    pub use crate::MockSender;

    pub use crate::{ObservabilityLayer, LiveMetrics};

    pub use async_trait::async_trait;
}
