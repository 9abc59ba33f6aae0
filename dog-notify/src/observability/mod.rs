pub mod metrics;
pub mod tracing;
pub mod analytics;

pub use metrics::{LiveMetrics, MetricsSnapshot, GlobalMetrics, PerformanceMetrics};
pub use analytics::ObservabilityLayer;
pub use self::tracing::{job_span, LogFormat};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::init_tracing;
