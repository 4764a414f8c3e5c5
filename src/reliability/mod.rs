pub mod metrics;
pub mod retry;

#[cfg(feature = "metrics")]
pub use metrics::PrometheusExporter;
pub use metrics::{ForwarderMetrics, MetricsError, MetricsSnapshot};
pub use retry::{RetryConfig, RetryError, RetryPolicy, RetryStrategy};
