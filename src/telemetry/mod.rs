//! Telemetry: tracing setup, Prometheus metrics, log redaction.

pub mod metrics;
pub mod redact;
pub mod tracing;

pub use metrics::MetricsState;
pub use tracing::init_telemetry;
