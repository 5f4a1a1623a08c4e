//! Prometheus metrics and structured logging for the price pusher.
//!
//! - Prometheus metrics for pushes, failures, staleness and feed health
//! - Structured logging with tracing (JSON in production)
//! - Optional `/metrics` HTTP endpoint

pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use server::run_metrics_server;
