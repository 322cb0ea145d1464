//! Observability for runwarden services.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`
//! - **Metrics**: run, provider, and API counters/histograms with Prometheus export
//! - **Middleware**: axum layers for request metrics and request-id propagation

pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod tracing_setup;
