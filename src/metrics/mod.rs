//! Metrics and observability
//!
//! Atomic counters on the hot path, mirrored into a Prometheus exporter and
//! a JSON status endpoint.

mod api;
mod counters;
mod exporter;

pub use api::{start_api_server, StatusSource};
pub use counters::*;
pub use exporter::init_metrics;
