//! Observability layer shared by the leader and unit daemons: structured
//! logging, an in-process metrics collector with Prometheus export, and
//! Axum middleware for request tracing/metrics.

pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod tracing_setup;
