//! Observability for the call session core.
//!
//! Logging goes through `tracing` with `call.*` targets; the counters and
//! gauges in [`metrics`] go through the `metrics` facade.

pub mod metrics;
