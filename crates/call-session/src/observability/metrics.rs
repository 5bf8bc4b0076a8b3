//! Metrics definitions for the call session core.
//!
//! All metrics follow Prometheus naming conventions:
//! - `call_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `cell`: one value per cell label (network, media, plus test labels)
//! - `route`: 4 values (connectivity, signaling, packet_received, packet_to_send)
//! - `state`: 2 values (established, reconnecting)
//!
//! No recorder is installed by this crate. Without one the `metrics` facade
//! discards everything, which is the default for library consumers.

use metrics::{counter, gauge};

/// Record a job executed by a confined cell.
///
/// Metric: `call_cell_jobs_total`
/// Labels: `cell`
pub fn record_cell_job(cell: &'static str) {
    counter!("call_cell_jobs_total", "cell" => cell).increment(1);
}

/// Record a panic contained inside a confined cell (factory or job).
///
/// Metric: `call_cell_panics_total`
/// Labels: `cell`
///
/// ALERT: Any non-zero value indicates a bug in an actor implementation.
pub fn record_cell_panic(cell: &'static str) {
    counter!("call_cell_panics_total", "cell" => cell).increment(1);
}

/// Set the pending job count of a confined cell.
///
/// Metric: `call_cell_mailbox_depth`
/// Labels: `cell`
pub fn set_cell_mailbox_depth(cell: &'static str, depth: usize) {
    // usize to f64 conversion is safe for realistic mailbox depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("call_cell_mailbox_depth", "cell" => cell).set(depth as f64);
}

/// Record a callback that found its session (or destination cell) gone.
///
/// Metric: `call_stale_callbacks_total`
/// Labels: `route`
///
/// Expected during teardown; a steady non-zero rate outside teardown
/// suggests sessions are being dropped while their actors are still busy.
pub fn record_stale_callback(route: &'static str) {
    counter!("call_stale_callbacks_total", "route" => route).increment(1);
}

/// Record a session state delivered to the state observer.
///
/// Metric: `call_session_state_updates_total`
/// Labels: `state`
pub fn record_state_update(state: &'static str) {
    counter!("call_session_state_updates_total", "state" => state).increment(1);
}
