//! Metrics definitions for Peer Call.
//!
//! All metrics follow Prometheus naming conventions:
//! - `pc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by the code that records them:
//! - `outcome`: success, failure, skipped
//! - `path`: track_replaced, stream_replaced, constraints_updated
//! - `source`: capture, signaling, placement, connection, timer
//! - `kind`: `CallError::kind()` / `CaptureError::kind()` values

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Call setup spans at least one retry tick, so buckets go up to tens of seconds
        .set_buckets_for_metric(
            Matcher::Full("pc_call_setup_seconds".to_string()),
            &[0.050, 0.100, 0.250, 0.500, 1.000, 2.000, 5.000, 10.000, 30.000],
        )
        .map_err(|e| format!("Failed to set call setup buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Signaling
// ============================================================================

/// Record a relay registration attempt.
///
/// Metric: `pc_signaling_registrations_total`
/// Labels: `outcome` (success, failure)
pub fn record_signaling_registration(outcome: &'static str) {
    counter!("pc_signaling_registrations_total", "outcome" => outcome).increment(1);
}

/// Record that the supervising timer recreated a signaling session.
///
/// Metric: `pc_signaling_recreations_total`
pub fn record_signaling_recreation() {
    counter!("pc_signaling_recreations_total").increment(1);
}

// ============================================================================
// Capture
// ============================================================================

/// Record a capture acquisition attempt.
///
/// Metric: `pc_capture_attempts_total`
/// Labels: `outcome` (success, failure, skipped)
///
/// `skipped` counts poll ticks that found an acquisition already in flight.
pub fn record_capture_attempt(outcome: &'static str) {
    counter!("pc_capture_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a completed device switch.
///
/// Metric: `pc_device_switches_total`
/// Labels: `path` (track_replaced, stream_replaced, constraints_updated)
pub fn record_device_switch(path: &'static str) {
    counter!("pc_device_switches_total", "path" => path).increment(1);
}

// ============================================================================
// Call
// ============================================================================

/// Record a call placement attempt.
///
/// Metric: `pc_call_placements_total`
/// Labels: `outcome` (success, failure, skipped)
pub fn record_call_placement(outcome: &'static str) {
    counter!("pc_call_placements_total", "outcome" => outcome).increment(1);
}

/// Set whether the call is connected.
///
/// Metric: `pc_call_connected`
pub fn set_call_connected(connected: bool) {
    gauge!("pc_call_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record time from call creation (placed or answered) to remote media.
///
/// Metric: `pc_call_setup_seconds`
pub fn record_call_setup(duration: Duration) {
    histogram!("pc_call_setup_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Supervision
// ============================================================================

/// Record a late callback from a replaced or torn-down component.
///
/// Metric: `pc_stale_callbacks_total`
/// Labels: `source` (capture, signaling, placement, connection, timer)
pub fn record_stale_callback(source: &'static str) {
    counter!("pc_stale_callbacks_total", "source" => source).increment(1);
}

/// Record a recoverable failure absorbed by a retry loop.
///
/// Metric: `pc_absorbed_failures_total`
/// Labels: `kind`
pub fn record_absorbed_failure(kind: &'static str) {
    counter!("pc_absorbed_failures_total", "kind" => kind).increment(1);
}
