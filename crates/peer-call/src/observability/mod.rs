//! Observability for Peer Call.
//!
//! Recoverable failures never change control flow; they are surfaced here
//! instead. Every metric label is bounded by the code that records it.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `pc_signaling_registrations_total` | Counter | `outcome` | Relay registration attempts |
//! | `pc_signaling_recreations_total` | Counter | none | Timer-driven signaling rebuilds |
//! | `pc_capture_attempts_total` | Counter | `outcome` | Capture acquisition attempts |
//! | `pc_call_placements_total` | Counter | `outcome` | Outbound placement attempts |
//! | `pc_call_connected` | Gauge | none | 1 while the call has remote media |
//! | `pc_call_setup_seconds` | Histogram | none | Call creation to remote media |
//! | `pc_device_switches_total` | Counter | `path` | Completed device switches |
//! | `pc_stale_callbacks_total` | Counter | `source` | Late callbacks ignored |
//! | `pc_absorbed_failures_total` | Counter | `kind` | Recoverable failures absorbed |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
