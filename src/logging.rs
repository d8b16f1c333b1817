//! Structured logging (SPEC_FULL.md §10.2).
//!
//! Grounded on the teacher's `logging.rs`, minus the OpenTelemetry exporter
//! layer: that layer feeds the teacher's metrics/web surface, out of scope
//! here (§1 non-goals: "management/metrics endpoints"). The `EnvFilter`
//! driven `fmt` layer it wraps is ambient, not a non-goal, so it's kept.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `info` (or `debug` when `--debug` was passed) when unset.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
