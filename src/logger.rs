//! Tracing setup for binaries and tests that drive the engine.
//!
//! Elimination and combination log their dimensions and ranks at DEBUG;
//! installing this subscriber (or any other) makes those spans visible.
//! `RUST_LOG` overrides the default level.

use tracing::Level;

/// Install the default subscriber at INFO level.
///
/// Safe to call more than once: if a global subscriber is already set, later
/// calls leave it in place. That makes it usable from parallel test runs.
///
/// # Example
/// ```no_run
/// use terrace_solver::init_logger;
///
/// fn main() {
///     init_logger();
///     tracing::info!("elimination driver started");
/// }
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the default subscriber with a chosen default level.
///
/// # Arguments
/// * `default_level` - The level used when `RUST_LOG` is not set
pub fn init_logger_with_level(default_level: Level) {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
