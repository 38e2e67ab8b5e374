//! Logging initialization.
//!
//! Structured logs go to stderr through `tracing-subscriber`, filtered by
//! `RUST_LOG` (default `warn`). Primary command output stays on stdout, so
//! scripts can pipe it without log noise.

use tracing_subscriber::EnvFilter;

/// Initialize the stderr subscriber. Safe to call once from `main`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
