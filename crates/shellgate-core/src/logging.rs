//! Tracing initialization.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber with `info` as the default level.
/// `RUST_LOG` overrides as usual. Safe to call more than once.
pub fn init() {
    init_with_default("info");
}

/// Initialize with an explicit default filter directive.
pub fn init_with_default(directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
