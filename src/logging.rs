//! Logging configuration for Sluice.
//!
//! Library consumers own their subscriber; this module offers a small
//! stderr initializer for binaries, tests, and examples.

use tracing_subscriber::EnvFilter;

/// Initializes logging to stderr.
///
/// Respects `RUST_LOG`, defaulting to `info`. Safe to call more than once;
/// subsequent calls are no-ops if a global subscriber is already set.
pub fn init_stderr_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
