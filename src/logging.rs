//! Structured logging with tracing.
//!
//! `RUST_LOG` wins when set; otherwise `level` (from `--log-level` or
//! `[logging] level`) is used as the filter. Logs go to stderr.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A subscriber may already be installed (tests, embedding callers).
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
