//! Structured logging.
//!
//! # Design Decisions
//! - `RUST_LOG` wins when set; otherwise the configured level applies to this
//!   crate and the HTTP stack stays at `warn`
//! - `--verbose` raises this crate to `trace` (header dumps)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(level: &str, verbose: bool) -> String {
    let level = if verbose { "trace" } else { level.trim() };
    let level = if level.is_empty() { "info" } else { level };
    format!("credential_proxy={},hyper=warn,hyper_util=warn,rustls=warn", level)
}

/// Install the global subscriber. Call once, from `main`.
pub fn init_logging(level: &str, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level, verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
