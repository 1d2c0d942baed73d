//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Acquire secret → Resolve credentials → Build server → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Cancel pending accept and upstream call → "Full stop"
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, listeners last
//! - Shutdown is cooperative; a partially written response is not retried

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{acquire_secret, check_config, start, StartupError};
