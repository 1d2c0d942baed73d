//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Accept loop opens a `request` span carrying the sequence number
//!     → every event inside the pipeline inherits it
//!     → logging.rs (fmt layer + EnvFilter) writes to stderr
//! ```
//!
//! # Design Decisions
//! - Structured key/value fields, not formatted strings
//! - Header dumps only at `trace`
//! - Secrets never reach a log line

pub mod logging;

pub use logging::init_logging;
