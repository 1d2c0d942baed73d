//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (127.0.0.1 or ::1)
//!     → listener.rs (bind loopback addresses, accept from any)
//!     → connection.rs (sequence number, peer, accept time)
//!     → Hand off to the accept loop in http/server.rs
//! ```
//!
//! # Design Decisions
//! - Loopback only; the local leg is plain HTTP
//! - One accepted connection carries exactly one request

pub mod connection;
pub mod listener;

pub use connection::{RequestContext, RequestSequence};
pub use listener::{ListenerError, ProxyListener};
