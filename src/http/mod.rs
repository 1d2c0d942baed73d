//! HTTP forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! Local connection (one request)
//!     → server.rs (accept loop, hyper http1, failure isolation)
//!     → request.rs (capture inbound, build outbound)
//!         → filter.rs (request header stop-list)
//!     → client.rs (upstream call, authentication handshake, timeout)
//!     → response.rs (content headers, status, Content-Length)
//!     → Written back to the local connection
//! ```

pub mod client;
pub mod filter;
pub mod request;
pub mod response;
pub mod server;

pub use client::ForwarderClient;
pub use filter::HeaderFilterSet;
pub use request::{transform, InboundRequest, OutboundRequest};
pub use response::UpstreamResponse;
pub use server::{PipelineError, ProxyServer, Stage};
