//! Error taxonomy for the forwarding pipeline.
//!
//! Every stage of a request returns a `ProxyResult`; the accept loop is the
//! only place where these errors are turned into log lines. Nothing in here
//! terminates the process on its own.

use thiserror::Error;

/// Errors produced while building the proxy or serving a single request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Missing or invalid configuration (upstream authority, credentials).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed inbound request; only that request is skipped.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream could not be reached (refused, DNS, TLS, broken connection).
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// No upstream response before the deadline or the shutdown signal.
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Upstream authentication challenge could not be answered.
    #[error("Authentication error: {0}")]
    Authentication(String),
}

impl ProxyError {
    /// Short stable label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Configuration(_) => "configuration",
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::UpstreamUnavailable(_) => "upstream_unavailable",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::Authentication(_) => "authentication",
        }
    }
}

/// Result type for pipeline operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
