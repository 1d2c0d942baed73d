//! Configuration schema definitions.
//!
//! Keys are PascalCase so an operator's config file reads the same as the
//! documented surface (`LocalPort`, `UpstreamURI`, ...).

use serde::Deserialize;

/// Default local listener port.
pub const DEFAULT_LOCAL_PORT: u16 = 8001;

/// Authentication scheme used when `AuthenticationMethod` is not set.
pub const DEFAULT_AUTHENTICATION_METHOD: &str = "NTLM";

/// Root configuration for the credential proxy.
///
/// Constructed once at startup and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ProxyConfig {
    /// Loopback port the local listener binds to.
    pub local_port: u16,

    /// Base URI every request is forwarded to (e.g. "https://intranet.corp").
    #[serde(rename = "UpstreamURI")]
    pub upstream_uri: Option<String>,

    /// Use the ambient identity instead of explicit credentials.
    pub use_default_credentials: bool,

    /// Windows domain for explicit credentials.
    pub domain: Option<String>,

    /// User name for explicit credentials.
    pub user_name: Option<String>,

    /// Scheme name passed to the credential binding (NTLM, Negotiate, Basic).
    pub authentication_method: String,

    /// Extra request header names never copied to the upstream request.
    pub ignored_request_headers: Vec<String>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            local_port: DEFAULT_LOCAL_PORT,
            upstream_uri: None,
            use_default_credentials: false,
            domain: None,
            user_name: None,
            authentication_method: DEFAULT_AUTHENTICATION_METHOD.to_string(),
            ignored_request_headers: Vec::new(),
            timeouts: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Upstream base URI with surrounding whitespace removed, if configured.
    pub fn upstream(&self) -> Option<&str> {
        self.upstream_uri
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TimeoutConfig {
    /// Upper bound for one upstream exchange, authentication legs included.
    pub request_secs: u64,

    /// How long a local client may take to send its request head.
    pub header_read_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 100,
            header_read_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
