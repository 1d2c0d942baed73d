//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Upstream must be an absolute http(s) URL with a host
//! - Authentication method must be one the forwarder can speak
//! - Ignored header names must be valid HTTP header names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use hyper::header::HeaderName;
use thiserror::Error;

use crate::auth::AuthScheme;
use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("UpstreamURI is empty")]
    MissingUpstream,

    #[error("UpstreamURI '{0}' is not a valid absolute URL")]
    InvalidUpstream(String),

    #[error("UpstreamURI '{0}' must not carry user info, a query or a fragment")]
    UpstreamHasExtras(String),

    #[error("UpstreamURI scheme '{0}' is not http or https")]
    UnsupportedUpstreamScheme(String),

    #[error("AuthenticationMethod '{0}' is not supported")]
    UnknownAuthenticationMethod(String),

    #[error("UserName is required when UseDefaultCredentials is false")]
    MissingUserName,

    #[error("IgnoredRequestHeaders entry '{0}' is not a valid header name")]
    InvalidHeaderName(String),

    #[error("Timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.upstream() {
        None => errors.push(ValidationError::MissingUpstream),
        Some(raw) => match url::Url::parse(raw) {
            Ok(url) if !matches!(url.scheme(), "http" | "https") => {
                errors.push(ValidationError::UnsupportedUpstreamScheme(url.scheme().to_string()));
            }
            Ok(url) if url.host_str().map_or(true, str::is_empty) => {
                errors.push(ValidationError::InvalidUpstream(raw.to_string()));
            }
            Ok(url)
                if !url.username().is_empty()
                    || url.password().is_some()
                    || url.query().is_some()
                    || url.fragment().is_some() =>
            {
                errors.push(ValidationError::UpstreamHasExtras(redact_userinfo(&url)));
            }
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::InvalidUpstream(raw.to_string())),
        },
    }

    if config.authentication_method.parse::<AuthScheme>().is_err() {
        errors.push(ValidationError::UnknownAuthenticationMethod(
            config.authentication_method.clone(),
        ));
    }

    if !config.use_default_credentials
        && config.user_name.as_deref().map_or(true, |u| u.trim().is_empty())
    {
        errors.push(ValidationError::MissingUserName);
    }

    for name in &config.ignored_request_headers {
        if HeaderName::from_bytes(name.trim().as_bytes()).is_err() {
            errors.push(ValidationError::InvalidHeaderName(name.clone()));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("RequestSecs"));
    }
    if config.timeouts.header_read_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("HeaderReadSecs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// The URL with any password replaced, safe to log.
fn redact_userinfo(url: &url::Url) -> String {
    let mut shown = url.clone();
    if shown.password().is_some() {
        let _ = shown.set_password(Some("***"));
    }
    shown.to_string()
}
