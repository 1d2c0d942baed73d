//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration and report every problem at once, before any prompt
//! - Acquire the secret, only when explicit credentials are configured
//! - Resolve the credential binding, build the server, bind the listener
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners bind last (traffic only when ready)

use thiserror::Error;

use crate::auth::{resolve_credentials, Secret, SecretSource};
use crate::config::{validate_config, ConfigError, ProxyConfig};
use crate::error::ProxyError;
use crate::http::ProxyServer;
use crate::net::{ListenerError, ProxyListener};

/// Errors that stop the process before it serves anything.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ProxyError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Read the secret from `source` unless ambient credentials are configured.
pub fn acquire_secret(config: &ProxyConfig, source: &dyn SecretSource) -> Result<Option<Secret>, ProxyError> {
    if config.use_default_credentials {
        return Ok(None);
    }
    source.read_secret().map(Some)
}

/// Validate `config`, logging every problem found.
pub fn check_config(config: &ProxyConfig) -> Result<(), ProxyError> {
    validate_config(config).map_err(|errors| {
        for error in &errors {
            tracing::error!(error = %error, "Invalid configuration");
        }
        ConfigError::Validation(errors).into()
    })
}

/// Resolve credentials, build the server and bind its listener.
///
/// `config` must already have passed [`check_config`].
pub async fn start(config: &ProxyConfig, secret: Option<Secret>) -> Result<(ProxyServer, ProxyListener), StartupError> {
    let binding = resolve_credentials(config, secret)?;
    let server = ProxyServer::new(config, binding)?;
    let listener = ProxyListener::bind(config.local_port).await?;

    Ok((server, listener))
}
