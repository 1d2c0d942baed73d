//! Secret acquisition.
//!
//! The credential resolver never asks for a password itself; it is handed a
//! [`Secret`] obtained from one of these sources at startup.

use crate::error::{ProxyError, ProxyResult};

/// A password held in memory for the process lifetime.
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw value. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Where the upstream password comes from.
pub trait SecretSource {
    fn read_secret(&self) -> ProxyResult<Secret>;
}

/// Masked interactive prompt on the controlling terminal.
///
/// Empty input is not accepted; the prompt repeats until something is typed.
#[derive(Debug, Clone)]
pub struct TerminalSecretSource {
    prompt: String,
}

impl TerminalSecretSource {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Default for TerminalSecretSource {
    fn default() -> Self {
        Self::new("Provide password")
    }
}

impl SecretSource for TerminalSecretSource {
    fn read_secret(&self) -> ProxyResult<Secret> {
        dialoguer::Password::new()
            .with_prompt(&self.prompt)
            .interact()
            .map(Secret::new)
            .map_err(|e| ProxyError::Configuration(format!("failed to read password: {}", e)))
    }
}

/// Password taken from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvSecretSource {
    var: String,
}

impl EnvSecretSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl SecretSource for EnvSecretSource {
    fn read_secret(&self) -> ProxyResult<Secret> {
        std::env::var(&self.var)
            .ok()
            .filter(|value| !value.is_empty())
            .map(Secret::new)
            .ok_or_else(|| {
                ProxyError::Configuration(format!("environment variable {} is not set or empty", self.var))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn env_source_reads_variable() {
        std::env::set_var("CREDENTIAL_PROXY_TEST_SECRET", "s3cret");
        let secret = EnvSecretSource::new("CREDENTIAL_PROXY_TEST_SECRET")
            .read_secret()
            .unwrap();
        assert_eq!(secret.expose(), "s3cret");
    }

    #[test]
    fn env_source_missing_variable_is_configuration_error() {
        let err = EnvSecretSource::new("CREDENTIAL_PROXY_TEST_UNSET_VARIABLE")
            .read_secret()
            .unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));
    }

    #[test]
    fn env_source_empty_variable_is_missing() {
        std::env::set_var("CREDENTIAL_PROXY_TEST_EMPTY_SECRET", "");
        let err = EnvSecretSource::new("CREDENTIAL_PROXY_TEST_EMPTY_SECRET")
            .read_secret()
            .unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(ref m) if m.contains("empty")));
    }
}
