//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::ValidationError;
use crate::error::ProxyError;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for ProxyError {
    fn from(err: ConfigError) -> Self {
        ProxyError::Configuration(err.to_string())
    }
}

/// Parse a TOML file without semantic validation.
///
/// Command line overrides are applied to the result before
/// [`validate_config`](crate::config::validate_config) runs.
pub fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_valid_file() {
        let file = write_config(
            r#"
            UpstreamURI = "http://backend.local"
            UserName = "jdoe"
            Domain = "CORP"
            AuthenticationMethod = "Negotiate"
            "#,
        );
        let config = read_config(file.path()).unwrap();
        assert_eq!(config.upstream(), Some("http://backend.local"));
        assert_eq!(config.domain.as_deref(), Some("CORP"));
        assert_eq!(config.local_port, 8001);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let file = write_config("LocalPort = \"eighty\"");
        let err = read_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_errors_surface_as_configuration_error() {
        let file = write_config("UseDefaultCredentials = true");
        let config = read_config(file.path()).unwrap();
        let err = ConfigError::Validation(crate::config::validate_config(&config).unwrap_err());

        let err: ProxyError = err.into();
        assert!(matches!(err, ProxyError::Configuration(ref m) if m.contains("UpstreamURI is empty")));
    }
}
