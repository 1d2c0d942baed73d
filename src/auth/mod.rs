//! Credential resolution subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyConfig + Secret (from secret.rs)
//!     → resolve_credentials()
//!     → CredentialBinding (ambient, or scheme + identity bound to one authority)
//!     → shared read-only with the forwarder client for the process lifetime
//!
//! Per request, on 401 from the upstream:
//!     find_challenge() → Basic header, or ntlm.rs handshake
//! ```
//!
//! # Design Decisions
//! - Binding is created once and never mutated
//! - Credentials are only ever presented to the bound authority
//! - Ambient identity attaches nothing; the upstream sees the request as sent

pub mod ntlm;
pub mod secret;

use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hyper::header::{HeaderMap, HeaderValue, WWW_AUTHENTICATE};
use hyper::Uri;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};

pub use secret::{EnvSecretSource, Secret, SecretSource, TerminalSecretSource};

/// Authentication schemes the forwarder can answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthScheme {
    #[default]
    Ntlm,
    Negotiate,
    Basic,
}

impl AuthScheme {
    /// Scheme token as it appears in `Authorization` / `WWW-Authenticate`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Ntlm => "NTLM",
            AuthScheme::Negotiate => "Negotiate",
            AuthScheme::Basic => "Basic",
        }
    }
}

impl std::fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthScheme {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(AuthScheme::default());
        }
        [AuthScheme::Ntlm, AuthScheme::Negotiate, AuthScheme::Basic]
            .into_iter()
            .find(|scheme| scheme.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProxyError::Configuration(format!("unsupported authentication method '{}'", s)))
    }
}

/// The upstream authority a credential binding is tied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundAuthority {
    scheme: String,
    host: String,
    port: u16,
}

impl BoundAuthority {
    /// Derive the authority from the upstream base URI.
    pub fn parse(upstream: &str) -> ProxyResult<Self> {
        let url = url::Url::parse(upstream)
            .map_err(|e| ProxyError::Configuration(format!("invalid upstream URI '{}': {}", upstream, e)))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyError::Configuration(format!("upstream URI '{}' has no host", upstream)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProxyError::Configuration(format!("upstream URI '{}' has no port", upstream)))?;

        Ok(Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// True if `uri` targets this authority.
    pub fn matches(&self, uri: &Uri) -> bool {
        let scheme = uri.scheme_str().unwrap_or_default().to_ascii_lowercase();
        let port = uri.port_u16().or(match scheme.as_str() {
            "http" => Some(80),
            "https" => Some(443),
            _ => None,
        });
        scheme == self.scheme
            && uri.host().is_some_and(|h| h.eq_ignore_ascii_case(&self.host))
            && port == Some(self.port)
    }
}

impl std::fmt::Display for BoundAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Explicit identity bound to one upstream authority.
#[derive(Debug, Clone)]
pub struct ExplicitCredentials {
    scheme: AuthScheme,
    domain: String,
    username: String,
    secret: Secret,
    authority: BoundAuthority,
}

impl ExplicitCredentials {
    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn authority(&self) -> &BoundAuthority {
        &self.authority
    }

    /// NTLM identity view of these credentials.
    pub fn ntlm_identity(&self) -> ntlm::NtlmIdentity<'_> {
        ntlm::NtlmIdentity {
            domain: &self.domain,
            username: &self.username,
            password: self.secret.expose(),
        }
    }

    /// `Authorization` value for the Basic scheme.
    ///
    /// The user part is `DOMAIN\user` when a domain is configured.
    pub fn basic_authorization(&self) -> ProxyResult<HeaderValue> {
        let user = if self.domain.is_empty() {
            self.username.clone()
        } else {
            format!("{}\\{}", self.domain, self.username)
        };
        let encoded = BASE64.encode(format!("{}:{}", user, self.secret.expose()));
        HeaderValue::from_str(&format!("Basic {}", encoded))
            .map_err(|e| ProxyError::Authentication(format!("invalid Basic credentials: {}", e)))
    }
}

/// How the forwarder authenticates against the upstream.
#[derive(Debug, Clone)]
pub enum CredentialBinding {
    /// Reuse the caller's own identity; nothing is attached by the proxy.
    Ambient,
    /// Scheme and identity bound to a single upstream authority.
    Explicit(ExplicitCredentials),
}

impl CredentialBinding {
    pub fn is_ambient(&self) -> bool {
        matches!(self, CredentialBinding::Ambient)
    }

    /// Credentials to present for `uri`, if any apply.
    pub fn credentials_for(&self, uri: &Uri) -> Option<&ExplicitCredentials> {
        match self {
            CredentialBinding::Explicit(creds) if creds.authority.matches(uri) => Some(creds),
            _ => None,
        }
    }
}

/// Turn configuration and an optional secret into a credential binding.
///
/// Ambient mode needs no secret. Explicit mode requires a non-empty upstream
/// authority and a non-empty secret; both are `Configuration` errors when
/// absent, surfaced at startup rather than per request.
pub fn resolve_credentials(config: &ProxyConfig, secret: Option<Secret>) -> ProxyResult<CredentialBinding> {
    if config.use_default_credentials {
        tracing::debug!("Use default credentials");
        return Ok(CredentialBinding::Ambient);
    }

    let upstream = config.upstream().ok_or_else(|| {
        ProxyError::Configuration("UpstreamURI is required for explicit credentials".into())
    })?;
    let authority = BoundAuthority::parse(upstream)?;
    let scheme: AuthScheme = config.authentication_method.parse()?;

    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProxyError::Configuration("no secret supplied for explicit credentials".into()))?;

    let domain = config.domain.clone().unwrap_or_default();
    let username = config.user_name.clone().unwrap_or_default();

    tracing::debug!(
        scheme = %scheme,
        domain = %domain,
        username = %username,
        authority = %authority,
        "Use new credentials"
    );

    Ok(CredentialBinding::Explicit(ExplicitCredentials {
        scheme,
        domain,
        username,
        secret,
        authority,
    }))
}

/// Look for a `WWW-Authenticate` challenge offering `scheme`.
///
/// Returns the challenge token following the scheme name (empty when the
/// upstream only names the scheme), or `None` when the scheme is not offered.
pub fn find_challenge(headers: &HeaderMap, scheme: AuthScheme) -> Option<String> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|challenge| {
            let challenge = challenge.trim();
            let (name, rest) = challenge.split_once(' ').unwrap_or((challenge, ""));
            name.eq_ignore_ascii_case(scheme.as_str())
                .then(|| rest.trim().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit_config() -> ProxyConfig {
        ProxyConfig {
            upstream_uri: Some("http://backend.local".into()),
            domain: Some("CORP".into()),
            user_name: Some("jdoe".into()),
            ..Default::default()
        }
    }

    #[test]
    fn scheme_parsing() {
        assert_eq!("ntlm".parse::<AuthScheme>().unwrap(), AuthScheme::Ntlm);
        assert_eq!("NEGOTIATE".parse::<AuthScheme>().unwrap(), AuthScheme::Negotiate);
        assert_eq!("Basic".parse::<AuthScheme>().unwrap(), AuthScheme::Basic);
        assert_eq!("".parse::<AuthScheme>().unwrap(), AuthScheme::Ntlm);
        assert!("Digest".parse::<AuthScheme>().is_err());
    }

    #[test]
    fn ambient_needs_no_secret_or_upstream() {
        let config = ProxyConfig {
            use_default_credentials: true,
            ..Default::default()
        };
        let binding = resolve_credentials(&config, None).unwrap();
        assert!(binding.is_ambient());
    }

    #[test]
    fn explicit_requires_upstream() {
        let config = ProxyConfig {
            upstream_uri: None,
            ..explicit_config()
        };
        let err = resolve_credentials(&config, Some(Secret::new("pw"))).unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));
    }

    #[test]
    fn explicit_requires_secret() {
        let err = resolve_credentials(&explicit_config(), None).unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));

        let err = resolve_credentials(&explicit_config(), Some(Secret::new(""))).unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));
    }

    #[test]
    fn explicit_binding_defaults_to_ntlm() {
        let binding = resolve_credentials(&explicit_config(), Some(Secret::new("pw"))).unwrap();
        let uri: Uri = "http://backend.local/items?id=7".parse().unwrap();
        let creds = binding.credentials_for(&uri).unwrap();
        assert_eq!(creds.scheme(), AuthScheme::Ntlm);
        assert_eq!(creds.domain(), "CORP");
        assert_eq!(creds.username(), "jdoe");
    }

    #[test]
    fn credentials_only_for_bound_authority() {
        let binding = resolve_credentials(&explicit_config(), Some(Secret::new("pw"))).unwrap();
        let same: Uri = "http://BACKEND.local:80/x".parse().unwrap();
        let other_host: Uri = "http://elsewhere.local/x".parse().unwrap();
        let other_port: Uri = "http://backend.local:8080/x".parse().unwrap();
        let other_scheme: Uri = "https://backend.local/x".parse().unwrap();

        assert!(binding.credentials_for(&same).is_some());
        assert!(binding.credentials_for(&other_host).is_none());
        assert!(binding.credentials_for(&other_port).is_none());
        assert!(binding.credentials_for(&other_scheme).is_none());
    }

    #[test]
    fn basic_authorization_includes_domain() {
        let config = ProxyConfig {
            authentication_method: "Basic".into(),
            ..explicit_config()
        };
        let binding = resolve_credentials(&config, Some(Secret::new("pw"))).unwrap();
        let CredentialBinding::Explicit(creds) = binding else {
            panic!("expected explicit binding");
        };
        let expected = format!("Basic {}", BASE64.encode("CORP\\jdoe:pw"));
        assert_eq!(creds.basic_authorization().unwrap(), expected.as_str());
    }

    #[test]
    fn finds_challenges() {
        let mut headers = HeaderMap::new();
        headers.append(WWW_AUTHENTICATE, HeaderValue::from_static("Negotiate"));
        headers.append(WWW_AUTHENTICATE, HeaderValue::from_static("NTLM TlRMTVNTUAACAAAA"));
        headers.append(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"corp\""));

        assert_eq!(find_challenge(&headers, AuthScheme::Negotiate).as_deref(), Some(""));
        assert_eq!(find_challenge(&headers, AuthScheme::Ntlm).as_deref(), Some("TlRMTVNTUAACAAAA"));
        assert_eq!(find_challenge(&headers, AuthScheme::Basic).as_deref(), Some("realm=\"corp\""));
        assert!(find_challenge(&HeaderMap::new(), AuthScheme::Ntlm).is_none());
    }

    #[test]
    fn finds_comma_separated_challenges() {
        let mut headers = HeaderMap::new();
        headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Negotiate, NTLM"));
        assert_eq!(find_challenge(&headers, AuthScheme::Ntlm).as_deref(), Some(""));
    }
}
