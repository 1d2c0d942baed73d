//! Forwarder client: the authenticated upstream call.
//!
//! # Responsibilities
//! - Dispatch the outbound request over HTTP or HTTPS
//! - Answer upstream `401` challenges with the bound credentials
//! - Bound the whole exchange by the request timeout and the shutdown token
//!
//! # Design Decisions
//! - Challenge-driven: the first leg never carries credentials
//! - Every leg of one exchange runs on one dedicated upstream connection;
//!   NTLM authenticates the connection, not the request
//! - A `401` that cannot be answered is relayed as-is; an undecodable
//!   challenge is an `Authentication` error

use std::error::Error as StdError;
use std::future::poll_fn;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{HeaderMap, HeaderValue, HOST};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use tokio_util::sync::CancellationToken;
use tower::Service;

use crate::auth::ntlm::{self, ChallengeMessage};
use crate::auth::{find_challenge, AuthScheme, CredentialBinding, ExplicitCredentials};
use crate::config::TimeoutConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::http::request::OutboundRequest;
use crate::http::response::UpstreamResponse;

type Connector = HttpsConnector<HttpConnector>;

/// Status, headers and buffered body of one upstream leg.
type Collected = (StatusCode, HeaderMap, Bytes);

/// Performs upstream calls on behalf of the accept loop.
///
/// Built once and shared; holds the credential binding for the process lifetime.
pub struct ForwarderClient {
    connector: Connector,
    binding: Arc<CredentialBinding>,
    request_timeout: Duration,
}

impl ForwarderClient {
    pub fn new(binding: Arc<CredentialBinding>, timeouts: &TimeoutConfig) -> ProxyResult<Self> {
        Ok(Self {
            connector: https_connector()?,
            binding,
            request_timeout: Duration::from_secs(timeouts.request_secs),
        })
    }

    /// Send `outbound` and buffer the upstream response.
    ///
    /// Fails with `UpstreamTimeout` when the deadline passes or `cancel` fires
    /// first, and with `UpstreamUnavailable` when the upstream cannot be reached.
    pub async fn send(&self, outbound: &OutboundRequest, cancel: &CancellationToken) -> ProxyResult<UpstreamResponse> {
        let started = Instant::now();

        let (status, headers, body) = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ProxyError::UpstreamTimeout("cancelled before the upstream responded".into()));
            }
            result = tokio::time::timeout(self.request_timeout, self.exchange(outbound)) => {
                result.map_err(|_| {
                    ProxyError::UpstreamTimeout(format!(
                        "no response from {} within {}s",
                        outbound.uri(),
                        self.request_timeout.as_secs()
                    ))
                })??
            }
        };

        let elapsed = started.elapsed();
        tracing::debug!(
            status = status.as_u16(),
            content_length = body.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Upstream responded"
        );

        Ok(UpstreamResponse::new(status, &headers, body, elapsed))
    }

    async fn exchange(&self, outbound: &OutboundRequest) -> ProxyResult<Collected> {
        let mut upstream = UpstreamConnection::new(&self.connector, outbound.uri());

        let response = upstream.send(outbound, None).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return collect(response).await;
        }

        let Some(creds) = self.binding.credentials_for(outbound.uri()) else {
            return collect(response).await;
        };
        let scheme = creds.scheme();
        if find_challenge(response.headers(), scheme).is_none() {
            tracing::debug!(scheme = %scheme, "Upstream did not offer the bound scheme");
            return collect(response).await;
        }
        collect(response).await?;

        tracing::debug!(scheme = %scheme, "Answering authentication challenge");
        match scheme {
            AuthScheme::Basic => {
                let response = upstream.send(outbound, Some(creds.basic_authorization()?)).await?;
                collect(response).await
            }
            AuthScheme::Ntlm | AuthScheme::Negotiate => ntlm_handshake(&mut upstream, outbound, creds).await,
        }
    }
}

async fn ntlm_handshake(
    upstream: &mut UpstreamConnection<'_>,
    outbound: &OutboundRequest,
    creds: &ExplicitCredentials,
) -> ProxyResult<Collected> {
    let scheme = creds.scheme();

    let negotiate = token_header(scheme, &ntlm::negotiate_message())?;
    let response = upstream.send(outbound, Some(negotiate)).await?;
    if response.status() != StatusCode::UNAUTHORIZED {
        return collect(response).await;
    }

    let Some(challenge) = find_challenge(response.headers(), scheme).filter(|c| !c.is_empty()) else {
        tracing::debug!("Upstream rejected the negotiate message");
        return collect(response).await;
    };
    collect(response).await?;

    let raw = BASE64
        .decode(challenge.as_bytes())
        .map_err(|e| ProxyError::Authentication(format!("challenge is not valid base64: {}", e)))?;
    let challenge = ChallengeMessage::parse(&raw)?;
    tracing::trace!(flags = %format!("{:#010x}", challenge.flags), "NTLM challenge received");

    let authenticate = token_header(scheme, &ntlm::authenticate_message(&challenge, creds.ntlm_identity()))?;
    let response = upstream.send(outbound, Some(authenticate)).await?;
    collect(response).await
}

/// One HTTP/1 connection to the upstream, opened on first use.
///
/// Reconnects only if the upstream closed the previous connection.
struct UpstreamConnection<'a> {
    connector: &'a Connector,
    target: Uri,
    sender: Option<SendRequest<Full<Bytes>>>,
}

impl<'a> UpstreamConnection<'a> {
    fn new(connector: &'a Connector, target: &Uri) -> Self {
        Self {
            connector,
            target: target.clone(),
            sender: None,
        }
    }

    async fn send(&mut self, outbound: &OutboundRequest, authorization: Option<HeaderValue>) -> ProxyResult<Response<Incoming>> {
        let mut sender = match self.sender.take().filter(|s| !s.is_closed()) {
            Some(sender) => sender,
            None => self.connect().await?,
        };

        if sender.ready().await.is_err() {
            tracing::debug!("Upstream closed the connection between legs, reconnecting");
            sender = self.connect().await?;
            sender
                .ready()
                .await
                .map_err(|e| unavailable(&self.target, &e))?;
        }

        let request = origin_form(outbound.to_request(authorization)?)?;
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| unavailable(&self.target, &e))?;

        self.sender = Some(sender);
        Ok(response)
    }

    async fn connect(&self) -> ProxyResult<SendRequest<Full<Bytes>>> {
        let mut connector = self.connector.clone();
        poll_fn(|cx| connector.poll_ready(cx))
            .await
            .map_err(|e| unavailable(&self.target, e.as_ref()))?;
        let io = connector
            .call(self.target.clone())
            .await
            .map_err(|e| unavailable(&self.target, e.as_ref()))?;

        let (sender, connection) = http1::handshake(io)
            .await
            .map_err(|e| unavailable(&self.target, &e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "Upstream connection closed with error");
            }
        });

        tracing::trace!(upstream = %self.target, "Upstream connection opened");
        Ok(sender)
    }
}

/// Rewrite an absolute-form request for the wire: origin-form target plus `Host`.
fn origin_form(mut request: Request<Full<Bytes>>) -> ProxyResult<Request<Full<Bytes>>> {
    let host = request
        .uri()
        .host()
        .ok_or_else(|| ProxyError::InvalidRequest(format!("upstream target '{}' has no host", request.uri())))?;
    let host = match request.uri().port_u16() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let host = HeaderValue::from_str(&host)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid upstream host: {}", e)))?;
    let path: Uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .parse()
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid upstream path: {}", e)))?;

    request.headers_mut().insert(HOST, host);
    *request.uri_mut() = path;
    Ok(request)
}

/// HTTPS-or-HTTP connector trusting the OS roots, or the bundled roots
/// when the OS store is empty or unreadable.
fn https_connector() -> ProxyResult<Connector> {
    let builder = match HttpsConnectorBuilder::new()
        .with_provider_and_native_roots(rustls::crypto::ring::default_provider())
    {
        Ok(builder) => builder,
        Err(e) => {
            tracing::warn!(error = %e, "Native TLS roots unavailable, using bundled roots");
            HttpsConnectorBuilder::new()
                .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
                .map_err(|e| ProxyError::Configuration(format!("failed to set up TLS: {}", e)))?
        }
    };
    Ok(builder.https_or_http().enable_http1().build())
}

fn token_header(scheme: AuthScheme, message: &[u8]) -> ProxyResult<HeaderValue> {
    HeaderValue::from_str(&format!("{} {}", scheme.as_str(), BASE64.encode(message)))
        .map_err(|e| ProxyError::Authentication(format!("invalid {} token: {}", scheme, e)))
}

async fn collect(response: Response<Incoming>) -> ProxyResult<Collected> {
    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| ProxyError::UpstreamUnavailable(format!("failed to read upstream body: {}", e)))?
        .to_bytes();
    Ok((parts.status, parts.headers, body))
}

fn unavailable(target: &Uri, err: &(dyn StdError + 'static)) -> ProxyError {
    ProxyError::UpstreamUnavailable(format!("{}: {}", target, error_chain(err)))
}

/// `Display` of an error followed by its sources.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_joins_sources() {
        #[derive(Debug)]
        struct Wrapper(std::io::Error);
        impl std::fmt::Display for Wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("client error (Connect)")
            }
        }
        impl StdError for Wrapper {
            fn source(&self) -> Option<&(dyn StdError + 'static)> {
                Some(&self.0)
            }
        }
        let err = Wrapper(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(error_chain(&err), "client error (Connect): refused");
    }

    #[test]
    fn token_header_uses_scheme_prefix() {
        let value = token_header(AuthScheme::Negotiate, b"NTLMSSP\0").unwrap();
        assert_eq!(value, "Negotiate TlRMTVNTUAA=");
    }

    #[test]
    fn origin_form_sets_host_and_path() {
        let request = Request::builder()
            .uri("http://backend.local:8080/items?id=7")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let request = origin_form(request).unwrap();
        assert_eq!(request.uri(), "/items?id=7");
        assert_eq!(request.headers()[HOST], "backend.local:8080");
    }

    #[test]
    fn origin_form_host_omits_userinfo() {
        let request = Request::builder()
            .uri("http://user:pw@backend.local:8080/a")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let request = origin_form(request).unwrap();
        assert_eq!(request.headers()[HOST], "backend.local:8080");

        let request = Request::builder()
            .uri("https://backend.local/a")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert_eq!(origin_form(request).unwrap().headers()[HOST], "backend.local");
    }
}
