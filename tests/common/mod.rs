//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use credential_proxy::lifecycle::{start, Shutdown};
use credential_proxy::{ProxyConfig, Secret};

/// A request as seen by the mock upstream.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub target: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Upstream-side connection number, starting at 1.
    pub connection: u64,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// What the mock upstream answers.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
            delay: None,
        }
    }

    pub fn ok(body: &str) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Handler = dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync;

/// Programmable HTTP/1 upstream that records every request it receives.
pub struct MockUpstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        Self::start_on("127.0.0.1:0".parse().unwrap(), handler).await
    }

    pub async fn start_on<F>(addr: SocketAddr, handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);
        let connections = Arc::new(AtomicU64::new(1));

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let connection = connections.fetch_add(1, Ordering::SeqCst);
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        let handler = Arc::clone(&handler);
                        let recorded = Arc::clone(&recorded);
                        async move {
                            let (parts, body) = request.into_parts();
                            let body = body.collect().await?.to_bytes();
                            let seen = RecordedRequest {
                                method: parts.method,
                                target: parts.uri.to_string(),
                                headers: parts.headers,
                                body,
                                connection,
                            };
                            let reply = handler(&seen);
                            recorded.lock().unwrap().push(seen);

                            if let Some(delay) = reply.delay {
                                tokio::time::sleep(delay).await;
                            }

                            let mut response = Response::new(Full::new(Bytes::from(reply.body)));
                            *response.status_mut() = StatusCode::from_u16(reply.status).unwrap();
                            for (name, value) in &reply.headers {
                                response.headers_mut().append(
                                    hyper::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                                    value.parse().unwrap(),
                                );
                            }
                            Ok::<_, hyper::Error>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, requests, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Mock NTLM server: asks for NTLM, answers the negotiate message with a
/// fixed challenge, and accepts any authenticate message.
pub fn ntlm_upstream(request: &RecordedRequest) -> MockResponse {
    scheme_upstream("NTLM", request)
}

/// Same as [`ntlm_upstream`], with the tokens under the `Negotiate` prefix.
pub fn negotiate_upstream(request: &RecordedRequest) -> MockResponse {
    scheme_upstream("Negotiate", request)
}

fn scheme_upstream(scheme: &str, request: &RecordedRequest) -> MockResponse {
    match leg(scheme, request) {
        None => MockResponse::new(401).with_header("WWW-Authenticate", scheme),
        Some(1) => MockResponse::new(401).with_header(
            "WWW-Authenticate",
            &format!("{} {}", scheme, BASE64.encode(challenge_message())),
        ),
        Some(3) => MockResponse::ok("authenticated").with_header("Content-Type", "text/plain"),
        Some(_) => MockResponse::new(400),
    }
}

/// NTLM message type carried in `Authorization: <scheme> <token>`, if any.
pub fn leg(scheme: &str, request: &RecordedRequest) -> Option<u32> {
    request
        .header("authorization")
        .and_then(|value| value.strip_prefix(scheme))
        .map(str::trim)
        .and_then(|token| BASE64.decode(token).ok())
        .map(|raw| message_type(&raw))
}

/// Type 2 answer to an NTLM negotiate leg.
pub fn ntlm_challenge() -> MockResponse {
    MockResponse::new(401).with_header("WWW-Authenticate", &format!("NTLM {}", BASE64.encode(challenge_message())))
}

/// NTLM message type of a raw token (0 if malformed).
pub fn message_type(raw: &[u8]) -> u32 {
    if raw.len() < 12 || &raw[..8] != b"NTLMSSP\0" {
        return 0;
    }
    u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]])
}

/// Minimal CHALLENGE message: unicode + NTLM flags, no target info.
pub fn challenge_message() -> Vec<u8> {
    let mut message = Vec::with_capacity(32);
    message.extend_from_slice(b"NTLMSSP\0");
    message.extend_from_slice(&2u32.to_le_bytes());
    message.extend_from_slice(&0u16.to_le_bytes());
    message.extend_from_slice(&0u16.to_le_bytes());
    message.extend_from_slice(&32u32.to_le_bytes());
    message.extend_from_slice(&0x0000_0201u32.to_le_bytes());
    message.extend_from_slice(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
    message
}

/// A proxy running on an ephemeral loopback port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Config forwarding to `upstream` with ambient credentials on an ephemeral port.
pub fn ambient_config(upstream: &str) -> ProxyConfig {
    ProxyConfig {
        local_port: 0,
        upstream_uri: Some(upstream.to_string()),
        use_default_credentials: true,
        ..Default::default()
    }
}

/// Config forwarding to `upstream` with explicit credentials for CORP\jdoe.
pub fn explicit_config(upstream: &str, method: &str) -> ProxyConfig {
    ProxyConfig {
        local_port: 0,
        upstream_uri: Some(upstream.to_string()),
        domain: Some("CORP".into()),
        user_name: Some("jdoe".into()),
        authentication_method: method.to_string(),
        ..Default::default()
    }
}

pub async fn start_proxy(config: ProxyConfig, secret: Option<Secret>) -> TestProxy {
    let (server, listener) = start(&config, secret).await.unwrap();
    let addr = listener.local_addr();
    let shutdown = Shutdown::new();
    let token = shutdown.token();
    let handle = tokio::spawn(async move { server.run(listener, token).await });
    TestProxy { addr, shutdown, handle }
}

/// Client that opens a fresh connection per request and ignores env proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
