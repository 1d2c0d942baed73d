//! The accept loop.
//!
//! # Responsibilities
//! - Accept one local connection at a time and serve exactly one request on it
//! - Drive Accepted → Transformed → Forwarded → Relayed for that request
//! - Contain every per-request failure: log it with the sequence number, move on
//! - Stop cleanly when the shutdown token fires
//!
//! # Design Decisions
//! - Single-flight: request N+1 is not accepted until request N is relayed
//!   or has failed, so responses are written in acceptance order
//! - A failing stage returns an error from the service, which makes hyper
//!   drop the connection without a response; the loop recovers the stage from
//!   the connection error for the log line
//! - Keep-alive is off on the local leg and the request head must arrive
//!   within the header read timeout, so one idle client cannot hold the loop

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::auth::CredentialBinding;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::http::client::ForwarderClient;
use crate::http::filter::HeaderFilterSet;
use crate::http::request::{transform, InboundRequest};
use crate::net::{ListenerError, ProxyListener, RequestContext, RequestSequence};

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Pipeline step a request failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading the local request.
    Accepted,
    /// Building the upstream request.
    Transformed,
    /// Calling the upstream.
    Forwarded,
    /// Writing the local response.
    Relayed,
}

impl Stage {
    fn fail(self) -> impl FnOnce(ProxyError) -> PipelineError {
        move |source| PipelineError { stage: self, source }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Accepted => "accepted",
            Stage::Transformed => "transformed",
            Stage::Forwarded => "forwarded",
            Stage::Relayed => "relayed",
        };
        f.write_str(name)
    }
}

/// A request failure tagged with the stage it happened in.
#[derive(Debug, Error)]
#[error("{stage} stage: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: ProxyError,
}

/// Components the accept loop sequences for every request.
struct Pipeline {
    upstream_base: String,
    filter: HeaderFilterSet,
    client: ForwarderClient,
}

impl Pipeline {
    async fn handle(
        &self,
        request: Request<Incoming>,
        ctx: RequestContext,
        cancel: CancellationToken,
    ) -> Result<Response<Full<Bytes>>, PipelineError> {
        let inbound = InboundRequest::read(request).await.map_err(Stage::Accepted.fail())?;
        tracing::info!(
            method = %inbound.method(),
            path = %inbound.path_and_query(),
            peer = %ctx.peer(),
            "Request accepted"
        );
        tracing::trace!(headers = ?inbound.headers(), "Inbound headers");

        let outbound = transform(inbound, &self.upstream_base, &self.filter).map_err(Stage::Transformed.fail())?;
        tracing::debug!(method = %outbound.method(), uri = %outbound.uri(), "Forwarding");

        let upstream = self
            .client
            .send(&outbound, &cancel)
            .await
            .map_err(Stage::Forwarded.fail())?;

        tracing::info!(
            status = upstream.status().as_u16(),
            content_length = upstream.body().len(),
            elapsed_ms = upstream.elapsed().as_millis() as u64,
            "Relaying response"
        );
        tracing::trace!(headers = ?upstream.headers(), "Relayed headers");

        Ok(upstream.relay())
    }
}

/// The local forwarding server.
pub struct ProxyServer {
    pipeline: Arc<Pipeline>,
    header_read_timeout: Duration,
}

impl ProxyServer {
    /// Build the server from validated configuration and a resolved binding.
    pub fn new(config: &ProxyConfig, binding: CredentialBinding) -> ProxyResult<Self> {
        let upstream_base = config
            .upstream()
            .ok_or_else(|| ProxyError::Configuration("UpstreamURI is empty".into()))?
            .to_string();

        tracing::info!(
            upstream = %upstream_base,
            ambient = binding.is_ambient(),
            ignored_headers = config.ignored_request_headers.len(),
            "Forwarder configured"
        );

        let client = ForwarderClient::new(Arc::new(binding), &config.timeouts)?;

        Ok(Self {
            pipeline: Arc::new(Pipeline {
                upstream_base,
                filter: HeaderFilterSet::from_config(config),
                client,
            }),
            header_read_timeout: Duration::from_secs(config.timeouts.header_read_secs),
        })
    }

    /// Run the accept loop until `cancel` fires.
    pub async fn run(self, listener: ProxyListener, cancel: CancellationToken) {
        tracing::info!(addresses = ?listener.local_addrs(), "Accepting requests");
        let sequence = RequestSequence::new();

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    if let ListenerError::Accept(_) = e {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                        }
                    }
                    continue;
                }
            };

            let ctx = sequence.next(peer);
            let span = tracing::info_span!("request", seq = ctx.seq());
            self.serve(stream, ctx, &cancel).instrument(span).await;

            if cancel.is_cancelled() {
                break;
            }
        }

        tracing::info!("Full stop");
    }

    async fn serve(&self, stream: TcpStream, ctx: RequestContext, cancel: &CancellationToken) {
        let pipeline = Arc::clone(&self.pipeline);
        let token = cancel.clone();
        let service = service_fn(move |request| {
            let pipeline = Arc::clone(&pipeline);
            let token = token.clone();
            async move { pipeline.handle(request, ctx, token).await }
        });

        let connection = http1::Builder::new()
            .timer(TokioTimer::new())
            .header_read_timeout(self.header_read_timeout)
            .keep_alive(false)
            .serve_connection(TokioIo::new(stream), service);

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Request aborted by shutdown");
            }
            result = connection => match result {
                Ok(()) => {
                    tracing::debug!(elapsed_ms = ctx.age().as_millis() as u64, "Request done");
                }
                Err(e) => report(&e),
            }
        }
    }
}

/// Log a failed connection with the stage it failed in.
fn report(err: &hyper::Error) {
    if let Some(failure) = pipeline_error(err) {
        match failure.source {
            ProxyError::InvalidRequest(_) => {
                tracing::warn!(stage = %failure.stage, kind = failure.source.kind(), error = %failure.source, "Request skipped");
            }
            _ => {
                tracing::error!(stage = %failure.stage, kind = failure.source.kind(), error = %failure.source, "Request failed");
            }
        }
    } else if err.is_timeout() {
        tracing::warn!(stage = %Stage::Accepted, "Client did not send a request in time");
    } else if err.is_parse() {
        tracing::warn!(stage = %Stage::Accepted, kind = "invalid_request", error = %err, "Malformed request skipped");
    } else {
        tracing::warn!(stage = %Stage::Relayed, error = %err, "Connection failed");
    }
}

fn pipeline_error(err: &hyper::Error) -> Option<&PipelineError> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(failure) = cause.downcast_ref::<PipelineError>() {
            return Some(failure);
        }
        source = cause.source();
    }
    None
}
