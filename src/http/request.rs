//! Request handling and transformation.
//!
//! # Responsibilities
//! - Capture the accepted local request (method, raw target, headers, body)
//! - Build the upstream request: base URI + raw path and query, filtered headers
//! - Recompute Content-Length from the bytes actually read
//!
//! # Design Decisions
//! - Bodies are fully buffered; there is no size cap
//! - The target is concatenated verbatim, never re-encoded or normalized
//! - The outbound request is rebuilt per leg so authentication retries resend it intact

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use hyper::{Method, Request, Uri};

use crate::error::{ProxyError, ProxyResult};
use crate::http::filter::HeaderFilterSet;

/// A local request as accepted by the listener.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    method: Method,
    path_and_query: String,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl InboundRequest {
    /// Capture a local request, buffering its body when one is declared.
    ///
    /// Fails with `InvalidRequest` when the request carries no path.
    pub async fn read<B>(request: Request<B>) -> ProxyResult<Self>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| !pq.is_empty())
            .ok_or_else(|| ProxyError::InvalidRequest(format!("no path in request target '{}'", parts.uri)))?
            .to_string();

        let declares_body =
            parts.headers.contains_key(CONTENT_LENGTH) || parts.headers.contains_key(TRANSFER_ENCODING);

        let body = if declares_body {
            let collected = body
                .collect()
                .await
                .map_err(|e| ProxyError::InvalidRequest(format!("failed to read request body: {}", e)))?;
            Some(collected.to_bytes())
        } else {
            None
        };

        Ok(Self {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Raw path and query exactly as the client sent them.
    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Content-Type of the body, if present.
    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.headers.get(CONTENT_TYPE)
    }
}

/// The request re-issued against the upstream authority.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    uri: Uri,
    method: Method,
    headers: HeaderMap,
    content_type: Option<HeaderValue>,
    body: Option<Bytes>,
}

impl OutboundRequest {
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Copied headers, before framing and authorization are applied.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Build one wire request, optionally carrying an `Authorization` value.
    pub fn to_request(&self, authorization: Option<HeaderValue>) -> ProxyResult<Request<Full<Bytes>>> {
        let body = self.body.clone().unwrap_or_default();

        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone())
            .body(Full::new(body.clone()))
            .map_err(|e| ProxyError::InvalidRequest(format!("failed to build upstream request: {}", e)))?;

        let headers = request.headers_mut();
        headers.extend(self.headers.clone());

        if self.body.is_some() {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            if let Some(content_type) = &self.content_type {
                headers.insert(CONTENT_TYPE, content_type.clone());
            }
        }

        if let Some(value) = authorization {
            headers.insert(AUTHORIZATION, value);
        }

        Ok(request)
    }
}

/// Build the upstream request for `inbound`.
pub fn transform(inbound: InboundRequest, upstream_base: &str, filter: &HeaderFilterSet) -> ProxyResult<OutboundRequest> {
    let target = format!("{}{}", upstream_base, inbound.path_and_query);
    let uri: Uri = target
        .parse()
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid upstream target '{}': {}", target, e)))?;

    let method = uppercase_method(&inbound.method)?;

    let content_type = match inbound.content_type() {
        Some(value) if value.to_str().map(is_valid_media_type).unwrap_or(false) => Some(value.clone()),
        Some(value) => {
            tracing::warn!(content_type = ?value, "Dropping invalid Content-Type");
            None
        }
        None => None,
    };

    let mut headers = HeaderMap::with_capacity(inbound.headers.len());
    for (name, value) in inbound.headers.iter() {
        if filter.should_forward(name.as_str()) {
            headers.append(name.clone(), value.clone());
        } else {
            tracing::trace!(header = %name, "Header filtered");
        }
    }

    tracing::trace!(method = %method, uri = %uri, headers = ?headers, "Upstream request built");

    Ok(OutboundRequest {
        uri,
        method,
        headers,
        content_type,
        body: inbound.body,
    })
}

fn uppercase_method(method: &Method) -> ProxyResult<Method> {
    let upper = method.as_str().to_ascii_uppercase();
    if upper == method.as_str() {
        return Ok(method.clone());
    }
    Method::from_bytes(upper.as_bytes())
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid method '{}': {}", method, e)))
}

/// `type/subtype *(; name=value)` with token characters.
fn is_valid_media_type(value: &str) -> bool {
    let mut parts = value.split(';');
    let essence = parts.next().unwrap_or_default().trim();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    if !is_token(kind) || !is_token(subtype) {
        return false;
    }
    parts.all(|param| {
        let param = param.trim();
        if param.is_empty() {
            return true;
        }
        match param.split_once('=') {
            Some((name, value)) => is_token(name.trim()) && (is_token(value) || is_quoted_string(value)),
            None => false,
        }
    })
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            matches!(b,
                b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
                b'^' | b'_' | b'`' | b'|' | b'~' |
                b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
            )
        })
}

fn is_quoted_string(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('"') && s.ends_with('"')
}
