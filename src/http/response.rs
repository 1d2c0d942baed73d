//! Response relay.
//!
//! Only headers describing the body are carried back to the local client,
//! first value only. Status is copied verbatim and Content-Length is set
//! from the buffered body.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Response, StatusCode};

/// Upstream response headers relayed to the local client.
pub const CONTENT_HEADERS: &[&str] = &[
    "allow",
    "content-disposition",
    "content-encoding",
    "content-language",
    "content-location",
    "content-md5",
    "content-range",
    "content-type",
    "expires",
    "last-modified",
];

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    elapsed: Duration,
}

impl UpstreamResponse {
    /// Keep the status, the first value of each content header, and the body.
    pub fn new(status: StatusCode, upstream_headers: &HeaderMap, body: Bytes, elapsed: Duration) -> Self {
        let mut headers = HeaderMap::new();
        for &name in CONTENT_HEADERS {
            if let Some(value) = upstream_headers.get(name) {
                headers.insert(HeaderName::from_static(name), value.clone());
            }
        }
        Self {
            status,
            headers,
            body,
            elapsed,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Wall time of the upstream exchange, authentication legs included.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Turn into the response written to the local connection.
    pub fn relay(self) -> Response<Full<Bytes>> {
        let content_length = HeaderValue::from(self.body.len());
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response.headers_mut().insert(header::CONTENT_LENGTH, content_length);
        response
    }
}
