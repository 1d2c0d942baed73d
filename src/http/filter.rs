//! Request header stop-list.
//!
//! # Responsibilities
//! - Strip headers the transformer recomputes itself (length, type, framing)
//! - Strip the routing header (`host`) so the client targets the upstream
//! - Strip administrator-configured names
//!
//! # Design Decisions
//! - Names are stored lower-cased; membership is case-insensitive
//! - Only the request leg uses this set; the response leg has its own allow-list

use std::collections::HashSet;

use crate::config::ProxyConfig;

/// Header names never copied from the local request to the upstream request.
pub const ALWAYS_EXCLUDED: &[&str] = &[
    "content-length",
    "content-type",
    "host",
    "transfer-encoding",
    "connection",
];

/// Case-insensitive set of request header names to drop.
#[derive(Debug, Clone)]
pub struct HeaderFilterSet {
    excluded: HashSet<String>,
}

impl HeaderFilterSet {
    /// Filter with the always-excluded names plus `extra`.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let excluded = ALWAYS_EXCLUDED
            .iter()
            .map(|name| name.to_string())
            .chain(
                extra
                    .into_iter()
                    .map(|name| name.as_ref().trim().to_ascii_lowercase())
                    .filter(|name| !name.is_empty()),
            )
            .collect();
        Self { excluded }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(&config.ignored_request_headers)
    }

    /// True if `name` may be copied onto the upstream request.
    pub fn should_forward(&self, name: &str) -> bool {
        !self.excluded.contains(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }
}

impl Default for HeaderFilterSet {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}
