//! Per-request diagnostic context.
//!
//! # Responsibilities
//! - Hand out monotonically increasing sequence numbers per accepted request
//! - Carry the peer address and accept time through one pipeline pass
//!
//! # Design Decisions
//! - The counter belongs to one accept loop, not the process, so independent
//!   servers (e.g. in tests) each start at 1
//! - The context carries no identity beyond a single pass and is dropped with it

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of request sequence numbers.
#[derive(Debug)]
pub struct RequestSequence {
    next: AtomicU64,
}

impl RequestSequence {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Context for the next accepted request.
    pub fn next(&self, peer: SocketAddr) -> RequestContext {
        RequestContext {
            seq: self.next.fetch_add(1, Ordering::Relaxed),
            peer,
            accepted_at: Instant::now(),
        }
    }
}

impl Default for RequestSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostics for a single request.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    seq: u64,
    peer: SocketAddr,
    accepted_at: Instant,
}

impl RequestContext {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn sequence_is_monotonic_from_one() {
        let sequence = RequestSequence::new();
        let first = sequence.next(peer());
        let second = sequence.next(peer());
        assert_eq!(first.seq(), 1);
        assert_eq!(second.seq(), 2);
    }

    #[test]
    fn sequences_are_independent() {
        let a = RequestSequence::new();
        let b = RequestSequence::new();
        a.next(peer());
        assert_eq!(b.next(peer()).seq(), 1);
    }
}
