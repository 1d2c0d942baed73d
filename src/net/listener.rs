//! Loopback TCP listener.
//!
//! # Responsibilities
//! - Bind the configured port on the numeric loopback address
//! - Bind the same port on every loopback address `localhost` resolves to
//! - Accept from whichever socket is ready first
//!
//! # Design Decisions
//! - Failure to bind `127.0.0.1` is fatal; an extra loopback family the
//!   host does not support is skipped with a warning
//! - Port 0 picks an ephemeral port once and reuses it for every address

use std::future::poll_fn;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::task::Poll;

use tokio::net::{TcpListener, TcpStream};

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(SocketAddr, std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Loopback listener set bound to a single port.
#[derive(Debug)]
pub struct ProxyListener {
    listeners: Vec<TcpListener>,
    port: u16,
}

impl ProxyListener {
    /// Bind `port` on `127.0.0.1` and the loopback addresses of `localhost`.
    pub async fn bind(port: u16) -> Result<Self, ListenerError> {
        let primary_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let primary = TcpListener::bind(primary_addr)
            .await
            .map_err(|e| ListenerError::Bind(primary_addr, e))?;
        let port = primary
            .local_addr()
            .map_err(|e| ListenerError::Bind(primary_addr, e))?
            .port();

        tracing::info!(address = %SocketAddr::from((Ipv4Addr::LOCALHOST, port)), "Listener bound");

        let mut listeners = vec![primary];
        for addr in hostname_addrs(port).await {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    tracing::info!(address = %addr, "Listener bound");
                    listeners.push(listener);
                }
                Err(e) if is_unsupported_address(&e) => {
                    tracing::warn!(address = %addr, error = %e, "Loopback address not available, skipping");
                }
                Err(e) => return Err(ListenerError::Bind(addr, e)),
            }
        }

        Ok(Self { listeners, port })
    }

    /// Accept the next connection from any bound address.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        poll_fn(|cx| {
            for listener in &self.listeners {
                if let Poll::Ready(result) = listener.poll_accept(cx) {
                    return Poll::Ready(result.map_err(ListenerError::Accept));
                }
            }
            Poll::Pending
        })
        .await
    }

    /// The numeric loopback address; always bound.
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    /// Every address actually bound.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .collect()
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Distinct loopback addresses `localhost` resolves to, minus `127.0.0.1`.
async fn hostname_addrs(port: u16) -> Vec<SocketAddr> {
    let resolved = match tokio::net::lookup_host(("localhost", port)).await {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!(error = %e, "Could not resolve localhost");
            return Vec::new();
        }
    };

    let mut addrs: Vec<SocketAddr> = Vec::new();
    for addr in resolved {
        if addr.ip().is_loopback()
            && addr.ip() != Ipv4Addr::LOCALHOST
            && !addrs.contains(&addr)
        {
            addrs.push(addr);
        }
    }
    addrs
}

fn is_unsupported_address(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::AddrNotAvailable | ErrorKind::Unsupported | ErrorKind::InvalidInput
    )
}
