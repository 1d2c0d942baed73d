//! Shutdown coordination for the proxy.

use tokio_util::sync::CancellationToken;

/// Coordinator for clean shutdown.
///
/// Wraps a cancellation token shared by the accept loop and the forwarder
/// client. Triggering it aborts a pending accept and any in-flight upstream call.
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token to hand to long-running tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_reaches_every_token() {
        let shutdown = Shutdown::new();
        let a = shutdown.token();
        let b = shutdown.clone().token();
        assert!(!shutdown.is_triggered());

        shutdown.trigger();

        a.cancelled().await;
        b.cancelled().await;
        assert!(shutdown.is_triggered());
    }
}
