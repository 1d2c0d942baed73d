//! Local credential-injecting forwarding proxy library.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use auth::{resolve_credentials, CredentialBinding, Secret};
pub use config::schema::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
pub use net::ProxyListener;
