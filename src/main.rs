//! credential-proxy
//!
//! Forwards plain HTTP from loopback to one authenticated upstream, adding
//! NTLM, Negotiate or Basic credentials on the way.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌──────────────────────────────────────────────┐
//!                          │               CREDENTIAL PROXY               │
//!     Local client         │  ┌──────────┐   ┌───────────┐   ┌─────────┐  │
//!     ─────────────────────┼─▶│   net    │──▶│  request  │──▶│ client  │──┼──▶ Upstream
//!     (127.0.0.1 / ::1)    │  │ listener │   │ transform │   │ + auth  │  │    (http/https)
//!                          │  └──────────┘   └───────────┘   └────┬────┘  │
//!                          │                                      │       │
//!     ◀────────────────────┼──────────── response relay ◀─────────┘       │
//!                          │                                              │
//!                          │  config · auth binding · lifecycle · logging │
//!                          └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use credential_proxy::auth::{EnvSecretSource, SecretSource, TerminalSecretSource};
use credential_proxy::config::{read_config, ProxyConfig};
use credential_proxy::lifecycle::{acquire_secret, check_config, signals, start, Shutdown};
use credential_proxy::observability::init_logging;

/// Config file read when `--config` is not given, if it exists.
const DEFAULT_CONFIG_PATH: &str = "credential-proxy.toml";

#[derive(Parser)]
#[command(name = "credential-proxy", version)]
#[command(about = "Local forwarding proxy that authenticates to one upstream on behalf of its clients", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override LocalPort
    #[arg(short, long)]
    port: Option<u16>,

    /// Override UpstreamURI
    #[arg(short, long)]
    upstream: Option<String>,

    /// Read the password from this environment variable instead of prompting
    #[arg(long, value_name = "VAR")]
    password_env: Option<String>,

    /// Log everything, including request and response headers
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                read_config(&path)?
            } else {
                ProxyConfig::default()
            }
        }
    };
    if let Some(port) = cli.port {
        config.local_port = port;
    }
    if let Some(upstream) = cli.upstream {
        config.upstream_uri = Some(upstream);
    }

    init_logging(&config.logging.level, cli.verbose);
    check_config(&config)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        local_port = config.local_port,
        upstream = config.upstream().unwrap_or_default(),
        ambient = config.use_default_credentials,
        request_timeout_secs = config.timeouts.request_secs,
        "credential-proxy starting"
    );

    let source: Box<dyn SecretSource> = match cli.password_env {
        Some(var) => Box::new(EnvSecretSource::new(var)),
        None => Box::new(TerminalSecretSource::default()),
    };
    let secret = acquire_secret(&config, source.as_ref())?;

    let (server, listener) = start(&config, secret).await?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(&shutdown);

    server.run(listener, shutdown.token()).await;
    Ok(())
}
