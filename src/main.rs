//! RPC endpoint server binary.
//!
//! # Startup
//!
//! ```text
//! CLI flags ──▶ TOML config (optional) ──▶ flag overrides ──▶ validate
//!                                                               │
//!      ┌────────────────────────────────────────────────────────┘
//!      ▼
//!  logging + metrics ──▶ RpcServer::init ──▶ bind ──▶ start
//!                                                       │
//!  SIGINT/SIGTERM ──▶ Shutdown broadcast ──▶ RpcServer::shutdown
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncReadExt;

use rpc_endpoint::config::{self, ConfigError, ServerConfig};
use rpc_endpoint::dispatch::ServiceRouter;
use rpc_endpoint::lifecycle::{signals, RpcServer, Shutdown};
use rpc_endpoint::net::{AcceptedConnection, ConnectionHandler, TcpTransport};
use rpc_endpoint::observability;

/// Port the binary listens on when neither the config nor the flags name one.
const DEFAULT_RPC_PORT: u16 = 7050;

#[derive(Parser, Debug)]
#[command(name = "rpc-endpoint", version)]
#[command(about = "RPC server endpoint", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated addresses to bind
    #[arg(long)]
    rpc_bind_addresses: Option<String>,

    /// Comma-separated addresses to advertise to peers
    #[arg(long)]
    rpc_advertised_addresses: Option<String>,

    /// Comma-separated addresses that receive proxied traffic
    #[arg(long)]
    rpc_proxied_addresses: Option<String>,

    /// Comma-separated endpoints the proxy exposes
    #[arg(long)]
    rpc_proxy_advertised_addresses: Option<String>,

    #[arg(long)]
    rpc_num_acceptors_per_address: Option<usize>,

    #[arg(long)]
    rpc_num_service_threads: Option<usize>,

    #[arg(long)]
    rpc_service_queue_length: Option<usize>,

    /// Port used when an address omits one [default: 7050]
    #[arg(long)]
    rpc_default_port: Option<u16>,

    /// Permit port 0 on bind and proxied addresses
    #[arg(long)]
    rpc_server_allow_ephemeral_ports: bool,

    /// Set SO_REUSEPORT on listening sockets
    #[arg(long)]
    rpc_reuseport: bool,

    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut ServerConfig) {
        let rpc = &mut config.rpc;
        if let Some(v) = &self.rpc_bind_addresses {
            rpc.bind_addresses = v.clone();
        }
        if let Some(v) = &self.rpc_advertised_addresses {
            rpc.advertised_addresses = v.clone();
        }
        if let Some(v) = &self.rpc_proxied_addresses {
            rpc.proxied_addresses = v.clone();
        }
        if let Some(v) = &self.rpc_proxy_advertised_addresses {
            rpc.proxy_advertised_addresses = v.clone();
        }
        if let Some(v) = self.rpc_num_acceptors_per_address {
            rpc.acceptors_per_address = v;
        }
        if let Some(v) = self.rpc_num_service_threads {
            rpc.service_threads = v;
        }
        if let Some(v) = self.rpc_service_queue_length {
            rpc.service_queue_length = v;
        }
        if let Some(v) = self.rpc_default_port {
            rpc.default_port = v;
        }
        rpc.allow_ephemeral_ports |= self.rpc_server_allow_ephemeral_ports;
        rpc.reuse_port |= self.rpc_reuseport;
        if rpc.default_port == 0 && !rpc.allow_ephemeral_ports {
            rpc.default_port = DEFAULT_RPC_PORT;
        }
        if let Some(v) = &self.log_level {
            config.observability.log_level = v.clone();
        }
    }
}

/// Holds each connection open until the peer hangs up or the process stops.
struct IdleConnections {
    shutdown: Arc<Shutdown>,
}

impl ConnectionHandler for IdleConnections {
    fn handle(&self, connection: AcceptedConnection) {
        if self.shutdown.is_triggered() {
            return;
        }
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut connection = connection;
            let id = connection.id();
            tracing::debug!(connection = %id, peer = %connection.peer_addr, local = %connection.local_addr, "Connection accepted");
            let mut buf = [0u8; 4096];
            loop {
                tokio::select! {
                    read = connection.stream.read(&mut buf) => match read {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(connection = %id, error = %e, "Connection read failed");
                            break;
                        }
                    },
                    _ = shutdown.recv() => break,
                }
            }
            tracing::debug!(connection = %id, "Connection closed");
        });
    }
}

fn load(cli: &Cli) -> Result<ServerConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ServerConfig::default(),
    };
    cli.apply_overrides(&mut config);
    config::validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    observability::logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rpc-endpoint starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    let handler = Arc::new(IdleConnections {
        shutdown: Arc::clone(&shutdown),
    });
    let transport = Arc::new(TcpTransport::from_options(
        tokio::runtime::Handle::current(),
        handler,
        &config.rpc,
    ));
    let router = Arc::new(ServiceRouter::new());

    let mut server = RpcServer::new(config.rpc.clone(), transport, router);
    server.set_too_busy_hook(|service| {
        tracing::warn!(service, "Service queue overflow");
    });
    server.init()?;
    server.start()?;
    tracing::info!(
        advertised = ?server.advertised_addresses()?,
        proxy_advertised = ?server.proxy_advertised_host_ports(),
        "Serving"
    );

    signals::wait_for_shutdown_signal().await?;
    shutdown.trigger();
    tracing::info!(open_connections = shutdown.receiver_count(), "Closing connections");
    server.shutdown();

    tracing::info!("Shutdown complete");
    Ok(())
}
