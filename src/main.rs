//! mesh-gateway
//!
//! Edge gateway: admits, correlates and forwards client requests to
//! internal services.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌───────────────────────────────────────────────────┐
//!                          │                     GATEWAY                        │
//!                          │                                                    │
//!     Client Request       │  ┌─────────────┐   ┌────────────┐   ┌──────────┐   │
//!     ─────────────────────┼─▶│ correlation │──▶│ rate limit │──▶│ routing  │   │
//!                          │  │   layer     │   │  (bucket)  │   │  table   │   │
//!                          │  └─────────────┘   └────────────┘   └────┬─────┘   │
//!                          │                                          │         │
//!                          │                                          ▼         │
//!     Client Response      │  ┌─────────────┐   ┌──────────────────────────┐    │
//!     ◀────────────────────┼──│   error     │◀──│     ResilientClient      │◀───┼──── Upstream
//!                          │  │  envelope   │   │ breaker · timeout · retry│    │     Service
//!                          │  └─────────────┘   └──────────────────────────┘    │
//!                          └───────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use mesh_gateway::admin::{setup_admin_router, AdminState};
use mesh_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use mesh_gateway::lifecycle::{shutdown::signalled, signals, Shutdown};
use mesh_gateway::observability::{logging, metrics};
use mesh_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "mesh-gateway", version, about = "Resilient HTTP gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Reload routes when the configuration file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (config, load_warning) = if args.config.exists() {
        (load_config(&args.config)?, None)
    } else {
        (GatewayConfig::default(), Some(args.config.display().to_string()))
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mesh-gateway starting");
    if let Some(path) = load_warning {
        tracing::warn!(path = %path, "Config file not found, using defaults");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstreams = config.upstreams.len(),
        routes = config.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    // Kept alive for the lifetime of the process when --watch is set.
    let (_watcher, config_updates) = if args.watch {
        let (watcher, updates) = ConfigWatcher::new(&args.config);
        (Some(watcher.run()?), updates)
    } else {
        let (_, updates) = mpsc::unbounded_channel();
        (None, updates)
    };

    let server = GatewayServer::new(config.clone())?;

    if config.admin.enabled {
        let admin = setup_admin_router(AdminState::new(&config.admin.api_key, server.state()));
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(admin_listener, admin)
                .with_graceful_shutdown(signalled(admin_shutdown))
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
