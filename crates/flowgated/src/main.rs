//! The flowgate service broker daemon.
//!
//! Loads the broker configuration, opens the instance store, wires the
//! broker to a platform gateway, and serves the broker API.
//!
//! # Usage
//!
//! ```text
//! flowgated standalone --config /etc/flowgate/flowgate.toml --port 8080
//! ```
//!
//! Standalone mode drives the in-process simulated platform seeded from the
//! `[platform]` section of the config file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use flowgate_api::{BasicAuth, build_router};
use flowgate_broker::Broker;
use flowgate_core::{BrokerConfig, PlatformConfig};
use flowgate_platform::MemoryPlatform;
use flowgate_state::StateStore;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowgated", about = "flowgate service broker daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker against the in-process simulated platform.
    Standalone {
        /// Broker configuration file.
        #[arg(long, default_value = "/etc/flowgate/flowgate.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            port,
            log_json,
        } => run_standalone(config, port, log_json).await,
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn simulated_platform(platform: &PlatformConfig, system_scope: &str) -> MemoryPlatform {
    let mut simulated = MemoryPlatform::new();
    for domain in &platform.shared_domains {
        simulated = simulated.with_shared_domain(domain);
    }
    for scope in &platform.scopes {
        simulated = simulated.with_scope(&scope.guid, &scope.name);
    }
    if !platform
        .scopes
        .iter()
        .any(|s| s.guid == system_scope || s.name == system_scope)
    {
        debug!(scope = system_scope, "seeding system scope");
        simulated = simulated.with_scope(system_scope, system_scope);
    }
    simulated
}

async fn run_standalone(config_path: PathBuf, port: u16, log_json: bool) -> anyhow::Result<()> {
    let config = BrokerConfig::from_file(&config_path)?;
    init_tracing(&config.log_level, log_json);
    info!(config = %config_path.display(), "flowgate broker starting in standalone mode");

    // ── State store ────────────────────────────────────────────

    std::fs::create_dir_all(&config.broker.data_dir)?;
    let db_path = config.database_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, instances = store.list_ids()?.len(), "state store opened");

    // ── Platform + broker ──────────────────────────────────────

    let platform = simulated_platform(&config.platform, &config.deployment.system_scope);
    info!(
        domains = config.platform.shared_domains.len(),
        scopes = config.platform.scopes.len(),
        "simulated platform ready"
    );

    let broker = Arc::new(Broker::new(&config, store, Arc::new(platform)));
    info!(
        services = config.catalog.services().len(),
        port_base = config.backends.port_base,
        pool_size = config.backends.pool_size,
        "broker initialized"
    );

    // ── API server ─────────────────────────────────────────────

    let auth = BasicAuth::new(&config.broker.username, &config.broker.password);
    let router = build_router(broker, auth);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "broker API starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    });

    server.await?;

    info!("flowgate broker stopped");
    Ok(())
}
