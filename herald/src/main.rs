#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod config;
mod health;
mod server;
mod shutdown;
mod subscription;
mod topic;
mod topic_log;

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Herald - distributed last-value pub/sub broker")]
#[command(version)]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0:7000")]
    listen: SocketAddr,

    /// host:port announced to peers (defaults to 127.0.0.1:<listen port>)
    #[arg(long)]
    advertise: Option<String>,

    #[arg(short, long, default_value = "0.0.0.0:9090")]
    metrics: SocketAddr,

    #[arg(long, default_value = "0.0.0.0:8080")]
    health: SocketAddr,

    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// CSV roster of brokers (header line, then host,port)
    #[arg(long)]
    roster: Option<PathBuf>,

    #[arg(long, default_value = "2000")]
    heartbeat_interval_ms: u64,

    #[arg(long, default_value = "5000")]
    failure_threshold_ms: u64,

    #[arg(long, default_value = "2000")]
    gossip_interval_ms: u64,

    #[arg(long, default_value = "5000")]
    election_timeout_ms: u64,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    gen_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Handle --gen-config before initializing tracing
    if let Some(path) = &args.gen_config {
        if let Err(e) = generate_config(path) {
            eprintln!("Failed to generate config: {}", e);
            std::process::exit(1);
        }
        println!("Generated default config at: {}", path.display());
        return;
    }

    init_tracing();

    let config = match &args.config {
        Some(path) => match config::Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!(
                    target: "herald",
                    error = %e,
                    path = %path.display(),
                    "Failed to load config file"
                );
                std::process::exit(1);
            },
        },
        None => config::Config::from_args(&args),
    };

    if let Err(e) = config.validate() {
        error!(target: "herald", error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    info!(
        target: "herald",
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        metrics = %config.metrics_addr,
        health = %config.health_addr,
        data_dir = %config.data_dir.display(),
        "Starting herald"
    );

    let topic_log = match topic_log::SqliteTopicLog::open(&config.data_dir) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            error!(target: "herald", error = %e, "Failed to open topic log");
            std::process::exit(1);
        },
    };

    if let Err(e) = hrd_metrics::init_prometheus_exporter(config.metrics_addr) {
        error!(
            target: "herald",
            error = %e,
            "Failed to initialize metrics exporter"
        );
        std::process::exit(1);
    }

    info!(
        target: "herald",
        addr = %config.metrics_addr,
        "Prometheus metrics exporter started"
    );

    let broker = match server::Broker::bind(&config, topic_log).await {
        Ok(broker) => broker,
        Err(e) => {
            error!(target: "herald", error = %e, "Failed to start broker");
            std::process::exit(1);
        },
    };

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let shutdown_signal = shutdown::install_signal_handlers(shutdown_tx.clone());

    // Start health server
    let health_state = Arc::new(health::HealthState::new());
    let _health_handle = tokio::spawn(health::run_health_server(
        config.health_addr,
        Arc::clone(&health_state),
        broker.state(),
        shutdown_tx.subscribe(),
    ));

    // Start periodic metrics export task
    let metrics_shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        let mut shutdown_rx = metrics_shutdown_rx;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    hrd_metrics::export_to_prometheus();
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    });

    let mut server_handle = tokio::spawn(broker.run(shutdown_tx.clone(), Arc::clone(&health_state)));

    let server_exited = tokio::select! {
        _ = shutdown_signal => {
            info!(target: "herald", "Shutdown signal received");
            health_state.enter(health::Phase::Stopped);
            false
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!(target: "herald", "Server exited cleanly"),
                Ok(Err(e)) => error!(target: "herald", error = %e, "Server error"),
                Err(e) => error!(target: "herald", error = %e, "Server task panicked"),
            }
            true
        }
    };

    if !server_exited {
        match server_handle.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => error!(target: "herald", error = %e, "Server error during shutdown"),
            Err(e) => error!(target: "herald", error = %e, "Server task panicked"),
        }
    }

    let clean = shutdown::drain_with_timeout(shutdown::DRAIN_TIMEOUT).await;
    if clean {
        info!(target: "herald", "Graceful drain complete");
    } else {
        tracing::warn!(target: "herald", "Drain timed out, closing remaining connections");
    }

    info!(target: "herald", "Herald shutdown complete");
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,herald=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn generate_config(path: &Path) -> std::io::Result<()> {
    let config = config::Config::default();
    let cluster = &config.cluster;

    let content = format!(
        r#"# Herald Configuration File
# Generated by: herald --gen-config {}
#
# All values shown are defaults. Uncomment and modify as needed.

# =============================================================================
# Network Settings
# =============================================================================

# Address and port for clients and peers (TCP). Heartbeats use UDP on the
# same port.
listen_addr = "{}"

# host:port announced to peers. Peer ordering on this address decides
# elections, so every broker must see the same value.
# Defaults to 127.0.0.1:<listen port> when listening on 0.0.0.0.
# advertise_addr = "broker-1:7000"

# Address and port for health check endpoints
health_addr = "{}"

# Address and port for Prometheus metrics endpoint
metrics_addr = "{}"

# =============================================================================
# Cluster Membership
# =============================================================================

# Peer brokers (host:port)
# Example: ["broker-2:7000", "broker-3:7000"]
peers = []

# CSV roster (header line, then host,port per broker). May list this broker.
# roster_file = "/etc/herald/roster.csv"

# =============================================================================
# Storage Settings
# =============================================================================

# Directory holding herald.db (latest value per topic)
data_dir = "{}"

# Outbound queue depth per connection; slower subscribers are dropped
subscriber_queue_depth = {}

# =============================================================================
# Cluster Timing (milliseconds)
# =============================================================================

[cluster]
heartbeat_interval_ms = {}

# Peer is suspected after this much silence (must exceed heartbeat interval)
failure_threshold_ms = {}

liveness_check_interval_ms = {}
gossip_interval_ms = {}
election_timeout_ms = {}
gossip_timeout_ms = {}
connect_timeout_ms = {}
"#,
        path.display(),
        config.listen_addr,
        config.health_addr,
        config.metrics_addr,
        config.data_dir.display(),
        config.subscriber_queue_depth,
        cluster.heartbeat_interval_ms,
        cluster.failure_threshold_ms,
        cluster.liveness_check_interval_ms,
        cluster.gossip_interval_ms,
        cluster.election_timeout_ms,
        cluster.gossip_timeout_ms,
        cluster.connect_timeout_ms,
    );

    std::fs::write(path, content)
}
