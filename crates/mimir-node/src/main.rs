use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use mimir_consensus::MemLog;
use mimir_kv::{CoreConfig, KvCore};
use mimir_server::serve;

#[derive(clap::Parser, Debug)]
#[command(name = "mimir-node", about = "Mimir KV node")]
struct Cli {
    #[arg(long)]
    node_id: u64,
    #[arg(long, default_value = "0.0.0.0:17000")]
    listen_addr: String,
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RaftLogConfig {
    snapshot_threshold_bytes: u64,
    apply_channel_capacity: usize,
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    request_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    raftlog: RaftLogConfig,
    server: ServerConfig,
    observability: ObservabilityConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new()
        .merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let config: Config = figment
        .merge(Env::prefixed("MIMIR_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
    }

    tracing::info!(
        node_id = cli.node_id,
        listen_addr = %cli.listen_addr,
        "node starting"
    );

    let listen_addr: SocketAddr = cli
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr: {}", cli.listen_addr))?;

    // Single-node in-memory log. A real consensus backend slots in by
    // implementing RaftLog and feeding KvCore the same apply stream.
    let (apply_tx, apply_rx) =
        tokio::sync::mpsc::channel(config.raftlog.apply_channel_capacity);
    let log = Arc::new(MemLog::new(apply_tx));

    let snapshot_threshold = match config.raftlog.snapshot_threshold_bytes {
        0 => None,
        n => Some(n),
    };
    let core = KvCore::new(
        log,
        apply_rx,
        cli.node_id,
        CoreConfig {
            request_timeout: Duration::from_millis(config.server.request_timeout_ms),
            snapshot_threshold,
        },
    );

    serve(listen_addr, core, cli.node_id).await
}
