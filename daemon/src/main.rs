//! Lattice daemon: entry point for running a lattice node.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use lattice_node::{init_logging, Node, NodeConfig};
use lattice_types::NetworkId;

/// How often gauges are refreshed and caches cleaned.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "lattice-daemon", about = "Lattice node daemon")]
struct Cli {
    /// Network to join: "live", "test", or "dev".
    /// When a config file is provided, defaults to the file's network value.
    #[arg(long, env = "LATTICE_NETWORK")]
    network: Option<String>,

    /// Data directory for ledger storage. Overrides the config file.
    #[arg(long, env = "LATTICE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level filter, e.g. "info" or "debug,lattice_consensus=trace".
    /// Overrides the config file; `RUST_LOG` overrides both.
    #[arg(long, env = "LATTICE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Node commands.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until Ctrl-C.
    Run,
}

fn parse_network(s: &str) -> anyhow::Result<NetworkId> {
    match s.to_lowercase().as_str() {
        "live" => Ok(NetworkId::Live),
        "test" => Ok(NetworkId::Test),
        "dev" => Ok(NetworkId::Dev),
        other => anyhow::bail!("unknown network: {other}"),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path_str = path.to_string_lossy();
            NodeConfig::from_toml_file(&path_str)
                .with_context(|| format!("failed to load config from {}", path.display()))?
        }
        None => NodeConfig::default(),
    };
    if let Some(network) = cli.network.as_deref() {
        config.network = parse_network(network)?;
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(config.log_format, &config.log_level);
    if let Some(path) = &cli.config {
        tracing::info!(path = %path.display(), "loaded config");
    }

    match cli.command {
        Command::Node { action } => match action {
            NodeAction::Run => run(config).await?,
        },
    }
    Ok(())
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    tracing::info!(
        network = config.network.as_str(),
        data_dir = %config.data_dir.display(),
        "starting lattice node"
    );
    let enable_metrics = config.enable_metrics;

    // Opening LMDB and joining component threads block; keep them off the runtime.
    let node = tokio::task::spawn_blocking(move || Node::open(config))
        .await?
        .context("failed to open node")?;
    let node = Arc::new(node);
    node.start().context("failed to start node")?;

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                node.cleanup();
                if enable_metrics {
                    node.refresh_metrics();
                    match node.metrics.encode() {
                        Ok(snapshot) => tracing::debug!(%snapshot, "metrics snapshot"),
                        Err(err) => tracing::warn!(%err, "failed to encode metrics"),
                    }
                }
                tracing::info!(
                    blocks = node.ledger.block_count(),
                    cemented = node.ledger.cemented_count(),
                    elections = node.active_elections.len(),
                    unchecked = node.unchecked.len(),
                    confirming = node.confirming_set.len(),
                    "node status"
                );
            }
        }
    }

    tracing::info!("shutdown signal received, stopping node");
    let stopping = Arc::clone(&node);
    tokio::task::spawn_blocking(move || stopping.stop()).await?;
    tracing::info!("lattice daemon exited cleanly");
    Ok(())
}
