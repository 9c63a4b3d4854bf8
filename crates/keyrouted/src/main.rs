//! keyrouted: the keyroute daemon.
//!
//! One binary, four roles:
//! - `store`: serves the coordination store and reaps expired sessions
//! - `worker`: holds keys, registers them under a session, serves their state
//! - `router`: serves the caller-facing query service
//! - `query`: routes queries from the command line and prints the results
//!
//! # Usage
//!
//! ```text
//! keyrouted store --port 7700 --data-dir /var/lib/keyroute
//! keyrouted worker --config keyroute.toml --port 7801 --keys 1,2,3
//! keyrouted router --config keyroute.toml --port 7900
//! keyrouted query --config keyroute.toml 5 --repeat 10
//! ```

mod query_mode;
mod router_mode;
mod store_mode;
mod worker_mode;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use keyroute_core::RoutingConfig;
use tracing::info;

#[derive(Parser)]
#[command(name = "keyrouted", about = "keyroute daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Overrides shared by the modes that talk to the store.
#[derive(clap::Args, Debug, Clone)]
struct ConfigArgs {
    /// Path to keyroute.toml (defaults apply when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store endpoints, comma separated; overrides `store.endpoints`.
    #[arg(long, value_delimiter = ',')]
    store: Vec<String>,

    /// Namespace root; overrides `store.namespace_root`.
    #[arg(long)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the coordination store.
    Store {
        /// Port to listen on.
        #[arg(long, default_value = "7700")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/keyroute")]
        data_dir: PathBuf,

        /// Keep state in memory only.
        #[arg(long)]
        in_memory: bool,

        /// Expired-session reap interval in milliseconds.
        #[arg(long, default_value = "500")]
        reap_interval: u64,
    },

    /// Hold keys and serve their state.
    Worker {
        #[command(flatten)]
        config: ConfigArgs,

        /// Port to listen on.
        #[arg(long, default_value = "7800")]
        port: u16,

        /// Address registered as this worker's location (default 127.0.0.1:PORT).
        #[arg(long)]
        advertise: Option<String>,

        /// Keys this worker owns, comma separated.
        #[arg(long, value_delimiter = ',', required = true)]
        keys: Vec<i64>,
    },

    /// Serve the query service.
    Router {
        #[command(flatten)]
        config: ConfigArgs,

        /// Port to listen on.
        #[arg(long, default_value = "7900")]
        port: u16,
    },

    /// Route queries for one key and print each result.
    Query {
        #[command(flatten)]
        config: ConfigArgs,

        /// Key to query (JSON, e.g. `5`).
        key: String,

        /// Number of queries to issue.
        #[arg(long, default_value = "1")]
        repeat: u32,

        /// Pause between repeated queries in milliseconds.
        #[arg(long, default_value = "1000")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(
                    "info,keyrouted=debug,keyroute=debug",
                )),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Store {
            port,
            data_dir,
            in_memory,
            reap_interval,
        } => {
            let data_dir = (!in_memory).then_some(data_dir);
            store_mode::run_store(port, data_dir, reap_interval).await
        }
        Command::Worker {
            config,
            port,
            advertise,
            keys,
        } => {
            let config = load_config(&config)?;
            let advertise = advertise.unwrap_or_else(|| format!("127.0.0.1:{port}"));
            worker_mode::run_worker(config, port, advertise, keys).await
        }
        Command::Router { config, port } => {
            let config = load_config(&config)?;
            router_mode::run_router(config, port).await
        }
        Command::Query {
            config,
            key,
            repeat,
            interval,
        } => {
            let config = load_config(&config)?;
            query_mode::run_query(config, &key, repeat, interval).await
        }
    }
}

/// Load the config file (or defaults) and apply CLI overrides.
fn load_config(args: &ConfigArgs) -> anyhow::Result<RoutingConfig> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => RoutingConfig::default(),
    };
    if !args.store.is_empty() {
        config.store.endpoints = args.store.clone();
    }
    if let Some(namespace) = &args.namespace {
        config.store.namespace_root = namespace.clone();
    }
    config.validate()?;
    info!(
        namespace = %config.store.namespace_root,
        endpoints = ?config.store.endpoints,
        "configuration loaded"
    );
    Ok(config)
}

fn read_config(path: &Path) -> anyhow::Result<RoutingConfig> {
    RoutingConfig::from_file(path)
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}
