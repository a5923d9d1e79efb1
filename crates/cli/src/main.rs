//! Stratum CLI
//!
//! Stores, fetches and audits blobs in a Stratum deployment described by a
//! `stratum.toml` file.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use stratum_gateway::StorageFactory;

use crate::config::StratumConfig;

/// Stratum CLI: tiered multi-tenant blob storage.
#[derive(Parser, Debug)]
#[command(name = "stratum", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, env = "STRATUM_CONFIG", default_value = "stratum.toml", global = true)]
    config: PathBuf,

    /// Tenant to operate on.
    #[arg(long, env = "STRATUM_TENANT", default_value = "default", global = true)]
    tenant: String,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a file (or stdin) as a new blob.
    Store(commands::blob::StoreArgs),
    /// Write a blob's payload to a file or stdout.
    Fetch(commands::blob::FetchArgs),
    /// Delete a blob from every tier.
    Delete(commands::blob::IdArgs),
    /// Show a blob's description.
    Info(commands::blob::IdArgs),
    /// List the tenant's blob ids.
    List,
    /// Audit the tenant's tiers, or verify a single blob.
    Check(commands::check::CheckArgs),
    /// Delete every expired blob once.
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = StratumConfig::load(&cli.config)?;
    let factory = commands::open_factory(&config).await?;

    let result = run(&factory, &cli).await;
    factory.close().await;
    result
}

async fn run(factory: &StorageFactory, cli: &Cli) -> anyhow::Result<()> {
    let tenant = cli.tenant.as_str();
    let format = &cli.format;
    match &cli.command {
        Command::Store(args) => {
            let gateway = factory.gateway(tenant).await?;
            commands::blob::store(&gateway, args, format).await
        }
        Command::Fetch(args) => {
            let gateway = factory.gateway(tenant).await?;
            commands::blob::fetch(&gateway, args).await
        }
        Command::Delete(args) => {
            let gateway = factory.gateway(tenant).await?;
            commands::blob::delete(&gateway, args).await
        }
        Command::Info(args) => {
            let gateway = factory.gateway(tenant).await?;
            commands::blob::info(&gateway, args, format).await
        }
        Command::List => {
            let gateway = factory.gateway(tenant).await?;
            commands::blob::list(&gateway, format).await
        }
        Command::Check(args) => {
            let gateway = factory.gateway(tenant).await?;
            commands::check::run(&gateway, args, format).await
        }
        Command::Sweep => commands::sweep::run(factory, format).await,
    }
}
