//! lxdform-provider: LXD/Incus resource provider.
//!
//! `serve` speaks JSON lines on stdin/stdout, `schema` prints all schemas.
//! Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lxdform_provider::{Provider, provider, rpc};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// LXD/Incus resource provider
#[derive(Parser, Debug)]
#[command(name = "lxdform-provider", version, about)]
struct Args {
    /// Log filter, overrides RUST_LOG (e.g. "lxdform_provider=debug")
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve requests on stdin, one JSON object per line
    Serve,
    /// Print provider and resource schemas as JSON
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match &args.log_filter {
        Some(filter) => {
            tracing_subscriber::EnvFilter::try_new(filter).context("invalid log filter")?
        }
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "lxdform_provider=info,lxdform_client=info".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match args.command {
        Command::Schema => {
            let schema = serde_json::to_string_pretty(&provider::schema())?;
            println!("{}", schema);
        }
        Command::Serve => serve().await?,
    }

    Ok(())
}

async fn serve() -> Result<()> {
    let provider = Provider::new();
    let cancel = provider.cancel_token();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting lxdform-provider");

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        res = rpc::serve(&provider, stdin, stdout) => {
            res.context("request loop failed")?;
            info!("Input closed, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling pending operations");
            cancel.cancel();
        }
    }

    Ok(())
}
