#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use std::time::Duration;
use tracing_subscriber::prelude::*;

mod amount;
mod chains;
mod cli_output;
mod commands;
mod config;
mod errors;
mod financial_math;
mod fsutil;
mod keystore;
mod paths;
mod poll;
mod price;
mod refresher;
mod retry;
mod session;
mod state;
mod store;
mod submitter;
#[cfg(test)]
mod testing;
mod wallet;

use chains::Chain;

#[derive(Parser, Debug)]
#[command(name = "duowallet", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved config/data/log paths.
    Paths,
    /// Resolve the session: no wallet, awaiting phrase confirmation, or ready.
    Status {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Import a 12 or 24-word recovery phrase (prompted without echo, or piped on stdin).
    Import {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Generate a new 12-word wallet. The phrase is printed once.
    Create {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Re-enter a created wallet's phrase to finish setup.
    Confirm {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Delete the stored keys and start over.
    Reset {
        #[arg(long, default_value_t = false)]
        yes: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show the receive address for a chain.
    Receive {
        #[arg(value_enum)]
        chain: Chain,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Fetch balance, price, fiat value and recent transfers once.
    Balance {
        #[arg(value_enum)]
        chain: Chain,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Keep polling a chain and print every state change as a JSON line.
    Watch {
        #[arg(value_enum)]
        chain: Chain,
        /// Stop after this many updates (default: until Ctrl-C).
        #[arg(long)]
        updates: Option<usize>,
    },
    /// Send the native asset.
    Send {
        #[arg(value_enum)]
        chain: Chain,
        #[arg(long)]
        to: String,
        /// Decimal amount in ETH or SOL.
        #[arg(long)]
        amount: String,
        #[arg(long, default_value_t = false)]
        yes: bool,
        /// Give up if the transfer is still not affordable after this long.
        #[arg(long, default_value_t = 30)]
        max_wait_seconds: u64,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Block explorer link for a transaction hash.
    ExplorerUrl {
        #[arg(value_enum)]
        chain: Chain,
        hash: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_logging(paths: &paths::WalletPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("duowallet.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = paths::WalletPaths::discover()?;
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);

    if matches!(cli.cmd, Command::Paths) {
        return commands::paths(&paths);
    }
    let app = commands::App::open(&paths)?;

    match cli.cmd {
        Command::Paths => Ok(()),
        Command::Status { json } => commands::status(&app, json),
        Command::Import { json } => commands::import(&app, json),
        Command::Create { json } => commands::create(&app, json),
        Command::Confirm { json } => commands::confirm(&app, json),
        Command::Reset { yes, json } => commands::reset(&app, yes, json).await,
        Command::Receive { chain, json } => commands::receive(&app, chain, json),
        Command::Balance { chain, json } => commands::balance(&app, chain, json).await,
        Command::Watch { chain, updates } => commands::watch(&app, chain, updates).await,
        Command::Send {
            chain,
            to,
            amount,
            yes,
            max_wait_seconds,
            json,
        } => {
            commands::send(
                &app,
                commands::SendArgs {
                    chain,
                    to,
                    amount,
                    yes,
                    max_wait: Duration::from_secs(max_wait_seconds),
                    json,
                },
            )
            .await
        }
        Command::ExplorerUrl { chain, hash, json } => {
            commands::explorer_url(&app.cfg, chain, &hash, json)
        }
    }
}
