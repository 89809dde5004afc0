//! WalletLink Demo CLI
//!
//! Command-line interface for exercising WalletLink pairing and sessions
//! without a real relay or wallet.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "walletlink-demo")]
#[command(about = "WalletLink Demo CLI - Simulate pairing and sessions between a dapp and a wallet", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Custom storage directory (can also be set via WALLETLINK_DEMO_DIR env var)
    #[arg(long, global = true, env = "WALLETLINK_DEMO_DIR")]
    storage_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a dapp and a wallet in-process: pair, open a session, request, notify, disconnect
    Simulate {
        /// Chain granted to the session (CAIP-2)
        #[arg(long, default_value = "eip155:1")]
        chain: String,

        /// JSON-RPC method the dapp calls
        #[arg(long, default_value = "eth_sign")]
        method: String,

        /// Account address the wallet exposes on the chain
        #[arg(long, default_value = commands::simulate::DEFAULT_ADDRESS)]
        address: String,

        /// Persist both peers' sequences under the storage directory
        #[arg(long)]
        persist: bool,

        /// Leave the pairing and session in place instead of deleting them
        #[arg(long)]
        keep: bool,

        /// Show the pairing URI as a QR code
        #[arg(long)]
        qr: bool,
    },

    /// Inspect connection URIs
    Uri {
        #[command(subcommand)]
        action: UriAction,
    },

    /// Inspect persisted sequence stores
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum UriAction {
    /// Parse a `wc:` URI and show its fields
    Parse {
        /// Connection URI
        uri: String,
    },

    /// Render a `wc:` URI as a terminal QR code
    Qr {
        /// Connection URI
        uri: String,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// List pairings and sessions stored for each peer
    List {
        /// Directory to read (defaults to the storage directory)
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("walletlink_demo=debug,walletlink_engine=debug,walletlink_lib=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("walletlink_demo=info,walletlink_engine=warn,walletlink_lib=warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Setup storage directory
    let storage_dir = if let Some(dir) = cli.storage_dir {
        PathBuf::from(dir)
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("walletlink-demo")
    };

    // Dispatch commands
    match cli.command {
        Commands::Simulate {
            chain,
            method,
            address,
            persist,
            keep,
            qr,
        } => {
            let options = commands::simulate::SimulateOptions {
                chain,
                method,
                address,
                storage_dir: persist.then(|| storage_dir.clone()),
                keep,
                show_qr: qr,
            };
            commands::simulate::run(options, cli.verbose).await?;
        }
        Commands::Uri { action } => match action {
            UriAction::Parse { uri } => {
                commands::uri::parse(&uri, cli.verbose)?;
            }
            UriAction::Qr { uri } => {
                commands::uri::qr(&uri, cli.verbose)?;
            }
        },
        Commands::Store { action } => match action {
            StoreAction::List { dir } => {
                let dir = dir.unwrap_or(storage_dir);
                commands::store::list(&dir, cli.verbose).await?;
            }
        },
    }

    Ok(())
}
