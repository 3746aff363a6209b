//! txnframe CLI
//!
//! Command-line tools for running and probing a txnframe coordinator.
//!
//! # Commands
//!
//! - `serve` - Run a coordinator
//! - `ping` - Check a coordinator answers
//! - `start-txn` - Start a transaction session and print its id
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// txnframe coordinator tools.
#[derive(Parser)]
#[command(name = "txnframe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a coordinator
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        bind: SocketAddr,

        /// Database name used in prelock paths
        #[arg(short, long, default_value = "cmdb")]
        db: String,

        /// Maximum concurrent connections
        #[arg(long, default_value = "1000")]
        max_connections: usize,

        /// Seconds before an idle session is aborted
        #[arg(long, default_value = "300")]
        session_ttl: u64,
    },

    /// Check a coordinator answers
    Ping {
        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        addr: String,
    },

    /// Start a transaction session and print its id
    StartTxn {
        /// Coordinator address
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        addr: String,

        /// Request id recorded on the transaction
        #[arg(short, long, default_value = "")]
        request_id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            db,
            max_connections,
            session_ttl,
        } => {
            commands::serve::run(bind, &db, max_connections, session_ttl).await?;
        }
        Commands::Ping { addr } => {
            commands::ping::run(&addr).await?;
        }
        Commands::StartTxn {
            addr,
            request_id,
            format,
        } => {
            commands::start_txn::run(&addr, &request_id, &format).await?;
        }
        Commands::Version => {
            println!("txnframe CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "wire protocol magic 0x{:04X}",
                txnframe_protocol::MAGIC_VERSION
            );
        }
    }

    Ok(())
}
