//! chatsync CLI
//!
//! Command-line tools for running and inspecting chatsync.
//!
//! # Commands
//!
//! - `serve` - Run the reference delta query server
//! - `token` - Issue a bearer token for a caller
//! - `watermarks` - Print a persisted watermark file

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// chatsync command-line tools.
#[derive(Parser)]
#[command(name = "chatsync")]
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
    /// Run the reference delta query server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Token signing secret; omit to serve without authentication
        #[arg(short, long)]
        secret: Option<String>,

        /// Populate a few demo sessions on startup
        #[arg(long)]
        seed_demo: bool,
    },

    /// Issue a bearer token for a caller
    Token {
        /// Token signing secret
        #[arg(short, long)]
        secret: String,

        /// Caller id (UUID); a random one is generated if omitted
        #[arg(short, long)]
        caller: Option<String>,
    },

    /// Print the contents of a watermark file
    Watermarks {
        /// Path to the watermark file
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            secret,
            seed_demo,
        } => {
            commands::serve::run(bind, secret, seed_demo)?;
        }
        Commands::Token { secret, caller } => {
            commands::token::run(&secret, caller.as_deref())?;
        }
        Commands::Watermarks { path, format } => {
            commands::watermarks::run(&path, &format)?;
        }
        Commands::Version => {
            println!("chatsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
