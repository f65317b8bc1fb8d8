//! Daysync CLI
//!
//! Runs the daysync sync server and mints auth tokens.
//!
//! # Commands
//!
//! - `serve` - Run the HTTP sync server
//! - `token` - Create a bearer token for a user
//!
//! Every `serve` flag can also be set through a `DAYSYNC_*` environment
//! variable. Log output honours `RUST_LOG`.

mod commands;

use clap::{Parser, Subcommand};
use daysync_server::ServerConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Daysync sync server.
#[derive(Parser)]
#[command(name = "daysync")]
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
    /// Run the HTTP sync server
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "DAYSYNC_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Seconds between keep-alive pings on open streams
        #[arg(long, env = "DAYSYNC_KEEP_ALIVE_SECS", default_value = "30")]
        keep_alive_secs: u64,

        /// Signals buffered per stream before new ones are dropped
        #[arg(long, env = "DAYSYNC_QUEUE_CAPACITY", default_value = "16")]
        queue_capacity: usize,

        /// Maximum mutations accepted in one push
        #[arg(long, env = "DAYSYNC_MAX_PUSH_BATCH", default_value = "100")]
        max_push_batch: usize,

        /// Require bearer tokens signed with this secret
        #[arg(long, env = "DAYSYNC_AUTH_SECRET", hide_env_values = true)]
        auth_secret: Option<String>,

        /// Token lifetime in hours
        #[arg(long, env = "DAYSYNC_TOKEN_EXPIRY_HOURS", default_value = "24")]
        token_expiry_hours: u64,

        /// Keep client mutation ordinals in this JSON file across restarts
        #[arg(long, env = "DAYSYNC_STATE_FILE")]
        state_file: Option<PathBuf>,
    },

    /// Create a bearer token for a user
    Token {
        /// User id the token is issued for
        #[arg(short, long)]
        user: String,

        /// Signing secret (must match the server's)
        #[arg(long, env = "DAYSYNC_AUTH_SECRET", hide_env_values = true)]
        secret: String,
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
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            keep_alive_secs,
            queue_capacity,
            max_push_batch,
            auth_secret,
            token_expiry_hours,
            state_file,
        } => {
            let mut config = ServerConfig::new(bind)
                .with_keep_alive_interval(Duration::from_secs(keep_alive_secs.max(1)))
                .with_stream_queue_capacity(queue_capacity)
                .with_max_push_batch(max_push_batch);
            if let Some(secret) = auth_secret {
                let expiry = Duration::from_secs(token_expiry_hours.saturating_mul(60 * 60));
                config = config.with_auth(secret.into_bytes()).with_token_expiry(expiry);
            }
            if let Some(path) = state_file {
                config = config.with_state_path(path);
            }
            commands::serve::run(config)?;
        }
        Commands::Token { user, secret } => {
            commands::token::run(&user, &secret)?;
        }
        Commands::Version => {
            println!("daysync v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
