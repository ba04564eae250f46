//! kvclone CLI
//!
//! Runs a state server or a one-shot clone client over TCP.
//!
//! # Commands
//!
//! - `server` - Run a state server until interrupted
//! - `get` - Print the value of a key
//! - `set` - Set a key and wait for the server to publish it
//! - `del` - Delete a key
//! - `dump` - Print every replicated record

mod commands;

use clap::{Args, Parser, Subcommand};
use commands::ConnectOptions;
use kvclone_transport::Endpoint;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// kvclone replicated key-value store tools.
#[derive(Parser)]
#[command(name = "kvclone")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every client command.
#[derive(Args)]
struct ClientArgs {
    /// Server endpoint; repeat for failover
    #[arg(short, long = "endpoint", default_value = "tcp://localhost:5556")]
    endpoints: Vec<Endpoint>,

    /// Only replicate keys under this prefix
    #[arg(short, long, default_value = "")]
    subtree: String,

    /// Expected server heartbeat interval in milliseconds
    #[arg(long, default_value = "1000")]
    heartbeat_ms: u64,

    /// Give up if no snapshot arrives within this many seconds
    #[arg(long, default_value = "10")]
    timeout: u64,
}

impl ClientArgs {
    fn options(self) -> ConnectOptions {
        ConnectOptions {
            endpoints: self.endpoints,
            subtree: self.subtree,
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            timeout: Duration::from_secs(self.timeout),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a state server until interrupted
    Server {
        /// Endpoint to bind
        #[arg(short, long, default_value = "tcp://*:5556")]
        endpoint: Endpoint,

        /// Heartbeat interval in milliseconds
        #[arg(long, default_value = "1000")]
        heartbeat_ms: u64,

        /// TTL scan interval in milliseconds
        #[arg(long, default_value = "1000")]
        ttl_scan_ms: u64,

        /// Log server counters every this many seconds (0 disables)
        #[arg(long, default_value = "0")]
        stats_every: u64,
    },

    /// Print the value of a key
    Get {
        /// Key to read
        key: String,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Set a key and wait for the server to publish it
    Set {
        /// Key to write
        key: String,

        /// Value to store
        value: String,

        /// Expire the key after this many seconds
        #[arg(long)]
        ttl: Option<f64>,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Delete a key
    Del {
        /// Key to delete
        key: String,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Print every replicated record
    Dump {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        #[command(flatten)]
        client: ClientArgs,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Server {
            endpoint,
            heartbeat_ms,
            ttl_scan_ms,
            stats_every,
        } => {
            commands::server::run(
                endpoint,
                Duration::from_millis(heartbeat_ms),
                Duration::from_millis(ttl_scan_ms),
                Duration::from_secs(stats_every),
            )
            .await?;
        }
        Commands::Get { key, client } => {
            commands::get::run(client.options(), &key).await?;
        }
        Commands::Set {
            key,
            value,
            ttl,
            client,
        } => {
            let ttl = ttl.map(Duration::try_from_secs_f64).transpose()?;
            commands::set::run(client.options(), &key, Some(value), ttl).await?;
        }
        Commands::Del { key, client } => {
            commands::set::run(client.options(), &key, None, None).await?;
        }
        Commands::Dump { format, client } => {
            commands::dump::run(client.options(), &format).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_repeated_endpoints() {
        let cli = Cli::try_parse_from([
            "kvclone",
            "get",
            "prod.db",
            "-e",
            "tcp://a:5556",
            "-e",
            "tcp://b:5556",
        ])
        .unwrap();
        let Commands::Get { key, client } = cli.command else {
            panic!("expected get");
        };
        assert_eq!(key, "prod.db");
        assert_eq!(
            client.endpoints,
            vec![Endpoint::tcp("a", 5556), Endpoint::tcp("b", 5556)]
        );
    }

    #[test]
    fn rejects_bad_endpoint() {
        assert!(Cli::try_parse_from(["kvclone", "server", "-e", "udp://x:1"]).is_err());
    }
}
