//! Arbor server entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use arbor::config::{self, ServeConfig, TransportMode};
use arbor::server::{auth, http, stdio, AppState};
use arbor::storage::{ApiKeyStore, SqliteStorage};

#[derive(Parser)]
#[command(name = "arbor", version, about = "Multi-tenant reasoning store for AI agents")]
struct Cli {
    /// Database path (defaults to ~/.arbor/data/arbor.db)
    #[arg(long, global = true, env = "ARBOR_DB")]
    db: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all log output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server on one of the two transports
    Serve {
        /// Transport: stdio (local agents) or http (network)
        #[arg(long, value_enum, default_value = "stdio")]
        mode: TransportMode,

        /// Bind address for http mode
        #[arg(long, default_value = "127.0.0.1:8700")]
        bind: SocketAddr,

        /// Tenant used by stdio mode (http resolves tenants from tokens)
        #[arg(long, env = "ARBOR_TENANT", default_value = "local")]
        tenant: String,

        /// Seconds in-flight requests may drain after a shutdown signal
        #[arg(long, default_value_t = 5)]
        grace_secs: u64,
    },

    /// Manage api keys for the http transport
    Apikey {
        #[command(subcommand)]
        command: ApikeyCommands,
    },
}

#[derive(Subcommand)]
enum ApikeyCommands {
    /// Mint a token for a tenant and store its digest. The token is
    /// printed once and never persisted.
    Create {
        /// Tenant the token resolves to
        tenant: String,
        /// Optional label for operators
        #[arg(long)]
        label: Option<String>,
    },
    /// List provisioned keys (metadata only)
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let db_path = config::resolve_db_path(cli.db.as_deref())
        .context("could not resolve a database path; pass --db or set ARBOR_DB")?;
    config::ensure_parent_dir(&db_path)?;
    let storage = SqliteStorage::open(&db_path)?;
    tracing::info!(db = %db_path.display(), "database open");

    match cli.command {
        Commands::Serve {
            mode,
            bind,
            tenant,
            grace_secs,
        } => {
            let config = ServeConfig {
                mode,
                bind,
                default_tenant: tenant,
                grace: Duration::from_secs(grace_secs),
            };
            let state = AppState::new(storage, config.default_tenant.clone());
            match config.mode {
                TransportMode::Stdio => stdio::serve(state).await,
                TransportMode::Http => http::serve(state, config.bind, config.grace).await,
            }
        }

        Commands::Apikey { command } => {
            let mut storage = storage;
            match command {
                ApikeyCommands::Create { tenant, label } => {
                    let token = auth::generate_token();
                    storage.insert_api_key(&auth::hash_token(&token), &tenant, label.as_deref())?;
                    println!("{token}");
                    eprintln!("Token for tenant '{tenant}' printed above; store it now - only its digest is kept.");
                }
                ApikeyCommands::List => {
                    for key in storage.list_api_keys()? {
                        println!(
                            "{}\t{}\t{}",
                            key.tenant_id,
                            key.label.as_deref().unwrap_or("-"),
                            key.created_at
                        );
                    }
                }
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("arbor=info"),
            2 => EnvFilter::new("arbor=debug"),
            _ => EnvFilter::new("arbor=trace"),
        }
    };

    // Stdout belongs to the stdio transport; logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}
