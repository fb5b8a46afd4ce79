//! # newsdesk CLI
//!
//! The `newsdesk` binary runs the conversational intake pipeline and the
//! small amount of operational tooling around it.
//!
//! ## Usage
//!
//! ```bash
//! newsdesk --config ./config/newsdesk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `newsdesk init` | Create the SQLite database and run schema migrations |
//! | `newsdesk run` | Start the intake service (long-polls the messaging transport) |
//! | `newsdesk list` | Print the most recent records in the content store |
//!
//! The transport token is read from `NEWSDESK_BOT_TOKEN`; the AI adapters
//! read `OPENROUTER_API_KEY` and `OPENAI_API_KEY` when enabled.

mod approval;
mod batch;
mod commit;
mod config;
mod controller;
mod db;
mod expand;
mod media;
mod metadata;
mod migrate;
mod models;
mod service;
mod session;
mod store;
mod transcribe;
mod transport;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// newsdesk, a conversational intake pipeline that turns chat
/// submissions into reviewed, publishable news drafts.
#[derive(Parser)]
#[command(
    name = "newsdesk",
    about = "Conversational news intake with AI enrichment and reviewer approval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/newsdesk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Run the intake service.
    ///
    /// Long-polls the messaging transport, assembles drafts from inbound
    /// events, and routes committed drafts to the reviewer.
    Run,

    /// Print the most recent records in the content store.
    List {
        /// Maximum number of records to print.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("newsdesk=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("database initialized at {}", config.db.path.display());
        }
        Commands::Run => {
            service::run(config).await?;
        }
        Commands::List { limit } => {
            let pool = db::connect(&config).await?;
            let records = store::list_recent(&pool, limit).await?;
            if records.is_empty() {
                println!("no records");
            } else {
                for record in records {
                    println!("{}  {}  [{}]  {}", record.date, record.id, record.status, record.title);
                }
            }
            pool.close().await;
        }
    }

    Ok(())
}
