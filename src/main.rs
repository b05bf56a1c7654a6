//! # Chat Harness CLI (`chx`)
//!
//! The `chx` binary runs the chat server and the supporting maintenance
//! commands: database initialization, reference ingestion, one-off local
//! queries, and bearer-token minting.
//!
//! ## Usage
//!
//! ```bash
//! chx --config ./config/chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chx init` | Create the SQLite database and run schema migrations |
//! | `chx serve` | Start the HTTP chat server |
//! | `chx ingest` | Split, embed, and store reference markdown |
//! | `chx ask "<message>"` | Run one pipeline request locally |
//! | `chx token issue <subject>` | Mint an HMAC bearer token |
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG` to adjust
//! verbosity (default `info`).

use std::path::PathBuf;

use chat_harness::models::{ChatRequest, Mode, Subject};
use chat_harness::pipeline::Orchestrator;
use chat_harness::{auth, config, ingest, migrate, server};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Chat Harness CLI: a retrieval-augmented chat backend.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "chx",
    about = "Chat Harness: a retrieval-augmented chat backend",
    version,
    long_about = "Chat Harness answers chat messages by embedding them, retrieving similar \
    stored records (past exchanges or ingested reference sections), and prompting a \
    completion model with that context."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `chat_history` and
    /// `page_sections` tables. Safe to run repeatedly.
    Init,

    /// Start the HTTP chat server.
    ///
    /// Binds to `[server].bind` and serves `/api/chat/memory`,
    /// `/api/chat/knowledge`, and `/health`.
    Serve,

    /// Ingest reference markdown into `page_sections`.
    ///
    /// Walks `[ingest].root`, splits each file at headings, and embeds
    /// sections whose content changed since the last run.
    Ingest {
        /// Show file and section counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a single chat request locally and print the reply.
    Ask {
        /// The user message.
        message: String,

        /// Pipeline mode: `memory` or `knowledge`.
        #[arg(long, default_value = "knowledge")]
        mode: String,

        /// Owner id used for memory retrieval and persistence.
        #[arg(long, default_value = "local")]
        owner: String,

        /// Completion model; defaults to `[completion].default_model`.
        #[arg(long)]
        model: Option<String>,

        /// Recent chat history to include (knowledge mode).
        #[arg(long)]
        history: Option<String>,
    },

    /// Manage bearer tokens.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

/// Token subcommands.
#[derive(Subcommand)]
enum TokenAction {
    /// Mint an HMAC-signed bearer token for a subject.
    ///
    /// Reads the signing secret from the environment variable named by
    /// `[auth].secret_env`.
    Issue {
        /// Subject (user id) the token authenticates.
        subject: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { dry_run } => {
            ingest::run_ingest(&cfg, dry_run).await?;
        }
        Commands::Ask {
            message,
            mode,
            owner,
            model,
            history,
        } => {
            let mode: Mode = mode.parse()?;
            let deps = server::build_collaborators(&cfg).await?;
            let orchestrator = Orchestrator::new(server::settings_for(&cfg, mode), deps)?;

            let request = ChatRequest {
                message,
                model,
                chat_history: history,
            };
            let subject = Subject { id: owner };

            match orchestrator.handle(&request, &subject).await {
                Ok(response) => println!("{}", response.message),
                Err(err) => {
                    println!("{}", serde_json::to_string_pretty(&err.body())?);
                    std::process::exit(1);
                }
            }
        }
        Commands::Token {
            action: TokenAction::Issue { subject },
        } => {
            let secret = auth::read_secret(&cfg.auth)?;
            let validator = auth::HmacTokenValidator::new(secret)?;
            println!("{}", validator.issue(&subject));
        }
    }

    Ok(())
}
