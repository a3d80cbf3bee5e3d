//! # Stateful Ingest CLI (`sti`)
//!
//! ## Usage
//!
//! ```bash
//! sti --config ./config/sti.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sti init` | Create the SQLite state database and run schema migrations |
//! | `sti sources` | List configured pipelines and their source health |
//! | `sti run <pipeline>` | Ingest a pipeline, remove stale entities, commit a checkpoint |
//! | `sti state show <pipeline>` | Show the latest committed checkpoint |
//! | `sti entity get <urn>` | Print an entity record from the catalog |
//! | `sti serve catalog` | Serve the local catalog over HTTP |
//!
//! ## Examples
//!
//! ```bash
//! # Preview which entities a run would remove
//! sti run warehouse --dry-run --config ./config/sti.toml
//!
//! # Checkpoint as JSON
//! sti state show warehouse --json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use stateful_ingest::{config, get, ingest, migrate, server, sources, state_cmd};

/// Stateful Ingest CLI: metadata ingestion with checkpointed stale-entity removal.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sti.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sti",
    about = "Metadata ingestion with checkpointed stale-entity removal",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sti.toml")]
    config: PathBuf,

    /// Debug-level logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the state database schema.
    ///
    /// Creates the SQLite database file with the checkpoint and local
    /// catalog tables. Safe to run repeatedly.
    Init,

    /// List configured pipelines and whether their sources are reachable.
    Sources,

    /// Run one ingestion pipeline.
    ///
    /// Scans the source, emits every entity, and with stateful ingestion
    /// enabled soft-deletes entities that disappeared since the last
    /// committed checkpoint.
    Run {
        /// Pipeline name, as in `[pipelines.<name>]`.
        pipeline: String,

        /// Scan and diff only: emit, remove and commit nothing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect checkpoints.
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Inspect catalog entities.
    Entity {
        #[command(subcommand)]
        action: EntityAction,
    },

    /// Start an HTTP service.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Show the latest committed checkpoint of a pipeline.
    Show {
        pipeline: String,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum EntityAction {
    /// Print one entity record by URN.
    Get { urn: String },
}

#[derive(Subcommand)]
enum ServeService {
    /// Serve the local SQLite catalog on `[server].bind`.
    Catalog,
}

fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Run { pipeline, dry_run } => {
            ingest::run_pipeline(&cfg, &pipeline, dry_run).await?;
        }
        Commands::State { action } => match action {
            StateAction::Show { pipeline, json } => {
                state_cmd::run_state_show(&cfg, &pipeline, json).await?;
            }
        },
        Commands::Entity { action } => match action {
            EntityAction::Get { urn } => {
                get::run_get(&cfg, &urn).await?;
            }
        },
        Commands::Serve { service } => match service {
            ServeService::Catalog => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}
