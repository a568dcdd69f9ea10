//! # Schedule Harvester CLI (`harvester`)
//!
//! ## Usage
//!
//! ```bash
//! harvester --config ./config/harvester.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvester init` | Create the SQLite database and schema |
//! | `harvester collect` | Run the collector once and register new artifacts |
//! | `harvester process` | Process pending imports once |
//! | `harvester cycle` | One harvest cycle (debounced unless `--force`) |
//! | `harvester run` | Scheduler and read API until SIGINT/SIGTERM |
//! | `harvester serve` | Read API only |
//! | `harvester deliveries` | List stored deliveries |
//! | `harvester imports` | List imports |
//! | `harvester stats` | Database summary |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use schedule_harvester::daemon::{self, Daemon};
use schedule_harvester::{config, harvest_cmd, list_cmd, logging, migrate, server, stats};

/// Schedule Harvester: turns published schedule images into queryable
/// delivery records.
#[derive(Parser)]
#[command(
    name = "harvester",
    about = "Harvest schedule images and extract delivery records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvester.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run the collector once and create imports for unseen artifacts.
    Collect,

    /// Process every eligible pending import once.
    Process,

    /// Run one harvest cycle: collect, then process.
    Cycle {
        /// Ignore the grace period after the last completed import.
        #[arg(long)]
        force: bool,
    },

    /// Run the scheduler (and the read API) until interrupted.
    Run {
        /// Do not start the HTTP server.
        #[arg(long)]
        no_server: bool,
    },

    /// Serve the read-only HTTP API.
    Serve,

    /// List stored deliveries, newest date first.
    Deliveries {
        /// Only deliveries on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only deliveries on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Case-insensitive substring of the location name.
        #[arg(long)]
        location: Option<String>,

        /// Maximum number of rows.
        #[arg(long)]
        limit: Option<i64>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// List imports, newest first.
    Imports {
        /// Filter by state: pending, completed, or failed.
        #[arg(long)]
        state: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Show import and delivery counts.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Collect => {
            harvest_cmd::run_collect(&cfg).await?;
        }
        Commands::Process => {
            harvest_cmd::run_process(&cfg).await?;
        }
        Commands::Cycle { force } => {
            harvest_cmd::run_cycle(&cfg, force).await?;
        }
        Commands::Run { no_server } => {
            Daemon::from_config(&cfg, !no_server).await?.run().await?;
        }
        Commands::Serve => {
            let (tx, rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                daemon::shutdown_signal().await;
                let _ = tx.send(true);
            });
            server::run_server(&cfg, rx).await?;
        }
        Commands::Deliveries {
            since,
            until,
            location,
            limit,
            json,
        } => {
            list_cmd::run_deliveries(&cfg, since, until, location, limit, json).await?;
        }
        Commands::Imports { state, limit } => {
            list_cmd::run_imports(&cfg, state, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
