//! # flat-stac CLI (`flatstac`)
//!
//! The `flatstac` binary initializes the destination database, checks the
//! source catalog, runs refreshes, and reads published results.
//!
//! ## Usage
//!
//! ```bash
//! flatstac --config ./config/flatstac.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `flatstac init` | Create the SQLite database and run schema migrations |
//! | `flatstac sources` | List registered collections and partition health |
//! | `flatstac refresh` | Consolidate, derive and publish a new version |
//! | `flatstac status` | Show the published version, optionally check staleness |
//! | `flatstac stats` | Row counts and the last data-quality report |
//! | `flatstac show <view>` | Dump a published table as JSON lines |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use flat_stac::progress::ProgressMode;
use flat_stac::refresh::RefreshMode;
use flat_stac::show::View;
use flat_stac::{config, logging, migrate, refresh, show, sources, stats, status};

/// flat-stac: flattens a partitioned pgstac catalog into query-friendly
/// relational results.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/flatstac.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "flatstac",
    about = "flat-stac — flattens a partitioned pgstac catalog into query-friendly results",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/flatstac.toml`.
    #[arg(long, global = true, default_value = "./config/flatstac.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List registered collections and whether each has a partition.
    ///
    /// Also lists orphan partitions that no registry entry points to.
    Sources,

    /// Refresh the published version from the source catalog.
    ///
    /// Copies every partition into the flat item table, derives all domain
    /// results, and publishes them atomically. Only one refresh may run at
    /// a time.
    Refresh {
        /// Keep the published flat items; only recompute derived results.
        #[arg(long)]
        views_only: bool,

        /// Compute everything and print the report without publishing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr: off, human, or json.
        /// Defaults to human when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show the published version.
    Status {
        /// Recompute the source fingerprint and report whether the
        /// published version is stale.
        #[arg(long)]
        check_source: bool,
    },

    /// Show row counts and the last refresh report.
    Stats,

    /// Print a published table as JSON lines.
    Show {
        #[arg(value_enum)]
        view: View,

        /// Only rows for this model (per-model views only).
        #[arg(long)]
        model_id: Option<String>,

        /// Maximum number of rows to print.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Refresh {
            views_only,
            dry_run,
            progress,
        } => {
            let mode = match progress.as_deref() {
                Some(s) => ProgressMode::parse(s).ok_or_else(|| {
                    anyhow::anyhow!("Unknown progress mode '{}'. Use off, human, or json.", s)
                })?,
                None => ProgressMode::default_for_tty(),
            };
            let refresh_mode = if views_only {
                RefreshMode::ViewsOnly
            } else {
                RefreshMode::Full
            };
            let reporter = mode.reporter();
            refresh::run_refresh(&cfg, refresh_mode, dry_run, reporter.as_ref()).await?;
        }
        Commands::Status { check_source } => {
            status::run_status(&cfg, check_source).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Show {
            view,
            model_id,
            limit,
        } => {
            show::run_show(&cfg, view, model_id.as_deref(), limit).await?;
        }
    }

    Ok(())
}
