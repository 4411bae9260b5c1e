//! leadpool-ingest - Lead ingestion and aggregation pipeline
//!
//! Batch CLI: ingests provider lead files into the deduplicated system of
//! record and maintains the `lead_overlap` projection the query layer
//! reads. Not a service; every subcommand runs to completion and exits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leadpool_common::config::Config;
use leadpool_common::db::init_database;
use leadpool_ingest::dedup;
use leadpool_ingest::materialize::Materializer;
use leadpool_ingest::store::LeadStore;

/// Command-line arguments for leadpool-ingest
#[derive(Parser, Debug)]
#[command(name = "leadpool-ingest")]
#[command(about = "Lead ingestion, deduplication, and aggregation pipeline")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "LEADPOOL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest all source files from the input directory
    Ingest {
        /// Override the configured input directory
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Rebuild the aggregated projection from the system of record
    Refresh,
    /// Show table counts and the last run's audit summary
    Status,
    /// Delete a provider and its submissions (cascading)
    DeleteProvider { name: String },
    /// Remove leads left with zero submissions
    PurgeOrphans,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadpool_ingest=info,leadpool_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config =
        Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!("leadpool-ingest {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.storage.db_path.display());

    let pool = init_database(&config.storage.db_path)
        .await
        .context("Failed to initialize database")?;

    let store = LeadStore::new(pool.clone());
    let materializer = Materializer::new(pool.clone());

    match args.command {
        Command::Ingest { input } => {
            if let Some(dir) = input {
                config.input.directory = dir;
            }
            info!("Input directory: {}", config.input.directory.display());

            let outcome = dedup::run_ingest(&pool, &config).await?;

            if config.pipeline.refresh_after_ingest {
                // First run (empty projection) needs a full build; after
                // that, only the touched leads are recomputed
                let counts = store.counts().await?;
                if counts.overlap_rows == 0 {
                    materializer.rebuild_full().await?;
                } else {
                    materializer
                        .refresh_incremental(&outcome.touched_leads)
                        .await?;
                }
            }

            println!(
                "Ingested {} files: {} rows read, {} accepted, {} corrupt, {} unrecognized-area, {} area conflicts",
                outcome.stats.files_total,
                outcome.stats.rows_read,
                outcome.stats.rows_accepted,
                outcome.stats.rows_corrupt,
                outcome.stats.rows_unrecognized_area,
                outcome.stats.area_conflicts,
            );
        }

        Command::Refresh => {
            let rows = materializer.rebuild_full().await?;
            println!("Projection rebuilt: {} rows", rows);
        }

        Command::Status => {
            let counts = store.counts().await?;
            println!("leads:        {}", counts.leads);
            println!("providers:    {}", counts.providers);
            println!("submissions:  {}", counts.submissions);
            println!("overlap rows: {}", counts.overlap_rows);

            match store.last_run().await? {
                Some(run) => {
                    println!(
                        "last run:     {} ({} read / {} accepted / {} corrupt)",
                        run.finished_at, run.rows_read, run.rows_accepted, run.rows_corrupt
                    );
                    println!("              summary: {}", run.summary);
                }
                None => println!("last run:     none"),
            }
        }

        Command::DeleteProvider { name } => {
            let result = store
                .delete_provider(&name, config.storage.orphan_leads)
                .await?;
            println!(
                "Deleted provider '{}': {} submissions removed, {} orphan leads purged",
                name, result.submissions_removed, result.leads_purged
            );
            // Keep the projection consistent with the shrunken record
            materializer.rebuild_full().await?;
        }

        Command::PurgeOrphans => {
            let purged = store.purge_orphan_leads().await?;
            println!("Purged {} orphan leads", purged);
            if purged > 0 {
                materializer.rebuild_full().await?;
            }
        }
    }

    Ok(())
}
