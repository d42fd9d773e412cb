#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the drillhole CSV ingestion tool.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use smart_mining_database::memory::InMemorySampleStore;
use smart_mining_database::{PostgresSampleStore, SampleStore, db, run_migrations};
use smart_mining_database_models::MAX_RECENT_LIMIT;
use smart_mining_ingest::ingest_path;
use smart_mining_ingest_models::IngestOptions;

#[derive(Parser)]
#[command(name = "smart_mining_ingest", about = "Drillhole CSV ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Ingest one CSV file into the `forages` table
    File {
        /// Path to the CSV file
        path: PathBuf,
        /// Decimal separator used by numeric cells (e.g. "," for European exports)
        #[arg(long, env = "DECIMAL_SEPARATOR", default_value = ".")]
        decimal_separator: char,
        /// Parse and validate without touching the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the most recently ingested samples as JSON
    Recent {
        /// Number of samples to print (capped at 1000)
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            log::info!("Running database migrations...");
            let db = db::connect_from_env().await?;
            run_migrations(db.as_ref()).await?;
            log::info!("Migrations complete.");
        }
        Commands::File {
            path,
            decimal_separator,
            dry_run,
        } => {
            let options = IngestOptions { decimal_separator };

            let store: Box<dyn SampleStore> = if dry_run {
                log::info!("Dry run: samples are validated but not stored");
                Box::new(InMemorySampleStore::new())
            } else {
                let db = db::connect_from_env().await?;
                run_migrations(db.as_ref()).await?;
                Box::new(PostgresSampleStore::new(Arc::from(db)))
            };

            let result = ingest_path(store.as_ref(), &path, &options).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Recent { limit } => {
            if limit > MAX_RECENT_LIMIT {
                log::warn!("Limit {limit} capped at {MAX_RECENT_LIMIT}");
            }
            let db = db::connect_from_env().await?;
            let store = PostgresSampleStore::new(Arc::from(db));
            let rows = store.list_recent(limit).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}
