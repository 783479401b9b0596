//! Command-line entry point: serve the API, run ingestions, manage the schema.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lavoura_ingest::{IngestConfig, IngestPipeline};
use lavoura_sidra::{SidraClient, SidraConfig};
use lavoura_store::{PgProductionStore, StoreConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lavoura", about = "Brazilian municipal soy production data service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run schema migrations and serve the HTTP API.
    Serve,
    /// Fetch and reconcile production data from SIDRA.
    Ingest {
        /// Single year to process; omit to process the whole supported range.
        #[arg(long)]
        year: Option<i32>,
    },
    /// Create tables and views without serving.
    Migrate,
    /// Load the municipality reference dump (`;`-separated CSV).
    SeedMunicipios {
        /// Path to the `dct_municipio_uf.csv` file.
        csv: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => {
            let store = PgProductionStore::connect(&StoreConfig::from_env()).await?;
            store.migrate().await?;
            lavoura_web::serve_from_env().await?;
        }
        Command::Ingest { year } => {
            let store = PgProductionStore::connect(&StoreConfig::from_env()).await?;
            store.migrate().await?;
            let source = SidraClient::new(SidraConfig::from_env())?;
            let pipeline = IngestPipeline::new(source, store);
            match year {
                Some(year) => {
                    let outcome = pipeline.process_year(year).await?;
                    info!(year, inserted = outcome.inserted, updated = outcome.updated, "done");
                }
                None => {
                    let config = IngestConfig::from_env();
                    let summary = pipeline.process_range(config.first_year, config.end_year).await?;
                    info!(years = ?summary.processed, "done");
                }
            }
        }
        Command::Migrate => {
            let store = PgProductionStore::connect(&StoreConfig::from_env()).await?;
            store.migrate().await?;
            info!("migrations applied");
        }
        Command::SeedMunicipios { csv } => {
            let store = PgProductionStore::connect(&StoreConfig::from_env()).await?;
            store.migrate().await?;
            let inserted = store.seed_municipalities(&csv).await?;
            info!(inserted, "municipality seed complete");
        }
    }
    Ok(())
}
