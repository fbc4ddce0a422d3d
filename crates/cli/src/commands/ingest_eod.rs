//! End-of-day ingestion command.
//!
//! Fetches one trade date of strikes from ORATS, derives gamma exposure and
//! upserts the result into PostgreSQL.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Args;
use tracing::info;

use gex_ingest_core::{ConfigLoader, IngestError, IngestJob, IngestOutcome};
use gex_ingest_data::DatabaseClient;
use gex_ingest_orats::{OratsClient, OratsClientConfig};

/// Arguments for the ingest command.
#[derive(Args, Debug, Clone)]
pub struct IngestEodArgs {
    /// Trade date to ingest (YYYY-MM-DD); defaults to the latest with data
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,

    /// Optional TOML file layered under the environment
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Runs one ingestion.
///
/// # Errors
/// Returns a configuration error before any network activity, a fetch error
/// if the provider cannot be read, or a persist error if the write fails.
pub async fn run_ingest_eod(args: IngestEodArgs) -> Result<IngestOutcome, IngestError> {
    let config = ConfigLoader::load_from(args.config.as_deref())?;

    info!(
        ticker = %config.ticker,
        date = ?args.date,
        dte_max = ?config.provider.dte_max,
        "Starting end-of-day ingestion"
    );

    let client = OratsClient::new(OratsClientConfig::from_provider(&config.provider)).map_err(
        |e| IngestError::Fetch {
            ticker: config.ticker.clone(),
            source: e.into(),
        },
    )?;

    let job = IngestJob::new(client, config.ticker.clone());
    let database = config.database;

    job.run(args.date, move || async move {
        let db = DatabaseClient::connect(&database).await?;
        anyhow::Ok(db.strike_observations())
    })
    .await
}
