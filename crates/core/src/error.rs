//! Run-level errors of the ingestion job.

use chrono::NaiveDate;
use thiserror::Error;

use crate::config::ConfigError;

/// A fatal error that aborts the run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("fetching strikes for {ticker} failed: {source:#}")]
    Fetch {
        ticker: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("persisting {rows} observations for {trade_date} failed: {source:#}")]
    Persist {
        trade_date: NaiveDate,
        rows: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl IngestError {
    /// Process exit status for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Fetch { .. } => 3,
            Self::Persist { .. } => 4,
        }
    }
}
