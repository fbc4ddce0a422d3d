use anyhow::{Context, Result};
use gex_ingest_core::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::debug;

use crate::repositories::StrikeObservationRepository;

/// Connection pool held for the write phase of a run.
pub struct DatabaseClient {
    pool: PgPool,
    exposure_view: Option<String>,
}

impl DatabaseClient {
    /// Opens a pool sized by `config`.
    ///
    /// # Errors
    /// Returns an error if no connection can be established within the timeout.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.url)
            .await
            .context("connect to database")?;

        debug!(
            max_connections = config.max_connections,
            "Database pool opened"
        );

        Ok(Self {
            pool,
            exposure_view: config.exposure_view.clone(),
        })
    }

    /// Repository over this pool, refreshing the configured exposure view.
    ///
    /// Closing the repository closes the pool.
    #[must_use]
    pub fn strike_observations(&self) -> StrikeObservationRepository {
        StrikeObservationRepository::new(self.pool.clone())
            .with_exposure_view(self.exposure_view.clone())
    }
}
