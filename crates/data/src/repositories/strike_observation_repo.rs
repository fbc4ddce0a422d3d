//! Strike observation repository.
//!
//! Writes a trade date's observations as one transaction and reads back
//! stored rows and per-expiry exposure sums.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use gex_ingest_core::{BatchWrite, ObservationStore, StrikeObservation};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::models::{ExposureByExpiryRecord, StrikeObservationRow};

const UPSERT_OBSERVATION: &str = r#"
    INSERT INTO orats_oi_gamma
        (ticker, trade_date, expir_date, strike, dte, stock_price,
         call_oi, put_oi, gamma, gex_call, gex_put, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
    ON CONFLICT (ticker, trade_date, expir_date, strike) DO UPDATE SET
        dte = EXCLUDED.dte,
        stock_price = EXCLUDED.stock_price,
        call_oi = EXCLUDED.call_oi,
        put_oi = EXCLUDED.put_oi,
        gamma = EXCLUDED.gamma,
        gex_call = EXCLUDED.gex_call,
        gex_put = EXCLUDED.gex_put,
        updated_at = EXCLUDED.updated_at
"#;

/// Repository for the `orats_oi_gamma` table.
#[derive(Debug, Clone)]
pub struct StrikeObservationRepository {
    pool: PgPool,
    exposure_view: Option<String>,
}

impl StrikeObservationRepository {
    /// Creates a repository that does not refresh any view.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            exposure_view: None,
        }
    }

    /// Sets the materialized view refreshed after each batch.
    ///
    /// The name must already be a validated `[schema.]name` identifier.
    #[must_use]
    pub fn with_exposure_view(mut self, view: Option<String>) -> Self {
        self.exposure_view = view;
        self
    }

    /// Inserts or overwrites a batch of observations in one transaction.
    ///
    /// Rows are applied in order, so when two observations share a key the
    /// later one is what remains stored. The exposure view, when configured
    /// and present, is refreshed before commit.
    ///
    /// # Errors
    /// Returns an error if any statement fails; nothing is committed then.
    pub async fn upsert_batch(
        &self,
        observations: &[StrikeObservation],
        written_at: DateTime<Utc>,
    ) -> Result<BatchWrite> {
        if observations.is_empty() {
            return Ok(BatchWrite::default());
        }

        let mut tx = self.pool.begin().await.context("begin transaction")?;

        let mut rows = 0u64;
        for obs in observations {
            let result = sqlx::query(UPSERT_OBSERVATION)
                .bind(&obs.ticker)
                .bind(obs.trade_date)
                .bind(obs.expir_date)
                .bind(obs.strike)
                .bind(obs.dte)
                .bind(obs.stock_price)
                .bind(obs.call_oi)
                .bind(obs.put_oi)
                .bind(obs.gamma)
                .bind(obs.gex_call)
                .bind(obs.gex_put)
                .bind(written_at)
                .execute(&mut *tx)
                .await
                .with_context(|| {
                    format!(
                        "upsert {} {} exp {} strike {}",
                        obs.ticker, obs.trade_date, obs.expir_date, obs.strike
                    )
                })?;
            rows += result.rows_affected();
        }

        let view_refreshed = match self.exposure_view.as_deref() {
            Some(view) => refresh_view(&mut tx, view).await?,
            None => false,
        };

        tx.commit().await.context("commit transaction")?;

        debug!(rows, view_refreshed, "Committed strike observation batch");

        Ok(BatchWrite {
            rows,
            view_refreshed,
        })
    }

    /// Returns every stored observation of a ticker on a trade date.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn query_by_trade_date(
        &self,
        ticker: &str,
        trade_date: NaiveDate,
    ) -> Result<Vec<StrikeObservationRow>> {
        let rows = sqlx::query_as::<_, StrikeObservationRow>(
            r#"
            SELECT ticker, trade_date, expir_date, strike, dte, stock_price,
                   call_oi, put_oi, gamma, gex_call, gex_put, updated_at
            FROM orats_oi_gamma
            WHERE ticker = $1 AND trade_date = $2
            ORDER BY expir_date ASC, strike ASC
            "#,
        )
        .bind(ticker)
        .bind(trade_date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Counts stored observations of a ticker on a trade date.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn count_for_trade_date(&self, ticker: &str, trade_date: NaiveDate) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM orats_oi_gamma
            WHERE ticker = $1 AND trade_date = $2
            "#,
        )
        .bind(ticker)
        .bind(trade_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Sums call and put exposure per expiry, straight from the base table.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn exposure_by_expiry(
        &self,
        ticker: &str,
        trade_date: NaiveDate,
    ) -> Result<Vec<ExposureByExpiryRecord>> {
        let records = sqlx::query_as::<_, ExposureByExpiryRecord>(
            r#"
            SELECT ticker, trade_date, expir_date,
                   SUM(gex_call) AS gex_call,
                   SUM(gex_put) AS gex_put,
                   COUNT(*) AS strikes
            FROM orats_oi_gamma
            WHERE ticker = $1 AND trade_date = $2
            GROUP BY ticker, trade_date, expir_date
            ORDER BY expir_date ASC
            "#,
        )
        .bind(ticker)
        .bind(trade_date)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Closes the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Refreshes `view` inside the transaction if it exists as a materialized view.
async fn refresh_view(tx: &mut Transaction<'_, Postgres>, view: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM pg_class WHERE oid = to_regclass($1) AND relkind = 'm')",
    )
    .bind(view)
    .fetch_one(&mut **tx)
    .await
    .with_context(|| format!("look up view {view}"))?;

    if !exists {
        debug!(view, "Exposure view not found, skipping refresh");
        return Ok(false);
    }

    sqlx::query(&refresh_statement(view))
        .execute(&mut **tx)
        .await
        .with_context(|| format!("refresh view {view}"))?;

    Ok(true)
}

fn refresh_statement(view: &str) -> String {
    format!("REFRESH MATERIALIZED VIEW {view}")
}

#[async_trait]
impl ObservationStore for StrikeObservationRepository {
    async fn upsert_batch(
        &self,
        observations: &[StrikeObservation],
        written_at: DateTime<Utc>,
    ) -> Result<BatchWrite> {
        Self::upsert_batch(self, observations, written_at).await
    }

    async fn close(&self) {
        Self::close(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn test_refresh_statement() {
        assert_eq!(
            refresh_statement("orats_gex_by_exp"),
            "REFRESH MATERIALIZED VIEW orats_gex_by_exp"
        );
        assert_eq!(
            refresh_statement("analytics.gex"),
            "REFRESH MATERIALIZED VIEW analytics.gex"
        );
    }

    #[test]
    fn test_upsert_updates_every_non_key_column() {
        for column in [
            "dte",
            "stock_price",
            "call_oi",
            "put_oi",
            "gamma",
            "gex_call",
            "gex_put",
            "updated_at",
        ] {
            assert!(
                UPSERT_OBSERVATION.contains(&format!("{column} = EXCLUDED.{column}")),
                "{column} is not overwritten on conflict"
            );
        }
        assert!(!UPSERT_OBSERVATION.contains("strike = EXCLUDED"));
    }

    #[test]
    fn test_reference_schema_keeps_strike_precision() {
        let schema = include_str!("../../sql/schema.sql");
        let strike = schema
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("strike "))
            .unwrap();
        assert!(!strike.contains("NUMERIC("), "strike column is scaled: {strike}");
    }

    #[tokio::test]
    async fn test_empty_batch_touches_nothing() {
        // connect_lazy never opens a connection until a query runs
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://invalid:5432/none")
            .unwrap();
        let repo = StrikeObservationRepository::new(pool);

        let write = repo.upsert_batch(&[], Utc::now()).await.unwrap();
        assert_eq!(write, BatchWrite::default());
    }

    // =========================================================================
    // Integration tests (need a PostgreSQL with sql/schema.sql applied)
    // =========================================================================

    async fn test_repo(view: Option<&str>) -> StrikeObservationRepository {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .unwrap();
        StrikeObservationRepository::new(pool).with_exposure_view(view.map(str::to_string))
    }

    fn trade_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn observation(ticker: &str, strike: Decimal, call_oi: i64) -> StrikeObservation {
        StrikeObservation {
            ticker: ticker.to_string(),
            trade_date: trade_date(),
            expir_date: NaiveDate::from_ymd_opt(2025, 3, 21).unwrap(),
            strike,
            dte: Some(7),
            stock_price: Some(dec!(5000)),
            call_oi: Some(call_oi),
            put_oi: Some(500),
            gamma: Some(0.001),
            gex_call: Some(0.001 * 100.0 * call_oi as f64 * 5000.0 * 5000.0),
            gex_put: Some(0.001 * 100.0 * 500.0 * 5000.0 * 5000.0),
        }
    }

    async fn cleanup(repo: &StrikeObservationRepository, ticker: &str) {
        sqlx::query("DELETE FROM orats_oi_gamma WHERE ticker = $1")
            .bind(ticker)
            .execute(&repo.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_rerun_is_idempotent() {
        let repo = test_repo(None).await;
        cleanup(&repo, "ZZIDEM").await;

        let batch = vec![
            observation("ZZIDEM", dec!(4900), 100),
            observation("ZZIDEM", dec!(5000), 200),
        ];
        repo.upsert_batch(&batch, Utc::now()).await.unwrap();
        let first = repo.query_by_trade_date("ZZIDEM", trade_date()).await.unwrap();

        let later = Utc::now();
        repo.upsert_batch(&batch, later).await.unwrap();
        let second = repo.query_by_trade_date("ZZIDEM", trade_date()).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.strike, b.strike);
            assert_eq!(a.call_oi, b.call_oi);
            assert_eq!(a.gex_call, b.gex_call);
        }
        assert!(second.iter().all(|row| row.updated_at >= first[0].updated_at));

        cleanup(&repo, "ZZIDEM").await;
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_conflict_overwrites_values() {
        let repo = test_repo(None).await;
        cleanup(&repo, "ZZOVER").await;

        repo.upsert_batch(&[observation("ZZOVER", dec!(5000), 100)], Utc::now())
            .await
            .unwrap();
        repo.upsert_batch(&[observation("ZZOVER", dec!(5000), 900)], Utc::now())
            .await
            .unwrap();

        let rows = repo.query_by_trade_date("ZZOVER", trade_date()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].call_oi, Some(900));

        cleanup(&repo, "ZZOVER").await;
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_duplicate_key_in_batch_keeps_last() {
        let repo = test_repo(None).await;
        cleanup(&repo, "ZZDUPE").await;

        let batch = vec![
            observation("ZZDUPE", dec!(5000), 1),
            observation("ZZDUPE", dec!(5000), 2),
        ];
        repo.upsert_batch(&batch, Utc::now()).await.unwrap();

        assert_eq!(repo.count_for_trade_date("ZZDUPE", trade_date()).await.unwrap(), 1);
        let rows = repo.query_by_trade_date("ZZDUPE", trade_date()).await.unwrap();
        assert_eq!(rows[0].call_oi, Some(2));

        cleanup(&repo, "ZZDUPE").await;
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_fine_grained_strikes_stay_distinct() {
        let repo = test_repo(None).await;
        cleanup(&repo, "ZZFINE").await;

        let batch = vec![
            observation("ZZFINE", dec!(5000.0001), 1),
            observation("ZZFINE", dec!(5000.0002), 2),
        ];
        repo.upsert_batch(&batch, Utc::now()).await.unwrap();

        let rows = repo.query_by_trade_date("ZZFINE", trade_date()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].strike, dec!(5000.0001));
        assert_eq!(rows[1].strike, dec!(5000.0002));

        cleanup(&repo, "ZZFINE").await;
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_view_refreshed_when_present() {
        let repo = test_repo(Some("orats_gex_by_exp")).await;
        cleanup(&repo, "ZZVIEW").await;

        let write = repo
            .upsert_batch(&[observation("ZZVIEW", dec!(5000), 100)], Utc::now())
            .await
            .unwrap();
        assert!(write.view_refreshed);

        let missing = test_repo(Some("no_such_view")).await;
        let write = missing
            .upsert_batch(&[observation("ZZVIEW", dec!(5010), 100)], Utc::now())
            .await
            .unwrap();
        assert!(!write.view_refreshed);

        let sums = repo.exposure_by_expiry("ZZVIEW", trade_date()).await.unwrap();
        assert_eq!(sums.len(), 1);
        assert_eq!(sums[0].strikes, 2);

        cleanup(&repo, "ZZVIEW").await;
    }
}
