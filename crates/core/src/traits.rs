use crate::observation::{FetchedStrikes, StrikeObservation};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Upstream provider of end-of-day strike records.
#[async_trait]
pub trait StrikeSource: Send + Sync {
    /// Fetches the strikes of `ticker` for `trade_date`, or for the most
    /// recent session with completed data when no date is given.
    async fn fetch_strikes(
        &self,
        ticker: &str,
        trade_date: Option<NaiveDate>,
    ) -> Result<FetchedStrikes>;
}

/// Outcome of one batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchWrite {
    pub rows: u64,
    pub view_refreshed: bool,
}

/// Storage for strike observations keyed by (ticker, trade_date, expir_date, strike).
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Inserts or overwrites every observation atomically, stamping each row
    /// with `written_at`.
    async fn upsert_batch(
        &self,
        observations: &[StrikeObservation],
        written_at: DateTime<Utc>,
    ) -> Result<BatchWrite>;

    /// Releases any resources held by the store.
    async fn close(&self) {}
}

#[async_trait]
impl<T> ObservationStore for &T
where
    T: ObservationStore + ?Sized,
{
    async fn upsert_batch(
        &self,
        observations: &[StrikeObservation],
        written_at: DateTime<Utc>,
    ) -> Result<BatchWrite> {
        (**self).upsert_batch(observations, written_at).await
    }

    async fn close(&self) {
        (**self).close().await;
    }
}
