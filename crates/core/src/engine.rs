use std::future::Future;

use chrono::{NaiveDate, Utc};

use crate::error::IngestError;
use crate::observation::{FetchedStrikes, RawStrike, StrikeObservation};
use crate::traits::{ObservationStore, StrikeSource};

/// Observations ready to be written, plus the count of rejected records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedBatch {
    pub observations: Vec<StrikeObservation>,
    pub skipped: usize,
}

impl PreparedBatch {
    /// Validates every raw record and computes its gamma exposure.
    ///
    /// Malformed records are logged and counted, never fatal.
    #[must_use]
    pub fn prepare(records: Vec<RawStrike>) -> Self {
        let mut batch = Self {
            observations: Vec::with_capacity(records.len()),
            skipped: 0,
        };

        for (index, raw) in records.into_iter().enumerate() {
            let summary = format!(
                "{}/{}/{}",
                raw.expir_date.as_deref().unwrap_or("-"),
                raw.strike.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                raw.ticker.as_deref().unwrap_or("-"),
            );
            match StrikeObservation::from_raw(raw) {
                Ok(observation) => batch.observations.push(observation),
                Err(reason) => {
                    batch.skipped += 1;
                    tracing::warn!(index, record = %summary, %reason, "Skipping malformed strike record");
                }
            }
        }

        batch
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }
}

/// Summary of a completed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistReport {
    pub trade_date: NaiveDate,
    pub written: u64,
    pub skipped: usize,
    pub view_refreshed: bool,
}

/// Derives gamma exposure and upserts observations into a store.
pub struct Persister<'a, O: ?Sized> {
    store: &'a O,
}

impl<'a, O> Persister<'a, O>
where
    O: ObservationStore + ?Sized,
{
    pub fn new(store: &'a O) -> Self {
        Self { store }
    }

    /// Prepares and writes raw records in one batch.
    ///
    /// # Errors
    /// Returns [`IngestError::Persist`] if the store rejects the batch.
    pub async fn persist(
        &self,
        trade_date: NaiveDate,
        records: Vec<RawStrike>,
    ) -> Result<PersistReport, IngestError> {
        self.write(trade_date, PreparedBatch::prepare(records)).await
    }

    /// Writes an already prepared batch. An empty batch never touches the store.
    ///
    /// # Errors
    /// Returns [`IngestError::Persist`] if the store rejects the batch.
    pub async fn write(
        &self,
        trade_date: NaiveDate,
        batch: PreparedBatch,
    ) -> Result<PersistReport, IngestError> {
        if batch.is_empty() {
            return Ok(PersistReport {
                trade_date,
                written: 0,
                skipped: batch.skipped,
                view_refreshed: false,
            });
        }

        let written_at = Utc::now();
        let write = self
            .store
            .upsert_batch(&batch.observations, written_at)
            .await
            .map_err(|source| IngestError::Persist {
                trade_date,
                rows: batch.len(),
                source,
            })?;

        Ok(PersistReport {
            trade_date,
            written: write.rows,
            skipped: batch.skipped,
            view_refreshed: write.view_refreshed,
        })
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The provider returned no strikes for the session.
    Empty { trade_date: NaiveDate },
    /// Strikes were returned but every one was malformed.
    NothingValid { trade_date: NaiveDate, skipped: usize },
    /// Observations were upserted.
    Written(PersistReport),
}

impl IngestOutcome {
    #[must_use]
    pub fn trade_date(&self) -> NaiveDate {
        match self {
            Self::Empty { trade_date } | Self::NothingValid { trade_date, .. } => *trade_date,
            Self::Written(report) => report.trade_date,
        }
    }

    #[must_use]
    pub fn rows_written(&self) -> u64 {
        match self {
            Self::Written(report) => report.written,
            _ => 0,
        }
    }
}

/// One fetch-then-persist run for a single ticker.
pub struct IngestJob<S> {
    source: S,
    ticker: String,
}

impl<S: StrikeSource> IngestJob<S> {
    pub fn new(source: S, ticker: impl Into<String>) -> Self {
        Self {
            source,
            ticker: ticker.into(),
        }
    }

    /// Fetches the strikes for `trade_date` (or the latest session).
    ///
    /// # Errors
    /// Returns [`IngestError::Fetch`] if the source fails.
    pub async fn fetch(&self, trade_date: Option<NaiveDate>) -> Result<FetchedStrikes, IngestError> {
        match trade_date {
            Some(date) => tracing::info!(ticker = %self.ticker, %date, "Fetching EOD strikes"),
            None => tracing::info!(ticker = %self.ticker, "Fetching EOD strikes for latest session"),
        }

        self.source
            .fetch_strikes(&self.ticker, trade_date)
            .await
            .map_err(|source| IngestError::Fetch {
                ticker: self.ticker.clone(),
                source,
            })
    }

    /// Runs the job: fetch, prepare, then open the store and write.
    ///
    /// The store is opened only once there is something to write and is
    /// closed again whether or not the write succeeds.
    ///
    /// # Errors
    /// Returns [`IngestError::Fetch`] or [`IngestError::Persist`].
    pub async fn run<O, F, Fut>(
        &self,
        trade_date: Option<NaiveDate>,
        open_store: F,
    ) -> Result<IngestOutcome, IngestError>
    where
        O: ObservationStore,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<O>>,
    {
        let fetched = self.fetch(trade_date).await?;
        let trade_date = fetched.trade_date;

        if fetched.is_empty() {
            tracing::warn!(ticker = %self.ticker, %trade_date, "No records returned");
            return Ok(IngestOutcome::Empty { trade_date });
        }

        tracing::info!(
            ticker = %self.ticker,
            %trade_date,
            records = fetched.len(),
            "Fetched strike records"
        );

        let mut batch = PreparedBatch::prepare(fetched.records);
        batch.skipped += fetched.undecodable;
        if batch.is_empty() {
            tracing::warn!(
                ticker = %self.ticker,
                %trade_date,
                skipped = batch.skipped,
                "Nothing to insert"
            );
            return Ok(IngestOutcome::NothingValid {
                trade_date,
                skipped: batch.skipped,
            });
        }

        let rows = batch.len();
        let store = open_store().await.map_err(|source| IngestError::Persist {
            trade_date,
            rows,
            source,
        })?;

        let result = Persister::new(&store).write(trade_date, batch).await;
        store.close().await;
        let report = result?;

        tracing::info!(
            ticker = %self.ticker,
            %trade_date,
            written = report.written,
            skipped = report.skipped,
            view_refreshed = report.view_refreshed,
            "Upserted strike observations"
        );

        Ok(IngestOutcome::Written(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::ObservationKey;
    use crate::traits::BatchWrite;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::DateTime;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn session() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn raw(strike: Option<Decimal>, call_oi: i64) -> RawStrike {
        RawStrike {
            ticker: Some("SPX".to_string()),
            trade_date: Some("2025-03-14".to_string()),
            expir_date: Some("2025-03-21".to_string()),
            dte: Some(7),
            strike,
            stock_price: Some(dec!(5000)),
            call_oi: Some(call_oi),
            put_oi: Some(500),
            gamma: Some(0.002),
        }
    }

    fn ten_strikes() -> Vec<RawStrike> {
        (0..10)
            .map(|i| raw(Some(Decimal::from(4900 + i * 25)), 1000 + i))
            .collect()
    }

    /// Mirrors the table's upsert contract in memory.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<BTreeMap<ObservationKey, (StrikeObservation, DateTime<Utc>)>>,
        batches: AtomicUsize,
        closed: AtomicBool,
    }

    impl MemoryStore {
        fn snapshot(&self) -> BTreeMap<ObservationKey, (StrikeObservation, DateTime<Utc>)> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObservationStore for MemoryStore {
        async fn upsert_batch(
            &self,
            observations: &[StrikeObservation],
            written_at: DateTime<Utc>,
        ) -> Result<BatchWrite> {
            let mut rows = self.rows.lock().unwrap();
            for obs in observations {
                rows.insert(obs.key(), (obs.clone(), written_at));
            }
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(BatchWrite {
                rows: observations.len() as u64,
                view_refreshed: true,
            })
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FailingStore {
        closed: AtomicBool,
    }

    #[async_trait]
    impl ObservationStore for FailingStore {
        async fn upsert_batch(
            &self,
            _observations: &[StrikeObservation],
            _written_at: DateTime<Utc>,
        ) -> Result<BatchWrite> {
            Err(anyhow!("connection reset by peer"))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct StaticSource {
        result: Mutex<Option<Result<FetchedStrikes>>>,
        requested: Mutex<Vec<(String, Option<NaiveDate>)>>,
    }

    impl StaticSource {
        fn returning(result: Result<FetchedStrikes>) -> Self {
            Self {
                result: Mutex::new(Some(result)),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StrikeSource for StaticSource {
        async fn fetch_strikes(
            &self,
            ticker: &str,
            trade_date: Option<NaiveDate>,
        ) -> Result<FetchedStrikes> {
            self.requested
                .lock()
                .unwrap()
                .push((ticker.to_string(), trade_date));
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(anyhow!("source already used")))
        }
    }

    // ==================== Persister ====================

    #[tokio::test]
    async fn test_persist_is_idempotent() {
        let store = MemoryStore::default();
        let persister = Persister::new(&store);

        persister.persist(session(), ten_strikes()).await.unwrap();
        let first = store.snapshot();
        persister.persist(session(), ten_strikes()).await.unwrap();
        let second = store.snapshot();

        assert_eq!(first.len(), 10);
        assert_eq!(second.len(), 10);
        for (key, (obs, first_written)) in &first {
            let (again, second_written) = &second[key];
            assert_eq!(obs, again);
            assert!(second_written >= first_written);
        }
    }

    #[tokio::test]
    async fn test_same_key_keeps_last_write() {
        let store = MemoryStore::default();
        let persister = Persister::new(&store);

        persister
            .persist(session(), vec![raw(Some(dec!(5000)), 1000)])
            .await
            .unwrap();
        persister
            .persist(session(), vec![raw(Some(dec!(5000)), 2000)])
            .await
            .unwrap();

        let rows = store.snapshot();
        assert_eq!(rows.len(), 1);
        let (obs, _) = rows.values().next().unwrap();
        assert_eq!(obs.call_oi, Some(2000));
        // 0.002 * 5000^2 * 2000 * 100
        assert!((obs.gex_call.unwrap() - 10_000_000_000.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped_and_counted() {
        let store = MemoryStore::default();
        let mut records = ten_strikes();
        records[3].strike = None;

        let report = Persister::new(&store)
            .persist(session(), records)
            .await
            .unwrap();

        assert_eq!(report.written, 9);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.snapshot().len(), 9);
    }

    #[tokio::test]
    async fn test_missing_gamma_persists_unset_exposure() {
        let store = MemoryStore::default();
        let mut record = raw(Some(dec!(5000)), 1000);
        record.gamma = None;

        Persister::new(&store)
            .persist(session(), vec![record])
            .await
            .unwrap();

        let (obs, _) = store.snapshot().into_values().next().unwrap();
        assert_eq!(obs.gex_call, None);
        assert_eq!(obs.gex_put, None);
    }

    #[tokio::test]
    async fn test_empty_batch_does_not_touch_store() {
        let store = MemoryStore::default();
        let report = Persister::new(&store)
            .persist(session(), Vec::new())
            .await
            .unwrap();

        assert_eq!(report.written, 0);
        assert_eq!(store.batches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_prepare_counts_every_rejection() {
        let mut records = ten_strikes();
        records[0].ticker = None;
        records[1].expir_date = Some("not-a-date".to_string());
        records[2].trade_date = None;

        let batch = PreparedBatch::prepare(records);
        assert_eq!(batch.len(), 7);
        assert_eq!(batch.skipped, 3);
    }

    // ==================== IngestJob ====================

    #[tokio::test]
    async fn test_run_writes_and_closes_store() {
        let source = StaticSource::returning(Ok(FetchedStrikes::new(session(), ten_strikes())));
        let job = IngestJob::new(source, "SPX");
        let store = MemoryStore::default();
        let store_ref = &store;

        let outcome = job
            .run(Some(session()), move || async move { Ok(store_ref) })
            .await
            .unwrap();

        assert_eq!(outcome.rows_written(), 10);
        assert_eq!(outcome.trade_date(), session());
        assert!(store.closed.load(Ordering::SeqCst));
        assert_eq!(
            job.source.requested.lock().unwrap().as_slice(),
            &[("SPX".to_string(), Some(session()))]
        );
    }

    #[tokio::test]
    async fn test_run_empty_result_is_success_without_store() {
        let source = StaticSource::returning(Ok(FetchedStrikes::new(session(), Vec::new())));
        let job = IngestJob::new(source, "SPX");
        let opened = AtomicBool::new(false);
        let store = MemoryStore::default();
        let (opened_ref, store_ref) = (&opened, &store);

        let outcome = job
            .run(None, move || async move {
                opened_ref.store(true, Ordering::SeqCst);
                Ok(store_ref)
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::Empty {
                trade_date: session()
            }
        );
        assert_eq!(outcome.rows_written(), 0);
        assert!(!opened.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_all_malformed_is_success_without_store() {
        let records = vec![raw(None, 1), raw(None, 2)];
        let source = StaticSource::returning(Ok(FetchedStrikes::new(session(), records)));
        let job = IngestJob::new(source, "SPX");
        let opened = AtomicBool::new(false);
        let store = MemoryStore::default();
        let (opened_ref, store_ref) = (&opened, &store);

        let outcome = job
            .run(None, move || async move {
                opened_ref.store(true, Ordering::SeqCst);
                Ok(store_ref)
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::NothingValid {
                trade_date: session(),
                skipped: 2
            }
        );
        assert!(!opened.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_counts_undecodable_rows_as_skipped() {
        let mut records = ten_strikes();
        records.truncate(9);
        let fetched = FetchedStrikes::new(session(), records).with_undecodable(1);
        let job = IngestJob::new(StaticSource::returning(Ok(fetched)), "SPX");
        let store = MemoryStore::default();
        let store_ref = &store;

        let outcome = job
            .run(Some(session()), move || async move { Ok(store_ref) })
            .await
            .unwrap();

        let IngestOutcome::Written(report) = outcome else {
            panic!("expected a written batch, got {outcome:?}");
        };
        assert_eq!(report.written, 9);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.snapshot().len(), 9);
    }

    #[tokio::test]
    async fn test_run_only_undecodable_rows_is_nothing_valid() {
        let fetched = FetchedStrikes::new(session(), Vec::new()).with_undecodable(3);
        let job = IngestJob::new(StaticSource::returning(Ok(fetched)), "SPX");

        let outcome = job
            .run(None, || async {
                Err::<&MemoryStore, _>(anyhow!("store must not be opened"))
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::NothingValid {
                trade_date: session(),
                skipped: 3
            }
        );
    }

    #[tokio::test]
    async fn test_run_fetch_failure_is_fetch_error() {
        let source = StaticSource::returning(Err(anyhow!("retries exhausted")));
        let job = IngestJob::new(source, "SPX");
        let store = MemoryStore::default();
        let store_ref = &store;

        let err = job
            .run(None, move || async move { Ok(store_ref) })
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Fetch { .. }));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(store.batches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_store_failure_is_persist_error_and_closes() {
        let source = StaticSource::returning(Ok(FetchedStrikes::new(session(), ten_strikes())));
        let job = IngestJob::new(source, "SPX");
        let store = FailingStore {
            closed: AtomicBool::new(false),
        };
        let store_ref = &store;

        let err = job
            .run(None, move || async move { Ok(store_ref) })
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Persist { rows: 10, .. }));
        assert_eq!(err.exit_code(), 4);
        assert!(store.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_store_open_failure_is_persist_error() {
        let source = StaticSource::returning(Ok(FetchedStrikes::new(session(), ten_strikes())));
        let job = IngestJob::new(source, "SPX");

        let err = job
            .run(None, || async {
                Err::<&MemoryStore, _>(anyhow!("pool timed out while waiting for an open connection"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Persist { .. }));
    }
}
