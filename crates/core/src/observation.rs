//! Strike observation data model.
//!
//! A strike observation is one (ticker, trade date, expiry, strike) row of an
//! end-of-day options snapshot, enriched with the gamma exposure of the call
//! and put open interest at that strike.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Contract multiplier applied to every gamma exposure calculation.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

/// Date format used by the provider for trade and expiry dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A strike record as delivered by the provider, before validation.
///
/// Every field is optional because the provider is free to omit or null any
/// of them; validation into a [`StrikeObservation`] decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStrike {
    pub ticker: Option<String>,
    pub trade_date: Option<String>,
    pub expir_date: Option<String>,
    pub dte: Option<i32>,
    pub strike: Option<Decimal>,
    pub stock_price: Option<Decimal>,
    pub call_oi: Option<i64>,
    pub put_oi: Option<i64>,
    pub gamma: Option<f64>,
}

/// Result of one fetch: the resolved trade date and the records for it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedStrikes {
    pub trade_date: NaiveDate,
    pub records: Vec<RawStrike>,
    /// Rows the provider sent that could not be decoded at all.
    pub undecodable: usize,
}

impl FetchedStrikes {
    #[must_use]
    pub fn new(trade_date: NaiveDate, records: Vec<RawStrike>) -> Self {
        Self {
            trade_date,
            records,
            undecodable: 0,
        }
    }

    #[must_use]
    pub fn with_undecodable(mut self, undecodable: usize) -> Self {
        self.undecodable = undecodable;
        self
    }

    /// Zero strikes is a valid answer from the provider, not a failure.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.undecodable == 0
    }

    /// Every row returned, decodable or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len() + self.undecodable
    }
}

/// Why a raw record could not become an observation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordRejection {
    #[error("missing key field `{0}`")]
    MissingField(&'static str),

    #[error("invalid date in `{field}`: {value:?}")]
    InvalidDate { field: &'static str, value: String },
}

/// Natural key of a persisted observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationKey {
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub expir_date: NaiveDate,
    pub strike: Decimal,
}

/// A validated strike observation with derived gamma exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeObservation {
    /// Underlying symbol (e.g., "SPX")
    pub ticker: String,
    /// Session the snapshot reflects
    pub trade_date: NaiveDate,
    /// Option expiration date
    pub expir_date: NaiveDate,
    /// Strike price
    pub strike: Decimal,
    /// Days to expiry at snapshot time
    pub dte: Option<i32>,
    /// Underlying price at snapshot time
    pub stock_price: Option<Decimal>,
    pub call_oi: Option<i64>,
    pub put_oi: Option<i64>,
    /// Per-contract gamma, shared by the call and the put
    pub gamma: Option<f64>,
    /// Gamma exposure of call open interest
    pub gex_call: Option<f64>,
    /// Gamma exposure of put open interest
    pub gex_put: Option<f64>,
}

impl StrikeObservation {
    /// Validates a raw record and computes its gamma exposure.
    ///
    /// # Errors
    /// Returns a [`RecordRejection`] if a key field is missing or a date
    /// cannot be parsed.
    pub fn from_raw(raw: RawStrike) -> Result<Self, RecordRejection> {
        let ticker = raw
            .ticker
            .filter(|t| !t.trim().is_empty())
            .ok_or(RecordRejection::MissingField("ticker"))?;
        let trade_date = parse_date("trade_date", raw.trade_date.as_deref())?;
        let expir_date = parse_date("expir_date", raw.expir_date.as_deref())?;
        let strike = raw.strike.ok_or(RecordRejection::MissingField("strike"))?;

        Ok(Self {
            ticker,
            trade_date,
            expir_date,
            strike,
            dte: raw.dte,
            stock_price: raw.stock_price,
            call_oi: raw.call_oi,
            put_oi: raw.put_oi,
            gamma: raw.gamma,
            gex_call: gamma_exposure(raw.gamma, raw.stock_price, raw.call_oi),
            gex_put: gamma_exposure(raw.gamma, raw.stock_price, raw.put_oi),
        })
    }

    #[must_use]
    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            ticker: self.ticker.clone(),
            trade_date: self.trade_date,
            expir_date: self.expir_date,
            strike: self.strike,
        }
    }
}

/// Gamma exposure of one side: `gamma * S^2 * OI * multiplier`.
///
/// Returns `None` when any input is missing; a missing input never turns
/// into a zero exposure.
#[must_use]
pub fn gamma_exposure(
    gamma: Option<f64>,
    stock_price: Option<Decimal>,
    open_interest: Option<i64>,
) -> Option<f64> {
    let gamma = gamma?;
    let spot = stock_price?.to_f64()?;
    let open_interest = open_interest? as f64;
    Some(gamma * spot * spot * open_interest * CONTRACT_MULTIPLIER)
}

fn parse_date(field: &'static str, value: Option<&str>) -> Result<NaiveDate, RecordRejection> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(RecordRejection::MissingField(field))?;
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| RecordRejection::InvalidDate {
        field,
        value: value.to_string(),
    })
}
