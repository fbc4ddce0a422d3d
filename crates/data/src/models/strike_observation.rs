//! Stored strike observation and exposure-by-expiry rows.

use chrono::{DateTime, NaiveDate, Utc};
use gex_ingest_core::StrikeObservation;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A row of `orats_oi_gamma` as read back from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StrikeObservationRow {
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub expir_date: NaiveDate,
    pub strike: Decimal,
    pub dte: Option<i32>,
    pub stock_price: Option<Decimal>,
    pub call_oi: Option<i64>,
    pub put_oi: Option<i64>,
    pub gamma: Option<f64>,
    pub gex_call: Option<f64>,
    pub gex_put: Option<f64>,
    /// Time of the last insert or update
    pub updated_at: DateTime<Utc>,
}

impl From<StrikeObservationRow> for StrikeObservation {
    fn from(row: StrikeObservationRow) -> Self {
        Self {
            ticker: row.ticker,
            trade_date: row.trade_date,
            expir_date: row.expir_date,
            strike: row.strike,
            dte: row.dte,
            stock_price: row.stock_price,
            call_oi: row.call_oi,
            put_oi: row.put_oi,
            gamma: row.gamma,
            gex_call: row.gex_call,
            gex_put: row.gex_put,
        }
    }
}

/// Gamma exposure summed over all strikes of one expiry.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExposureByExpiryRecord {
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub expir_date: NaiveDate,
    /// Sum of call exposure; `None` if no strike had a defined value
    pub gex_call: Option<f64>,
    pub gex_put: Option<f64>,
    pub strikes: i64,
}
