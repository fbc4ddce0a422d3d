//! Wire types for the ORATS `datav2` endpoints.

use chrono::NaiveDate;
use gex_ingest_core::observation::{RawStrike, DATE_FORMAT};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Fields requested from the strikes endpoint; nothing else is transferred.
pub const STRIKE_FIELDS: [&str; 9] = [
    "ticker",
    "tradeDate",
    "expirDate",
    "dte",
    "strike",
    "stockPrice",
    "callOpenInterest",
    "putOpenInterest",
    "gamma",
];

/// ORATS wraps every response in `{"data": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Availability window of a ticker, from the `tickers` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerInfo {
    pub ticker: String,
    #[serde(default)]
    pub min: Option<String>,
    /// Most recent trade date with completed end-of-day data.
    #[serde(default)]
    pub max: Option<String>,
}

impl TickerInfo {
    #[must_use]
    pub fn max_date(&self) -> Option<NaiveDate> {
        parse_date(self.max.as_deref())
    }
}

/// One strike row of `hist/strikes`, restricted to [`STRIKE_FIELDS`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikeRow {
    pub ticker: Option<String>,
    pub trade_date: Option<String>,
    pub expir_date: Option<String>,
    pub dte: Option<i32>,
    pub strike: Option<Decimal>,
    pub stock_price: Option<Decimal>,
    pub call_open_interest: Option<i64>,
    pub put_open_interest: Option<i64>,
    pub gamma: Option<f64>,
}

impl StrikeRow {
    /// True if the row is within `dte_max` days; rows without a DTE are kept.
    #[must_use]
    pub fn within_dte(&self, dte_max: u32) -> bool {
        self.dte
            .map_or(true, |dte| i64::from(dte) <= i64::from(dte_max))
    }
}

impl From<StrikeRow> for RawStrike {
    fn from(row: StrikeRow) -> Self {
        Self {
            ticker: row.ticker,
            trade_date: row.trade_date,
            expir_date: row.expir_date,
            dte: row.dte,
            strike: row.strike,
            stock_price: row.stock_price,
            call_oi: row.call_open_interest,
            put_oi: row.put_open_interest,
            gamma: row.gamma,
        }
    }
}

/// Strike rows of one response plus the number of rows that failed to decode.
#[derive(Debug, Clone, Default)]
pub struct DecodedStrikes {
    pub rows: Vec<StrikeRow>,
    pub undecodable: usize,
}

impl DecodedStrikes {
    /// Decodes rows one at a time; a row with a wrongly typed value is
    /// logged and counted instead of failing the response.
    #[must_use]
    pub fn decode(values: Vec<Value>) -> Self {
        let mut decoded = Self {
            rows: Vec::with_capacity(values.len()),
            undecodable: 0,
        };

        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<StrikeRow>(value) {
                Ok(row) => decoded.rows.push(row),
                Err(e) => {
                    decoded.undecodable += 1;
                    warn!(index, error = %e, "Skipping undecodable strike row");
                }
            }
        }

        decoded
    }

    /// Keeps rows within `dte_max` days.
    pub fn retain_within_dte(&mut self, dte_max: u32) {
        self.rows.retain(|row| row.within_dte(dte_max));
    }
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value?.trim(), DATE_FORMAT).ok()
}
