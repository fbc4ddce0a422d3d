//! ORATS REST client with bounded retry.
//!
//! Resolves the trade date (explicit, or the latest session via the
//! `tickers` availability lookup) and fetches one session of strikes from
//! `hist/strikes`, asking only for the fields the job stores.
//!
//! # Example
//!
//! ```ignore
//! use gex_ingest_orats::{OratsClient, OratsClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OratsClient::new(OratsClientConfig::new("my-token"))?;
//!     let fetched = client.fetch("SPX", None).await?;
//!     println!("{} strikes for {}", fetched.len(), fetched.trade_date);
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use gex_ingest_core::observation::{FetchedStrikes, RawStrike, DATE_FORMAT};
use gex_ingest_core::{ProviderConfig, StrikeSource};
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{OratsError, Result};
use crate::types::{ApiResponse, DecodedStrikes, TickerInfo, STRIKE_FIELDS};

// =============================================================================
// Constants
// =============================================================================

/// ORATS data API base URL.
pub const ORATS_API_URL: &str = "https://api.orats.io/datav2";

/// Default request timeout; a full session of strikes is a large response.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Total attempts per request, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff
const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Maximum retry delay
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

const TICKERS_ENDPOINT: &str = "tickers";
const STRIKES_ENDPOINT: &str = "hist/strikes";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the ORATS client.
#[derive(Clone)]
pub struct OratsClientConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// Static API token, sent in the `Authorization` header.
    pub token: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Total attempts per request.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry.
    pub base_retry_delay: Duration,

    /// Upper bound for any single retry delay.
    pub max_retry_delay: Duration,

    /// Drop expiries further out than this many days.
    pub dte_max: Option<u32>,
}

impl OratsClientConfig {
    /// Creates a configuration with default limits for the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: ORATS_API_URL.to_string(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_retry_delay: BASE_RETRY_DELAY,
            max_retry_delay: MAX_RETRY_DELAY,
            dte_max: None,
        }
    }

    /// Builds the client configuration from the job's provider settings.
    #[must_use]
    pub fn from_provider(provider: &ProviderConfig) -> Self {
        Self::new(provider.token.clone())
            .with_base_url(provider.base_url.clone())
            .with_timeout(provider.timeout)
            .with_max_attempts(provider.max_attempts)
            .with_dte_max(provider.dte_max)
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the total number of attempts (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the backoff delays.
    #[must_use]
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_retry_delay = base;
        self.max_retry_delay = max.max(base);
        self
    }

    /// Sets the maximum days-to-expiry filter.
    #[must_use]
    pub fn with_dte_max(mut self, dte_max: Option<u32>) -> Self {
        self.dte_max = dte_max;
        self
    }

    /// Backoff before retry number `retry` (1-based), honouring a server
    /// `Retry-After` up to the cap.
    #[must_use]
    pub fn retry_delay(&self, retry: u32, err: &OratsError) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let backoff = self
            .base_retry_delay
            .saturating_mul(1 << exponent)
            .min(self.max_retry_delay);

        match err.retry_after() {
            Some(requested) => requested.max(backoff).min(self.max_retry_delay),
            None => backoff,
        }
    }
}

impl fmt::Debug for OratsClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OratsClientConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("dte_max", &self.dte_max)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// OratsClient
// =============================================================================

/// ORATS REST API client.
pub struct OratsClient {
    config: OratsClientConfig,
    http: Client,
}

impl fmt::Debug for OratsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OratsClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OratsClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: OratsClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OratsError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    /// Resolves the most recent trade date with completed end-of-day data.
    ///
    /// # Errors
    /// Returns [`OratsError::NoTradeDate`] if the lookup has no usable date,
    /// or the request error.
    pub async fn latest_trade_date(&self, ticker: &str) -> Result<NaiveDate> {
        let response: ApiResponse<TickerInfo> = self
            .get_with_retry(TICKERS_ENDPOINT, &[("ticker", ticker.to_string())])
            .await?;

        response
            .data
            .iter()
            .filter(|info| info.ticker.eq_ignore_ascii_case(ticker))
            .filter_map(TickerInfo::max_date)
            .max()
            .ok_or_else(|| OratsError::NoTradeDate {
                ticker: ticker.to_string(),
            })
    }

    /// Fetches the strikes of one session, applying the DTE filter.
    ///
    /// # Errors
    /// Returns the request error once retries are exhausted or on a
    /// non-retryable failure.
    pub async fn get_strikes(&self, ticker: &str, trade_date: NaiveDate) -> Result<DecodedStrikes> {
        let mut params = vec![
            ("ticker", ticker.to_string()),
            ("tradeDate", trade_date.format(DATE_FORMAT).to_string()),
            ("fields", STRIKE_FIELDS.join(",")),
        ];
        if let Some(dte_max) = self.config.dte_max {
            params.push(("dte", format!("0,{dte_max}")));
        }

        let response: ApiResponse<Value> = self.get_with_retry(STRIKES_ENDPOINT, &params).await?;
        let mut decoded = DecodedStrikes::decode(response.data);

        if let Some(dte_max) = self.config.dte_max {
            let returned = decoded.rows.len();
            decoded.retain_within_dte(dte_max);
            if decoded.rows.len() < returned {
                debug!(
                    returned,
                    kept = decoded.rows.len(),
                    dte_max,
                    "Dropped far-dated strikes"
                );
            }
        }

        Ok(decoded)
    }

    /// Resolves the trade date if needed and fetches its strikes.
    ///
    /// # Errors
    /// Returns the date lookup or strikes request error.
    pub async fn fetch(&self, ticker: &str, trade_date: Option<NaiveDate>) -> Result<FetchedStrikes> {
        let trade_date = match trade_date {
            Some(date) => date,
            None => {
                let date = self.latest_trade_date(ticker).await?;
                debug!(ticker, %date, "Resolved latest trade date");
                date
            }
        };

        let decoded = self.get_strikes(ticker, trade_date).await?;
        let records = decoded.rows.into_iter().map(RawStrike::from).collect();

        Ok(FetchedStrikes::new(trade_date, records).with_undecodable(decoded.undecodable))
    }

    /// GET with retry on transient errors and exponential backoff.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let mut attempt = 1;

        loop {
            match self.get(endpoint, params).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.config.retry_delay(attempt, &e);
                    warn!(
                        endpoint,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "ORATS request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(OratsError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Makes a single authenticated GET request.
    async fn get<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.config.base_url, endpoint);

        debug!(%url, "GET");

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, &self.config.token)
            .query(params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handles API response, converting errors appropriately.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok());
            return Err(OratsError::RateLimit { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OratsError::from_status(status.as_u16(), truncate(&text, 200)));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl StrikeSource for OratsClient {
    async fn fetch_strikes(
        &self,
        ticker: &str,
        trade_date: Option<NaiveDate>,
    ) -> anyhow::Result<FetchedStrikes> {
        Ok(self.fetch(ticker, trade_date).await?)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
