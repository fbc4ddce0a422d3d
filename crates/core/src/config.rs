use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TICKER: &str = "SPX";
pub const DEFAULT_DTE_MAX: u32 = 400;
pub const DEFAULT_ORATS_BASE_URL: &str = "https://api.orats.io/datav2";
pub const DEFAULT_EXPOSURE_VIEW: &str = "orats_gex_by_exp";

/// Configuration problems detected before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read configuration: {0}")]
    Source(#[source] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Source(Box::new(err))
    }
}

/// Flat settings as read from the environment and optional TOML file.
///
/// Field names match the lowercased environment variable names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub orats_token: Option<String>,
    pub database_url: Option<String>,
    pub ticker: String,
    pub dte_max: Option<u32>,
    pub orats_base_url: String,
    pub orats_timeout_secs: u64,
    pub fetch_max_attempts: u32,
    pub db_max_connections: u32,
    pub db_connect_timeout_secs: u64,
    pub gex_view: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            orats_token: None,
            database_url: None,
            ticker: DEFAULT_TICKER.to_string(),
            dte_max: Some(DEFAULT_DTE_MAX),
            orats_base_url: DEFAULT_ORATS_BASE_URL.to_string(),
            orats_timeout_secs: 180,
            fetch_max_attempts: 3,
            db_max_connections: 4,
            db_connect_timeout_secs: 20,
            gex_view: DEFAULT_EXPOSURE_VIEW.to_string(),
        }
    }
}

impl IngestSettings {
    /// Checks required values and converts into the typed job configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for a missing token or connection string,
    /// or for any out-of-range value.
    pub fn validate(self) -> Result<IngestConfig, ConfigError> {
        let token = non_empty(self.orats_token).ok_or(ConfigError::Missing("ORATS_TOKEN"))?;
        let url = non_empty(self.database_url).ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let ticker = self.ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(ConfigError::Invalid {
                key: "TICKER",
                reason: "must not be empty".to_string(),
            });
        }
        if self.fetch_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "FETCH_MAX_ATTEMPTS",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "DB_MAX_CONNECTIONS",
                reason: "pool needs at least one connection".to_string(),
            });
        }

        let exposure_view = match self.gex_view.trim() {
            "" => None,
            view if is_valid_relation_name(view) => Some(view.to_string()),
            view => {
                return Err(ConfigError::Invalid {
                    key: "GEX_VIEW",
                    reason: format!("{view:?} is not a plain [schema.]name identifier"),
                })
            }
        };

        Ok(IngestConfig {
            ticker,
            provider: ProviderConfig {
                token,
                base_url: self.orats_base_url.trim_end_matches('/').to_string(),
                timeout: Duration::from_secs(self.orats_timeout_secs),
                max_attempts: self.fetch_max_attempts,
                dte_max: self.dte_max,
            },
            database: DatabaseConfig {
                url,
                max_connections: self.db_max_connections,
                connect_timeout: Duration::from_secs(self.db_connect_timeout_secs),
                exposure_view,
            },
        })
    }
}

/// Validated configuration, loaded once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub ticker: String,
    pub provider: ProviderConfig,
    pub database: DatabaseConfig,
}

#[derive(Clone)]
pub struct ProviderConfig {
    pub token: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub dte_max: Option<u32>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("dte_max", &self.dte_max)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    /// Materialized view refreshed after each write, if it exists.
    pub exposure_view: Option<String>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .field("exposure_view", &self.exposure_view)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accepts `name` or `schema.name` made of ASCII alphanumerics and underscores.
fn is_valid_relation_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
