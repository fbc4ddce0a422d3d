use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use crate::config::{ConfigError, IngestConfig, IngestSettings};

/// Environment variables read by the job. Names map 1:1 onto
/// [`IngestSettings`] fields once lowercased.
pub const ENV_KEYS: &[&str] = &[
    "ORATS_TOKEN",
    "DATABASE_URL",
    "TICKER",
    "DTE_MAX",
    "ORATS_BASE_URL",
    "ORATS_TIMEOUT_SECS",
    "FETCH_MAX_ATTEMPTS",
    "DB_MAX_CONNECTIONS",
    "DB_CONNECT_TIMEOUT_SECS",
    "GEX_VIEW",
];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the job configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or a required value is missing.
    pub fn load() -> Result<IngestConfig, ConfigError> {
        Self::load_from(None)
    }

    /// Loads the job configuration, layering the environment over an optional TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or a value cannot be parsed, or a required value is missing.
    pub fn load_from(path: Option<&Path>) -> Result<IngestConfig, ConfigError> {
        Self::settings(path)?.validate()
    }

    /// Reads the raw settings without validating them.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or a value cannot be parsed.
    pub fn settings(path: Option<&Path>) -> Result<IngestSettings, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }

        let settings: IngestSettings = figment.merge(Env::raw().only(ENV_KEYS)).extract()?;

        Ok(settings)
    }
}
