//! Core types and the fetch-then-persist engine for end-of-day gamma
//! exposure ingestion.
//!
//! This crate provides:
//! - Strike observation model and gamma exposure calculation
//! - `StrikeSource` / `ObservationStore` seams for the provider and storage
//! - The ingest engine (`IngestJob`, `Persister`)
//! - Job configuration and its environment loader

pub mod config;
pub mod config_loader;
pub mod engine;
pub mod error;
pub mod observation;
pub mod traits;

pub use config::{ConfigError, DatabaseConfig, IngestConfig, IngestSettings, ProviderConfig};
pub use config_loader::ConfigLoader;
pub use engine::{IngestJob, IngestOutcome, PersistReport, Persister, PreparedBatch};
pub use error::IngestError;
pub use observation::{
    gamma_exposure, FetchedStrikes, ObservationKey, RawStrike, RecordRejection, StrikeObservation,
    CONTRACT_MULTIPLIER,
};
pub use traits::{BatchWrite, ObservationStore, StrikeSource};
