//! ORATS integration for end-of-day gamma exposure ingestion.
//!
//! This crate provides:
//! - REST client for the ORATS `datav2` strikes and tickers endpoints
//! - Trade-date resolution via the ticker availability lookup
//! - Error classification and bounded exponential-backoff retry
//! - A `StrikeSource` implementation for the ingest engine
//!
//! # Authentication
//!
//! ORATS uses a static API token, sent in the `Authorization` header on
//! every request. The job reads it from `ORATS_TOKEN`.

pub mod client;
pub mod error;
pub mod types;

pub use client::{OratsClient, OratsClientConfig, DEFAULT_MAX_ATTEMPTS, ORATS_API_URL};
pub use error::{OratsError, Result};
pub use types::{ApiResponse, DecodedStrikes, StrikeRow, TickerInfo, STRIKE_FIELDS};
