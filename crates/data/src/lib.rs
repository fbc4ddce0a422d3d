//! PostgreSQL storage for strike observations.
//!
//! This crate provides:
//! - A pooled database client opened for the write phase of a run
//! - Row models for stored observations and per-expiry exposure
//! - A repository that upserts a trade date atomically

pub mod database;
pub mod models;
pub mod repositories;

pub use database::DatabaseClient;
pub use models::{ExposureByExpiryRecord, StrikeObservationRow};
pub use repositories::StrikeObservationRepository;
