//! Database row models.

pub mod strike_observation;

pub use strike_observation::{ExposureByExpiryRecord, StrikeObservationRow};
