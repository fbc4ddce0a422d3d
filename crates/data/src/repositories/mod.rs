//! Database repositories for strike observations.

pub mod strike_observation_repo;

pub use strike_observation_repo::StrikeObservationRepository;
