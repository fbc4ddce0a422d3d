pub mod ingest_eod;

pub use ingest_eod::{run_ingest_eod, IngestEodArgs};
