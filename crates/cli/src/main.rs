use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::IngestEodArgs;
use gex_ingest_core::IngestOutcome;

#[derive(Parser, Debug)]
#[command(name = "gex-ingest", version)]
#[command(about = "Ingest end-of-day options strikes and gamma exposure into PostgreSQL", long_about = None)]
struct Cli {
    #[command(flatten)]
    ingest: IngestEodArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    match commands::run_ingest_eod(cli.ingest).await {
        Ok(outcome) => {
            report(&outcome);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(exit_code = err.exit_code(), "{err}");
            ExitCode::from(err.exit_code())
        }
    }
}

/// `RUST_LOG`, else `LOG_LEVEL` (e.g. `INFO`), else `info`.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            let level = std::env::var("LOG_LEVEL").unwrap_or_default();
            EnvFilter::try_new(level.trim().to_ascii_lowercase())
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn report(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::Empty { trade_date } => {
            info!(%trade_date, "No strikes available, nothing written");
        }
        IngestOutcome::NothingValid {
            trade_date,
            skipped,
        } => {
            info!(%trade_date, skipped, "Every record was malformed, nothing written");
        }
        IngestOutcome::Written(report) => {
            info!(
                trade_date = %report.trade_date,
                written = report.written,
                skipped = report.skipped,
                "Ingestion complete"
            );
        }
    }
}
