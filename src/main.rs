//! lingua-forge CLI entry point.
//!
//! Initializes logging, runs the selected command, and exits with the code
//! of its [`RunOutcome`](lingua_forge::pipeline::RunOutcome).

use lingua_forge::pipeline::RunOutcome;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Parse CLI arguments first to get log_level
    let cli = lingua_forge::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    let outcome = match lingua_forge::cli::run_with_cli(cli).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Run aborted");
            RunOutcome::Failure
        }
    };

    std::process::exit(outcome.exit_code());
}
