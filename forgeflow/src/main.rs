//! forgeflow CLI entry point.
//!
//! Initializes logging, wires interrupts to run cancellation and delegates
//! to the CLI module.

use forgeflow::cancellation::CancellationToken;
use forgeflow::cli::LogFormat;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = forgeflow::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }

    let cancellation = Arc::new(CancellationToken::new());
    let on_interrupt = Arc::clone(&cancellation);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current stage");
            on_interrupt.cancel("interrupted");
        }
    });

    forgeflow::cli::run_with_cli(cli, cancellation).await
}
