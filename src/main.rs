//! Tails log files and directories into newline-delimited JSON on stdout.
//!
//! Usage:
//!     logmux [--poll] [--poll-interval MS] [--json] [--min-level N]
//!            [--exclude LIST] [-v...] /abs/file.log /abs/dir ...

use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use tokio_util::sync::CancellationToken;

use logmux::cli::parse_args;
use logmux::{logging, Stdout};

#[tokio::main]
async fn main() -> ExitCode {
    let parsed = parse_args(std::env::args_os());

    if let Some(err) = &parsed.error {
        if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
            err.exit();
        }
    }

    logging::init(parsed.verbose);
    if let Some(err) = parsed.error {
        tracing::warn!(
            kind = ?err.kind(),
            "Invalid arguments, using defaults for every flag"
        );
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupted, shutting down");
                on_signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    match logmux::run(parsed.config, Arc::new(Stdout), shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting");
            ExitCode::FAILURE
        }
    }
}
