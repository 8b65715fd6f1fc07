//! orca CLI application
//!
//! Fetches OCI artifacts through a local pull-through cache. Ctrl-C cancels
//! the running operation.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use orca::cli::{self, CliError, EXIT_FAILURE, EXIT_OK, exit_code_for, render_error};
use orca::commands;
use orca::tracing::init_tracing;
use std::io;
use tokio_util::sync::CancellationToken;

fn main() {
    let cli = cli::parse();

    if let Err(e) = init_tracing(cli.level, cli.log_format) {
        eprintln!("{e:?}");
        std::process::exit(EXIT_FAILURE);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            std::process::exit(EXIT_FAILURE);
        }
    };

    let code = runtime.block_on(async {
        match run(&cli).await {
            Ok(()) => EXIT_OK,
            Err(err) => {
                render_error(&err);
                exit_code_for(&err)
            }
        }
    });
    std::process::exit(code);
}

async fn run(cli: &cli::Cli) -> Result<(), CliError> {
    let config = cli::build_config(cli)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let stdout = io::stdout();
    let mut out = stdout.lock();
    commands::execute(&cli.command, config, cancel, &mut out).await
}
