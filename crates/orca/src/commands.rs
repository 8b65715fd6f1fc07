//! Command implementations.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use orca_core::{Client, Config};
use std::io::{self, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::cli::{CliError, Commands};

/// Run `command` with a client built from `config`.
///
/// Output goes to `out`; the caller passes stdout.
pub async fn execute(
    command: &Commands,
    config: Config,
    cancel: CancellationToken,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let client = Client::new(config)?;
    match command {
        Commands::Pull { reference, output } => {
            pull(&client, reference, output, cancel, out).await
        }
        Commands::Cat {
            reference,
            filename,
            base64,
        } => cat(&client, reference, filename, *base64, cancel, out).await,
    }
}

/// Materialize `reference` into `output` and print the root digest.
#[instrument(skip(client, cancel, out))]
pub async fn pull(
    client: &Client,
    reference: &str,
    output: &Path,
    cancel: CancellationToken,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let root = client.materialize_with(reference, output, cancel).await?;
    writeln!(out, "{}", root.digest).map_err(write_error)?;
    Ok(())
}

/// Write `filename` from `reference` to `out`, raw or base64-encoded.
#[instrument(skip(client, cancel, out))]
pub async fn cat(
    client: &Client,
    reference: &str,
    filename: &str,
    base64: bool,
    cancel: CancellationToken,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let file = client.read_file_with(reference, filename, cancel).await?;
    tracing::debug!(digest = %file.digest, size = file.content.len(), "Writing file");
    if base64 {
        writeln!(out, "{}", STANDARD.encode(&file.content)).map_err(write_error)?;
    } else {
        out.write_all(&file.content).map_err(write_error)?;
    }
    out.flush().map_err(write_error)
}

fn write_error(err: io::Error) -> CliError {
    CliError::artifact(format!("failed to write output: {err}"))
}
