//! Argument parsing, configuration assembly and error rendering.

use clap::{Parser, Subcommand};
use miette::{Diagnostic, Report};
use orca_core::{Config, PlainHttp, Reference, RegistryAuthConfig};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::tracing::{LogLevel, TracingFormat};

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// Internal failure before any command ran
pub const EXIT_FAILURE: i32 = 1;
/// CLI or configuration error exit code
pub const EXIT_CLI: i32 = 2;
/// Registry, cache or artifact error exit code
pub const EXIT_ARTIFACT: i32 = 3;

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// CLI or configuration error (exit code 2)
    #[error("CLI/configuration error: {message}")]
    #[diagnostic(code(orca::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// Fetching or materializing the artifact failed (exit code 3)
    #[error("{message}")]
    #[diagnostic(code(orca::cli::artifact))]
    Artifact {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a new artifact error
    #[must_use]
    pub fn artifact(message: impl Into<String>) -> Self {
        Self::Artifact {
            message: message.into(),
            help: None,
        }
    }
}

/// Invalid input and configuration map to exit code 2, everything that went
/// wrong talking to the registry or the filesystem to exit code 3.
impl From<orca_core::Error> for CliError {
    fn from(err: orca_core::Error) -> Self {
        let help = err.help().map(|h| h.to_string());
        match err {
            orca_core::Error::InvalidReference { .. }
            | orca_core::Error::InvalidDigest { .. }
            | orca_core::Error::Configuration { .. }
            | orca_core::Error::UnsafePath { .. } => Self::Config {
                message: err.to_string(),
                help,
            },
            _ => Self::Artifact {
                message: err.to_string(),
                help,
            },
        }
    }
}

/// Map CLI error to appropriate exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Artifact { .. } => EXIT_ARTIFACT,
    }
}

/// Render an error to stderr through miette
pub fn render_error(err: &CliError) {
    let report = Report::new(err.clone());
    #[allow(clippy::print_stderr)]
    {
        eprintln!("{report:?}");
    }
    let _ = io::stderr().flush();
}

/// Fetch OCI artifacts through a local pull-through cache.
#[derive(Parser, Debug)]
#[command(name = "orca")]
#[command(about = "Fetch OCI artifacts through a local pull-through cache")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Logging verbosity level.
    #[arg(short = 'L', long, global = true, default_value = "warn", value_enum)]
    pub level: LogLevel,

    /// Log output format.
    #[arg(long, global = true, default_value = "compact", value_enum)]
    pub log_format: TracingFormat,

    /// Cache directory; enables the pull-through cache.
    #[arg(long, global = true, env = "ORCA_CACHE", value_name = "DIR")]
    pub cache: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, global = true, env = "ORCA_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Username for the reference's registry.
    #[arg(long, global = true, requires = "password")]
    pub username: Option<String>,

    /// Password or token for the reference's registry.
    #[arg(long, global = true, env = "ORCA_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Docker config file to read credentials for the reference's registry from.
    #[arg(long, global = true, value_name = "FILE")]
    pub docker_config: Option<PathBuf>,

    /// Always use plain HTTP for loopback registries.
    #[arg(long, global = true)]
    pub plain_http: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Materialize an artifact into a directory and print its digest.
    Pull {
        /// Artifact reference, e.g. `ghcr.io/org/bundle:v1`.
        reference: String,
        /// Destination directory.
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
    },
    /// Write one file of an artifact to stdout.
    Cat {
        /// Artifact reference, e.g. `ghcr.io/org/bundle:v1`.
        reference: String,
        /// File name (the blob's title annotation).
        filename: String,
        /// Emit base64 instead of raw bytes.
        #[arg(long)]
        base64: bool,
    },
}

impl Commands {
    /// The artifact reference this command operates on.
    #[must_use]
    pub fn reference(&self) -> &str {
        match self {
            Self::Pull { reference, .. } | Self::Cat { reference, .. } => reference,
        }
    }
}

/// Load a TOML configuration file.
pub fn load_config_file(path: &Path) -> Result<Config, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        CliError::config_with_help(
            format!("cannot read config file {}: {e}", path.display()),
            "Pass an existing file with --config or unset ORCA_CONFIG",
        )
    })?;
    toml::from_str(&raw)
        .map_err(|e| CliError::config(format!("invalid config file {}: {e}", path.display())))
}

/// Build the client configuration from the config file and flags.
///
/// Flags win over the file: `--cache` replaces the cache root, and
/// credentials given on the command line are added after any configured
/// ones so they take precedence for the reference's registry.
pub fn build_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => Config::default(),
    };

    if let Some(root) = &cli.cache {
        let verify_on_read = config.cache.as_ref().is_some_and(|c| c.verify_on_read);
        config = config.with_cache(root);
        if let Some(cache) = config.cache.as_mut() {
            cache.verify_on_read = verify_on_read;
        }
    }

    if cli.plain_http {
        config.transport.plain_http = PlainHttp::Loopback;
    }

    if cli.username.is_some() || cli.docker_config.is_some() {
        let reference: Reference = cli.command.reference().parse()?;
        config.registry_auth.push(RegistryAuthConfig {
            address: reference.registry().to_string(),
            username: cli.username.clone(),
            password: cli.password.clone(),
            config_file: cli
                .docker_config
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            config_file_content: None,
        });
    }

    Ok(config)
}

/// Parse command-line arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
