use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::core::config::{path_display, LoggingConfig};

const DEFAULT_FILTER: &str = "turnwise=info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file {}: {source}", path_display(.path))]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Picks the log file: the command-line override wins over the config.
pub fn resolve_log_file(config: &LoggingConfig, cli_override: Option<&Path>) -> Option<PathBuf> {
    cli_override
        .map(Path::to_path_buf)
        .or_else(|| config.file.clone())
}

/// Installs a file-backed tracing subscriber. The terminal belongs to the
/// front end, so nothing is installed when no file is configured.
///
/// `RUST_LOG` takes precedence over the configured level. Returns whether a
/// subscriber was installed.
pub fn init_tracing(
    config: &LoggingConfig,
    cli_override: Option<&Path>,
) -> Result<bool, LoggingError> {
    let Some(path) = resolve_log_file(config, cli_override) else {
        return Ok(false);
    };

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(&path).map_err(|source| LoggingError::Open {
        path: path.clone(),
        source,
    })?;

    let default_filter = config.level.as_deref().unwrap_or(DEFAULT_FILTER);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_filter(filter);

    // A subscriber may already be installed (tests, embedding); keep it.
    Ok(tracing_subscriber::registry()
        .with(file_layer)
        .try_init()
        .is_ok())
}
