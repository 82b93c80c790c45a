//! File logging. The terminal belongs to the UI, so nothing is written to
//! stdout or stderr once the subscriber is installed.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILTER_ENV: &str = "DBROWSE_LOG";
pub const LOG_FILE_NAME: &str = "dbrowse.log";
const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to install log subscriber: {0}")]
    Install(#[from] TryInitError),
}

/// Installs the global subscriber. Keep the guard alive until exit or
/// buffered lines are lost.
pub fn init() -> Result<(PathBuf, WorkerGuard), LoggingError> {
    let dir = log_dir(|key| env::var_os(key));
    fs::create_dir_all(&dir).map_err(|source| LoggingError::CreateDir {
        path: dir.clone(),
        source,
    })?;

    let appender = tracing_appender::rolling::never(&dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()?;

    Ok((dir.join(LOG_FILE_NAME), guard))
}

/// `<data dir>/dbrowse`: `LOCALAPPDATA` on Windows, else `XDG_DATA_HOME`,
/// else `~/.local/share`, else the temp dir.
fn log_dir(lookup: impl Fn(&str) -> Option<OsString>) -> PathBuf {
    let base = if cfg!(target_os = "windows") {
        lookup("LOCALAPPDATA").map(PathBuf::from)
    } else {
        lookup("XDG_DATA_HOME")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".local/share")))
    };
    base.unwrap_or_else(env::temp_dir).join("dbrowse")
}
