//! Process-wide `tracing` setup for the host.
//!
//! Interactive runs log to stderr with colors. Packaged runs, where nobody watches stderr, append
//! to `<data_dir>/logs/ninebox.log`, the file the failure dialog points users at.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::IsTerminal as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV_VAR: &str = "NINEBOX_LOG";
pub const LOG_FILE_NAME: &str = "ninebox.log";

const DEFAULT_FILTER: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    Console,
    File,
}

impl LogTarget {
    /// Console when a human is watching stderr, the log file otherwise.
    pub fn detect() -> Self {
        if std::io::stderr().is_terminal() {
            LogTarget::Console
        } else {
            LogTarget::File
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub target: LogTarget,
    pub log_dir: PathBuf,
}

impl LogConfig {
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Returns the log file path when logging to a file.
pub fn init(config: &LogConfig) -> Result<Option<PathBuf>, InitError> {
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (writer, guard, log_file) = match config.target {
        LogTarget::Console => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (writer, guard, None)
        }
        LogTarget::File => {
            let path = config.log_file();
            let file = open_log_file(&path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (writer, guard, Some(path))
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(config.target == LogTarget::Console)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;

    let _ = GUARD.set(guard);
    Ok(log_file)
}

fn open_log_file(path: &Path) -> Result<File, InitError> {
    let io_error = |source| InitError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn log_file_is_created_with_its_directory_and_appended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LogConfig {
            target: LogTarget::File,
            log_dir: dir.path().join("logs"),
        };
        let path = config.log_file();

        let mut first = open_log_file(&path).expect("open");
        writeln!(first, "first").expect("write");
        drop(first);
        let mut second = open_log_file(&path).expect("reopen");
        writeln!(second, "second").expect("write");
        drop(second);

        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "first\nsecond\n");
        assert!(path.ends_with("logs/ninebox.log"));
    }
}
