//! Locating the worker executable before it is spawned.

use std::path::Path;
use std::path::PathBuf;

use crate::path_utils;

/// Executable name of the bundled worker.
pub const DEFAULT_WORKER_BIN: &str = "ninebox-worker";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerBinError {
    #[error("`{command}` was not found next to the application or on PATH")]
    NotFound { command: String },
    #[error("worker binary {} is unusable ({reason})", .path.display())]
    InvalidPath { path: PathBuf, reason: String },
}

/// Resolves the configured worker binary to a concrete path.
///
/// A value that looks like a path is validated as given (after `~` expansion). A bare name is
/// looked up next to the running executable first, which is where installers put the bundled
/// worker, and then on `PATH`.
pub fn resolve_worker_bin(worker_bin: &str) -> Result<PathBuf, WorkerBinError> {
    if looks_like_path(worker_bin) {
        let path = path_utils::expand_tilde(Path::new(worker_bin));
        validate_executable_path(&path)?;
        return Ok(path);
    }

    if let Some(bundled) = bundled_candidate(worker_bin)
        && validate_executable_path(&bundled).is_ok()
    {
        return Ok(bundled);
    }

    which::which(worker_bin).map_err(|_| WorkerBinError::NotFound {
        command: worker_bin.to_string(),
    })
}

fn bundled_candidate(name: &str) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    Some(dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX)))
}

fn validate_executable_path(path: &Path) -> Result<(), WorkerBinError> {
    let invalid = |reason: &str| WorkerBinError::InvalidPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let meta = std::fs::metadata(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => invalid("does not exist"),
        std::io::ErrorKind::PermissionDenied => invalid("permission denied"),
        _ => invalid(&err.to_string()),
    })?;

    if !meta.is_file() {
        return Err(invalid("not a file"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(invalid("not executable"));
        }
    }

    Ok(())
}

fn looks_like_path(value: &str) -> bool {
    Path::new(value).is_absolute()
        || value.contains('/')
        || value.contains('\\')
        || value == "~"
}
