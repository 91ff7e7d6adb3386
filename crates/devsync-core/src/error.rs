//! Error taxonomy shared by every DevSync component.
//!
//! Component-level errors (`ConfigError`, `WatchError`, ...) carry the
//! low-level detail and convert into a [`SyncError`] when they cross into the
//! orchestration layer.  Only [`ErrorKind::AccessDenied`] and
//! [`ErrorKind::WatchFailure`] are meant to reach the user; `NotFound` is a
//! normal state and `Corrupt` is recovered from by falling back to defaults.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    Corrupt,
    WatchFailure,
}

/// A recoverable failure inside the synchronisation core.
///
/// Errors are `Clone` so they can be fanned out to several subscribers; the
/// OS error is therefore flattened into `reason`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// A directory, file or device is absent.
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The process lacks permission to read or write `path`.
    #[error("access denied to {}: {reason}", path.display())]
    AccessDenied { path: PathBuf, reason: String },

    /// A config file exists but cannot be parsed.
    #[error("corrupt config file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// The OS refused to register a watch, or the watched directory vanished.
    #[error("watch failure on {}: {reason}", path.display())]
    WatchFailure { path: PathBuf, reason: String },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotFound { .. } => ErrorKind::NotFound,
            SyncError::AccessDenied { .. } => ErrorKind::AccessDenied,
            SyncError::Corrupt { .. } => ErrorKind::Corrupt,
            SyncError::WatchFailure { .. } => ErrorKind::WatchFailure,
        }
    }

    /// The path the failure relates to.
    pub fn path(&self) -> &Path {
        match self {
            SyncError::NotFound { path }
            | SyncError::AccessDenied { path, .. }
            | SyncError::Corrupt { path, .. }
            | SyncError::WatchFailure { path, .. } => path,
        }
    }

    /// Returns `true` for the kinds that are reported to the user.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AccessDenied | ErrorKind::WatchFailure
        )
    }

    /// Classifies an I/O error on `path`.
    ///
    /// `NotFound` maps to [`SyncError::NotFound`]; every other I/O failure
    /// aborts the operation and is reported as [`SyncError::AccessDenied`].
    pub fn from_io(path: impl Into<PathBuf>, err: &io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => SyncError::NotFound { path },
            _ => SyncError::AccessDenied {
                path,
                reason: err.to_string(),
            },
        }
    }

    pub fn watch_failure(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SyncError::WatchFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
