//! Volume probes: OS adapters behind the `VolumeSource` port.
//!
//! On Linux, [`linux::SysfsVolumeProbe`] reads the mount table and sysfs to
//! find USB mass-storage volumes and their vendor/product IDs.  Other
//! platforms get [`EmptyVolumeProbe`], which reports no volumes, so the rest
//! of the host still runs (the user can pick a directory by hand).
//!
//! [`mock::MockVolumeProbe`] is always compiled so integration tests can
//! attach and detach synthetic devices.

use std::io;
use std::path::PathBuf;

use devsync_core::SyncError;
use thiserror::Error;

use crate::application::enumerate_devices::{VolumeInfo, VolumeSource};

pub mod mock;

#[cfg(target_os = "linux")]
pub mod linux;

/// Probe used by the binary on this platform.
#[cfg(target_os = "linux")]
pub type NativeVolumeProbe = linux::SysfsVolumeProbe;

/// Probe used by the binary on this platform.
#[cfg(not(target_os = "linux"))]
pub type NativeVolumeProbe = EmptyVolumeProbe;

/// Error type for volume probing.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The OS data source (mount table, sysfs) does not exist.
    #[error("volume information not available at {}", path.display())]
    Unavailable { path: PathBuf },

    /// The OS data source exists but cannot be read.
    #[error("access denied reading {}: {source}", path.display())]
    AccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProbeError {
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => ProbeError::Unavailable { path },
            io::ErrorKind::PermissionDenied => ProbeError::AccessDenied { path, source },
            _ => ProbeError::Io { path, source },
        }
    }
}

impl From<ProbeError> for SyncError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Unavailable { path } => SyncError::NotFound { path },
            ProbeError::AccessDenied { path, source } | ProbeError::Io { path, source } => {
                SyncError::from_io(path, &source)
            }
        }
    }
}

/// Probe for platforms without volume detection support.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyVolumeProbe;

impl VolumeSource for EmptyVolumeProbe {
    fn volumes(&self) -> Result<Vec<VolumeInfo>, SyncError> {
        Ok(Vec::new())
    }
}
