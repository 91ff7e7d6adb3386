//! INI-backed [`ConfigStore`]: the durable mirror of the user's selection.
//!
//! The file lives at `devsync.ini` in the platform config directory unless
//! overridden, and looks like:
//!
//! ```ini
//! [USB device]
//! device=Raspberry Pi Pico
//! vendor_ids=0xcafe, 0x2e8a
//!
//! [watch]
//! directory=/media/user/RPI-RP2
//! ```
//!
//! # Write protocol
//!
//! Every [`ConfigStore::save`] is a read-modify-write of the whole file:
//!
//! 1. take an exclusive `fs4` lock on the sidecar `<file>.lock`,
//! 2. re-read and parse the file on disk (picking up other writers' changes),
//! 3. update the single entry,
//! 4. write the result to a temp file in the same directory, `fsync` it and
//!    rename it over the original.
//!
//! Readers never lock; thanks to the rename they see either the old or the
//! new file, never a mix.  Sections and keys this program does not know are
//! carried through unchanged.
//!
//! # Corrupt files
//!
//! An unparsable file is treated as empty by [`ConfigStore::load`] and left
//! alone.  The first `save` afterwards moves it to `<file>.corrupt` before
//! writing the new one, so it stays available for inspection.  Earlier
//! copies are never overwritten; later ones become `<file>.corrupt.1`,
//! `<file>.corrupt.2` and so on.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use devsync_core::ini::{self, check_key, check_section_name, ConfigRecord, IniError};
use devsync_core::SyncError;
use fs4::fs_std::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::sync_controller::SettingsStore;

/// File name used inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "devsync.ini";

/// Error type for config file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The process may not read or write the config file or its directory.
    #[error("access denied to config at {}: {source}", path.display())]
    AccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other file-system error.
    #[error("I/O error accessing config at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file exists but is not valid settings text.
    #[error("config file {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A section name or key cannot be stored in the file.
    #[error("invalid config entry: {0}")]
    InvalidEntry(#[from] IniError),
}

impl ConfigError {
    fn io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::PermissionDenied => ConfigError::AccessDenied { path, source },
            _ => ConfigError::Io { path, source },
        }
    }
}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::AccessDenied { path, source } | ConfigError::Io { path, source } => {
                SyncError::from_io(path, &source)
            }
            ConfigError::Corrupt { path, reason } => SyncError::Corrupt { path, reason },
            ConfigError::InvalidEntry(e) => SyncError::Corrupt {
                path: PathBuf::new(),
                reason: e.to_string(),
            },
        }
    }
}

/// What was found on disk.
enum DiskState {
    Missing,
    Parsed(ConfigRecord),
    Corrupt(String),
}

/// Section/key/value settings persisted to an INI file.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    record: ConfigRecord,
}

impl ConfigStore {
    /// Creates a store for `path`.  Nothing is read until [`ConfigStore::load`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            record: ConfigRecord::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file into memory and returns a snapshot of it.
    ///
    /// A missing file gives an empty record.  So does a corrupt one, with a
    /// warning; the file itself is not touched.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AccessDenied`] or [`ConfigError::Io`] if the
    /// file exists but cannot be read.
    pub fn load(&mut self) -> Result<ConfigRecord, ConfigError> {
        self.record = match self.read_disk()? {
            DiskState::Missing => {
                debug!("no config file at {}, starting empty", self.path.display());
                ConfigRecord::new()
            }
            DiskState::Parsed(record) => record,
            DiskState::Corrupt(reason) => {
                let err = ConfigError::Corrupt {
                    path: self.path.clone(),
                    reason,
                };
                warn!("{err}; using defaults");
                ConfigRecord::new()
            }
        };
        Ok(self.record.clone())
    }

    /// Sets one entry and durably rewrites the file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidEntry`] for names the file format cannot hold;
    /// [`ConfigError::AccessDenied`] / [`ConfigError::Io`] if the directory,
    /// lock file or config file cannot be written.  On error the file on disk
    /// is unchanged.
    pub fn save(&mut self, section: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        check_section_name(section)?;
        check_key(key)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| ConfigError::io(&dir, e))?;

        let lock_path = sidecar(&self.path, "lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| ConfigError::io(&lock_path, e))?;
        FileExt::lock_exclusive(&lock).map_err(|e| ConfigError::io(&lock_path, e))?;

        let mut record = match self.read_disk()? {
            DiskState::Missing => ConfigRecord::new(),
            DiskState::Parsed(record) => record,
            DiskState::Corrupt(reason) => {
                let aside = corrupt_sidecar(&self.path);
                warn!(
                    "config file {} is corrupt ({reason}); moving it to {}",
                    self.path.display(),
                    aside.display()
                );
                fs::rename(&self.path, &aside).map_err(|e| ConfigError::io(&aside, e))?;
                self.record.clone()
            }
        };

        record.set(section, key, value);
        write_atomic(&self.path, &dir, &ini::render(&record))?;
        debug!("saved [{section}] {key} to {}", self.path.display());
        self.record = record;

        // Closing the lock file releases the lock.
        drop(lock);
        Ok(())
    }

    /// Snapshot of the in-memory record.
    pub fn all(&self) -> ConfigRecord {
        self.record.clone()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.record.get(section, key)
    }

    fn read_disk(&self) -> Result<DiskState, ConfigError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DiskState::Missing),
            Err(e) => return Err(ConfigError::io(&self.path, e)),
        };
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => return Ok(DiskState::Corrupt(format!("not UTF-8: {e}"))),
        };
        Ok(match ini::parse(&text) {
            Ok(record) => DiskState::Parsed(record),
            Err(e) => DiskState::Corrupt(e.to_string()),
        })
    }
}

impl SettingsStore for ConfigStore {
    fn load(&mut self) -> Result<ConfigRecord, SyncError> {
        Ok(ConfigStore::load(self)?)
    }

    fn save(&mut self, section: &str, key: &str, value: &str) -> Result<(), SyncError> {
        ConfigStore::save(self, section, key, value).map_err(|e| match e {
            ConfigError::InvalidEntry(inner) => SyncError::Corrupt {
                path: self.path.clone(),
                reason: inner.to_string(),
            },
            other => other.into(),
        })
    }

    fn all(&self) -> ConfigRecord {
        ConfigStore::all(self)
    }
}

/// Writes `text` to a temp file in `dir`, syncs it and renames it over `path`.
fn write_atomic(path: &Path, dir: &Path, text: &str) -> Result<(), ConfigError> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ConfigError::io(dir, e))?;
    tmp.write_all(text.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| ConfigError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| ConfigError::io(path, e.error))?;
    Ok(())
}

/// `<path>.<ext>`, e.g. `devsync.ini.lock`.
fn sidecar(path: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// First free name among `<path>.corrupt`, `<path>.corrupt.1`, ...
fn corrupt_sidecar(path: &Path) -> PathBuf {
    let first = sidecar(path, "corrupt");
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| sidecar(path, &format!("corrupt.{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
