//! TOML host settings: how the sync service itself runs.
//!
//! These are separate from the INI [`ConfigStore`](super::config::ConfigStore):
//! the INI file holds the user's selection and is rewritten at runtime, while
//! `settings.toml` is only read at startup.
//!
//! Default location:
//! - Windows:  `%APPDATA%\DevSync\settings.toml`
//! - Linux:    `~/.config/devsync/settings.toml`
//! - macOS:    `~/Library/Application Support/DevSync/settings.toml`
//!
//! ```toml
//! log_level = "debug"
//! poll_interval_ms = 500
//! vendor_ids = ["0xcafe", "0x2e8a"]
//! config_file = "/home/user/devsync.ini"
//! ```
//!
//! Every field has a serde default, so an empty or partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use devsync_core::{parse_vendor_id, VendorIdParseError, VendorWhitelist, DEFAULT_VENDOR_IDS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::CONFIG_FILE_NAME;

/// File name used inside the platform config directory.
pub const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Error type for host settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error reading settings at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse settings at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A vendor ID in the settings, config file or command line is not hex.
    #[error(transparent)]
    VendorId(#[from] VendorIdParseError),

    /// A field holds a value the service cannot run with.
    #[error("invalid setting `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Host settings loaded from `settings.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How often the device list is rescanned.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Debounce window for directory change events.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Recognised vendor IDs as hex strings.
    #[serde(default = "default_vendor_ids")]
    pub vendor_ids: Vec<String>,

    /// Overrides the location of `devsync.ini`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_debounce_ms() -> u64 {
    250
}
fn default_vendor_ids() -> Vec<String> {
    DEFAULT_VENDOR_IDS
        .iter()
        .map(|id| format!("{id:#06x}"))
        .collect()
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            vendor_ids: default_vendor_ids(),
            config_file: None,
        }
    }
}

impl HostSettings {
    /// Rejects values the service cannot run with.
    ///
    /// # Errors
    ///
    /// [`SettingsError::Invalid`] for a zero interval, or
    /// [`SettingsError::VendorId`] for a malformed vendor ID.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.poll_interval_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "poll_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.debounce_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "debounce_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        self.whitelist()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Parses [`HostSettings::vendor_ids`].
    ///
    /// # Errors
    ///
    /// Returns the first entry that is not a 16-bit hex value.
    pub fn whitelist(&self) -> Result<VendorWhitelist, SettingsError> {
        let ids = self
            .vendor_ids
            .iter()
            .map(|s| parse_vendor_id(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(VendorWhitelist::new(ids))
    }

    /// The INI config file: the override if set, else the platform default.
    ///
    /// # Errors
    ///
    /// [`SettingsError::NoPlatformConfigDir`] when no override is set and the
    /// platform directory is unknown.
    pub fn config_file_path(&self) -> Result<PathBuf, SettingsError> {
        match &self.config_file {
            Some(path) => Ok(path.clone()),
            None => default_config_file(),
        }
    }
}

/// Picks the effective vendor whitelist.
///
/// Precedence, highest first: command-line IDs, the `vendor_ids` entry of the
/// INI file, `settings.toml`.  `settings.toml` itself falls back to the
/// built-in defaults.  An empty source is skipped.
///
/// # Errors
///
/// [`SettingsError::VendorId`] if the winning source contains a bad entry.
pub fn resolve_whitelist(
    cli: &[String],
    ini: Option<&str>,
    settings: &HostSettings,
) -> Result<VendorWhitelist, SettingsError> {
    if !cli.is_empty() {
        let ids = cli
            .iter()
            .map(|s| parse_vendor_id(s))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(VendorWhitelist::new(ids));
    }
    if let Some(list) = ini.filter(|l| !l.trim().is_empty()) {
        return Ok(VendorWhitelist::parse_list(list)?);
    }
    let from_settings = settings.whitelist()?;
    if from_settings.is_empty() {
        return Ok(VendorWhitelist::default());
    }
    Ok(from_settings)
}

/// Returns the directory that holds `settings.toml` and `devsync.ini`.
///
/// # Errors
///
/// Returns [`SettingsError::NoPlatformConfigDir`] when the base directory
/// cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, SettingsError> {
    platform_config_dir().ok_or(SettingsError::NoPlatformConfigDir)
}

/// Default path of `settings.toml`.
///
/// # Errors
///
/// See [`config_dir`].
pub fn settings_file_path() -> Result<PathBuf, SettingsError> {
    Ok(config_dir()?.join(SETTINGS_FILE_NAME))
}

/// Default path of `devsync.ini`.
///
/// # Errors
///
/// See [`config_dir`].
pub fn default_config_file() -> Result<PathBuf, SettingsError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads settings from `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`SettingsError::Io`] for file-system errors other than "not
/// found", and [`SettingsError::Parse`] if the TOML is malformed.
pub fn load_settings(path: &Path) -> Result<HostSettings, SettingsError> {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostSettings::default()),
        Err(source) => Err(SettingsError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("DevSync"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("devsync"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("DevSync")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
