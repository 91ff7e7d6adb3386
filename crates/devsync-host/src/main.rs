//! DevSync host entry point.
//!
//! Loads settings, wires the infrastructure adapters into a
//! [`SyncController`] and runs it until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ settings.toml + CLI      -- HostSettings, whitelist precedence
//!  └─ SyncController::new()
//!       ├─ DeviceEnumerator<NativeVolumeProbe>   (polled)
//!       ├─ ConfigStore                           (devsync.ini)
//!       └─ DirectoryWatcher                      (notify backend)
//!  └─ controller.run()         -- Tokio task, stopped via ControllerHandle
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use devsync_core::domain::selection::{KEY_VENDOR_IDS, SECTION_DEVICE};
use devsync_core::ini::ConfigRecord;
use devsync_host::application::enumerate_devices::DeviceEnumerator;
use devsync_host::application::sync_controller::{SyncController, SyncNotification};
use devsync_host::infrastructure::storage::config::ConfigStore;
use devsync_host::infrastructure::storage::settings::{
    load_settings, resolve_whitelist, settings_file_path, HostSettings,
};
use devsync_host::infrastructure::ui_bridge::DeviceDto;
use devsync_host::infrastructure::volumes::NativeVolumeProbe;
use devsync_host::infrastructure::watcher::DirectoryWatcher;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Keeps a directory on a USB microcontroller volume selected and watched.
#[derive(Debug, Parser)]
#[command(name = "devsync-host", version)]
struct Cli {
    /// Path to settings.toml.  Defaults to the platform config directory.
    #[arg(long, env = "DEVSYNC_SETTINGS", global = true)]
    settings: Option<PathBuf>,

    /// Path to devsync.ini.  Overrides `config_file` in settings.toml.
    #[arg(long, env = "DEVSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Device poll interval in milliseconds.
    #[arg(long, global = true)]
    poll_ms: Option<u64>,

    /// Debounce window for directory changes in milliseconds.
    #[arg(long, global = true)]
    debounce_ms: Option<u64>,

    /// Recognised vendor ID in hex; repeat for several.  Replaces every
    /// other whitelist source.
    #[arg(long = "vendor-id", value_name = "HEX", global = true)]
    vendor_ids: Vec<String>,

    /// Log filter used when RUST_LOG is unset (e.g. `debug`).
    #[arg(long, env = "DEVSYNC_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Run the sync loop until interrupted (default).
    Run,
    /// Scan once and print recognised devices as JSON.
    Devices,
}

impl Cli {
    /// Overlays command-line values onto `settings`.
    fn apply_to(&self, settings: &mut HostSettings) {
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
        if let Some(ms) = self.poll_ms {
            settings.poll_interval_ms = ms;
        }
        if let Some(ms) = self.debounce_ms {
            settings.debounce_ms = ms;
        }
        if let Some(path) = &self.config {
            settings.config_file = Some(path.clone());
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_notification(note: &SyncNotification) {
    match note {
        SyncNotification::SelectionChanged(sel) => debug!("selection changed: {sel:?}"),
        SyncNotification::DeviceRenamed(name) => info!("device renamed to {name:?}"),
        SyncNotification::DirectoryChanged { directory, paths } => {
            info!("{} change(s) under {}", paths.len(), directory.display())
        }
        SyncNotification::WatchError(e) => warn!("watch error: {e}"),
        SyncNotification::AccessDenied(e) => error!("{e}"),
    }
}

/// Loads devsync.ini, falling back to an empty record if it cannot be read.
///
/// The controller's `restore` reads the file again and reports the failure
/// to subscribers.
fn load_config_or_default(store: &mut ConfigStore) -> ConfigRecord {
    match store.load() {
        Ok(record) => record,
        Err(e) => {
            error!("{e}; continuing with default settings");
            ConfigRecord::new()
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_path = match &cli.settings {
        Some(path) => path.clone(),
        None => settings_file_path()?,
    };
    let mut settings = load_settings(&settings_path)?;
    cli.apply_to(&mut settings);

    init_tracing(&settings.log_level);
    settings.validate().context("invalid settings")?;
    debug!("settings loaded from {}", settings_path.display());

    let config_path = settings.config_file_path()?;
    let mut store = ConfigStore::new(&config_path);
    let record = load_config_or_default(&mut store);
    let whitelist = resolve_whitelist(
        &cli.vendor_ids,
        record.get(SECTION_DEVICE, KEY_VENDOR_IDS),
        &settings,
    )?;
    info!("recognised vendor ids: {}", whitelist.to_list_string());

    let enumerator = DeviceEnumerator::new(NativeVolumeProbe::default(), whitelist);

    if cli.command.unwrap_or(Command::Run) == Command::Devices {
        let devices: Vec<DeviceDto> = enumerator.scan()?.iter().map(DeviceDto::from).collect();
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    info!("DevSync host starting (config {})", config_path.display());

    let watcher = DirectoryWatcher::new(settings.debounce());
    let (mut controller, handle) = SyncController::new(enumerator, store, watcher);
    let mut notes = handle.subscribe();
    if let Err(e) = controller.restore() {
        warn!("could not restore previous selection: {e}");
    }

    tokio::spawn(async move {
        loop {
            match notes.recv().await {
                Ok(note) => log_notification(&note),
                Err(RecvError::Lagged(n)) => debug!("skipped {n} notification(s)"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut run = tokio::spawn(controller.run(settings.poll_interval()));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!("failed to listen for Ctrl-C: {e}"),
            }
            if handle.shutdown().await.is_err() {
                debug!("controller already stopped");
            }
            run.await.context("sync controller task failed")?;
        }
        joined = &mut run => {
            joined.context("sync controller task failed")?;
        }
    }

    info!("DevSync host stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_without_subcommand_defaults_to_run() {
        let cli = Cli::parse_from(["devsync-host"]);

        assert_eq!(cli.command.unwrap_or(Command::Run), Command::Run);
        assert!(cli.vendor_ids.is_empty());
    }

    #[test]
    fn test_cli_accepts_repeated_vendor_ids() {
        let cli = Cli::parse_from([
            "devsync-host",
            "--vendor-id",
            "0xcafe",
            "--vendor-id",
            "2e8a",
            "devices",
        ]);

        assert_eq!(cli.vendor_ids, ["0xcafe", "2e8a"]);
        assert_eq!(cli.command, Some(Command::Devices));
    }

    #[test]
    fn test_cli_values_override_settings() {
        // Arrange
        let cli = Cli::parse_from([
            "devsync-host",
            "--poll-ms",
            "200",
            "--debounce-ms",
            "40",
            "--config",
            "/tmp/devsync.ini",
            "--log-level",
            "trace",
        ]);
        let mut settings = HostSettings::default();

        // Act
        cli.apply_to(&mut settings);

        // Assert
        assert_eq!(settings.poll_interval_ms, 200);
        assert_eq!(settings.debounce_ms, 40);
        assert_eq!(settings.log_level, "trace");
        assert_eq!(settings.config_file, Some(PathBuf::from("/tmp/devsync.ini")));
    }

    #[test]
    fn test_cli_without_overrides_keeps_settings() {
        let cli = Cli::parse_from(["devsync-host", "run"]);
        let mut settings = HostSettings::default();

        cli.apply_to(&mut settings);

        // Env vars such as DEVSYNC_LOG_LEVEL may be set by the caller.
        assert_eq!(settings.poll_interval_ms, 1000);
        assert_eq!(settings.debounce_ms, 250);
    }

    #[test]
    fn test_unreadable_config_falls_back_to_empty_record() {
        // Arrange: a directory where the config file should be
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("devsync.ini");
        std::fs::create_dir(&config_path).unwrap();
        let mut store = ConfigStore::new(&config_path);

        // Act
        let record = load_config_or_default(&mut store);

        // Assert
        assert_eq!(record, ConfigRecord::new());
        assert!(store.load().is_err(), "restore still sees the failure");
    }

    #[test]
    fn test_readable_config_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("devsync.ini");
        std::fs::write(&config_path, "[USB device]\nvendor_ids=cafe\n").unwrap();
        let mut store = ConfigStore::new(&config_path);

        let record = load_config_or_default(&mut store);

        assert_eq!(record.get(SECTION_DEVICE, KEY_VENDOR_IDS), Some("cafe"));
    }

    #[test]
    fn test_zero_poll_interval_from_cli_fails_validation() {
        let cli = Cli::parse_from(["devsync-host", "--poll-ms", "0"]);
        let mut settings = HostSettings::default();

        cli.apply_to(&mut settings);

        assert!(settings.validate().is_err());
    }
}
