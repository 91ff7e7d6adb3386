//! SyncController use case: the single serialisation point for all state
//! changes.
//!
//! # Event flow
//!
//! ```text
//!  ControllerHandle ──commands──┐
//!  poll interval ───tick────────┼──► SyncController::run ──► DeviceMatcher
//!  DirectoryWatch ──events──────┘            │                  │
//!                                            ├──► SettingsStore (persist)
//!                                            └──► broadcast<SyncNotification>
//! ```
//!
//! User commands, polling ticks and watcher events are consumed by one
//! `tokio::select!` loop, so no two of them are ever handled concurrently.
//! Everything the controller touches on the OS side sits behind the
//! [`VolumeSource`], [`SettingsStore`] and [`DirectoryWatch`] traits; the
//! concrete adapters live in `crate::infrastructure`.
//!
//! # Directory follow rule
//!
//! When the active device changes, the watched directory moves to the new
//! device's mount path if no directory was chosen yet, or if the current one
//! is simply the previous device's mount path.  A directory the user picked
//! explicitly is never overridden, and a device disappearing never clears
//! the persisted directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use devsync_core::domain::selection::{KEY_DEVICE, KEY_DIRECTORY, SECTION_DEVICE, SECTION_WATCH};
use devsync_core::{
    ConfigRecord, Device, DeviceId, DeviceMatcher, ErrorKind, Selection, SyncError, WatchEvent,
    WatchState,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::enumerate_devices::{DeviceEnumerator, VolumeSource};

/// Buffered notifications per subscriber before the oldest are dropped.
pub const NOTIFICATION_CAPACITY: usize = 64;
const COMMAND_CAPACITY: usize = 32;

// ── Ports ─────────────────────────────────────────────────────────────────────

/// Durable section/key/value settings.
pub trait SettingsStore: Send {
    /// Reloads the record from durable storage.  A missing or unparsable file
    /// yields an empty record.
    fn load(&mut self) -> Result<ConfigRecord, SyncError>;

    /// Persists one entry with an all-or-nothing write.
    fn save(&mut self, section: &str, key: &str, value: &str) -> Result<(), SyncError>;

    /// Snapshot of the in-memory record.
    fn all(&self) -> ConfigRecord;
}

/// A single-session directory watcher.
#[async_trait]
pub trait DirectoryWatch: Send {
    /// Starts (or retargets) the session.  Never fails: a target that cannot
    /// be watched puts the session in [`WatchState::Errored`] and the failure
    /// is delivered through [`DirectoryWatch::next_event`].
    fn start(&mut self, path: &Path);

    /// Ends the session; a no-op when nothing is being watched.
    fn stop(&mut self);

    fn state(&self) -> WatchState;

    /// Directory of the current (or last) session.
    fn target(&self) -> Option<PathBuf>;

    /// Returns `true` if the session is `Errored` only because its target
    /// directory was absent, and that directory exists again.  A failure on a
    /// directory that is present (the OS refused the watch) is never
    /// resumable; it stays until the next explicit `start`.
    fn can_resume(&self) -> bool;

    /// Verifies that a live session's target is still reachable.  On failure
    /// the session moves to `Errored` and the error is returned, once.
    fn check_target(&mut self) -> Option<SyncError>;

    /// Waits for the next event of the current session.  Events from retired
    /// sessions are never returned.
    async fn next_event(&mut self) -> Option<WatchEvent>;
}

// ── Notifications and commands ────────────────────────────────────────────────

/// Change notifications delivered to subscribers such as a UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotification {
    SelectionChanged(Selection),
    DeviceRenamed(String),
    /// Debounced file-system activity under the watched directory.
    DirectoryChanged {
        directory: PathBuf,
        paths: BTreeSet<PathBuf>,
    },
    WatchError(SyncError),
    AccessDenied(SyncError),
}

/// Requests processed by [`SyncController::run`].
#[derive(Debug)]
pub enum ControllerCommand {
    SetDirectory {
        path: PathBuf,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    SetDevice {
        id: DeviceId,
        reply: oneshot::Sender<Result<Device, SyncError>>,
    },
    RenameDevice {
        name: String,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    RefreshDevices {
        reply: oneshot::Sender<Result<Vec<Device>, SyncError>>,
    },
    GetSelection {
        reply: oneshot::Sender<Selection>,
    },
    ListDevices {
        reply: oneshot::Sender<Vec<Device>>,
    },
    GetWatchState {
        reply: oneshot::Sender<WatchState>,
    },
    Shutdown,
}

/// Error returned by [`ControllerHandle`] requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("sync controller is not running")]
    Closed,

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Cloneable client for a running [`SyncController`].
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
    notifications: broadcast::Sender<SyncNotification>,
}

impl ControllerHandle {
    /// Registers for change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.notifications.subscribe()
    }

    pub async fn set_directory(&self, path: impl Into<PathBuf>) -> Result<(), ControllerError> {
        let path = path.into();
        Ok(self
            .request(|reply| ControllerCommand::SetDirectory { path, reply })
            .await??)
    }

    pub async fn set_device(&self, id: DeviceId) -> Result<Device, ControllerError> {
        Ok(self
            .request(|reply| ControllerCommand::SetDevice { id, reply })
            .await??)
    }

    pub async fn rename_device(&self, name: impl Into<String>) -> Result<(), ControllerError> {
        let name = name.into();
        Ok(self
            .request(|reply| ControllerCommand::RenameDevice { name, reply })
            .await??)
    }

    pub async fn refresh_devices(&self) -> Result<Vec<Device>, ControllerError> {
        Ok(self
            .request(|reply| ControllerCommand::RefreshDevices { reply })
            .await??)
    }

    pub async fn selection(&self) -> Result<Selection, ControllerError> {
        self.request(|reply| ControllerCommand::GetSelection { reply })
            .await
    }

    pub async fn devices(&self) -> Result<Vec<Device>, ControllerError> {
        self.request(|reply| ControllerCommand::ListDevices { reply })
            .await
    }

    pub async fn watch_state(&self) -> Result<WatchState, ControllerError> {
        self.request(|reply| ControllerCommand::GetWatchState { reply })
            .await
    }

    /// Asks the controller loop to stop the watcher and exit.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.commands
            .send(ControllerCommand::Shutdown)
            .await
            .map_err(|_| ControllerError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControllerCommand,
    ) -> Result<T, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ControllerError::Closed)?;
        rx.await.map_err(|_| ControllerError::Closed)
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

/// Orchestrates enumeration, matching, watching and persistence.
pub struct SyncController<V, S, W> {
    enumerator: DeviceEnumerator<V>,
    matcher: DeviceMatcher,
    store: S,
    watcher: W,
    selection: Selection,
    notifications: broadcast::Sender<SyncNotification>,
    commands: mpsc::Receiver<ControllerCommand>,
}

impl<V, S, W> SyncController<V, S, W>
where
    V: VolumeSource,
    S: SettingsStore,
    W: DirectoryWatch,
{
    /// Creates a controller and the handle used to drive it once it runs.
    pub fn new(enumerator: DeviceEnumerator<V>, store: S, watcher: W) -> (Self, ControllerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (note_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let handle = ControllerHandle {
            commands: cmd_tx,
            notifications: note_tx.clone(),
        };
        let controller = Self {
            enumerator,
            matcher: DeviceMatcher::new(),
            store,
            watcher,
            selection: Selection::default(),
            notifications: note_tx,
            commands: cmd_rx,
        };
        (controller, handle)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.notifications.subscribe()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn active_device(&self) -> Option<&Device> {
        self.matcher.active()
    }

    /// Devices recognised by the most recent scan.
    pub fn devices(&self) -> Vec<Device> {
        self.matcher.latest().iter().cloned().collect()
    }

    pub fn watch_state(&self) -> WatchState {
        self.watcher.state()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn watcher(&self) -> &W {
        &self.watcher
    }

    /// Restores the persisted selection and resumes watching its directory.
    ///
    /// A directory that does not exist yet is tolerated; the watcher stays
    /// `Errored` until a later refresh finds it again.
    pub fn restore(&mut self) -> Result<(), SyncError> {
        let record = self.store.load().map_err(|e| self.report(e))?;
        let restored = Selection::from_record(&record);
        self.selection.device_name = restored.device_name;
        self.selection.directory = restored.directory;

        if let Some(dir) = self.selection.directory.clone() {
            info!("restoring watch on {}", dir.display());
            self.watcher.start(&dir);
        }
        self.notify(SyncNotification::SelectionChanged(self.selection.clone()));
        Ok(())
    }

    /// Points the watcher at `path` and persists it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AccessDenied`] if the config file cannot be
    /// written.  The watcher has already been retargeted in that case.
    pub fn set_directory(&mut self, path: impl Into<PathBuf>) -> Result<(), SyncError> {
        let path = path.into();
        self.watcher.start(&path);

        if self.selection.directory.as_ref() != Some(&path) {
            self.selection.directory = Some(path.clone());
            self.notify(SyncNotification::SelectionChanged(self.selection.clone()));
        }
        self.store
            .save(SECTION_WATCH, KEY_DIRECTORY, &path.to_string_lossy())
            .map_err(|e| self.report(e))
    }

    /// Scans for devices, resolves the active one and supervises the watch.
    ///
    /// Returns the active device after the scan.
    pub fn refresh_devices(&mut self) -> Result<Option<Device>, SyncError> {
        let candidates = self.enumerator.scan().map_err(|e| self.report(e))?;

        let previous = self.matcher.active().cloned();
        let resolution = self
            .matcher
            .resolve(&candidates, self.selection.device.as_ref());

        let outcome = if resolution.changed {
            self.apply_active(previous.as_ref(), resolution.device.as_ref())
        } else {
            Ok(())
        };
        self.supervise_watch();
        outcome.map(|()| resolution.device)
    }

    /// Makes a specific present device the active one.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if `id` is not in the latest scan.
    pub fn set_device(&mut self, id: &DeviceId) -> Result<Device, SyncError> {
        let not_found = || SyncError::NotFound {
            path: id.mount_path.clone(),
        };
        let previous = self.matcher.active().cloned();
        let resolution = self.matcher.select(id).ok_or_else(not_found)?;
        if resolution.changed {
            self.apply_active(previous.as_ref(), resolution.device.as_ref())?;
        }
        resolution.device.ok_or_else(not_found)
    }

    /// Persists a new display name.  Matching and watching are unaffected.
    pub fn rename_device(&mut self, name: &str) -> Result<(), SyncError> {
        self.store
            .save(SECTION_DEVICE, KEY_DEVICE, name)
            .map_err(|e| self.report(e))?;
        self.selection.device_name = Some(name.to_string());
        info!("device renamed to {name:?}");
        self.notify(SyncNotification::DeviceRenamed(name.to_string()));
        Ok(())
    }

    /// Forwards one watcher event to subscribers.
    pub fn handle_watch_event(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Changed(change) => {
                debug!(
                    "{} path(s) changed under {}",
                    change.paths.len(),
                    change.directory.display()
                );
                self.notify(SyncNotification::DirectoryChanged {
                    directory: change.directory,
                    paths: change.paths,
                });
            }
            WatchEvent::Failed { error, .. } => self.report_watch_failure(error),
        }
    }

    /// Runs the event loop until [`ControllerCommand::Shutdown`] arrives or
    /// every handle is dropped, then stops the watcher.
    pub async fn run(mut self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("sync controller running (poll every {poll_interval:?})");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => {
                        debug!("all controller handles dropped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_devices() {
                        debug!("device refresh failed: {e}");
                    }
                }
                Some(event) = self.watcher.next_event() => self.handle_watch_event(event),
            }
        }

        self.watcher.stop();
        info!("sync controller stopped");
    }

    /// Applies one command; returns `false` when the loop should exit.
    fn handle_command(&mut self, cmd: ControllerCommand) -> bool {
        // A dropped reply receiver only means the caller stopped waiting.
        match cmd {
            ControllerCommand::SetDirectory { path, reply } => {
                let _ = reply.send(self.set_directory(path));
            }
            ControllerCommand::SetDevice { id, reply } => {
                let _ = reply.send(self.set_device(&id));
            }
            ControllerCommand::RenameDevice { name, reply } => {
                let _ = reply.send(self.rename_device(&name));
            }
            ControllerCommand::RefreshDevices { reply } => {
                let result = self.refresh_devices().map(|_| self.devices());
                let _ = reply.send(result);
            }
            ControllerCommand::GetSelection { reply } => {
                let _ = reply.send(self.selection.clone());
            }
            ControllerCommand::ListDevices { reply } => {
                let _ = reply.send(self.devices());
            }
            ControllerCommand::GetWatchState { reply } => {
                let _ = reply.send(self.watcher.state());
            }
            ControllerCommand::Shutdown => {
                info!("shutdown requested");
                return false;
            }
        }
        true
    }

    fn apply_active(
        &mut self,
        previous: Option<&Device>,
        current: Option<&Device>,
    ) -> Result<(), SyncError> {
        self.selection.device = current.map(|d| d.id().clone());

        let mut outcome = Ok(());
        match current {
            Some(device) => {
                info!("active device: {} ({})", device.display_name(), device.id());
                self.selection.device_name = Some(device.display_name().to_string());
                if let Err(e) = self
                    .store
                    .save(SECTION_DEVICE, KEY_DEVICE, device.display_name())
                {
                    outcome = Err(self.report(e));
                }

                let follows = match (&self.selection.directory, previous) {
                    (None, _) => true,
                    (Some(dir), Some(prev)) => dir == prev.mount_path(),
                    (Some(_), None) => false,
                };
                if follows {
                    let result = self.set_directory(device.mount_path());
                    outcome = outcome.and(result);
                }
            }
            None => info!("no recognised device attached"),
        }

        self.notify(SyncNotification::SelectionChanged(self.selection.clone()));
        outcome
    }

    fn supervise_watch(&mut self) {
        match self.watcher.state() {
            WatchState::Errored if self.watcher.can_resume() => {
                if let Some(target) = self.watcher.target() {
                    info!("{} is reachable again, restarting watch", target.display());
                    self.watcher.start(&target);
                }
            }
            WatchState::Watching => {
                if let Some(err) = self.watcher.check_target() {
                    self.report_watch_failure(err);
                }
            }
            _ => {}
        }
    }

    fn report_watch_failure(&self, error: SyncError) {
        if error.is_user_visible() {
            warn!("{error}");
            self.notify(SyncNotification::WatchError(error));
        } else {
            debug!("watch target unavailable: {error}");
        }
    }

    /// Logs `err` at the severity its kind calls for, notifies subscribers of
    /// user-visible kinds, and hands it back for propagation.
    fn report(&self, err: SyncError) -> SyncError {
        match err.kind() {
            ErrorKind::NotFound => debug!("{err}"),
            ErrorKind::Corrupt => warn!("{err}"),
            ErrorKind::AccessDenied => {
                warn!("{err}");
                self.notify(SyncNotification::AccessDenied(err.clone()));
            }
            ErrorKind::WatchFailure => {
                warn!("{err}");
                self.notify(SyncNotification::WatchError(err.clone()));
            }
        }
        err
    }

    fn notify(&self, note: SyncNotification) {
        // No subscribers is fine.
        let _ = self.notifications.send(note);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::enumerate_devices::VolumeInfo;
    use devsync_core::{DirectoryChange, VendorWhitelist};
    use std::collections::{HashSet, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;
    use tokio::sync::broadcast::error::TryRecvError;

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Clone, Default)]
    struct FakeVolumes(Arc<Mutex<Vec<VolumeInfo>>>);

    impl FakeVolumes {
        fn set(&self, vols: Vec<VolumeInfo>) {
            *self.0.lock().unwrap() = vols;
        }
    }

    impl VolumeSource for FakeVolumes {
        fn volumes(&self) -> Result<Vec<VolumeInfo>, SyncError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        record: ConfigRecord,
        saves: Vec<(String, String, String)>,
        deny_writes: bool,
    }

    impl SettingsStore for RecordingStore {
        fn load(&mut self) -> Result<ConfigRecord, SyncError> {
            Ok(self.record.clone())
        }

        fn save(&mut self, section: &str, key: &str, value: &str) -> Result<(), SyncError> {
            if self.deny_writes {
                return Err(SyncError::AccessDenied {
                    path: "/etc/devsync.ini".into(),
                    reason: "read-only".into(),
                });
            }
            self.record.set(section, key, value);
            self.saves
                .push((section.to_string(), key.to_string(), value.to_string()));
            Ok(())
        }

        fn all(&self) -> ConfigRecord {
            self.record.clone()
        }
    }

    #[derive(Default)]
    struct WatchLog {
        existing: HashSet<PathBuf>,
        state: Option<WatchState>,
        target: Option<PathBuf>,
        starts: Vec<PathBuf>,
        stops: usize,
        queued: VecDeque<WatchEvent>,
        refused: HashSet<PathBuf>,
        lost: bool,
    }

    #[derive(Clone, Default)]
    struct FakeWatcher(Arc<Mutex<WatchLog>>);

    impl FakeWatcher {
        fn set_exists(&self, path: &str, exists: bool) {
            let mut log = self.0.lock().unwrap();
            if exists {
                log.existing.insert(PathBuf::from(path));
            } else {
                log.existing.remove(Path::new(path));
            }
        }

        fn starts(&self) -> Vec<PathBuf> {
            self.0.lock().unwrap().starts.clone()
        }

        fn stops(&self) -> usize {
            self.0.lock().unwrap().stops
        }

        fn push_event(&self, event: WatchEvent) {
            self.0.lock().unwrap().queued.push_back(event);
        }

        /// Makes the OS refuse every registration on `path`.
        fn refuse(&self, path: &str) {
            self.0.lock().unwrap().refused.insert(PathBuf::from(path));
        }
    }

    #[async_trait]
    impl DirectoryWatch for FakeWatcher {
        fn start(&mut self, path: &Path) {
            let mut log = self.0.lock().unwrap();
            if log.state == Some(WatchState::Watching) && log.target.as_deref() == Some(path) {
                return;
            }
            log.starts.push(path.to_path_buf());
            log.target = Some(path.to_path_buf());
            if log.refused.contains(path) {
                log.state = Some(WatchState::Errored);
                log.lost = false;
                log.queued.push_back(WatchEvent::Failed {
                    session: uuid::Uuid::new_v4(),
                    error: SyncError::watch_failure(path, "No space left on device"),
                });
            } else if log.existing.contains(path) {
                log.state = Some(WatchState::Watching);
                log.lost = false;
            } else {
                log.state = Some(WatchState::Errored);
                log.lost = true;
            }
        }

        fn stop(&mut self) {
            let mut log = self.0.lock().unwrap();
            log.stops += 1;
            if log.state.is_some() {
                log.state = Some(WatchState::Stopped);
            }
        }

        fn state(&self) -> WatchState {
            self.0.lock().unwrap().state.unwrap_or(WatchState::Idle)
        }

        fn target(&self) -> Option<PathBuf> {
            self.0.lock().unwrap().target.clone()
        }

        fn can_resume(&self) -> bool {
            let log = self.0.lock().unwrap();
            log.state == Some(WatchState::Errored)
                && log.lost
                && log
                    .target
                    .as_ref()
                    .is_some_and(|t| log.existing.contains(t))
        }

        fn check_target(&mut self) -> Option<SyncError> {
            let mut log = self.0.lock().unwrap();
            let target = log.target.clone()?;
            if log.state == Some(WatchState::Watching) && !log.existing.contains(&target) {
                log.state = Some(WatchState::Errored);
                log.lost = true;
                return Some(SyncError::watch_failure(target, "directory removed"));
            }
            None
        }

        async fn next_event(&mut self) -> Option<WatchEvent> {
            let next = self.0.lock().unwrap().queued.pop_front();
            match next {
                Some(event) => Some(event),
                None => std::future::pending().await,
            }
        }
    }

    type TestController = SyncController<FakeVolumes, RecordingStore, FakeWatcher>;

    fn volume(vid: u16, serial: &str, mount: &str, name: &str) -> VolumeInfo {
        VolumeInfo {
            vendor_id: vid,
            product_id: 0x0001,
            serial: serial.to_string(),
            mount_path: PathBuf::from(mount),
            display_name: name.to_string(),
        }
    }

    fn make_controller() -> (TestController, ControllerHandle, FakeVolumes, FakeWatcher) {
        make_controller_with_store(RecordingStore::default())
    }

    fn make_controller_with_store(
        store: RecordingStore,
    ) -> (TestController, ControllerHandle, FakeVolumes, FakeWatcher) {
        let volumes = FakeVolumes::default();
        let watcher = FakeWatcher::default();
        let enumerator = DeviceEnumerator::new(volumes.clone(), VendorWhitelist::new([0xcafe]));
        let (controller, handle) = SyncController::new(enumerator, store, watcher.clone());
        (controller, handle, volumes, watcher)
    }

    fn drain(rx: &mut broadcast::Receiver<SyncNotification>) -> Vec<SyncNotification> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(n) => out.push(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        out
    }

    // ── set_directory ─────────────────────────────────────────────────────────

    #[test]
    fn test_set_directory_starts_watcher_then_persists() {
        // Arrange
        let (mut ctl, _h, _v, watcher) = make_controller();
        watcher.set_exists("/media/dev0", true);

        // Act
        ctl.set_directory("/media/dev0").expect("set_directory");

        // Assert
        assert_eq!(watcher.starts(), vec![PathBuf::from("/media/dev0")]);
        assert_eq!(ctl.watch_state(), WatchState::Watching);
        assert_eq!(
            ctl.store().all().get(SECTION_WATCH, KEY_DIRECTORY),
            Some("/media/dev0")
        );
        assert_eq!(ctl.selection().directory, Some(PathBuf::from("/media/dev0")));
    }

    #[test]
    fn test_set_directory_to_missing_path_is_persisted_without_error() {
        let (mut ctl, _h, _v, _watcher) = make_controller();

        ctl.set_directory("/media/not-yet").expect("absence is tolerated");

        assert_eq!(ctl.watch_state(), WatchState::Errored);
        assert_eq!(
            ctl.store().all().get(SECTION_WATCH, KEY_DIRECTORY),
            Some("/media/not-yet")
        );
    }

    #[test]
    fn test_set_directory_reports_access_denied_to_subscribers() {
        // Arrange
        let store = RecordingStore {
            deny_writes: true,
            ..Default::default()
        };
        let (mut ctl, _h, _v, _w) = make_controller_with_store(store);
        let mut rx = ctl.subscribe();

        // Act
        let err = ctl.set_directory("/media/dev0").unwrap_err();

        // Assert
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert!(drain(&mut rx)
            .iter()
            .any(|n| matches!(n, SyncNotification::AccessDenied(_))));
    }

    // ── refresh_devices ───────────────────────────────────────────────────────

    #[test]
    fn test_refresh_adopts_new_device_and_follows_its_mount() {
        // Arrange
        let (mut ctl, _h, volumes, watcher) = make_controller();
        volumes.set(vec![volume(0xcafe, "S1", "/media/dev0", "Pico")]);
        watcher.set_exists("/media/dev0", true);
        let mut rx = ctl.subscribe();

        // Act
        let active = ctl.refresh_devices().expect("refresh");

        // Assert
        assert_eq!(active.map(|d| d.display_name().to_string()), Some("Pico".into()));
        let cfg = ctl.store().all();
        assert_eq!(cfg.get(SECTION_DEVICE, KEY_DEVICE), Some("Pico"));
        assert_eq!(cfg.get(SECTION_WATCH, KEY_DIRECTORY), Some("/media/dev0"));
        assert_eq!(ctl.watch_state(), WatchState::Watching);
        assert!(drain(&mut rx)
            .iter()
            .any(|n| matches!(n, SyncNotification::SelectionChanged(s) if s.device.is_some())));
    }

    #[test]
    fn test_refresh_without_change_does_not_persist_or_notify() {
        // Arrange
        let (mut ctl, _h, volumes, watcher) = make_controller();
        volumes.set(vec![volume(0xcafe, "S1", "/media/dev0", "Pico")]);
        watcher.set_exists("/media/dev0", true);
        ctl.refresh_devices().expect("first refresh");
        let saves_before = ctl.store().saves.len();
        let mut rx = ctl.subscribe();

        // Act
        ctl.refresh_devices().expect("second refresh");

        // Assert
        assert_eq!(ctl.store().saves.len(), saves_before);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_refresh_keeps_user_chosen_directory() {
        // Arrange
        let (mut ctl, _h, volumes, watcher) = make_controller();
        watcher.set_exists("/home/user/project", true);
        ctl.set_directory("/home/user/project").expect("set");
        volumes.set(vec![volume(0xcafe, "S1", "/media/dev0", "Pico")]);

        // Act
        ctl.refresh_devices().expect("refresh");

        // Assert
        assert_eq!(
            ctl.selection().directory,
            Some(PathBuf::from("/home/user/project"))
        );
        assert_eq!(watcher.starts(), vec![PathBuf::from("/home/user/project")]);
    }

    #[test]
    fn test_refresh_switches_directory_when_it_followed_previous_device() {
        // Arrange: D1 active and followed, then D1 leaves and D2 arrives
        let (mut ctl, _h, volumes, watcher) = make_controller();
        watcher.set_exists("/media/d1", true);
        watcher.set_exists("/media/d2", true);
        volumes.set(vec![volume(0xcafe, "1", "/media/d1", "One")]);
        ctl.refresh_devices().expect("refresh");

        // Act
        volumes.set(vec![volume(0xcafe, "2", "/media/d2", "Two")]);
        ctl.refresh_devices().expect("refresh");

        // Assert
        assert_eq!(ctl.selection().directory, Some(PathBuf::from("/media/d2")));
        assert_eq!(
            ctl.store().all().get(SECTION_WATCH, KEY_DIRECTORY),
            Some("/media/d2")
        );
    }

    #[test]
    fn test_device_removal_keeps_config_and_reports_watch_failure_once() {
        // Arrange
        let (mut ctl, _h, volumes, watcher) = make_controller();
        volumes.set(vec![volume(0xcafe, "S1", "/media/dev0", "Pico")]);
        watcher.set_exists("/media/dev0", true);
        ctl.refresh_devices().expect("refresh");
        let mut rx = ctl.subscribe();

        // Act: device unplugged, mount point disappears
        volumes.set(Vec::new());
        watcher.set_exists("/media/dev0", false);
        ctl.refresh_devices().expect("refresh");
        ctl.refresh_devices().expect("refresh again");

        // Assert
        assert_eq!(ctl.watch_state(), WatchState::Errored);
        assert_eq!(
            ctl.store().all().get(SECTION_WATCH, KEY_DIRECTORY),
            Some("/media/dev0")
        );
        let errors = drain(&mut rx)
            .into_iter()
            .filter(|n| matches!(n, SyncNotification::WatchError(_)))
            .count();
        assert_eq!(errors, 1, "watch failure must be surfaced exactly once");
        assert!(ctl.active_device().is_none());
        assert_eq!(ctl.selection().device_name.as_deref(), Some("Pico"));
    }

    #[test]
    fn test_refresh_restarts_errored_watch_when_target_returns() {
        // Arrange
        let (mut ctl, _h, volumes, watcher) = make_controller();
        ctl.set_directory("/media/dev0").expect("set");
        assert_eq!(ctl.watch_state(), WatchState::Errored);

        // Act: device plugged in at the same mount point
        watcher.set_exists("/media/dev0", true);
        volumes.set(vec![volume(0xcafe, "S1", "/media/dev0", "Pico")]);
        ctl.refresh_devices().expect("refresh");

        // Assert
        assert_eq!(ctl.watch_state(), WatchState::Watching);
    }

    #[test]
    fn test_refresh_does_not_restart_refused_watch_on_existing_directory() {
        // Arrange
        let (mut ctl, _h, volumes, watcher) = make_controller();
        watcher.set_exists("/media/dev0", true);
        watcher.refuse("/media/dev0");
        volumes.set(vec![volume(0xcafe, "S1", "/media/dev0", "Pico")]);
        ctl.set_directory("/media/dev0").expect("set");
        assert_eq!(ctl.watch_state(), WatchState::Errored);

        // Act
        for _ in 0..5 {
            ctl.refresh_devices().expect("refresh");
        }

        // Assert
        assert_eq!(watcher.starts(), vec![PathBuf::from("/media/dev0")]);
        assert_eq!(ctl.watch_state(), WatchState::Errored);
    }

    // ── set_device / rename_device ────────────────────────────────────────────

    #[test]
    fn test_set_device_pins_present_device() {
        // Arrange
        let (mut ctl, _h, volumes, watcher) = make_controller();
        watcher.set_exists("/media/a", true);
        watcher.set_exists("/media/b", true);
        volumes.set(vec![
            volume(0xcafe, "A", "/media/a", "Alpha"),
            volume(0xcafe, "B", "/media/b", "Bravo"),
        ]);
        ctl.refresh_devices().expect("refresh");
        assert_eq!(ctl.selection().device_name.as_deref(), Some("Alpha"));
        let bravo = ctl
            .devices()
            .into_iter()
            .find(|d| d.serial() == "B")
            .expect("bravo present");

        // Act
        let chosen = ctl.set_device(bravo.id()).expect("set_device");

        // Assert
        assert_eq!(chosen, bravo);
        assert_eq!(ctl.selection().device_name.as_deref(), Some("Bravo"));
        assert_eq!(ctl.selection().directory, Some(PathBuf::from("/media/b")));

        // A later scan must keep the pinned device (stability)
        ctl.refresh_devices().expect("refresh");
        assert_eq!(ctl.active_device(), Some(&bravo));
    }

    #[test]
    fn test_set_device_absent_returns_not_found() {
        let (mut ctl, _h, _v, _w) = make_controller();
        let ghost = DeviceId {
            vendor_id: 0xcafe,
            product_id: 1,
            serial: "ghost".into(),
            mount_path: "/media/ghost".into(),
        };

        let err = ctl.set_device(&ghost).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_rename_device_persists_and_notifies_without_touching_watch() {
        // Arrange
        let (mut ctl, _h, _v, watcher) = make_controller();
        let mut rx = ctl.subscribe();

        // Act
        ctl.rename_device("Bench board").expect("rename");

        // Assert
        assert_eq!(
            ctl.store().all().get(SECTION_DEVICE, KEY_DEVICE),
            Some("Bench board")
        );
        assert_eq!(
            drain(&mut rx),
            vec![SyncNotification::DeviceRenamed("Bench board".into())]
        );
        assert!(watcher.starts().is_empty());
    }

    // ── restore / watch events ────────────────────────────────────────────────

    #[test]
    fn test_restore_loads_selection_and_resumes_watch() {
        // Arrange
        let mut record = ConfigRecord::new();
        record.set(SECTION_DEVICE, KEY_DEVICE, "Feather");
        record.set(SECTION_WATCH, KEY_DIRECTORY, "/media/CIRCUITPY");
        let store = RecordingStore {
            record,
            ..Default::default()
        };
        let (mut ctl, _h, _v, watcher) = make_controller_with_store(store);
        watcher.set_exists("/media/CIRCUITPY", true);

        // Act
        ctl.restore().expect("restore");

        // Assert
        assert_eq!(ctl.selection().device_name.as_deref(), Some("Feather"));
        assert_eq!(ctl.watch_state(), WatchState::Watching);
        assert_eq!(watcher.starts(), vec![PathBuf::from("/media/CIRCUITPY")]);
    }

    #[test]
    fn test_not_found_watch_failure_is_not_user_visible() {
        let (mut ctl, _h, _v, _w) = make_controller();
        let mut rx = ctl.subscribe();

        ctl.handle_watch_event(WatchEvent::Failed {
            session: uuid::Uuid::new_v4(),
            error: SyncError::NotFound {
                path: "/media/dev0".into(),
            },
        });

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_changed_event_is_forwarded_to_subscribers() {
        // Arrange
        let (mut ctl, _h, _v, _w) = make_controller();
        let mut rx = ctl.subscribe();
        let paths: BTreeSet<PathBuf> = [PathBuf::from("code.py")].into_iter().collect();

        // Act
        ctl.handle_watch_event(WatchEvent::Changed(DirectoryChange {
            session: uuid::Uuid::new_v4(),
            directory: "/media/dev0".into(),
            paths: paths.clone(),
            observed_at: SystemTime::now(),
        }));

        // Assert
        assert_eq!(
            drain(&mut rx),
            vec![SyncNotification::DirectoryChanged {
                directory: "/media/dev0".into(),
                paths
            }]
        );
    }

    // ── run loop ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_run_serves_commands_and_stops_watcher_on_shutdown() {
        // Arrange
        let (ctl, handle, volumes, watcher) = make_controller();
        volumes.set(vec![volume(0xcafe, "S1", "/media/dev0", "Pico")]);
        watcher.set_exists("/media/dev0", true);
        let task = tokio::spawn(ctl.run(Duration::from_secs(3600)));

        // Act
        let devices = handle.refresh_devices().await.expect("refresh");
        handle.rename_device("Renamed").await.expect("rename");
        let selection = handle.selection().await.expect("selection");
        let state = handle.watch_state().await.expect("state");
        handle.shutdown().await.expect("shutdown");
        task.await.expect("join");

        // Assert
        assert_eq!(devices.len(), 1);
        assert_eq!(selection.device_name.as_deref(), Some("Renamed"));
        assert_eq!(state, WatchState::Watching);
        assert_eq!(watcher.stops(), 1);
        assert_eq!(handle.devices().await, Err(ControllerError::Closed));
    }

    #[tokio::test]
    async fn test_run_reports_refused_watch_registration_once() {
        // Arrange
        let (mut ctl, handle, volumes, watcher) = make_controller();
        let mut rx = handle.subscribe();
        watcher.set_exists("/media/dev0", true);
        watcher.refuse("/media/dev0");
        volumes.set(vec![volume(0xcafe, "S1", "/media/dev0", "Pico")]);
        ctl.set_directory("/media/dev0").expect("set");
        let task = tokio::spawn(ctl.run(Duration::from_millis(10)));

        // Act: let the poll tick many times
        tokio::time::sleep(Duration::from_millis(250)).await;
        let state = handle.watch_state().await.expect("state");
        handle.shutdown().await.expect("shutdown");
        task.await.expect("join");

        // Assert
        let errors = drain(&mut rx)
            .into_iter()
            .filter(|n| matches!(n, SyncNotification::WatchError(_)))
            .count();
        assert_eq!(errors, 1, "refused registration must be surfaced exactly once");
        assert_eq!(watcher.starts().len(), 1);
        assert_eq!(state, WatchState::Errored);
    }

    #[tokio::test]
    async fn test_run_forwards_queued_watch_events() {
        // Arrange
        let (ctl, handle, _v, watcher) = make_controller();
        let mut rx = handle.subscribe();
        watcher.push_event(WatchEvent::Failed {
            session: uuid::Uuid::new_v4(),
            error: SyncError::watch_failure("/media/dev0", "unmounted"),
        });
        let task = tokio::spawn(ctl.run(Duration::from_secs(3600)));

        // Act
        let note = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(SyncNotification::WatchError(e)) => break e,
                    Ok(_) => continue,
                    Err(e) => panic!("channel error: {e}"),
                }
            }
        })
        .await
        .expect("watch error within timeout");
        handle.shutdown().await.expect("shutdown");
        task.await.expect("join");

        // Assert
        assert_eq!(note.kind(), ErrorKind::WatchFailure);
    }

    #[tokio::test]
    async fn test_set_device_through_handle_reports_not_found() {
        let (ctl, handle, _v, _w) = make_controller();
        let task = tokio::spawn(ctl.run(Duration::from_secs(3600)));
        let ghost = DeviceId {
            vendor_id: 0xcafe,
            product_id: 1,
            serial: String::new(),
            mount_path: "/media/ghost".into(),
        };

        let err = handle.set_device(ghost).await.unwrap_err();

        assert!(matches!(err, ControllerError::Sync(ref e) if e.kind() == ErrorKind::NotFound));
        drop(handle);
        task.await.expect("loop exits when handles are dropped");
    }
}
