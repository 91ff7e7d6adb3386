//! File-system watcher for the selected device directory.
//!
//! Wraps a `notify` [`RecommendedWatcher`] (inotify, FSEvents or
//! ReadDirectoryChangesW depending on the platform) behind the
//! [`DirectoryWatch`] port.
//!
//! # Threads and tasks
//!
//! ```text
//! notify thread ──raw events──► session worker (tokio task) ──WatchEvent──► DirectoryWatcher::next_event
//!   (OS callback)   blocking_send     debounce + batch             mpsc            stale-session filter
//! ```
//!
//! Each session owns one OS watch and one worker.  The worker collects the
//! paths touched during a fixed debounce window that opens with the first
//! event, then emits them as a single [`WatchEvent::Changed`].  At every
//! flush it also checks that the watched directory still exists; if not it
//! emits [`WatchEvent::Failed`] and exits.
//!
//! Retargeting drops the OS watch and stops the worker of the old session
//! before the new one is registered.  Anything the old worker had already
//! queued carries the old [`SessionId`] and is discarded by `next_event`, so
//! no event for the previous directory is delivered once `start` returns.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use devsync_core::{
    ChangeBatch, DirectoryChange, ErrorKind, SessionId, SyncError, WatchEvent, WatchSession,
    WatchState,
};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, trace, warn};

use crate::application::sync_controller::DirectoryWatch;

/// Coalescing window used when none is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

const EVENT_CAPACITY: usize = 64;
const RAW_CAPACITY: usize = 1024;

/// Error type for watch registration and supervision.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The directory does not exist (yet).
    #[error("watch target {} does not exist", path.display())]
    TargetMissing { path: PathBuf },

    #[error("watch target {} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// The directory exists but its metadata cannot be read.
    #[error("cannot access watch target {}: {source}", path.display())]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The OS refused the watch registration.
    #[error("failed to register watch on {}: {source}", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The watch backend reported an error mid-session.
    #[error("watch backend failed on {}: {reason}", path.display())]
    Backend { path: PathBuf, reason: String },

    /// The watched directory was removed or unmounted.
    #[error("watched directory {} disappeared", path.display())]
    TargetRemoved { path: PathBuf },

    #[error("no async runtime available to watch {}", path.display())]
    NoRuntime { path: PathBuf },
}

impl From<WatchError> for SyncError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::TargetMissing { path } => SyncError::NotFound { path },
            WatchError::Inaccessible { path, source } => SyncError::from_io(path, &source),
            WatchError::Register { path, source } if is_not_found(&source) => {
                SyncError::NotFound { path }
            }
            WatchError::Register { path, source } => {
                SyncError::watch_failure(path, source.to_string())
            }
            WatchError::NotADirectory { path } => SyncError::watch_failure(path, "not a directory"),
            WatchError::Backend { path, reason } => SyncError::watch_failure(path, reason),
            WatchError::TargetRemoved { path } => {
                SyncError::watch_failure(path, "directory removed or unmounted")
            }
            WatchError::NoRuntime { path } => SyncError::watch_failure(path, "no async runtime"),
        }
    }
}

fn is_not_found(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(e) => e.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}

/// OS resources held by a live session.  Dropping the watcher unregisters
/// the OS watch; the stop signal ends the worker and its debounce timer.
struct Backend {
    _watcher: RecommendedWatcher,
    stop: oneshot::Sender<()>,
}

/// Single-session directory watcher with debounced change batches.
pub struct DirectoryWatcher {
    debounce: Duration,
    session: Option<WatchSession>,
    backend: Option<Backend>,
    /// Registration failure of the current session, delivered by the next
    /// `next_event` call.
    pending_failure: Option<WatchEvent>,
    events_tx: mpsc::Sender<WatchEvent>,
    events_rx: mpsc::Receiver<WatchEvent>,
}

impl DirectoryWatcher {
    pub fn new(debounce: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            debounce,
            session: None,
            backend: None,
            pending_failure: None,
            events_tx,
            events_rx,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// The current (or most recent) session.
    pub fn session(&self) -> Option<&WatchSession> {
        self.session.as_ref()
    }

    fn spawn_backend(&self, id: SessionId, path: &Path) -> Result<Backend, WatchError> {
        let meta = std::fs::metadata(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => WatchError::TargetMissing {
                path: path.to_path_buf(),
            },
            _ => WatchError::Inaccessible {
                path: path.to_path_buf(),
                source,
            },
        })?;
        if !meta.is_dir() {
            return Err(WatchError::NotADirectory {
                path: path.to_path_buf(),
            });
        }
        let runtime = Handle::try_current().map_err(|_| WatchError::NoRuntime {
            path: path.to_path_buf(),
        })?;

        let (raw_tx, raw_rx) = mpsc::channel(RAW_CAPACITY);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                // Runs on the notify thread; fails only once the worker is gone.
                let _ = raw_tx.blocking_send(res);
            },
            notify::Config::default(),
        )
        .map_err(|source| WatchError::Register {
            path: path.to_path_buf(),
            source,
        })?;
        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Register {
                path: path.to_path_buf(),
                source,
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        runtime.spawn(run_worker(Worker {
            session: id,
            root: path.to_path_buf(),
            debounce: self.debounce,
            raw_rx,
            stop_rx,
            events: self.events_tx.clone(),
        }));

        Ok(Backend {
            _watcher: watcher,
            stop: stop_tx,
        })
    }

    fn teardown_backend(&mut self) {
        if let Some(backend) = self.backend.take() {
            // The worker may already have exited on its own.
            let _ = backend.stop.send(());
        }
    }
}

impl Default for DirectoryWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.teardown_backend();
    }
}

#[async_trait]
impl DirectoryWatch for DirectoryWatcher {
    fn start(&mut self, path: &Path) {
        if let Some(current) = &self.session {
            if current.is_live() && current.target_path() == path {
                trace!("already watching {}", path.display());
                return;
            }
        }

        // Retire the previous session before registering the new one.
        self.teardown_backend();
        self.pending_failure = None;
        if let Some(old) = self.session.as_mut() {
            if old.is_live() {
                old.mark_stopped();
                debug!("stopped watching {}", old.target_path().display());
            }
        }

        let mut session = WatchSession::begin(path);
        match self.spawn_backend(session.id(), path) {
            Ok(backend) => {
                info!("watching {}", path.display());
                self.backend = Some(backend);
            }
            Err(err) => {
                let error = SyncError::from(err);
                if error.kind() == ErrorKind::NotFound {
                    session.mark_target_lost();
                } else {
                    session.mark_errored();
                }
                if error.is_user_visible() {
                    warn!("{error}");
                } else {
                    debug!("{error}");
                }
                self.pending_failure = Some(WatchEvent::Failed {
                    session: session.id(),
                    error,
                });
            }
        }
        self.session = Some(session);
    }

    fn stop(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.mark_stopped() {
            info!("stopped watching {}", session.target_path().display());
        }
        self.teardown_backend();
        self.pending_failure = None;
    }

    fn state(&self) -> WatchState {
        self.session
            .as_ref()
            .map_or(WatchState::Idle, WatchSession::state)
    }

    fn target(&self) -> Option<PathBuf> {
        self.session.as_ref().map(|s| s.target_path().to_path_buf())
    }

    fn can_resume(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.lost_target() && s.target_path().is_dir())
    }

    fn check_target(&mut self) -> Option<SyncError> {
        let session = self.session.as_mut()?;
        if !session.is_live() || session.target_path().is_dir() {
            return None;
        }
        let path = session.target_path().to_path_buf();
        session.mark_target_lost();
        self.teardown_backend();
        let error = SyncError::from(WatchError::TargetRemoved { path });
        warn!("{error}");
        Some(error)
    }

    async fn next_event(&mut self) -> Option<WatchEvent> {
        if let Some(failure) = self.pending_failure.take() {
            return Some(failure);
        }
        loop {
            let event = self.events_rx.recv().await?;
            let Some(session) = self.session.as_mut() else {
                continue;
            };
            if event.session() != session.id() {
                trace!("dropping event from retired session {}", event.session());
                continue;
            }
            match &event {
                WatchEvent::Changed(change) => {
                    if !session.is_live() {
                        continue;
                    }
                    session.record_event(change.observed_at);
                    return Some(event);
                }
                WatchEvent::Failed { error, .. } => {
                    let first = if session.target_path().is_dir() {
                        session.mark_errored()
                    } else {
                        session.mark_target_lost()
                    };
                    if first {
                        warn!("{error}");
                        self.teardown_backend();
                        return Some(event);
                    }
                }
            }
        }
    }
}

// ── Session worker ────────────────────────────────────────────────────────────

struct Worker {
    session: SessionId,
    root: PathBuf,
    debounce: Duration,
    raw_rx: mpsc::Receiver<notify::Result<notify::Event>>,
    stop_rx: oneshot::Receiver<()>,
    events: mpsc::Sender<WatchEvent>,
}

async fn run_worker(mut w: Worker) {
    let mut batch = ChangeBatch::new(&w.root);
    let mut sleeper: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut w.stop_rx => break,
            raw = w.raw_rx.recv() => match raw {
                Some(Ok(event)) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        continue;
                    }
                    for path in &event.paths {
                        batch.record(path);
                    }
                    // Fixed window: the first event opens it, later ones join.
                    if sleeper.is_none() {
                        sleeper = Some(Box::pin(sleep(w.debounce)));
                    }
                }
                Some(Err(e)) => {
                    let error = WatchError::Backend {
                        path: w.root.clone(),
                        reason: e.to_string(),
                    };
                    let _ = w.events.send(failed(w.session, error)).await;
                    break;
                }
                None => break,
            },
            _ = async { if let Some(s) = sleeper.as_mut() { s.as_mut().await } }, if sleeper.is_some() => {
                sleeper = None;
                if !w.root.is_dir() {
                    let error = WatchError::TargetRemoved { path: w.root.clone() };
                    let _ = w.events.send(failed(w.session, error)).await;
                    break;
                }
                if batch.is_empty() {
                    continue;
                }
                let change = DirectoryChange {
                    session: w.session,
                    directory: w.root.clone(),
                    paths: batch.take(),
                    observed_at: SystemTime::now(),
                };
                if w.events.send(WatchEvent::Changed(change)).await.is_err() {
                    break;
                }
            }
        }
    }
    trace!("watch worker for {} exited", w.root.display());
}

fn failed(session: SessionId, error: WatchError) -> WatchEvent {
    WatchEvent::Failed {
        session,
        error: error.into(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
