//! Watch-session model: lifecycle states, change batches and watcher events.
//!
//! ```text
//!   Idle ──start──► Watching ──stop──► Stopped
//!                    │   ▲                │
//!       inaccessible │   └─────start──────┘
//!                    ▼   │
//!                  Errored ──start──► (new session)
//! ```
//!
//! A `start` whose OS registration fails produces a session that is already
//! `Errored`.  Only a session that errored because its directory was absent
//! ([`WatchSession::mark_target_lost`]) may be resumed when the directory
//! comes back; any other failure stays until the next explicit `start`.
//!
//! Exactly one session exists at a time.  Each session gets a fresh
//! [`SessionId`]; anything produced by the background worker is tagged with
//! that ID so events from a retired session can be recognised and dropped.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;

/// Unique identifier of one watch session.
pub type SessionId = Uuid;

/// Lifecycle state of the directory watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchState {
    /// Nothing has been watched yet.
    Idle,
    /// A session is live and delivering events.
    Watching,
    /// The caller stopped the session.
    Stopped,
    /// The session failed; no events will arrive until the next `start`.
    Errored,
}

/// Bookkeeping for a single watch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSession {
    id: SessionId,
    target_path: PathBuf,
    state: WatchState,
    last_event_at: Option<SystemTime>,
    target_lost: bool,
}

impl WatchSession {
    /// Creates a session for `target_path` in the `Watching` state.
    pub fn begin(target_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_path: target_path.into(),
            state: WatchState::Watching,
            last_event_at: None,
            target_lost: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn last_event_at(&self) -> Option<SystemTime> {
        self.last_event_at
    }

    /// Returns `true` while the session may still deliver events.
    pub fn is_live(&self) -> bool {
        self.state == WatchState::Watching
    }

    pub fn record_event(&mut self, at: SystemTime) {
        self.last_event_at = Some(at);
    }

    /// Moves a live session to `Errored`.
    ///
    /// Returns `false` if the session was not live, so the failure is
    /// surfaced at most once per session.
    pub fn mark_errored(&mut self) -> bool {
        if self.is_live() {
            self.state = WatchState::Errored;
            true
        } else {
            false
        }
    }

    /// Like [`WatchSession::mark_errored`], for a target directory that is
    /// missing or was removed.
    pub fn mark_target_lost(&mut self) -> bool {
        let changed = self.mark_errored();
        if changed {
            self.target_lost = true;
        }
        changed
    }

    /// Returns `true` if the session is `Errored` only because its target
    /// directory was absent.
    pub fn lost_target(&self) -> bool {
        self.state == WatchState::Errored && self.target_lost
    }

    /// Moves the session to `Stopped`; returns `false` if it already was.
    pub fn mark_stopped(&mut self) -> bool {
        if self.state == WatchState::Stopped {
            false
        } else {
            self.state = WatchState::Stopped;
            true
        }
    }
}

/// Accumulates the paths touched during one debounce window.
///
/// Paths are stored relative to the watched root; the root itself and paths
/// outside it are ignored.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    root: PathBuf,
    paths: BTreeSet<PathBuf>,
}

impl ChangeBatch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            paths: BTreeSet::new(),
        }
    }

    /// Records `path`; returns `true` if it was inside the root.
    pub fn record(&mut self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => false,
            Ok(rel) => {
                self.paths.insert(rel.to_path_buf());
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Drains the batch.
    pub fn take(&mut self) -> BTreeSet<PathBuf> {
        std::mem::take(&mut self.paths)
    }
}

/// A debounced notification: the set of paths changed within one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryChange {
    pub session: SessionId,
    /// The watched directory.
    pub directory: PathBuf,
    /// Affected paths, relative to `directory`.
    pub paths: BTreeSet<PathBuf>,
    pub observed_at: SystemTime,
}

/// Events delivered by the directory watcher to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changed(DirectoryChange),
    /// Terminal event for a session.
    Failed {
        session: SessionId,
        error: SyncError,
    },
}

impl WatchEvent {
    pub fn session(&self) -> SessionId {
        match self {
            WatchEvent::Changed(change) => change.session,
            WatchEvent::Failed { session, .. } => *session,
        }
    }
}
