//! Mock volume probe for testing.
//!
//! Lets tests plug and unplug synthetic devices without real hardware.
//! Clones share state, so a test can keep one clone while the controller
//! owns another.

use std::path::Path;
use std::sync::{Arc, Mutex};

use devsync_core::SyncError;

use crate::application::enumerate_devices::{VolumeInfo, VolumeSource};

/// A [`VolumeSource`] whose volume list is set by the test.
#[derive(Debug, Clone, Default)]
pub struct MockVolumeProbe {
    volumes: Arc<Mutex<Vec<VolumeInfo>>>,
    failure: Arc<Mutex<Option<SyncError>>>,
}

impl MockVolumeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a volume, as if a device had just been mounted.
    pub fn attach(&self, volume: VolumeInfo) {
        self.volumes.lock().expect("lock poisoned").push(volume);
    }

    /// Removes every volume mounted at `mount_path`.
    pub fn detach(&self, mount_path: &Path) {
        self.volumes
            .lock()
            .expect("lock poisoned")
            .retain(|v| v.mount_path != mount_path);
    }

    /// Makes every following probe fail with `error` until cleared with `None`.
    pub fn fail_with(&self, error: Option<SyncError>) {
        *self.failure.lock().expect("lock poisoned") = error;
    }
}

impl VolumeSource for MockVolumeProbe {
    fn volumes(&self) -> Result<Vec<VolumeInfo>, SyncError> {
        if let Some(err) = self.failure.lock().expect("lock poisoned").clone() {
            return Err(err);
        }
        Ok(self.volumes.lock().expect("lock poisoned").clone())
    }
}
