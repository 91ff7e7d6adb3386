//! The user's current selection: device, watched directory and display name.
//!
//! The selection is derived from the active device and the watch session but
//! is persisted on its own, so a device that is unplugged still shows its
//! last-known name and directory; it is just not watched.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::device::DeviceId;
use crate::ini::ConfigRecord;

/// Section holding device-related keys.
pub const SECTION_DEVICE: &str = "USB device";
/// Display name of the selected device.
pub const KEY_DEVICE: &str = "device";
/// Optional comma-separated vendor-ID whitelist override.
pub const KEY_VENDOR_IDS: &str = "vendor_ids";
/// Section holding watch-related keys.
pub const SECTION_WATCH: &str = "watch";
/// Directory being watched.
pub const KEY_DIRECTORY: &str = "directory";

/// Logical "currently chosen device + directory + display name" triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Identity of the active device; never persisted, only known while attached.
    pub device: Option<DeviceId>,
    pub device_name: Option<String>,
    pub directory: Option<PathBuf>,
}

impl Selection {
    /// Restores the persisted parts of a selection from `record`.
    ///
    /// Empty values are treated as absent.
    pub fn from_record(record: &ConfigRecord) -> Self {
        let non_empty = |v: &str| {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        };
        Self {
            device: None,
            device_name: record.get(SECTION_DEVICE, KEY_DEVICE).and_then(non_empty),
            directory: record
                .get(SECTION_WATCH, KEY_DIRECTORY)
                .and_then(non_empty)
                .map(PathBuf::from),
        }
    }

    /// Returns `true` if the device is known but currently detached.
    pub fn is_detached(&self) -> bool {
        self.device.is_none() && self.device_name.is_some()
    }
}
