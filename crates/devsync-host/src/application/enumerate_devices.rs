//! Device enumeration use case.
//!
//! Turns the raw list of mounted volumes reported by a [`VolumeSource`] into
//! the set of recognised [`Device`]s by applying the vendor-ID whitelist.
//!
//! # Contract
//!
//! - Each [`DeviceEnumerator::scan`] re-reads volume state; nothing is cached.
//! - No matching device is a normal state: the result is an empty set.
//! - A volume source that cannot find its OS data (no sysfs, no mount table)
//!   is treated the same as "no devices".  Only permission problems surface
//!   as an error.

use std::collections::BTreeSet;
use std::path::PathBuf;

use devsync_core::{Device, ErrorKind, SyncError, VendorWhitelist};
use tracing::{debug, trace};

/// One mounted mass-storage volume as reported by the OS, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Empty when the device does not report a serial number.
    pub serial: String,
    pub mount_path: PathBuf,
    pub display_name: String,
}

impl VolumeInfo {
    fn into_device(self) -> Device {
        Device::new(
            self.vendor_id,
            self.product_id,
            self.serial,
            self.mount_path,
            self.display_name,
        )
    }
}

/// Source of mounted USB volumes.
///
/// The production implementation reads sysfs and the mount table; tests use
/// either the mockall-generated `MockVolumeSource` or
/// [`crate::infrastructure::volumes::mock::MockVolumeProbe`].
#[cfg_attr(test, mockall::automock)]
pub trait VolumeSource: Send {
    /// Lists every mounted USB mass-storage volume, whitelisted or not.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] when the OS data source is absent and
    /// [`SyncError::AccessDenied`] when it cannot be read.
    fn volumes(&self) -> Result<Vec<VolumeInfo>, SyncError>;
}

/// Filters mounted volumes down to recognised devices.
pub struct DeviceEnumerator<S> {
    source: S,
    whitelist: VendorWhitelist,
}

impl<S: VolumeSource> DeviceEnumerator<S> {
    pub fn new(source: S, whitelist: VendorWhitelist) -> Self {
        Self { source, whitelist }
    }

    pub fn whitelist(&self) -> &VendorWhitelist {
        &self.whitelist
    }

    /// Replaces the whitelist; takes effect on the next scan.
    pub fn set_whitelist(&mut self, whitelist: VendorWhitelist) {
        self.whitelist = whitelist;
    }

    /// Scans for attached devices whose vendor ID is whitelisted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AccessDenied`] if volume information cannot be
    /// read.  A missing data source yields an empty set instead.
    pub fn scan(&self) -> Result<BTreeSet<Device>, SyncError> {
        let volumes = match self.source.volumes() {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("volume source unavailable: {e}");
                return Ok(BTreeSet::new());
            }
            Err(e) => return Err(e),
        };

        let devices: BTreeSet<Device> = volumes
            .into_iter()
            .filter(|v| {
                let keep = self.whitelist.contains(v.vendor_id);
                if !keep {
                    trace!(
                        "ignoring volume {} (vendor {:#06x} not whitelisted)",
                        v.mount_path.display(),
                        v.vendor_id
                    );
                }
                keep
            })
            .map(VolumeInfo::into_device)
            .collect();

        debug!("scan found {} recognised device(s)", devices.len());
        Ok(devices)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
