//! Linux volume probe backed by the mount table and sysfs.
//!
//! For every mount whose source is a `/dev/*` block device, the probe
//! resolves `/sys/class/block/<dev>` to its real sysfs path and walks up the
//! device tree until it reaches the USB device node, the first ancestor that
//! carries `idVendor` and `idProduct`.
//!
//! ```text
//! /sys/class/block/sdb1 -> ../../devices/pci0000:00/.../usb1/1-2/1-2:1.0/host3/.../block/sdb/sdb1
//!                                                      ^^^^^
//!                                      idVendor, idProduct, serial, product
//! ```
//!
//! Non-USB block devices never reach such a node and are skipped.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use devsync_core::{parse_vendor_id, SyncError};
use tracing::{debug, trace};

use super::ProbeError;
use crate::application::enumerate_devices::{VolumeInfo, VolumeSource};

const DEFAULT_MOUNTS_FILE: &str = "/proc/self/mounts";
const DEFAULT_SYS_BLOCK: &str = "/sys/class/block";

/// Reads USB mass-storage volumes from `/proc/self/mounts` and sysfs.
#[derive(Debug, Clone)]
pub struct SysfsVolumeProbe {
    mounts_file: PathBuf,
    sys_block: PathBuf,
}

impl Default for SysfsVolumeProbe {
    fn default() -> Self {
        Self::with_roots(DEFAULT_MOUNTS_FILE, DEFAULT_SYS_BLOCK)
    }
}

impl SysfsVolumeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses an alternative mount table and `class/block` directory.
    pub fn with_roots(mounts_file: impl Into<PathBuf>, sys_block: impl Into<PathBuf>) -> Self {
        Self {
            mounts_file: mounts_file.into(),
            sys_block: sys_block.into(),
        }
    }

    /// Lists mounted volumes that belong to USB devices.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Unavailable`] if the mount table or the sysfs block
    /// directory does not exist; [`ProbeError::AccessDenied`] if either
    /// cannot be read.
    pub fn probe(&self) -> Result<Vec<VolumeInfo>, ProbeError> {
        let table = fs::read(&self.mounts_file)
            .map_err(|e| ProbeError::from_io(&self.mounts_file, e))?;
        fs::metadata(&self.sys_block).map_err(|e| ProbeError::from_io(&self.sys_block, e))?;

        let mut volumes = Vec::new();
        for (source, mount_path) in parse_mount_table(&table) {
            let Some(dev_name) = source
                .strip_prefix("/dev/")
                .ok()
                .and_then(|p| p.file_name())
            else {
                continue;
            };
            match self.usb_volume(Path::new(dev_name), &mount_path) {
                Some(volume) => {
                    trace!(
                        "{} is USB {:04x}:{:04x}",
                        mount_path.display(),
                        volume.vendor_id,
                        volume.product_id
                    );
                    volumes.push(volume);
                }
                None => trace!("{} is not a USB volume", mount_path.display()),
            }
        }
        debug!("probe found {} USB volume(s)", volumes.len());
        Ok(volumes)
    }

    fn usb_volume(&self, dev_name: &Path, mount_path: &Path) -> Option<VolumeInfo> {
        let node = fs::canonicalize(self.sys_block.join(dev_name)).ok()?;
        let usb = node
            .ancestors()
            .find(|dir| dir.join("idVendor").is_file() && dir.join("idProduct").is_file())?;

        let vendor_id = parse_vendor_id(&read_attr(usb, "idVendor")?).ok()?;
        let product_id = parse_vendor_id(&read_attr(usb, "idProduct")?).ok()?;
        let serial = read_attr(usb, "serial").unwrap_or_default();
        let display_name = read_attr(usb, "product")
            .or_else(|| {
                mount_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| mount_path.display().to_string());

        Some(VolumeInfo {
            vendor_id,
            product_id,
            serial,
            mount_path: mount_path.to_path_buf(),
            display_name,
        })
    }
}

impl VolumeSource for SysfsVolumeProbe {
    fn volumes(&self) -> Result<Vec<VolumeInfo>, SyncError> {
        Ok(self.probe()?)
    }
}

/// Reads a sysfs attribute; `None` if missing or blank.
fn read_attr(dir: &Path, name: &str) -> Option<String> {
    let raw = fs::read_to_string(dir.join(name)).ok()?;
    let value = raw.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Extracts `(source, mount point)` pairs from mount-table text.
fn parse_mount_table(table: &[u8]) -> Vec<(PathBuf, PathBuf)> {
    table
        .split(|b| *b == b'\n')
        .filter_map(|line| {
            let mut fields = line
                .split(|b| *b == b' ' || *b == b'\t')
                .filter(|f| !f.is_empty());
            let source = fields.next()?;
            let target = fields.next()?;
            Some((unescape_octal(source), unescape_octal(target)))
        })
        .collect()
}

/// Decodes the `\ooo` escapes the kernel uses for spaces, tabs and
/// backslashes in mount-table fields.
fn unescape_octal(field: &[u8]) -> PathBuf {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        if field[i] == b'\\' && i + 3 < field.len() && is_octal_triplet(&field[i + 1..i + 4]) {
            let value = field[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(field[i]);
        i += 1;
    }
    PathBuf::from(OsString::from_vec(out))
}

fn is_octal_triplet(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
