//! Device entity and the vendor-ID whitelist.
//!
//! A [`Device`] is a mass-storage volume exposed by a USB microcontroller
//! whose vendor ID is on the [`VendorWhitelist`].  Devices are value objects:
//! once created they never change.  A volume that re-mounts at a different
//! path is a *different* device, because the mount path is part of the
//! identity.
//!
//! # Identity vs. metadata
//!
//! ```text
//! Device
//!  ├─ identity  (DeviceId)   vendor_id, product_id, serial, mount_path
//!  └─ metadata               display_name
//! ```
//!
//! Equality, ordering and hashing of [`Device`] only look at the identity, so
//! a `BTreeSet<Device>` never holds two entries for the same physical volume
//! even if their display names differ between scans.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// TinyUSB default vendor ID.
pub const VID_TINYUSB: u16 = 0xcafe;
/// Adafruit vendor ID.
pub const VID_ADAFRUIT: u16 = 0x239a;
/// Raspberry Pi (RP2040 / RP2350 bootloaders) vendor ID.
pub const VID_RASPBERRY_PI: u16 = 0x2e8a;
/// Espressif vendor ID.
pub const VID_ESPRESSIF: u16 = 0x303a;

/// Vendor IDs recognised when no override is configured, in priority order.
pub const DEFAULT_VENDOR_IDS: [u16; 4] =
    [VID_TINYUSB, VID_ADAFRUIT, VID_RASPBERRY_PI, VID_ESPRESSIF];

/// Error returned when a vendor ID string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid vendor id {input:?}: expected a 16-bit hex value such as 0xcafe")]
pub struct VendorIdParseError {
    pub input: String,
}

/// Parses a 16-bit vendor ID written as hex, with or without a `0x` prefix.
///
/// # Errors
///
/// Returns [`VendorIdParseError`] for empty input, non-hex characters, or
/// values that do not fit in 16 bits.
pub fn parse_vendor_id(input: &str) -> Result<u16, VendorIdParseError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(VendorIdParseError {
            input: input.to_string(),
        });
    }
    u16::from_str_radix(digits, 16).map_err(|_| VendorIdParseError {
        input: input.to_string(),
    })
}

/// Ordered set of vendor IDs that identify supported devices.
///
/// Order is preserved for display and persistence; membership checks ignore it.
/// Duplicates are dropped on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorWhitelist {
    ids: Vec<u16>,
}

impl VendorWhitelist {
    /// Builds a whitelist from `ids`, keeping the first occurrence of each ID.
    pub fn new(ids: impl IntoIterator<Item = u16>) -> Self {
        let mut out: Vec<u16> = Vec::new();
        for id in ids {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        Self { ids: out }
    }

    /// Parses a comma-separated list such as `"0xcafe, 0x239a"`.
    ///
    /// Empty entries are skipped, so a trailing comma is accepted.
    ///
    /// # Errors
    ///
    /// Returns the first entry that is not a valid 16-bit hex value.
    pub fn parse_list(list: &str) -> Result<Self, VendorIdParseError> {
        let ids = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(parse_vendor_id)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(ids))
    }

    /// Returns `true` if `vendor_id` is on the whitelist.
    pub fn contains(&self, vendor_id: u16) -> bool {
        self.ids.contains(&vendor_id)
    }

    /// Returns the vendor IDs in configured order.
    pub fn ids(&self) -> &[u16] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Renders the list in the same form accepted by [`VendorWhitelist::parse_list`].
    pub fn to_list_string(&self) -> String {
        self.ids
            .iter()
            .map(|id| format!("{id:#06x}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for VendorWhitelist {
    fn default() -> Self {
        Self::new(DEFAULT_VENDOR_IDS)
    }
}

/// Identity of a device: the fields that decide whether two scan results
/// describe the same volume.
///
/// Field order matters: the derived `Ord` gives the lexicographic order on
/// `(vendor_id, product_id, serial, mount_path)` used for deterministic
/// tie-breaking in [`crate::domain::matcher::DeviceMatcher`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Opaque serial string reported by the device; may be empty.
    pub serial: String,
    pub mount_path: PathBuf,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if !self.serial.is_empty() {
            write!(f, " #{}", self.serial)?;
        }
        write!(f, " at {}", self.mount_path.display())
    }
}

/// A recognised device volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    id: DeviceId,
    display_name: String,
}

impl Device {
    pub fn new(
        vendor_id: u16,
        product_id: u16,
        serial: impl Into<String>,
        mount_path: impl Into<PathBuf>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: DeviceId {
                vendor_id,
                product_id,
                serial: serial.into(),
                mount_path: mount_path.into(),
            },
            display_name: display_name.into(),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn vendor_id(&self) -> u16 {
        self.id.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.id.product_id
    }

    pub fn serial(&self) -> &str {
        &self.id.serial
    }

    pub fn mount_path(&self) -> &Path {
        &self.id.mount_path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Device {}

impl PartialOrd for Device {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Device {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
