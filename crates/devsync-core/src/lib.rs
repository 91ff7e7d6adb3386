//! # devsync-core
//!
//! Shared domain library for DevSync, a host tool that notices when a USB
//! microcontroller shows up as a mass-storage volume, watches that volume's
//! mount directory and keeps the user's selection persisted.
//!
//! This crate has no dependencies on OS APIs, file-system watchers or async
//! runtimes.  It defines:
//!
//! - **`domain`** – devices, the vendor whitelist, device matching, the
//!   selection and the watch-session state machine.
//! - **`ini`** – the section/key/value record and its text codec used by the
//!   config store.
//! - **`error`** – the error taxonomy shared across components.

pub mod domain;
pub mod error;
pub mod ini;

pub use domain::device::{
    parse_vendor_id, Device, DeviceId, VendorIdParseError, VendorWhitelist, DEFAULT_VENDOR_IDS,
};
pub use domain::matcher::{DeviceMatcher, Resolution};
pub use domain::selection::Selection;
pub use domain::watch::{
    ChangeBatch, DirectoryChange, SessionId, WatchEvent, WatchSession, WatchState,
};
pub use error::{ErrorKind, SyncError};
pub use ini::{ConfigRecord, IniError};
