//! UI command bridge: exposes controller operations to a frontend.
//!
//! Every function here forwards to a running
//! [`SyncController`](crate::application::sync_controller::SyncController)
//! through its [`ControllerHandle`] and wraps the outcome in a
//! [`CommandResult`], so a frontend always receives the same JSON shape:
//! `{ success: bool, data: T | null, error: string | null }`.
//!
//! # Data Transfer Objects (DTOs)
//!
//! Domain types carry `u16` IDs and `PathBuf`s.  The DTOs below carry only
//! strings so they serialise predictably: vendor and product IDs as
//! `0x`-prefixed hex, paths lossily converted to UTF-8.

use std::path::PathBuf;

use devsync_core::{parse_vendor_id, Device, DeviceId, Selection, WatchState};
use serde::{Deserialize, Serialize};

use crate::application::sync_controller::ControllerHandle;

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// Identity of a device as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdDto {
    pub vendor_id: String,
    pub product_id: String,
    pub serial: String,
    pub mount_path: String,
}

impl From<&DeviceId> for DeviceIdDto {
    fn from(id: &DeviceId) -> Self {
        Self {
            vendor_id: format!("{:#06x}", id.vendor_id),
            product_id: format!("{:#06x}", id.product_id),
            serial: id.serial.clone(),
            mount_path: id.mount_path.to_string_lossy().into_owned(),
        }
    }
}

impl TryFrom<&DeviceIdDto> for DeviceId {
    type Error = String;

    fn try_from(dto: &DeviceIdDto) -> Result<Self, Self::Error> {
        let vendor_id = parse_vendor_id(&dto.vendor_id).map_err(|e| e.to_string())?;
        let product_id = parse_vendor_id(&dto.product_id)
            .map_err(|_| format!("invalid product id {:?}", dto.product_id))?;
        Ok(DeviceId {
            vendor_id,
            product_id,
            serial: dto.serial.clone(),
            mount_path: PathBuf::from(&dto.mount_path),
        })
    }
}

/// One recognised device returned to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDto {
    #[serde(flatten)]
    pub id: DeviceIdDto,
    pub display_name: String,
}

impl From<&Device> for DeviceDto {
    fn from(d: &Device) -> Self {
        Self {
            id: DeviceIdDto::from(d.id()),
            display_name: d.display_name().to_string(),
        }
    }
}

/// The current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionDto {
    /// `None` while no selected device is attached.
    pub device: Option<DeviceIdDto>,
    pub device_name: Option<String>,
    pub directory: Option<String>,
    pub detached: bool,
}

impl From<&Selection> for SelectionDto {
    fn from(s: &Selection) -> Self {
        Self {
            device: s.device.as_ref().map(DeviceIdDto::from),
            device_name: s.device_name.clone(),
            directory: s
                .directory
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            detached: s.is_detached(),
        }
    }
}

/// Unified response wrapper used by every bridge command.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl<T: Serialize, E: std::fmt::Display> From<Result<T, E>> for CommandResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

fn to_dtos(devices: &[Device]) -> Vec<DeviceDto> {
    devices.iter().map(DeviceDto::from).collect()
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Devices found by the most recent scan.
pub async fn get_devices(handle: &ControllerHandle) -> CommandResult<Vec<DeviceDto>> {
    handle.devices().await.map(|d| to_dtos(&d)).into()
}

/// Rescans immediately and returns the fresh device list.
pub async fn refresh_devices(handle: &ControllerHandle) -> CommandResult<Vec<DeviceDto>> {
    handle.refresh_devices().await.map(|d| to_dtos(&d)).into()
}

pub async fn get_selection(handle: &ControllerHandle) -> CommandResult<SelectionDto> {
    handle
        .selection()
        .await
        .map(|s| SelectionDto::from(&s))
        .into()
}

/// Watches `directory` and persists it.
pub async fn set_directory(handle: &ControllerHandle, directory: String) -> CommandResult<()> {
    if directory.trim().is_empty() {
        return CommandResult::err("directory must not be empty");
    }
    handle.set_directory(directory).await.into()
}

/// Makes the given device the active one.
pub async fn select_device(handle: &ControllerHandle, device: DeviceIdDto) -> CommandResult<DeviceDto> {
    let id = match DeviceId::try_from(&device) {
        Ok(id) => id,
        Err(e) => return CommandResult::err(e),
    };
    handle
        .set_device(id)
        .await
        .map(|d| DeviceDto::from(&d))
        .into()
}

pub async fn rename_device(handle: &ControllerHandle, name: String) -> CommandResult<()> {
    handle.rename_device(name).await.into()
}

/// `"Idle"`, `"Watching"`, `"Stopped"` or `"Errored"`.
pub async fn get_watch_state(handle: &ControllerHandle) -> CommandResult<String> {
    handle
        .watch_state()
        .await
        .map(|s: WatchState| format!("{s:?}"))
        .into()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
