//! Infrastructure layer for the DevSync host.
//!
//! Contains the OS-facing adapters behind the application-layer ports:
//! volume probing, directory watching, config and settings files, and the
//! UI command bridge.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `devsync_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod storage;
pub mod ui_bridge;
pub mod volumes;
pub mod watcher;
