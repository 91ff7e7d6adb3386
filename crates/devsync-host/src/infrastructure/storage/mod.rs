//! Storage infrastructure: the files the host reads and writes.
//!
//! - [`config`]: the INI [`ConfigStore`](config::ConfigStore) holding the
//!   user's device and directory selection, rewritten atomically at runtime.
//! - [`settings`]: the TOML host settings read once at startup.
//!
//! Both live in the same platform config directory.

pub mod config;
pub mod settings;
