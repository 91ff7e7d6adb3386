//! Application layer use cases for the DevSync host.
//!
//! This layer sits between the domain crate (`devsync_core`) and the
//! infrastructure adapters.  Use cases here:
//!
//! - **Orchestrate** domain objects to fulfil a user goal (e.g., "watch the
//!   directory of whichever supported board is plugged in").
//! - **Depend on abstractions** (traits) rather than concrete implementations,
//!   so the sysfs probe, the file watcher and the config file can be replaced
//!   by test doubles.
//! - **Contain no OS calls, no file system access**.
//!
//! # Sub-modules
//!
//! - **`enumerate_devices`** – Filters mounted volumes through the vendor-ID
//!   whitelist into recognised devices.
//!
//! - **`sync_controller`** – The single event loop that reacts to user
//!   selection changes, polling ticks and watcher events, persists the
//!   selection and notifies subscribers.

pub mod enumerate_devices;
pub mod sync_controller;
