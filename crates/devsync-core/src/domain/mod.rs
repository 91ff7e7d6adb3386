//! Domain entities for DevSync.
//!
//! Pure business rules with no OS, file-system or async-runtime dependencies:
//! everything here can be unit-tested without a device attached.
//!
//! - [`device`]    – `Device`, its identity and the vendor-ID whitelist.
//! - [`matcher`]   – choosing the active device among several candidates.
//! - [`selection`] – the persisted device/directory/name triple.
//! - [`watch`]     – watch-session lifecycle, change batches and events.

pub mod device;
pub mod matcher;
pub mod selection;
pub mod watch;
