//! Device matching: picks the single "active" device out of a scan result.
//!
//! When more than one recognised device is attached the matcher resolves the
//! ambiguity with a fixed policy:
//!
//! 1. **Stability** – if the previously selected device is still present, keep it.
//! 2. **Recency** – otherwise take the device that was connected most recently.
//! 3. **Determinism** – if several candidates are equally recent (for example
//!    everything seen in the very first scan), take the smallest identity in
//!    `(vendor_id, product_id, serial, mount_path)` order.
//!
//! Connection order is not reported by the OS, so the matcher derives it: each
//! identity is stamped with the scan sequence number in which it first appeared.
//! Identities that drop out of a scan are forgotten, so unplugging and
//! re-plugging a device makes it the most recent one again.
//!
//! The active device is always either `None` or a member of the most recent
//! candidate set passed to [`DeviceMatcher::resolve`].

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::device::{Device, DeviceId};

/// Outcome of a single [`DeviceMatcher::resolve`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The resolved active device, if any candidate is present.
    pub device: Option<Device>,
    /// `true` when the active device's identity differs from the previous call.
    pub changed: bool,
}

/// Tracks the active device across successive scans.
#[derive(Debug, Default)]
pub struct DeviceMatcher {
    scan_seq: u64,
    first_seen: HashMap<DeviceId, u64>,
    latest: BTreeSet<Device>,
    active: Option<Device>,
}

impl DeviceMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the active device from `candidates`.
    ///
    /// `previous` is the identity the caller considers selected; it wins over
    /// recency when present in `candidates`.
    pub fn resolve(
        &mut self,
        candidates: &BTreeSet<Device>,
        previous: Option<&DeviceId>,
    ) -> Resolution {
        self.scan_seq += 1;
        let seq = self.scan_seq;

        let present: BTreeSet<&DeviceId> = candidates.iter().map(Device::id).collect();
        self.first_seen.retain(|id, _| present.contains(id));
        for device in candidates {
            self.first_seen.entry(device.id().clone()).or_insert(seq);
        }

        let chosen = previous
            .and_then(|prev| candidates.iter().find(|d| d.id() == prev))
            .or_else(|| self.most_recent(candidates))
            .cloned();

        self.latest = candidates.clone();
        self.commit(chosen)
    }

    /// Makes the device with identity `id` active, if it is in the latest scan.
    ///
    /// Returns `None` (leaving the active device untouched) when `id` is not
    /// currently present.
    pub fn select(&mut self, id: &DeviceId) -> Option<Resolution> {
        let device = self.latest.iter().find(|d| d.id() == id)?.clone();
        Some(self.commit(Some(device)))
    }

    /// The current active device.
    pub fn active(&self) -> Option<&Device> {
        self.active.as_ref()
    }

    /// The candidate set from the most recent scan.
    pub fn latest(&self) -> &BTreeSet<Device> {
        &self.latest
    }

    fn commit(&mut self, chosen: Option<Device>) -> Resolution {
        let changed = chosen.as_ref().map(Device::id) != self.active.as_ref().map(Device::id);
        if changed {
            match &chosen {
                Some(d) => debug!("active device is now {} ({} present)", d.id(), self.latest.len()),
                None => debug!("no active device"),
            }
        }
        self.active = chosen.clone();
        Resolution {
            device: chosen,
            changed,
        }
    }

    fn most_recent<'a>(&self, candidates: &'a BTreeSet<Device>) -> Option<&'a Device> {
        candidates.iter().max_by(|a, b| {
            let seq_a = self.first_seen.get(a.id()).copied().unwrap_or(0);
            let seq_b = self.first_seen.get(b.id()).copied().unwrap_or(0);
            // Higher sequence wins; on a tie the smaller identity wins.
            seq_a.cmp(&seq_b).then_with(|| b.id().cmp(a.id()))
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
