//! Per-destination byte accounting with fixed capacities.
//!
//! The counters are derived state. `commit` only ever increments; the one way
//! to correct them (after a delete, or at session start) is `recompute`.

use crate::models::file_record::{Destination, FileRecord, format_size};
use serde::Serialize;

/// Capacities of both destinations in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacities {
    pub local: u64,
    pub remote: u64,
}

impl Capacities {
    pub const GIB: u64 = 1024 * 1024 * 1024;

    pub fn of(&self, destination: Destination) -> u64 {
        match destination {
            Destination::Local => self.local,
            Destination::Remote => self.remote,
        }
    }
}

impl Default for Capacities {
    fn default() -> Self {
        Self {
            local: 20 * Self::GIB,
            remote: 25 * Self::GIB,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QuotaLedger {
    capacities: Capacities,
    local_used: u64,
    remote_used: u64,
}

impl QuotaLedger {
    pub fn new(capacities: Capacities) -> Self {
        Self {
            capacities,
            local_used: 0,
            remote_used: 0,
        }
    }

    pub fn capacity(&self, destination: Destination) -> u64 {
        self.capacities.of(destination)
    }

    pub fn used(&self, destination: Destination) -> u64 {
        match destination {
            Destination::Local => self.local_used,
            Destination::Remote => self.remote_used,
        }
    }

    /// Bytes still free at `destination`.
    pub fn available(&self, destination: Destination) -> u64 {
        self.capacity(destination)
            .saturating_sub(self.used(destination))
    }

    /// True iff `used + size <= capacity`. An overflowing sum never fits.
    pub fn would_fit(&self, destination: Destination, size: u64) -> bool {
        self.used(destination)
            .checked_add(size)
            .is_some_and(|total| total <= self.capacity(destination))
    }

    /// Count a successful write of `size` bytes.
    pub fn commit(&mut self, destination: Destination, size: u64) {
        let counter = match destination {
            Destination::Local => &mut self.local_used,
            Destination::Remote => &mut self.remote_used,
        };
        *counter = counter.saturating_add(size);
    }

    /// Replace both counters with sums over the records holding each destination.
    pub fn recompute<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a FileRecord>,
    {
        let mut local = 0u64;
        let mut remote = 0u64;
        for record in records {
            if record.has(Destination::Local) {
                local = local.saturating_add(record.byte_size);
            }
            if record.has(Destination::Remote) {
                remote = remote.saturating_add(record.byte_size);
            }
        }
        self.local_used = local;
        self.remote_used = remote;
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        let local = self.usage(Destination::Local);
        let remote = self.usage(Destination::Remote);
        let total_used = self.local_used.max(self.remote_used);
        let total_capacity = self
            .capacities
            .local
            .saturating_add(self.capacities.remote);
        QuotaSnapshot {
            total_used,
            total_capacity,
            total_label: format!(
                "{} / {}",
                format_size(total_used),
                format_size(total_capacity)
            ),
            local,
            remote,
        }
    }

    fn usage(&self, destination: Destination) -> DestinationUsage {
        let used = self.used(destination);
        let capacity = self.capacity(destination);
        let fraction_used = if capacity == 0 {
            1.0
        } else {
            used as f64 / capacity as f64
        };
        DestinationUsage {
            used,
            capacity,
            available: self.available(destination),
            fraction_used,
            label: format!("{} / {}", format_size(used), format_size(capacity)),
        }
    }
}

/// Usage of one destination as shown by the storage panel.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DestinationUsage {
    pub used: u64,
    pub capacity: u64,
    pub available: u64,
    pub fraction_used: f64,
    pub label: String,
}

/// Point-in-time view of the ledger.
///
/// Every file is held by at least one destination, so the headline figure is
/// the larger of the two counters against the combined capacity.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct QuotaSnapshot {
    pub total_used: u64,
    pub total_capacity: u64,
    pub total_label: String,
    pub local: DestinationUsage,
    pub remote: DestinationUsage,
}
