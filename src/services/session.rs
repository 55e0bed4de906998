//! Per-principal session context.
//!
//! Principal, storage mode, file list and quota counters live here and are
//! dropped when the principal signs out.

use crate::{
    models::{principal::Principal, storage_mode::StorageMode},
    services::{
        events::SyncStatus,
        quota_ledger::{Capacities, QuotaLedger},
        record_store::{LocalRecordStore, StoreResult},
        registry::FileRegistry,
    },
};

pub struct DriveSession {
    pub principal: Principal,
    pub mode: StorageMode,
    pub sync_status: SyncStatus,
    pub registry: FileRegistry,
    pub ledger: QuotaLedger,
}

impl DriveSession {
    pub fn new(principal: Principal, mode: StorageMode, capacities: Capacities) -> Self {
        let registry = FileRegistry::new(principal.id.clone());
        Self {
            principal,
            mode,
            sync_status: SyncStatus::Synced,
            registry,
            ledger: QuotaLedger::new(capacities),
        }
    }

    /// Reload the registry from the store and recompute the ledger from it.
    pub async fn refresh(&mut self, store: &dyn LocalRecordStore) -> StoreResult<()> {
        let records = self.registry.reload(store).await?;
        self.ledger.recompute(records);
        Ok(())
    }
}
