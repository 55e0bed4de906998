//! File Registry: the session's in-memory list of file records.
//!
//! The list is a cache of the Local Record Store for one owner. It is rebuilt
//! from the store at session start and after every batch, so anything that was
//! not durably persisted drops out on the next reload.

use crate::{
    models::file_record::FileRecord,
    services::record_store::{LocalRecordStore, StoreError, StoreResult},
};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct FileRegistry {
    owner_id: String,
    records: Vec<FileRecord>,
}

impl FileRegistry {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            records: Vec::new(),
        }
    }

    /// Replace the in-memory list with the owner's records, in store order.
    pub async fn reload(&mut self, store: &dyn LocalRecordStore) -> StoreResult<&[FileRecord]> {
        self.records = store.get_all_by_owner(&self.owner_id).await?;
        debug!(owner = %self.owner_id, count = self.records.len(), "registry reloaded");
        Ok(&self.records)
    }

    /// Remove a record from the store and from the list.
    ///
    /// Only ids known to this registry can be deleted, which keeps deletes
    /// scoped to the owner. The remote copy, if any, is left in place.
    /// Callers must recompute the quota ledger afterwards.
    pub async fn delete(&mut self, store: &dyn LocalRecordStore, id: &str) -> StoreResult<FileRecord> {
        let index = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;

        store.delete(id).await?;
        Ok(self.records.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&FileRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Append a fully processed record.
    pub fn append(&mut self, record: FileRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
