pub mod blob_store;
pub mod drive_service;
pub mod events;
pub mod identity;
pub mod orchestrator;
pub mod quota_ledger;
pub mod record_store;
pub mod registry;
pub mod session;
