//! Shared state handed to every handler.

use crate::services::{drive_service::DriveService, identity::IdentityProvider};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Shared SQLite pool (records and accounts).
    pub db: Arc<SqlitePool>,

    pub identity: Arc<dyn IdentityProvider>,

    pub drive: DriveService,

    /// Whether a remote upload endpoint is configured; reported by `/readyz`.
    pub remote_configured: bool,
}
