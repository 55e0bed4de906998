//! src/services/drive_service.rs
//!
//! DriveService — the command interface of the drive: upload, delete,
//! download, share and mode changes, plus snapshots for the presentation layer.
//!
//! There is at most one active session. It is created when the identity
//! provider reports a signed-in principal and dropped on sign-out. Every
//! command takes the session lock for its whole duration, so commands run one
//! after another and the ledger is only ever written by one of them at a time.

use crate::{
    models::{
        file_record::{Destination, checksum, decode_data_url, format_size},
        principal::Principal,
        storage_mode::StorageMode,
    },
    services::{
        blob_store::RemoteBlobStore,
        events::{DriveEvent, EventBus, SyncStatus},
        orchestrator::{SourceFile, UploadOrchestrator, UploadReport},
        quota_ledger::{Capacities, QuotaSnapshot},
        record_store::{LocalRecordStore, StoreError},
        session::DriveSession,
    },
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::BTreeSet, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::{Mutex, MutexGuard, broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("file `{0}` has no cloud copy to share")]
    NotAvailable(String),
    #[error("{0}")]
    Validation(String),
    #[error("local copy of `{0}` is corrupt")]
    CorruptPayload(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type DriveResult<T> = Result<T, DriveError>;

/// Content to hand back for a download.
#[derive(Debug, PartialEq, Eq)]
pub enum Download {
    /// Decoded local payload.
    Inline {
        name: String,
        mime_type: String,
        bytes: Vec<u8>,
    },
    /// No local copy; fetch from the cloud URL.
    Redirect { name: String, url: String },
}

/// A file as listed to the user; never carries the payload.
#[derive(Serialize, Clone, Debug)]
pub struct FileSummary {
    pub id: String,
    pub name: String,
    pub byte_size: u64,
    pub size_label: String,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub destinations: BTreeSet<Destination>,
    pub saved_to: String,
    pub shareable: bool,
}

#[derive(Serialize, Clone, Debug)]
pub struct DriveSnapshot {
    pub principal: Principal,
    pub display_name: String,
    pub mode: StorageMode,
    pub mode_label: &'static str,
    pub sync_status: SyncStatus,
    pub files: Vec<FileSummary>,
    pub quota: QuotaSnapshot,
}

#[derive(Clone)]
pub struct DriveService {
    store: Arc<dyn LocalRecordStore>,
    orchestrator: Arc<UploadOrchestrator>,
    events: EventBus,
    capacities: Capacities,
    default_mode: StorageMode,
    session: Arc<Mutex<Option<DriveSession>>>,
}

impl DriveService {
    pub fn new(
        store: Arc<dyn LocalRecordStore>,
        blobs: Arc<dyn RemoteBlobStore>,
        capacities: Capacities,
        default_mode: StorageMode,
    ) -> Self {
        let events = EventBus::new();
        let orchestrator = Arc::new(UploadOrchestrator::new(
            store.clone(),
            blobs,
            events.clone(),
        ));
        Self {
            store,
            orchestrator,
            events,
            capacities,
            default_mode,
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DriveEvent> {
        self.events.subscribe()
    }

    /// React to a session-changed notification.
    ///
    /// A new principal gets a fresh session whose registry and ledger are
    /// loaded from the store. Repeating the current principal is a no-op.
    pub async fn on_session_changed(&self, principal: Option<Principal>) -> DriveResult<()> {
        let mut guard = self.session.lock().await;
        match principal {
            Some(principal) => {
                if guard
                    .as_ref()
                    .is_some_and(|s| s.principal.id == principal.id)
                {
                    return Ok(());
                }
                let mut session =
                    DriveSession::new(principal.clone(), self.default_mode, self.capacities);
                session.refresh(&*self.store).await?;
                info!(
                    owner = %principal.id,
                    files = session.registry.len(),
                    "drive session started"
                );
                *guard = Some(session);
                self.events.publish(DriveEvent::Session {
                    principal: Some(principal),
                });
            }
            None => {
                if let Some(session) = guard.take() {
                    info!(owner = %session.principal.id, "drive session ended");
                    self.events.publish(DriveEvent::Session { principal: None });
                }
            }
        }
        Ok(())
    }

    /// Follow an identity provider's session-changed stream until it closes.
    pub fn watch_identity(&self, mut rx: watch::Receiver<Option<Principal>>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let principal = rx.borrow_and_update().clone();
                if let Err(err) = service.on_session_changed(principal).await {
                    error!(error = %err, "failed to apply session change");
                }
            }
            debug!("identity stream closed");
        })
    }

    pub async fn upload(&self, files: Vec<SourceFile>) -> DriveResult<UploadReport> {
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        self.orchestrator.upload(session, files).await
    }

    /// Delete a file from the store and the registry, then recompute the ledger.
    ///
    /// The cloud copy is not removed.
    pub async fn delete(&self, id: &str) -> DriveResult<()> {
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        let removed = session
            .registry
            .delete(&*self.store, id)
            .await
            .map_err(|err| match err {
                StoreError::RecordNotFound(id) => DriveError::NotFound(id),
                other => DriveError::Store(other),
            })?;
        if let Some(object_id) = removed.remote_object_id.as_deref() {
            debug!(id, object_id, "cloud copy left in place after delete");
        }
        session.refresh(&*self.store).await?;
        Ok(())
    }

    /// Prefer the local payload; fall back to the cloud URL.
    pub async fn download(&self, id: &str) -> DriveResult<Download> {
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        let record = session
            .registry
            .get(id)
            .ok_or_else(|| DriveError::NotFound(id.to_string()))?;

        if record.has(Destination::Local) {
            let payload = self
                .store
                .get_payload(id)
                .await?
                .ok_or_else(|| DriveError::CorruptPayload(id.to_string()))?;
            let bytes = decode_data_url(&payload)
                .filter(|bytes| checksum(bytes) == record.checksum)
                .ok_or_else(|| DriveError::CorruptPayload(id.to_string()))?;
            return Ok(Download::Inline {
                name: record.name.clone(),
                mime_type: record.mime_type.clone(),
                bytes,
            });
        }
        if let Some(url) = record.remote_url.as_deref() {
            return Ok(Download::Redirect {
                name: record.name.clone(),
                url: url.to_string(),
            });
        }
        Err(DriveError::NotFound(id.to_string()))
    }

    /// Shareable cloud URL of a file.
    pub async fn share(&self, id: &str) -> DriveResult<String> {
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        let record = session
            .registry
            .get(id)
            .ok_or_else(|| DriveError::NotFound(id.to_string()))?;
        record
            .remote_url
            .clone()
            .ok_or_else(|| DriveError::NotAvailable(id.to_string()))
    }

    pub async fn set_mode(&self, mode: StorageMode) -> DriveResult<StorageMode> {
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        if session.mode != mode {
            info!(from = %session.mode, to = %mode, "storage mode changed");
            session.mode = mode;
        }
        Ok(session.mode)
    }

    pub async fn snapshot(&self) -> DriveResult<DriveSnapshot> {
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        let files = session
            .registry
            .records()
            .iter()
            .map(|r| FileSummary {
                id: r.id.clone(),
                name: r.name.clone(),
                byte_size: r.byte_size,
                size_label: format_size(r.byte_size),
                mime_type: r.mime_type.clone(),
                uploaded_at: r.uploaded_at,
                destinations: r.destinations.clone(),
                saved_to: r.saved_to_label(),
                shareable: r.remote_url.is_some(),
            })
            .collect();

        Ok(DriveSnapshot {
            display_name: session.principal.label(),
            principal: session.principal.clone(),
            mode: session.mode,
            mode_label: session.mode.description(),
            sync_status: session.sync_status,
            files,
            quota: session.ledger.snapshot(),
        })
    }
}

fn active<'a>(
    guard: &'a mut MutexGuard<'_, Option<DriveSession>>,
) -> DriveResult<&'a mut DriveSession> {
    guard.as_mut().ok_or(DriveError::NotAuthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        blob_store::fake::FakeBlobStore,
        record_store::{SqliteRecordStore, memory_pool},
    };

    fn principal(id: &str) -> Principal {
        Principal {
            id: id.into(),
            email: format!("{}@example.com", id),
            display_name: None,
            avatar_url: None,
        }
    }

    async fn service(mode: StorageMode, blobs: FakeBlobStore) -> (DriveService, Arc<SqliteRecordStore>) {
        let store = Arc::new(SqliteRecordStore::new(memory_pool().await));
        let service = DriveService::new(
            store.clone(),
            Arc::new(blobs),
            Capacities {
                local: 100,
                remote: 100,
            },
            mode,
        );
        (service, store)
    }

    fn stored_id(report: &UploadReport, index: usize) -> String {
        match &report.outcomes[index] {
            crate::services::orchestrator::FileOutcome::Stored { id, .. } => id.clone(),
            other => panic!("expected stored outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn commands_require_a_session() {
        let (service, _) = service(StorageMode::Dual, FakeBlobStore::default()).await;
        let err = service
            .upload(vec![SourceFile::new("a.txt", "text/plain", "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::NotAuthenticated));
        assert!(matches!(
            service.snapshot().await.unwrap_err(),
            DriveError::NotAuthenticated
        ));
    }

    #[tokio::test]
    async fn session_start_rebuilds_registry_and_ledger() {
        let (service, _) = service(StorageMode::Dual, FakeBlobStore::default()).await;
        service.on_session_changed(Some(principal("alice"))).await.unwrap();
        service
            .upload(vec![SourceFile::new("a.txt", "text/plain", vec![0u8; 30])])
            .await
            .unwrap();

        service.on_session_changed(None).await.unwrap();
        service.on_session_changed(Some(principal("alice"))).await.unwrap();

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(snapshot.quota.local.used, 30);
        assert_eq!(snapshot.quota.remote.used, 30);
        assert_eq!(snapshot.mode, StorageMode::Dual);
    }

    #[tokio::test]
    async fn sessions_are_isolated_by_owner() {
        let (service, _) = service(StorageMode::LocalOnly, FakeBlobStore::default()).await;
        service.on_session_changed(Some(principal("alice"))).await.unwrap();
        service
            .upload(vec![SourceFile::new("a.txt", "text/plain", "a")])
            .await
            .unwrap();

        service.on_session_changed(Some(principal("bob"))).await.unwrap();
        let snapshot = service.snapshot().await.unwrap();
        assert!(snapshot.files.is_empty());
        assert_eq!(snapshot.quota.local.used, 0);
    }

    #[tokio::test]
    async fn delete_updates_registry_store_and_ledger() {
        let (service, store) = service(StorageMode::Dual, FakeBlobStore::default()).await;
        service.on_session_changed(Some(principal("alice"))).await.unwrap();
        let report = service
            .upload(vec![
                SourceFile::new("a.txt", "text/plain", vec![0u8; 10]),
                SourceFile::new("b.txt", "text/plain", vec![0u8; 20]),
            ])
            .await
            .unwrap();
        let first = stored_id(&report, 0);

        service.delete(&first).await.unwrap();

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(snapshot.files[0].name, "b.txt");
        assert_eq!(snapshot.quota.local.used, 20);
        assert_eq!(snapshot.quota.remote.used, 20);
        assert_eq!(store.get_all_by_owner("alice").await.unwrap().len(), 1);

        let err = service.delete(&first).await.unwrap_err();
        assert!(matches!(err, DriveError::NotFound(_)));
    }

    #[tokio::test]
    async fn download_prefers_local_payload() {
        let (service, _) = service(StorageMode::Dual, FakeBlobStore::default()).await;
        service.on_session_changed(Some(principal("alice"))).await.unwrap();
        let report = service
            .upload(vec![SourceFile::new("note.txt", "text/plain", "hello")])
            .await
            .unwrap();
        let id = stored_id(&report, 0);

        let download = service.download(&id).await.unwrap();
        assert_eq!(
            download,
            Download::Inline {
                name: "note.txt".into(),
                mime_type: "text/plain".into(),
                bytes: b"hello".to_vec(),
            }
        );
        assert_eq!(
            service.share(&id).await.unwrap(),
            "https://blobs.test/note.txt"
        );
    }

    #[tokio::test]
    async fn registry_keeps_payloads_in_the_store() {
        let (service, _) = service(StorageMode::LocalOnly, FakeBlobStore::default()).await;
        service.on_session_changed(Some(principal("alice"))).await.unwrap();
        let report = service
            .upload(vec![SourceFile::new("note.txt", "text/plain", "hello")])
            .await
            .unwrap();
        let id = stored_id(&report, 0);

        {
            let guard = service.session.lock().await;
            let session = guard.as_ref().unwrap();
            assert!(session.registry.records().iter().all(|r| r.local_payload.is_none()));
        }
        assert!(matches!(
            service.download(&id).await.unwrap(),
            Download::Inline { bytes, .. } if bytes == b"hello"
        ));
    }

    #[tokio::test]
    async fn remote_only_files_download_by_redirect() {
        let (service, _) = service(StorageMode::RemoteOnly, FakeBlobStore::default()).await;
        service.on_session_changed(Some(principal("alice"))).await.unwrap();
        let report = service
            .upload(vec![SourceFile::new("pic.png", "image/png", vec![1u8; 4])])
            .await
            .unwrap();
        let id = stored_id(&report, 0);

        assert_eq!(
            service.download(&id).await.unwrap(),
            Download::Redirect {
                name: "pic.png".into(),
                url: "https://blobs.test/pic.png".into(),
            }
        );
    }

    #[tokio::test]
    async fn share_requires_a_cloud_copy() {
        let (service, _) = service(StorageMode::LocalOnly, FakeBlobStore::default()).await;
        service.on_session_changed(Some(principal("alice"))).await.unwrap();
        let report = service
            .upload(vec![SourceFile::new("a.txt", "text/plain", "a")])
            .await
            .unwrap();
        let id = stored_id(&report, 0);

        assert!(matches!(
            service.share(&id).await.unwrap_err(),
            DriveError::NotAvailable(_)
        ));
        assert!(matches!(
            service.share("missing").await.unwrap_err(),
            DriveError::NotFound(_)
        ));
        assert!(matches!(
            service.download("missing").await.unwrap_err(),
            DriveError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn set_mode_changes_upload_targets() {
        let (service, _) = service(StorageMode::Dual, FakeBlobStore::default()).await;
        service.on_session_changed(Some(principal("alice"))).await.unwrap();
        assert_eq!(
            service.set_mode(StorageMode::LocalOnly).await.unwrap(),
            StorageMode::LocalOnly
        );
        service
            .upload(vec![SourceFile::new("a.txt", "text/plain", "abc")])
            .await
            .unwrap();

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.mode, StorageMode::LocalOnly);
        assert_eq!(snapshot.mode_label, "Local Only");
        assert_eq!(snapshot.files[0].saved_to, "local");
        assert!(!snapshot.files[0].shareable);
        assert_eq!(snapshot.quota.remote.used, 0);
    }

    #[tokio::test]
    async fn watch_identity_follows_session_changes() {
        let (service, _) = service(StorageMode::Dual, FakeBlobStore::default()).await;
        let (tx, rx) = watch::channel(None);
        let mut events = service.subscribe();
        let handle = service.watch_identity(rx);

        tx.send_replace(Some(principal("alice")));
        loop {
            if let DriveEvent::Session { principal } = events.recv().await.unwrap() {
                assert_eq!(principal.unwrap().id, "alice");
                break;
            }
        }
        assert_eq!(service.snapshot().await.unwrap().principal.id, "alice");

        drop(tx);
        handle.await.unwrap();
    }
}
