//! src/services/orchestrator.rs
//!
//! Upload Orchestrator: writes each file of a batch to the destinations the
//! session's storage mode selects, one file at a time and one destination at
//! a time, and merges the outcome into a single file record.
//!
//! Per file:
//! 1. draft a record (no destinations)
//! 2. local: capacity check, encode payload, persist, commit
//! 3. remote: capacity check, upload, commit, persist
//! 4. discard the draft if neither destination took it
//! 5. append the record to the registry
//!
//! Running out of local capacity stops the whole batch. Running out of remote
//! capacity, or a failed remote upload, only affects the current file.

use crate::{
    models::file_record::{Destination, FileRecord, checksum, encode_data_url},
    services::{
        blob_store::RemoteBlobStore,
        drive_service::{DriveError, DriveResult},
        events::{DriveEvent, EventBus, SyncStatus},
        record_store::LocalRecordStore,
        session::DriveSession,
    },
};
use bytes::Bytes;
use serde::Serialize;
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, error, info, warn};

/// One file handed to `upload`.
#[derive(Clone, Debug)]
pub struct SourceFile {
    pub name: String,
    /// Size declared by the client; corrected to `bytes.len()` if it differs.
    pub byte_size: u64,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            byte_size: bytes.len() as u64,
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// Result of the local stage for one file.
#[derive(Debug, PartialEq, Eq)]
pub enum LocalWriteResult {
    /// Mode does not target the local store.
    Skipped,
    Written,
    CapacityExceeded { available: u64 },
}

/// Result of the remote stage for one file.
#[derive(Debug, PartialEq, Eq)]
pub enum RemoteWriteResult {
    /// Mode does not target the remote store.
    Skipped,
    Written,
    CapacityExceeded { available: u64 },
    Failed(String),
}

/// What happened to one file of a batch.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Stored {
        id: String,
        name: String,
        destinations: BTreeSet<Destination>,
        warnings: Vec<String>,
    },
    /// No destination accepted the file; nothing was kept.
    Discarded {
        name: String,
        reasons: Vec<String>,
    },
    /// Local capacity ran out on this file; the rest of the batch was not attempted.
    LocalCapacityExceeded {
        name: String,
        byte_size: u64,
        available: u64,
    },
    NotAttempted { name: String },
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub outcomes: Vec<FileOutcome>,
    /// True when the batch stopped early on local capacity.
    pub aborted: bool,
}

impl UploadReport {
    pub fn stored(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Stored { .. }))
    }
}

pub struct UploadOrchestrator {
    store: Arc<dyn LocalRecordStore>,
    blobs: Arc<dyn RemoteBlobStore>,
    events: EventBus,
}

impl UploadOrchestrator {
    pub fn new(
        store: Arc<dyn LocalRecordStore>,
        blobs: Arc<dyn RemoteBlobStore>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            blobs,
            events,
        }
    }

    /// Process `files` strictly in order, then re-derive registry and ledger
    /// from the store whatever happened.
    ///
    /// A store error stops the batch and is returned after the re-derive.
    pub async fn upload(
        &self,
        session: &mut DriveSession,
        files: Vec<SourceFile>,
    ) -> DriveResult<UploadReport> {
        if files.is_empty() {
            return Err(DriveError::Validation("no files to upload".into()));
        }

        let mut report = UploadReport::default();
        let mut failure = None;
        let mut pending = files.into_iter();

        while let Some(file) = pending.next() {
            self.set_sync(session, SyncStatus::Syncing);
            match self.process(session, file).await {
                Ok(outcome) => {
                    let abort = matches!(outcome, FileOutcome::LocalCapacityExceeded { .. });
                    report.outcomes.push(outcome);
                    if abort {
                        report.aborted = true;
                        report.outcomes.extend(
                            pending
                                .by_ref()
                                .map(|f| FileOutcome::NotAttempted { name: f.name }),
                        );
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "upload batch stopped");
                    failure = Some(err);
                    break;
                }
            }
        }

        let refreshed = session.refresh(&*self.store).await;
        self.set_sync(session, SyncStatus::Synced);

        match (failure, refreshed) {
            (Some(err), Err(refresh_err)) => {
                warn!(error = %refresh_err, "could not reload registry after failed batch");
                Err(err)
            }
            (Some(err), Ok(())) => Err(err),
            (None, Err(refresh_err)) => Err(refresh_err.into()),
            (None, Ok(())) => {
                info!(
                    files = report.outcomes.len(),
                    stored = report.stored().count(),
                    aborted = report.aborted,
                    "upload batch finished"
                );
                Ok(report)
            }
        }
    }

    async fn process(&self, session: &mut DriveSession, mut file: SourceFile) -> DriveResult<FileOutcome> {
        let actual = file.bytes.len() as u64;
        if file.byte_size != actual {
            debug!(name = %file.name, declared = file.byte_size, actual, "correcting declared size");
            file.byte_size = actual;
        }

        let mut record = FileRecord::draft(
            session.principal.id.clone(),
            file.name.clone(),
            file.byte_size,
            &file.mime_type,
            checksum(&file.bytes),
        );
        let mut warnings = Vec::new();

        let local = if session.mode.targets(Destination::Local) {
            self.write_local(session, &mut record, &file).await?
        } else {
            LocalWriteResult::Skipped
        };
        if let LocalWriteResult::CapacityExceeded { available } = local {
            warn!(name = %file.name, size = file.byte_size, available, "local storage full, aborting batch");
            return Ok(FileOutcome::LocalCapacityExceeded {
                name: file.name,
                byte_size: file.byte_size,
                available,
            });
        }

        let remote = if session.mode.targets(Destination::Remote) {
            self.write_remote(session, &mut record, &file).await?
        } else {
            RemoteWriteResult::Skipped
        };
        match remote {
            RemoteWriteResult::CapacityExceeded { available } => {
                warnings.push(format!(
                    "cloud storage full ({} bytes free), remote copy skipped",
                    available
                ));
            }
            RemoteWriteResult::Failed(reason) => {
                warnings.push(format!("cloud upload failed: {}", reason));
            }
            RemoteWriteResult::Skipped | RemoteWriteResult::Written => {}
        }
        for message in &warnings {
            self.events.publish(DriveEvent::Warning {
                name: file.name.clone(),
                message: message.clone(),
            });
        }

        if record.destinations.is_empty() {
            warn!(name = %file.name, "no destination accepted the file, discarding");
            return Ok(FileOutcome::Discarded {
                name: file.name,
                reasons: warnings,
            });
        }

        let outcome = FileOutcome::Stored {
            id: record.id.clone(),
            name: record.name.clone(),
            destinations: record.destinations.clone(),
            warnings,
        };
        session.registry.append(record);
        Ok(outcome)
    }

    async fn write_local(
        &self,
        session: &mut DriveSession,
        record: &mut FileRecord,
        file: &SourceFile,
    ) -> DriveResult<LocalWriteResult> {
        if !session.ledger.would_fit(Destination::Local, file.byte_size) {
            return Ok(LocalWriteResult::CapacityExceeded {
                available: session.ledger.available(Destination::Local),
            });
        }

        let mime_type = record.mime_type.clone();
        let bytes = file.bytes.clone();
        let payload = tokio::task::spawn_blocking(move || encode_data_url(&mime_type, &bytes))
            .await
            .map_err(|err| DriveError::Internal(format!("encoding payload: {}", err)))?;

        record.attach_local(payload);
        self.store.put(record).await?;
        session.ledger.commit(Destination::Local, file.byte_size);
        debug!(id = %record.id, "local copy stored");
        Ok(LocalWriteResult::Written)
    }

    async fn write_remote(
        &self,
        session: &mut DriveSession,
        record: &mut FileRecord,
        file: &SourceFile,
    ) -> DriveResult<RemoteWriteResult> {
        if !session.ledger.would_fit(Destination::Remote, file.byte_size) {
            let available = session.ledger.available(Destination::Remote);
            warn!(name = %file.name, size = file.byte_size, available, "cloud storage full, skipping remote copy");
            return Ok(RemoteWriteResult::CapacityExceeded { available });
        }

        let events = self.events.clone();
        let name = file.name.clone();
        let on_progress = move |percent: u8| {
            events.publish(DriveEvent::Progress {
                name: name.clone(),
                percent,
            })
        };

        let uploaded = self
            .blobs
            .upload(&file.name, &record.mime_type, file.bytes.clone(), &on_progress)
            .await;
        let remote = match uploaded {
            Ok(remote) => remote,
            Err(err) => {
                warn!(name = %file.name, error = %err, "cloud upload failed");
                return Ok(RemoteWriteResult::Failed(err.to_string()));
            }
        };

        record.attach_remote(remote.url, remote.object_id);
        session.ledger.commit(Destination::Remote, file.byte_size);
        // Inserts the record in remote-only mode, otherwise adds the remote
        // location to the copy persisted by the local stage.
        self.store.put(record).await?;
        debug!(id = %record.id, "remote copy stored");
        Ok(RemoteWriteResult::Written)
    }

    fn set_sync(&self, session: &mut DriveSession, status: SyncStatus) {
        session.sync_status = status;
        self.events.publish(DriveEvent::Sync { status });
    }
}
