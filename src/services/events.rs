//! Notifications for the presentation layer.

use crate::models::principal::Principal;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Synced,
    Syncing,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriveEvent {
    Sync { status: SyncStatus },
    Progress { name: String, percent: u8 },
    /// A non-fatal, per-file problem (remote skipped or failed).
    Warning { name: String, message: String },
    Session { principal: Option<Principal> },
}

impl DriveEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DriveEvent::Sync { .. } => "sync",
            DriveEvent::Progress { .. } => "progress",
            DriveEvent::Warning { .. } => "warning",
            DriveEvent::Session { .. } => "session",
        }
    }
}

/// Fan-out of drive events. Publishing with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DriveEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: DriveEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DriveEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
