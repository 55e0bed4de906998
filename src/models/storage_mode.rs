//! Upload destination policy.

use crate::models::file_record::Destination;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Which destinations new uploads target.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// Local record store and remote blob store.
    #[default]
    #[serde(rename = "dual")]
    Dual,
    #[serde(rename = "local")]
    LocalOnly,
    #[serde(rename = "cloud")]
    RemoteOnly,
}

impl StorageMode {
    pub fn targets(self, destination: Destination) -> bool {
        match (self, destination) {
            (StorageMode::Dual, _) => true,
            (StorageMode::LocalOnly, Destination::Local) => true,
            (StorageMode::RemoteOnly, Destination::Remote) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StorageMode::Dual => "dual",
            StorageMode::LocalOnly => "local",
            StorageMode::RemoteOnly => "cloud",
        }
    }

    /// Human readable label for the mode indicator.
    pub fn description(self) -> &'static str {
        match self {
            StorageMode::Dual => "Dual Save (Local + Cloud)",
            StorageMode::LocalOnly => "Local Only",
            StorageMode::RemoteOnly => "Cloud Only",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dual" => Ok(StorageMode::Dual),
            "local" | "local-only" | "local_only" => Ok(StorageMode::LocalOnly),
            "cloud" | "remote" | "remote-only" | "remote_only" => Ok(StorageMode::RemoteOnly),
            other => Err(format!("unknown storage mode `{}`", other)),
        }
    }
}
