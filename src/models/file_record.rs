//! Represents one uploaded file and where its copies live.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, sqlite::SqliteRow};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const ID_SUFFIX_LEN: usize = 9;

/// A backing store that can hold a copy of a file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Destination {
    /// The on-device record store (payload stored inline).
    #[serde(rename = "local")]
    Local,
    /// The remote blob store.
    #[serde(rename = "cloud")]
    Remote,
}

impl Destination {
    pub fn as_str(self) -> &'static str {
        match self {
            Destination::Local => "local",
            Destination::Remote => "cloud",
        }
    }
}

/// The durable unit describing one uploaded file.
///
/// `remote_url` and `remote_object_id` are present iff `Destination::Remote`
/// is in `destinations`. `local_payload` is set while a record is being
/// written; records listed from the store leave it unset.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Time-prefixed unique id, assigned when the upload starts.
    pub id: String,

    /// Owner of the record; the only key records are queried by.
    pub owner_id: String,

    /// Original filename.
    pub name: String,

    /// Size of the content in bytes.
    pub byte_size: u64,

    /// Content type (MIME type).
    pub mime_type: String,

    /// Lowercase hex MD5 of the content.
    pub checksum: String,

    pub uploaded_at: DateTime<Utc>,

    /// Destinations currently holding a copy.
    pub destinations: BTreeSet<Destination>,

    /// Inline `data:` URL with the base64 content.
    pub local_payload: Option<String>,

    pub remote_url: Option<String>,

    pub remote_object_id: Option<String>,
}

impl FileRecord {
    /// Build a draft with no destinations yet.
    pub fn draft(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        byte_size: u64,
        mime_type: &str,
        checksum: impl Into<String>,
    ) -> Self {
        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_MIME_TYPE.to_string()
        } else {
            mime_type.to_string()
        };
        Self {
            id: generate_file_id(),
            owner_id: owner_id.into(),
            name: name.into(),
            byte_size,
            mime_type,
            checksum: checksum.into(),
            uploaded_at: Utc::now(),
            destinations: BTreeSet::new(),
            local_payload: None,
            remote_url: None,
            remote_object_id: None,
        }
    }

    pub fn has(&self, destination: Destination) -> bool {
        self.destinations.contains(&destination)
    }

    /// Attach the inline payload and mark the record as held locally.
    pub fn attach_local(&mut self, payload: String) {
        self.local_payload = Some(payload);
        self.destinations.insert(Destination::Local);
    }

    /// Attach the remote location and mark the record as held remotely.
    pub fn attach_remote(&mut self, url: String, object_id: String) {
        self.remote_url = Some(url);
        self.remote_object_id = Some(object_id);
        self.destinations.insert(Destination::Remote);
    }

    /// Destinations joined for display, e.g. `local + cloud`.
    pub fn saved_to_label(&self) -> String {
        self.destinations
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

impl<'r> FromRow<'r, SqliteRow> for FileRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let byte_size: i64 = row.try_get("byte_size")?;
        let byte_size = u64::try_from(byte_size).map_err(|err| sqlx::Error::ColumnDecode {
            index: "byte_size".into(),
            source: Box::new(err),
        })?;

        let mut destinations = BTreeSet::new();
        if row.try_get::<bool, _>("saved_local")? {
            destinations.insert(Destination::Local);
        }
        if row.try_get::<bool, _>("saved_remote")? {
            destinations.insert(Destination::Remote);
        }

        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            name: row.try_get("name")?,
            byte_size,
            mime_type: row.try_get("mime_type")?,
            checksum: row.try_get("checksum")?,
            uploaded_at: row.try_get("uploaded_at")?,
            destinations,
            local_payload: row.try_get("local_payload")?,
            remote_url: row.try_get("remote_url")?,
            remote_object_id: row.try_get("remote_object_id")?,
        })
    }
}

/// Generate a record id: unix millis, a dash, then a short random suffix.
pub fn generate_file_id() -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(ID_SUFFIX_LEN)
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Encode raw bytes as a `data:` URL.
pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        general_purpose::STANDARD.encode(bytes)
    )
}

/// Decode a base64 `data:` URL back into raw bytes.
///
/// Returns `None` for anything that is not a base64 data URL.
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    general_purpose::STANDARD.decode(data).ok()
}

/// Lowercase hex MD5 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Format a byte count the way the storage panel shows it, e.g. `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_has_time_prefix_and_random_suffix() {
        let id = generate_file_id();
        let (prefix, suffix) = id.split_once('-').unwrap();
        assert!(prefix.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert_ne!(generate_file_id(), id);
    }

    #[test]
    fn draft_starts_without_destinations() {
        let draft = FileRecord::draft("owner", "a.txt", 3, "", "abc");
        assert!(draft.destinations.is_empty());
        assert_eq!(draft.mime_type, DEFAULT_MIME_TYPE);
        assert!(draft.local_payload.is_none());
        assert!(draft.remote_url.is_none());
    }

    #[test]
    fn attaching_destinations_sets_their_fields() {
        let mut record = FileRecord::draft("owner", "a.txt", 3, "text/plain", "abc");
        record.attach_local(encode_data_url("text/plain", b"abc"));
        record.attach_remote("https://cdn/x".into(), "x".into());
        assert!(record.has(Destination::Local));
        assert!(record.has(Destination::Remote));
        assert_eq!(record.saved_to_label(), "local + cloud");
    }

    #[test]
    fn data_url_decodes_what_was_encoded() {
        let url = encode_data_url("text/plain", b"hello");
        assert_eq!(url, "data:text/plain;base64,aGVsbG8=");
        assert_eq!(decode_data_url(&url).unwrap(), b"hello");
        assert!(decode_data_url("https://example.com/file").is_none());
        assert!(decode_data_url("data:text/plain,hello").is_none());
    }

    #[test]
    fn format_size_uses_binary_units() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(512), "512 Bytes");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(20 * 1024 * 1024 * 1024), "20 GB");
    }
}
