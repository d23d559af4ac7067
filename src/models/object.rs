//! Represents an object (blob) held by the backing store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use sqlx::FromRow;
use std::{collections::HashMap, io};

/// Streamed object payload, in either direction.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Free-form string metadata stored next to an object.
pub type Metadata = HashMap<String, String>;

/// Row shape of the `objects` table.
///
/// `metadata` is kept as JSON text and decoded into [`ObjectHead`].
#[derive(Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Object key (random id + extension).
    pub key: String,

    /// Content type (MIME type) declared at upload.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: Option<String>,

    /// Timestamp when the object was written.
    pub last_modified: DateTime<Utc>,

    /// JSON-encoded string map.
    pub metadata: String,
}

/// Everything a `head` call reveals about a stored object.
#[derive(Clone, Debug, Serialize)]
pub struct ObjectHead {
    pub key: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub metadata: Metadata,
}

impl TryFrom<ObjectRecord> for ObjectHead {
    type Error = serde_json::Error;

    fn try_from(record: ObjectRecord) -> Result<Self, Self::Error> {
        let metadata = if record.metadata.is_empty() {
            Metadata::new()
        } else {
            serde_json::from_str(&record.metadata)?
        };

        Ok(Self {
            key: record.key,
            content_type: record.content_type,
            size_bytes: record.size_bytes,
            etag: record.etag,
            last_modified: record.last_modified,
            metadata,
        })
    }
}

/// One key as seen by a listing.
#[derive(Clone, Debug)]
pub struct ListEntry {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// A single page of a full key-space listing.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,

    /// Pass back to `list_page` to continue; `None` on the last page.
    pub next_token: Option<String>,
}
