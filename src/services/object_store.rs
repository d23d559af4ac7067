//! The store contract the lifecycle code is written against.
//!
//! Implementations own all object state. Callers never cache heads or
//! payloads; every decision is made on freshly fetched metadata.

use crate::models::object::{ByteStream, ListPage, Metadata, ObjectHead};
use async_trait::async_trait;
use std::{io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("store `{op}` timed out after {elapsed:?}")]
    Timeout { op: &'static str, elapsed: Duration },
    #[error("corrupt metadata for `{key}`: {source}")]
    CorruptMetadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Metadata only. `None` when the key does not exist.
    async fn head(&self, key: &str) -> StorageResult<Option<ObjectHead>>;

    /// Metadata plus a payload stream. `None` when the key does not exist.
    async fn get(&self, key: &str) -> StorageResult<Option<(ObjectHead, ByteStream)>>;

    /// Stream `body` into `key` in one call. On error nothing is addressable
    /// under `key`.
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        metadata: Metadata,
        content_type: Option<String>,
    ) -> StorageResult<ObjectHead>;

    /// Remove `key`. Removing a key that is already gone succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// One page of the full key space, ordered by key.
    async fn list_page(&self, continuation_token: Option<String>) -> StorageResult<ListPage>;

    /// Readiness check; cheap enough to run on every `/readyz`.
    async fn probe(&self) -> StorageResult<()> {
        self.list_page(None).await.map(|_| ())
    }
}
