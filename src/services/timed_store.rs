//! Bounds every store call with a timeout.

use crate::{
    models::object::{ByteStream, ListPage, Metadata, ObjectHead},
    services::object_store::{ObjectStore, StorageError, StorageResult},
};
use async_trait::async_trait;
use std::{future::Future, sync::Arc, time::Duration};

/// Wraps another [`ObjectStore`]; an elapsed call becomes
/// [`StorageError::Timeout`].
///
/// `put` gets its own, longer budget because it spans the client's upload.
#[derive(Clone)]
pub struct TimedStore {
    inner: Arc<dyn ObjectStore>,
    call_timeout: Duration,
    upload_timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn ObjectStore>, call_timeout: Duration, upload_timeout: Duration) -> Self {
        Self {
            inner,
            call_timeout,
            upload_timeout,
        }
    }
}

async fn bounded<T>(
    op: &'static str,
    limit: Duration,
    fut: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout { op, elapsed: limit }),
    }
}

#[async_trait]
impl ObjectStore for TimedStore {
    async fn head(&self, key: &str) -> StorageResult<Option<ObjectHead>> {
        bounded("head", self.call_timeout, self.inner.head(key)).await
    }

    /// Only opening the object is bounded; streaming the body is not.
    async fn get(&self, key: &str) -> StorageResult<Option<(ObjectHead, ByteStream)>> {
        bounded("get", self.call_timeout, self.inner.get(key)).await
    }

    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        metadata: Metadata,
        content_type: Option<String>,
    ) -> StorageResult<ObjectHead> {
        bounded(
            "put",
            self.upload_timeout,
            self.inner.put(key, body, metadata, content_type),
        )
        .await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        bounded("delete", self.call_timeout, self.inner.delete(key)).await
    }

    async fn list_page(&self, continuation_token: Option<String>) -> StorageResult<ListPage> {
        bounded(
            "list_page",
            self.call_timeout,
            self.inner.list_page(continuation_token),
        )
        .await
    }

    async fn probe(&self) -> StorageResult<()> {
        bounded("probe", self.call_timeout, self.inner.probe()).await
    }
}
