//! src/services/storage_service.rs
//!
//! LocalObjectStore — the bundled `ObjectStore` backend. Object heads and
//! metadata live in SQLite, payloads on local disk sharded beneath
//! `base_path/{shard}/{shard}/{key}`.

use crate::{
    models::object::{ByteStream, ListEntry, ListPage, Metadata, ObjectHead, ObjectRecord},
    services::object_store::{ObjectStore, StorageError, StorageResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use sqlx::{
    QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const DEFAULT_PAGE_SIZE: usize = 1000;
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// SQLite + local disk object store.
///
/// A key is addressable exactly when its row exists. Payload files are
/// written under a temporary name and renamed into place before the row is
/// inserted, so a failed upload never leaves a readable key behind.
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: SqlitePool,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    page_size: usize,
}

impl LocalObjectStore {
    /// Open (creating if needed) the metadata database and payload directory.
    pub async fn open(database_url: &str, base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                debug!("created metadata directory {}", parent.display());
            }
        }

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        Ok(Self {
            db,
            base_path,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Override how many keys a single `list_page` returns.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Apply the bundled schema. Idempotent.
    pub async fn migrate(&self) -> StorageResult<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            debug!("executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.db).await?;
        }

        Ok(statements.len())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'/')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Two-level shard directories from MD5(key), reducing files per directory.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_record(&self, key: &str) -> StorageResult<Option<ObjectHead>> {
        let record = sqlx::query_as::<_, ObjectRecord>(
            "SELECT key, content_type, size_bytes, etag, last_modified, metadata
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;

        record
            .map(|record| {
                ObjectHead::try_from(record).map_err(|source| StorageError::CorruptMetadata {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Recursively remove empty shard directories up to `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn head(&self, key: &str) -> StorageResult<Option<ObjectHead>> {
        self.ensure_key_safe(key)?;
        self.fetch_record(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<(ObjectHead, ByteStream)>> {
        self.ensure_key_safe(key)?;
        let Some(head) = self.fetch_record(key).await? else {
            return Ok(None);
        };

        let file = match File::open(self.object_path(key)).await {
            Ok(file) => file,
            // row survived a concurrent delete that already removed the file
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::Io(err)),
        };

        Ok(Some((head, ReaderStream::new(file).boxed())))
    }

    /// Stream-upload an object to disk and record its head.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - fsyncs, then atomically renames into the final location.
    /// - Upserts the row; the key becomes visible only now.
    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        metadata: Metadata,
        content_type: Option<String>,
    ) -> StorageResult<ObjectHead> {
        self.ensure_key_safe(key)?;
        let metadata_json =
            serde_json::to_string(&metadata).map_err(|source| StorageError::CorruptMetadata {
                key: key.to_string(),
                source,
            })?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let last_modified = Utc::now();
        let etag = format!("{:x}", digest.compute());

        let insert_result = sqlx::query_as::<_, ObjectRecord>(
            r#"
            INSERT INTO objects (key, content_type, size_bytes, etag, last_modified, metadata)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                metadata = excluded.metadata
            RETURNING key, content_type, size_bytes, etag, last_modified, metadata
            "#,
        )
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(last_modified)
        .bind(&metadata_json)
        .fetch_one(&self.db)
        .await;

        match insert_result {
            Ok(record) => ObjectHead::try_from(record).map_err(|source| {
                StorageError::CorruptMetadata {
                    key: key.to_string(),
                    source,
                }
            }),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Remove the row first (the key stops being addressable), then the file.
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.ensure_key_safe(key)?;

        let result = sqlx::query("DELETE FROM objects WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            debug!("delete of `{}`: already gone", key);
        }

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(())
    }

    async fn list_page(&self, continuation_token: Option<String>) -> StorageResult<ListPage> {
        let fetch_limit = self.page_size + 1;

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT key, last_modified FROM objects");
        if let Some(token) = continuation_token {
            builder.push(" WHERE key > ");
            builder.push_bind(token);
        }
        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<(String, DateTime<Utc>)> =
            builder.build_query_as().fetch_all(&self.db).await?;

        let mut next_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            next_token = rows.last().map(|(key, _)| key.clone());
        }

        Ok(ListPage {
            entries: rows
                .into_iter()
                .map(|(key, last_modified)| ListEntry { key, last_modified })
                .collect(),
            next_token,
        })
    }

    /// `SELECT 1` against SQLite plus a write/read/delete under `base_path`.
    async fn probe(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.db)
            .await?;

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;

        if read_back? != b"readyz" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::{TryStreamExt, stream};
    use tempfile::TempDir;

    pub(crate) async fn open_temp_store() -> (TempDir, LocalObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta.db").display());
        let store = LocalObjectStore::open(&url, dir.path().join("objects"))
            .await
            .unwrap();
        store.migrate().await.unwrap();
        (dir, store)
    }

    pub(crate) fn body_of(chunks: &[&'static str]) -> ByteStream {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok::<_, io::Error>(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    pub(crate) async fn collect(body: ByteStream) -> Vec<u8> {
        body.try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_streams_bytes_and_metadata() {
        let (_dir, store) = open_temp_store().await;
        let mut metadata = Metadata::new();
        metadata.insert("Onetime".into(), "true".into());

        let head = store
            .put(
                "abc123.txt",
                body_of(&["hel", "lo"]),
                metadata,
                Some("text/plain".into()),
            )
            .await
            .unwrap();
        assert_eq!(head.size_bytes, 5);
        assert_eq!(head.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));

        let (head, body) = store.get("abc123.txt").await.unwrap().unwrap();
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(head.metadata.get("Onetime").map(String::as_str), Some("true"));
        assert_eq!(collect(body).await, b"hello");
    }

    #[tokio::test]
    async fn missing_key_is_none_not_error() {
        let (_dir, store) = open_temp_store().await;
        assert!(store.head("nope00").await.unwrap().is_none());
        assert!(store.get("nope00").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = open_temp_store().await;
        store
            .put("gone01", body_of(&["x"]), Metadata::new(), None)
            .await
            .unwrap();

        store.delete("gone01").await.unwrap();
        store.delete("gone01").await.unwrap();
        assert!(store.head("gone01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_stream_leaves_nothing_addressable() {
        let (dir, store) = open_temp_store().await;
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ])
        .boxed();

        let err = store
            .put("broken.bin", body, Metadata::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(store.head("broken.bin").await.unwrap().is_none());

        let shard_dir = store.object_path("broken.bin");
        let leftovers = std::fs::read_dir(shard_dir.parent().unwrap())
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
        drop(dir);
    }

    #[tokio::test]
    async fn list_page_walks_the_key_space_in_order() {
        let (_dir, store) = open_temp_store().await;
        let store = store.with_page_size(2);
        for key in ["e", "a", "c", "b", "d"] {
            store
                .put(key, body_of(&["x"]), Metadata::new(), None)
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut token = None;
        let mut pages = 0;
        loop {
            let page = store.list_page(token).await.unwrap();
            pages += 1;
            seen.extend(page.entries.into_iter().map(|e| e.key));
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (_dir, store) = open_temp_store().await;
        for key in ["", "../etc", "/abs", "a/b", "bad\\key"] {
            assert!(matches!(
                store.head(key).await,
                Err(StorageError::InvalidObjectKey)
            ));
        }
    }

    #[tokio::test]
    async fn probe_succeeds_on_healthy_store() {
        let (_dir, store) = open_temp_store().await;
        store.probe().await.unwrap();
    }
}
