//! Ingestion and consumption paths of the object lifecycle.
//!
//! Nothing about an object is held in process: every read re-fetches its
//! metadata and re-derives its retention from it.
//!
//! Concurrent reads of the same one-time key are not serialized. Two readers
//! can both pass the expiry check and both be served before the first delete
//! lands; the store offers no compare-and-delete. What holds is "at least one
//! read succeeds, and the object is eventually deleted".

use crate::{
    config::LifecycleSettings,
    models::{
        object::ByteStream,
        retention::{META_EXPIRATION_TIME, Retention, RetentionRecord, rfc3339},
    },
    services::{
        object_store::{ObjectStore, StorageError},
        reclaimer::Reclaimer,
        retention_policy::{decide_on_ingestion, parse_requested_ttl, window_lapsed},
        short_link::ShortLinkClient,
    },
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rand::Rng;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use thiserror::Error;
use tracing::{error, info, warn};

const KEY_LEN: usize = 6;
const KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const RAW_TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("upload exceeds the maximum size of {limit} bytes")]
    CapacityExceeded { limit: u64 },
    #[error("object not found")]
    NotFound,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// One inbound upload.
pub struct IngestRequest {
    pub body: ByteStream,
    /// `Content-Length`, when the client sent one.
    pub declared_length: Option<u64>,
    pub content_type: Option<String>,
    /// Raw `X-Expiration-Seconds` value; malformed means absent.
    pub requested_ttl: Option<String>,
    /// Raw text submission: forces `text/plain` and a `.txt` key.
    pub raw_text: bool,
    pub force_short_link: bool,
    /// `scheme://host` the object will be reachable under.
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub key: String,
    /// Full URL, or its shortened form when one was obtained.
    pub url: String,
    pub retention: Retention,
}

/// A readable object, ready to be streamed.
pub struct ServedObject {
    pub key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub etag: Option<String>,
    pub retention: Retention,
    /// Stored `Expirationtime`, verbatim, for time-bounded objects.
    pub expiration_time: Option<String>,
    /// For one-time objects, dropping this stream queues the delete.
    pub body: ByteStream,
}

pub struct ObjectLifecycle {
    store: Arc<dyn ObjectStore>,
    settings: LifecycleSettings,
    reclaimer: Reclaimer,
    short_links: Option<ShortLinkClient>,
}

impl ObjectLifecycle {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        settings: LifecycleSettings,
        reclaimer: Reclaimer,
        short_links: Option<ShortLinkClient>,
    ) -> Self {
        Self {
            store,
            settings,
            reclaimer,
            short_links,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    pub async fn ingest(&self, request: IngestRequest) -> LifecycleResult<IngestOutcome> {
        self.ingest_at(request, Utc::now()).await
    }

    /// Store one upload as a new object created at `now`.
    ///
    /// Oversized uploads are refused before any byte reaches the store when
    /// the length is declared, and cut off mid-stream otherwise. Either way
    /// no key is created.
    pub async fn ingest_at(
        &self,
        request: IngestRequest,
        now: DateTime<Utc>,
    ) -> LifecycleResult<IngestOutcome> {
        let limit = self.settings.max_upload_size;
        if request.declared_length.is_some_and(|len| len > limit) {
            return Err(LifecycleError::CapacityExceeded { limit });
        }

        let (content_type, extension) = if request.raw_text {
            (RAW_TEXT_CONTENT_TYPE.to_string(), ".txt".to_string())
        } else {
            let content_type = request
                .content_type
                .filter(|ct| !ct.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            let extension = extension_for(&content_type);
            (content_type, extension)
        };
        let key = format!("{}{}", generate_key(), extension);

        let ttl = parse_requested_ttl(request.requested_ttl.as_deref())
            .map(|secs| self.cap_ttl(secs));
        let record = decide_on_ingestion(ttl, now);

        let overflowed = Arc::new(AtomicBool::new(false));
        let body = limit_stream(request.body, limit, overflowed.clone());

        if let Err(err) = self
            .store
            .put(&key, body, record.to_metadata(), Some(content_type.clone()))
            .await
        {
            if overflowed.load(Ordering::SeqCst) {
                return Err(LifecycleError::CapacityExceeded { limit });
            }
            error!("upload of {} failed: {}", key, err);
            return Err(LifecycleError::Storage(err));
        }

        let mut url = format!("{}/{}", request.base_url.trim_end_matches('/'), key);
        if request.force_short_link || self.settings.enable_short_url {
            if let Some(client) = &self.short_links {
                match client.shorten(&url).await {
                    Ok(short) => {
                        info!("generated short URL {} for {}", short, key);
                        url = short;
                    }
                    Err(err) => warn!("failed to generate short URL for {}: {}", key, err),
                }
            }
        }

        match record.retention.expires_at() {
            Some(expires_at) => info!(
                "stored {} ({}), readable until {}",
                key,
                content_type,
                rfc3339(expires_at)
            ),
            None => info!("stored {} ({}), one-time", key, content_type),
        }

        Ok(IngestOutcome {
            key,
            url,
            retention: record.retention,
        })
    }

    pub async fn fetch(&self, key: &str) -> LifecycleResult<ServedObject> {
        self.fetch_at(key, Utc::now()).await
    }

    /// Locate, check expiry, and open `key` for serving as of `now`.
    ///
    /// A lapsed time-bounded object is deleted on the spot and reported as
    /// missing, exactly like a key that never existed.
    pub async fn fetch_at(&self, key: &str, now: DateTime<Utc>) -> LifecycleResult<ServedObject> {
        let head = match self.store.head(key).await {
            Ok(Some(head)) => head,
            Ok(None) | Err(StorageError::InvalidObjectKey) => {
                return Err(LifecycleError::NotFound);
            }
            Err(err) => return Err(err.into()),
        };

        let record = RetentionRecord::from_metadata(&head.metadata, head.last_modified);
        if window_lapsed(&record.retention, now) {
            match self.store.delete(key).await {
                Ok(()) => info!("[lazy expiry] deleted expired object {}", key),
                Err(err) => warn!("[lazy expiry] failed to delete {}: {}", key, err),
            }
            return Err(LifecycleError::NotFound);
        }

        let Some((_, body)) = self.store.get(key).await? else {
            return Err(LifecycleError::NotFound);
        };

        let content_type = mime_guess::from_path(key)
            .first()
            .map(|mime| served_content_type(&mime))
            .or_else(|| head.content_type.clone())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let body = match record.retention {
            Retention::OneTime => {
                let guard = self.reclaimer.guard(key.to_string());
                body.map(move |chunk| {
                    let _keep = &guard;
                    chunk
                })
                .boxed()
            }
            Retention::TimeBounded { .. } => body,
        };

        info!(
            "serving {} (one_time={})",
            key,
            record.retention.is_one_time()
        );

        Ok(ServedObject {
            key: key.to_string(),
            content_type,
            size_bytes: head.size_bytes,
            etag: head.etag.clone(),
            retention: record.retention,
            expiration_time: head.metadata.get(META_EXPIRATION_TIME).cloned(),
            body,
        })
    }

    fn cap_ttl(&self, secs: i64) -> i64 {
        let max = self.settings.max_age_for_multi_download;
        if !self.settings.allow_lifetime_over_max_age && max > 0 && secs > max {
            max
        } else {
            secs
        }
    }
}

/// Six random lowercase alphanumerics. No collision check is made.
pub fn generate_key() -> String {
    let mut rng = rand::rng();
    (0..KEY_LEN)
        .map(|_| KEY_ALPHABET[rng.random_range(0..KEY_ALPHABET.len())] as char)
        .collect()
}

/// Filename extension (with the dot) for a declared content type.
pub fn extension_for(content_type: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let preferred = match essence.as_str() {
        "" | DEFAULT_CONTENT_TYPE => return String::new(),
        "text/plain" => Some("txt"),
        "text/html" => Some("html"),
        "text/css" => Some("css"),
        "text/csv" => Some("csv"),
        "application/json" => Some("json"),
        "application/pdf" => Some("pdf"),
        "application/zip" => Some("zip"),
        "application/gzip" | "application/x-gzip" => Some("gz"),
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "audio/mpeg" => Some("mp3"),
        _ => None,
    };

    preferred
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&essence).and_then(|exts| exts.first().copied())
        })
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

/// Text types keep an explicit UTF-8 charset, matching how raw text is stored.
fn served_content_type(mime: &mime_guess::Mime) -> String {
    if mime.type_() == mime_guess::mime::TEXT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_string()
    }
}

/// Pass `body` through, failing it once more than `limit` bytes went by.
fn limit_stream(body: ByteStream, limit: u64, overflowed: Arc<AtomicBool>) -> ByteStream {
    let mut seen: u64 = 0;
    body.map(move |chunk| {
        let chunk = chunk?;
        seen += chunk.len() as u64;
        if seen > limit {
            overflowed.store(true, Ordering::SeqCst);
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "upload exceeds maximum size",
            ));
        }
        Ok(chunk)
    })
    .boxed()
}
