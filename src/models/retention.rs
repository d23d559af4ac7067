//! Retention classes and their encoding in per-object metadata.
//!
//! The four metadata keys below are the whole durable state of an object's
//! lifecycle; nothing else is persisted anywhere.

use super::object::Metadata;
use chrono::{DateTime, SecondsFormat, Utc};

pub const META_UPLOAD_TIME: &str = "Uploadtime";
pub const META_ONE_TIME: &str = "Onetime";
pub const META_EXPIRATION_TIME: &str = "Expirationtime";
pub const META_EXPIRATION_SECONDS: &str = "Expirationseconds";

/// How long an object lives. Fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retention {
    /// Deleted after its first read, or by the sweeper once stale.
    OneTime,
    /// Readable any number of times until `expires_at`.
    TimeBounded {
        expires_at: DateTime<Utc>,
        window_seconds: i64,
    },
}

impl Retention {
    pub fn is_one_time(&self) -> bool {
        matches!(self, Retention::OneTime)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Retention::OneTime => None,
            Retention::TimeBounded { expires_at, .. } => Some(*expires_at),
        }
    }
}

/// Retention plus the upload instant it is measured from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionRecord {
    pub upload_time: DateTime<Utc>,
    pub retention: Retention,
}

impl RetentionRecord {
    /// Encode into the metadata attached to the store `put`.
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(META_UPLOAD_TIME.into(), rfc3339(self.upload_time));

        match self.retention {
            Retention::OneTime => {
                metadata.insert(META_ONE_TIME.into(), "true".into());
            }
            Retention::TimeBounded {
                expires_at,
                window_seconds,
            } => {
                metadata.insert(META_ONE_TIME.into(), "false".into());
                metadata.insert(META_EXPIRATION_TIME.into(), rfc3339(expires_at));
                metadata.insert(META_EXPIRATION_SECONDS.into(), window_seconds.to_string());
            }
        }

        metadata
    }

    /// Decode from stored metadata.
    ///
    /// A valid `Expirationtime` makes the object time-bounded; anything else
    /// is one-time. `fallback_upload_time` (usually the store's last-modified
    /// stamp) stands in for a missing or unreadable `Uploadtime`.
    pub fn from_metadata(metadata: &Metadata, fallback_upload_time: DateTime<Utc>) -> Self {
        let upload_time = metadata
            .get(META_UPLOAD_TIME)
            .and_then(|v| parse_rfc3339(v))
            .unwrap_or(fallback_upload_time);

        let retention = match metadata
            .get(META_EXPIRATION_TIME)
            .and_then(|v| parse_rfc3339(v))
        {
            Some(expires_at) => Retention::TimeBounded {
                expires_at,
                window_seconds: metadata
                    .get(META_EXPIRATION_SECONDS)
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0),
            },
            None => Retention::OneTime,
        };

        Self {
            upload_time,
            retention,
        }
    }
}

pub fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
