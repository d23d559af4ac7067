//! Pure retention decisions: which class a new object gets, and whether an
//! existing one has outlived it.

use crate::models::retention::{Retention, RetentionRecord};
use chrono::{DateTime, TimeDelta, Utc};

/// Parse an `X-Expiration-Seconds` style value.
///
/// Only a positive integer counts; anything else (missing, empty, `"abc"`,
/// zero, negative) means no TTL was requested.
pub fn parse_requested_ttl(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|secs| *secs > 0)
}

/// Retention for an object being stored at `now`.
pub fn decide_on_ingestion(requested_ttl_seconds: Option<i64>, now: DateTime<Utc>) -> RetentionRecord {
    let retention = match requested_ttl_seconds {
        Some(secs) if secs > 0 => Retention::TimeBounded {
            expires_at: add_seconds(now, secs),
            window_seconds: secs,
        },
        _ => Retention::OneTime,
    };

    RetentionRecord {
        upload_time: now,
        retention,
    }
}

/// Read-path check: only a time-bounded window can lapse.
pub fn window_lapsed(retention: &Retention, now: DateTime<Utc>) -> bool {
    match retention {
        Retention::TimeBounded { expires_at, .. } => now > *expires_at,
        Retention::OneTime => false,
    }
}

/// Full expiry check used by the sweeper.
///
/// Time-bounded objects expire strictly after `expires_at`. One-time objects
/// carry no expiry, but go stale once older than `fallback_max_age_seconds`.
pub fn is_expired(record: &RetentionRecord, now: DateTime<Utc>, fallback_max_age_seconds: i64) -> bool {
    match record.retention {
        Retention::TimeBounded { .. } => window_lapsed(&record.retention, now),
        Retention::OneTime => {
            (now - record.upload_time).num_seconds() > fallback_max_age_seconds
        }
    }
}

fn add_seconds(now: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    TimeDelta::try_seconds(secs)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
