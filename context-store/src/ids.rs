//! Identifier, timestamp, and digest helpers.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Prefix for the synthetic keys of file-cache entries.
pub const FILE_CACHE_PREFIX: &str = "file_cache:";

/// Generate a fresh opaque identifier.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time, truncated to millisecond precision.
///
/// Both backends persist millisecond timestamps, so every timestamp is
/// created at that precision to keep their results identical.
pub fn now() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

/// Drop sub-millisecond precision from a timestamp.
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Rebuild a timestamp from stored epoch milliseconds.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// SHA-256 digest of `content`, hex encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Synthetic context-item key for a cached file path.
pub fn file_cache_key(path: &str) -> String {
    format!("{FILE_CACHE_PREFIX}{path}")
}
