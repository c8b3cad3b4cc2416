//! Content hashing for change detection.
//!
//! A layer's fingerprint is the SHA256 of its serialized remote payload
//! followed by its data timestamp. It is only ever compared for equality
//! with the hash remembered on the server.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::LayerPayload;

/// Compute a SHA256 hash of a serializable value.
///
/// The value is first serialized to JSON, then hashed. A value that
/// cannot be serialized hashes as the empty string.
#[must_use]
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_string(value).unwrap_or_default();
    digest_hex(json.as_bytes())
}

/// Fingerprint of a layer payload plus its external-data timestamp.
///
/// The payload must be built without a datasource id: datasource ids are
/// only resolved while publishing.
#[must_use]
pub fn fingerprint(payload: &LayerPayload, data_timestamp: i64) -> String {
    let json = serde_json::to_string(payload).unwrap_or_default();
    digest_hex(format!("{json}datasource_timestamp:{data_timestamp}").as_bytes())
}

/// Check if an entity has changed since it was last published.
///
/// Returns `true` if there is no stored hash or it differs.
#[must_use]
pub fn has_changed(current_hash: &str, stored_hash: Option<&str>) -> bool {
    stored_hash.is_none_or(|h| h != current_hash)
}

fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
