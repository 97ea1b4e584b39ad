//! Listing entries produced by prefix listings.

use jiff::Timestamp;
use object_store::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Read-only projection of an object returned by a listing.
///
/// Entries are recomputed on every call and never cached by the clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Object key within the bucket.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modified timestamp.
    pub last_modified: Timestamp,
    /// ETag of the object, if the store reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    /// Object version, if the bucket is versioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl From<ObjectMeta> for ObjectEntry {
    fn from(meta: ObjectMeta) -> Self {
        let last_modified = Timestamp::new(
            meta.last_modified.timestamp(),
            meta.last_modified.timestamp_subsec_nanos() as i32,
        )
        .unwrap_or(Timestamp::UNIX_EPOCH);

        Self {
            key: meta.location.to_string(),
            size: meta.size,
            last_modified,
            e_tag: meta.e_tag,
            version: meta.version,
        }
    }
}
