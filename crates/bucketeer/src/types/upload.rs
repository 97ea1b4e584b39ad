//! Result type for uploads.

use object_store::PutResult;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutput {
    /// Key the content was written to.
    pub key: String,
    /// Number of bytes written.
    pub size: u64,
    /// Unique identifier for the newly created object, if the backend provides one.
    pub e_tag: Option<String>,
    /// A version indicator for the newly created object, if the backend provides one.
    pub version: Option<String>,
}

impl UploadOutput {
    pub(crate) fn new(key: impl Into<String>, size: u64, result: PutResult) -> Self {
        Self {
            key: key.into(),
            size,
            e_tag: result.e_tag,
            version: result.version,
        }
    }
}
