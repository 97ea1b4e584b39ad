//! Convenience re-exports.

pub use crate::blocking::{BlockingClient, Chunks, ListFiles, ListPages};
pub use crate::client::{Bucket, Credentials, StorageConfig};
pub use crate::concurrent::ConcurrentClient;
pub use crate::facade::StorageFacade;
pub use crate::types::{BatchReport, KeyOutcome, ObjectEntry, UploadOutput};
pub use crate::{Error, Result};
