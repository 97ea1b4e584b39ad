//! Connection settings and the bucket handle shared by both clients.

mod bucket;
mod config;
mod credentials;

pub use bucket::{Bucket, MAX_PRESIGN_EXPIRY, MULTIPART_THRESHOLD, chunk_ranges};
pub(crate) use bucket::{validate_chunk_size, validate_expiry};
pub use config::StorageConfig;
pub use credentials::Credentials;
