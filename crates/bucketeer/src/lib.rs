#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging
pub const TRACING_TARGET_CLIENT: &str = "bucketeer::client";
pub const TRACING_TARGET_OBJECTS: &str = "bucketeer::objects";
pub const TRACING_TARGET_BATCH: &str = "bucketeer::batch";

pub mod blocking;
pub mod client;
pub mod concurrent;
mod error;
mod facade;
pub mod types;

#[cfg(test)]
mod testing;

#[doc(hidden)]
pub mod prelude;

pub use crate::blocking::BlockingClient;
pub use crate::client::{Bucket, Credentials, StorageConfig};
pub use crate::concurrent::ConcurrentClient;
pub use crate::error::{Error, Result};
pub use crate::facade::StorageFacade;
pub use crate::types::{BatchReport, KeyOutcome, ObjectEntry, UploadOutput};
