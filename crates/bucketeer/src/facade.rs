//! Capability contract shared by [`BlockingClient`] and [`ConcurrentClient`].
//!
//! [`BlockingClient`]: crate::BlockingClient
//! [`ConcurrentClient`]: crate::ConcurrentClient

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::{BatchReport, Result, UploadOutput};

/// Bucket-scoped convenience operations.
///
/// Both clients expose the same operations with the same semantics; they
/// differ only in how results are delivered. The blocking client returns
/// values and iterators directly, while the concurrent client returns boxed
/// futures and streams. Code generic over the facade works with either
/// client by naming the associated types.
///
/// Batch operations (`download`, `copy`, `move_objects`, `remove`) list the
/// prefix first, then process every listed key. A failing key is recorded in
/// the returned [`BatchReport`] and never stops the rest of the batch.
pub trait StorageFacade {
    /// How results are delivered: `T` itself or a future resolving to `T`.
    type Output<'a, T>
    where
        Self: 'a,
        T: 'a;

    /// Lazy sequence of listing entries.
    type Listing<'a>
    where
        Self: 'a;

    /// Lazy sequence of listing pages.
    type Pages<'a>
    where
        Self: 'a;

    /// Lazy sequence of byte chunks.
    type Chunks<'a>
    where
        Self: 'a;

    /// Source accepted by [`upload_stream`](Self::upload_stream).
    type Reader<'a>
    where
        Self: 'a;

    /// Uploads a local file to `key`, or to the file name when `key` is
    /// `None`. Fails with [`Error::AlreadyExists`](crate::Error::AlreadyExists)
    /// if the key exists and `overwrite` is unset.
    fn upload_file<'a>(
        &'a self,
        path: &'a Path,
        key: Option<&'a str>,
        overwrite: bool,
    ) -> Self::Output<'a, Result<UploadOutput>>;

    /// Uploads everything `reader` yields to `key`, replacing any existing
    /// object.
    fn upload_stream<'a>(
        &'a self,
        reader: Self::Reader<'a>,
        key: &'a str,
    ) -> Self::Output<'a, Result<UploadOutput>>;

    /// Downloads every key under `prefix` into `destination`, keeping the
    /// path relative to the prefix.
    fn download<'a>(
        &'a self,
        prefix: &'a str,
        destination: &'a Path,
        overwrite: bool,
    ) -> Self::Output<'a, Result<BatchReport>>;

    /// Reads `key` as consecutive chunks of at most `chunk_size` bytes.
    ///
    /// A zero `chunk_size` is rejected immediately; store failures surface
    /// as items of the sequence.
    fn download_by_chunks<'a>(&'a self, key: &'a str, chunk_size: u64)
    -> Result<Self::Chunks<'a>>;

    /// Lists every entry whose key starts with `prefix`.
    fn ls_files<'a>(&'a self, prefix: &'a str) -> Self::Listing<'a>;

    /// Lists entries under `prefix` in pages of at most `page_len` entries.
    fn ls_files_paged<'a>(&'a self, prefix: &'a str, page_len: usize) -> Self::Pages<'a>;

    /// Copies every key under `prefix` to `destination_prefix`.
    fn copy<'a>(
        &'a self,
        prefix: &'a str,
        destination_prefix: &'a str,
        overwrite: bool,
    ) -> Self::Output<'a, Result<BatchReport>>;

    /// Moves every key under `prefix` to `new_prefix`.
    ///
    /// A source is deleted only after its copy succeeded.
    fn move_objects<'a>(
        &'a self,
        prefix: &'a str,
        new_prefix: &'a str,
        overwrite: bool,
    ) -> Self::Output<'a, Result<BatchReport>>;

    /// Deletes every key under `prefix`.
    fn remove<'a>(&'a self, prefix: &'a str) -> Self::Output<'a, Result<BatchReport>>;

    /// Returns whether an object exists at exactly `key`.
    fn check_exist<'a>(&'a self, key: &'a str) -> Self::Output<'a, Result<bool>>;

    /// Returns whether at least one object lives under `prefix`.
    fn prefix_exists<'a>(&'a self, prefix: &'a str) -> Self::Output<'a, Result<bool>>;

    /// Number of objects under `prefix`.
    fn count_files<'a>(&'a self, prefix: &'a str) -> Self::Output<'a, Result<usize>>;

    /// Size in bytes of every object under `prefix`.
    fn get_sizes<'a>(&'a self, prefix: &'a str)
    -> Self::Output<'a, Result<BTreeMap<String, u64>>>;

    /// Combined size in bytes of every object under `prefix`.
    fn total_size<'a>(&'a self, prefix: &'a str) -> Self::Output<'a, Result<u64>>;

    /// Pre-signed GET URL for every key under `prefix`, keyed by object key.
    fn get_urls<'a>(
        &'a self,
        prefix: &'a str,
        expires_in: Duration,
    ) -> Self::Output<'a, Result<BTreeMap<String, Url>>>;
}
