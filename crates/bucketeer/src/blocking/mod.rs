//! Sequential client driving the bucket on a private runtime.
//!
//! [`BlockingClient`] owns a current-thread tokio runtime and blocks the
//! calling thread until each operation completes. Batch operations process
//! keys one after another in listing order. The client must not be used
//! from inside an async context.

mod iter;
mod reader;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Runtime};
use url::Url;

pub use self::iter::{BlockingIter, Chunks, ListFiles, ListPages};
use self::reader::InlineReader;
use crate::client::{validate_chunk_size, validate_expiry};
use crate::types::key::{rebase, relative_path};
use crate::{
    BatchReport, Bucket, Error, KeyOutcome, Result, StorageConfig, StorageFacade,
    TRACING_TARGET_BATCH, TRACING_TARGET_CLIENT, UploadOutput,
};

/// Blocking S3 client.
///
/// ```no_run
/// use bucketeer::{BlockingClient, StorageConfig};
///
/// # fn main() -> bucketeer::Result<()> {
/// let client = BlockingClient::connect(StorageConfig::new("reports"))?;
/// for entry in client.ls_files("2024/") {
///     let entry = entry?;
///     println!("{} {}", entry.key, entry.size);
/// }
/// # Ok(())
/// # }
/// ```
pub struct BlockingClient {
    bucket: Bucket,
    runtime: Runtime,
}

impl BlockingClient {
    /// Connects to the endpoint described by `config`.
    pub fn connect(config: StorageConfig) -> Result<Self> {
        Self::from_bucket(Bucket::connect(config)?)
    }

    /// Wraps an existing bucket handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] if the private runtime cannot be started.
    pub fn from_bucket(bucket: Bucket) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;

        tracing::debug!(target: TRACING_TARGET_CLIENT, bucket = bucket.name(), "Blocking client ready");
        Ok(Self { bucket, runtime })
    }

    /// Returns the underlying bucket handle.
    #[inline]
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Uploads the local file at `path` to `key`, or to the file name when
    /// `key` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the key is taken and `overwrite`
    /// is unset.
    pub fn upload_file(&self, path: &Path, key: Option<&str>, overwrite: bool) -> Result<UploadOutput> {
        self.runtime
            .block_on(self.bucket.upload_path(path, key, overwrite))
    }

    /// Uploads everything `reader` yields to `key`, overwriting any existing
    /// object. Payloads above 8 MiB go through a multipart upload.
    pub fn upload_stream<R: Read + Unpin>(&self, reader: R, key: &str) -> Result<UploadOutput> {
        self.runtime
            .block_on(self.bucket.put_reader(key, InlineReader(reader)))
    }

    /// Downloads every object under `prefix` into `destination`, keeping
    /// each key's path relative to the prefix.
    ///
    /// Existing local files are reported as failures unless `overwrite` is
    /// set. Keys that would land outside `destination` are rejected.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_BATCH)]
    pub fn download(&self, prefix: &str, destination: &Path, overwrite: bool) -> Result<BatchReport> {
        let started = Instant::now();
        let keys = self.list_keys(prefix)?;

        let outcomes = keys
            .into_iter()
            .map(|key| match relative_path(prefix, &key) {
                Ok(relative) => {
                    let target = destination.join(relative);
                    let result = self
                        .runtime
                        .block_on(self.bucket.download_to(&key, &target, overwrite))
                        .map(drop);
                    KeyOutcome::new(key, target.display().to_string(), result)
                }
                Err(e) => KeyOutcome::new(key.clone(), key, Err(e)),
            })
            .collect();

        Ok(BatchReport::finish("download", prefix, outcomes, started))
    }

    /// Iterates over the object at `key` in ranges of at most `chunk_size`
    /// bytes, fetched one at a time.
    pub fn download_by_chunks<'a>(&'a self, key: &'a str, chunk_size: u64) -> Result<Chunks<'a>> {
        let chunk_size = validate_chunk_size(chunk_size)?;
        let chunks = self.bucket.chunks(key, chunk_size, 1);
        Ok(BlockingIter::new(&self.runtime, chunks))
    }

    /// Lazily lists the entries whose key starts with `prefix`.
    pub fn ls_files<'a>(&'a self, prefix: &'a str) -> ListFiles<'a> {
        BlockingIter::new(&self.runtime, self.bucket.list(prefix))
    }

    /// Same as [`ls_files`](Self::ls_files), grouped in pages of at most
    /// `page_len` entries.
    pub fn ls_files_paged<'a>(&'a self, prefix: &'a str, page_len: usize) -> ListPages<'a> {
        BlockingIter::new(&self.runtime, self.bucket.list_pages(prefix, page_len))
    }

    /// Copies every object under `prefix` to `destination_prefix`.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_BATCH)]
    pub fn copy(&self, prefix: &str, destination_prefix: &str, overwrite: bool) -> Result<BatchReport> {
        let started = Instant::now();
        let keys = self.list_keys(prefix)?;

        let outcomes = keys
            .into_iter()
            .map(|key| {
                let target = rebase(&key, prefix, destination_prefix);
                let result = self
                    .runtime
                    .block_on(self.bucket.copy(&key, &target, overwrite));
                KeyOutcome::new(key, target, result)
            })
            .collect();

        Ok(BatchReport::finish("copy", prefix, outcomes, started))
    }

    /// Moves every object under `prefix` to `new_prefix`.
    ///
    /// A source is deleted only after its copy succeeded, so failed keys
    /// stay where they were.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_BATCH)]
    pub fn move_objects(&self, prefix: &str, new_prefix: &str, overwrite: bool) -> Result<BatchReport> {
        let started = Instant::now();
        let keys = self.list_keys(prefix)?;

        let outcomes = keys
            .into_iter()
            .map(|key| {
                let target = rebase(&key, prefix, new_prefix);
                let result = self
                    .runtime
                    .block_on(self.bucket.rename(&key, &target, overwrite));
                KeyOutcome::new(key, target, result)
            })
            .collect();

        Ok(BatchReport::finish("move", prefix, outcomes, started))
    }

    /// Deletes every object under `prefix` with bulk delete requests.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_BATCH)]
    pub fn remove(&self, prefix: &str) -> Result<BatchReport> {
        let started = Instant::now();
        let keys = self.list_keys(prefix)?;
        let results = self.runtime.block_on(self.bucket.delete_many(&keys));

        let outcomes = keys
            .into_iter()
            .zip(results)
            .map(|(key, result)| KeyOutcome::new(key.clone(), key, result))
            .collect();

        Ok(BatchReport::finish("remove", prefix, outcomes, started))
    }

    /// Returns whether an object is stored under exactly `key`.
    pub fn check_exist(&self, key: &str) -> Result<bool> {
        self.runtime.block_on(self.bucket.exists(key))
    }

    /// Returns whether any object key starts with `prefix`.
    pub fn prefix_exists(&self, prefix: &str) -> Result<bool> {
        self.runtime.block_on(self.bucket.any(prefix))
    }

    /// Number of objects under `prefix`.
    pub fn count_files(&self, prefix: &str) -> Result<usize> {
        self.runtime.block_on(self.bucket.count(prefix))
    }

    /// Size in bytes of every object under `prefix`, keyed by object key.
    pub fn get_sizes(&self, prefix: &str) -> Result<BTreeMap<String, u64>> {
        self.runtime.block_on(self.bucket.sizes(prefix))
    }

    /// Combined size in bytes of every object under `prefix`.
    pub fn total_size(&self, prefix: &str) -> Result<u64> {
        self.runtime.block_on(self.bucket.total_size(prefix))
    }

    /// Pre-signed GET URL for every object under `prefix`, keyed by object
    /// key.
    ///
    /// # Errors
    ///
    /// Fails on the first key that cannot be signed, with
    /// [`Error::SigningUnsupported`] when the store has no signer and with
    /// [`Error::InvalidRequest`] for an expiry outside `1s ..= 7 days`.
    pub fn get_urls(&self, prefix: &str, expires_in: Duration) -> Result<BTreeMap<String, Url>> {
        validate_expiry(expires_in)?;
        if !self.bucket.can_sign() {
            return Err(Error::SigningUnsupported);
        }

        self.list_keys(prefix)?
            .into_iter()
            .map(|key| {
                self.runtime
                    .block_on(self.bucket.presign(&key, expires_in))
                    .map(|url| (key, url))
            })
            .collect()
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.runtime.block_on(self.bucket.list_keys(prefix))
    }
}

impl StorageFacade for BlockingClient {
    type Chunks<'a> = Chunks<'a>;
    type Listing<'a> = ListFiles<'a>;
    type Output<'a, T>
        = T
    where
        Self: 'a,
        T: 'a;
    type Pages<'a> = ListPages<'a>;
    type Reader<'a> = Box<dyn Read + 'a>;

    fn upload_file<'a>(&'a self, path: &'a Path, key: Option<&'a str>, overwrite: bool) -> Result<UploadOutput> {
        BlockingClient::upload_file(self, path, key, overwrite)
    }

    fn upload_stream<'a>(&'a self, reader: Box<dyn Read + 'a>, key: &'a str) -> Result<UploadOutput> {
        BlockingClient::upload_stream(self, reader, key)
    }

    fn download<'a>(&'a self, prefix: &'a str, destination: &'a Path, overwrite: bool) -> Result<BatchReport> {
        BlockingClient::download(self, prefix, destination, overwrite)
    }

    fn download_by_chunks<'a>(&'a self, key: &'a str, chunk_size: u64) -> Result<Chunks<'a>> {
        BlockingClient::download_by_chunks(self, key, chunk_size)
    }

    fn ls_files<'a>(&'a self, prefix: &'a str) -> ListFiles<'a> {
        BlockingClient::ls_files(self, prefix)
    }

    fn ls_files_paged<'a>(&'a self, prefix: &'a str, page_len: usize) -> ListPages<'a> {
        BlockingClient::ls_files_paged(self, prefix, page_len)
    }

    fn copy<'a>(&'a self, prefix: &'a str, destination_prefix: &'a str, overwrite: bool) -> Result<BatchReport> {
        BlockingClient::copy(self, prefix, destination_prefix, overwrite)
    }

    fn move_objects<'a>(&'a self, prefix: &'a str, new_prefix: &'a str, overwrite: bool) -> Result<BatchReport> {
        BlockingClient::move_objects(self, prefix, new_prefix, overwrite)
    }

    fn remove<'a>(&'a self, prefix: &'a str) -> Result<BatchReport> {
        BlockingClient::remove(self, prefix)
    }

    fn check_exist<'a>(&'a self, key: &'a str) -> Result<bool> {
        BlockingClient::check_exist(self, key)
    }

    fn prefix_exists<'a>(&'a self, prefix: &'a str) -> Result<bool> {
        BlockingClient::prefix_exists(self, prefix)
    }

    fn count_files<'a>(&'a self, prefix: &'a str) -> Result<usize> {
        BlockingClient::count_files(self, prefix)
    }

    fn get_sizes<'a>(&'a self, prefix: &'a str) -> Result<BTreeMap<String, u64>> {
        BlockingClient::get_sizes(self, prefix)
    }

    fn total_size<'a>(&'a self, prefix: &'a str) -> Result<u64> {
        BlockingClient::total_size(self, prefix)
    }

    fn get_urls<'a>(&'a self, prefix: &'a str, expires_in: Duration) -> Result<BTreeMap<String, Url>> {
        BlockingClient::get_urls(self, prefix, expires_in)
    }
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}
