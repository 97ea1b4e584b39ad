//! Async client fanning per-key calls out to bounded tokio tasks.

mod fanout;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use tokio::io::AsyncRead;
use tokio::sync::Semaphore;
use url::Url;

use self::fanout::fan_out;
use crate::client::{validate_chunk_size, validate_expiry};
use crate::types::key::{rebase, relative_path};
use crate::{
    BatchReport, Bucket, Error, KeyOutcome, ObjectEntry, Result, StorageConfig, StorageFacade,
    TRACING_TARGET_BATCH, TRACING_TARGET_CLIENT, UploadOutput,
};

/// Concurrent S3 client.
///
/// Cheap to clone: clones share the bucket handle and the concurrency
/// limit. Batch operations spawn one task per listed key on the caller's
/// runtime, keep at most `max_concurrency` of them in flight and return
/// outcomes in listing order.
///
/// ```no_run
/// use bucketeer::{ConcurrentClient, StorageConfig};
///
/// # async fn run() -> bucketeer::Result<()> {
/// let client = ConcurrentClient::connect(StorageConfig::new("reports"))?;
/// let report = client.copy("2024/", "archive/2024/", false).await?;
/// println!("copied {} of {} keys", report.len() - report.failed_count(), report.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConcurrentClient {
    bucket: Bucket,
    limiter: Arc<Semaphore>,
    max_concurrency: usize,
}

/// One listed key, its target and the call producing its outcome.
struct Job {
    key: String,
    target: String,
    work: BoxFuture<'static, Result<()>>,
}

impl ConcurrentClient {
    /// Connects to the endpoint described by `config`.
    pub fn connect(config: StorageConfig) -> Result<Self> {
        Ok(Self::from_bucket(Bucket::connect(config)?))
    }

    /// Wraps an existing bucket handle, using its configured concurrency
    /// limit.
    pub fn from_bucket(bucket: Bucket) -> Self {
        let max_concurrency = bucket.config().max_concurrency.max(1);
        tracing::debug!(
            target: TRACING_TARGET_CLIENT,
            bucket = bucket.name(),
            max_concurrency,
            "Concurrent client ready"
        );

        Self {
            bucket,
            limiter: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// Replaces the limit on in-flight per-key calls.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self.limiter = Arc::new(Semaphore::new(self.max_concurrency));
        self
    }

    /// Returns the underlying bucket handle.
    #[inline]
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Returns the limit on in-flight per-key calls.
    #[inline]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Uploads the local file at `path` to `key`, or to the file name when
    /// `key` is `None`. An existing key is left alone unless `overwrite` is
    /// set.
    pub async fn upload_file(
        &self,
        path: &Path,
        key: Option<&str>,
        overwrite: bool,
    ) -> Result<UploadOutput> {
        self.bucket.upload_path(path, key, overwrite).await
    }

    /// Uploads everything `reader` yields, switching to a multipart upload
    /// for large content.
    pub async fn upload_stream<R>(&self, reader: R, key: &str) -> Result<UploadOutput>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.bucket.put_reader(key, reader).await
    }

    /// Downloads every object under `prefix` into `destination`, one task
    /// per key, keeping each key's path relative to the prefix.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_BATCH)]
    pub async fn download(
        &self,
        prefix: &str,
        destination: &Path,
        overwrite: bool,
    ) -> Result<BatchReport> {
        let started = Instant::now();
        let keys = self.bucket.list_keys(prefix).await?;

        let jobs = keys
            .into_iter()
            .map(|key| match relative_path(prefix, &key) {
                Ok(relative) => {
                    let path = destination.join(relative);
                    let bucket = self.bucket.clone();
                    let source = key.clone();
                    let target = path.display().to_string();
                    let work = async move {
                        bucket.download_to(&source, &path, overwrite).await.map(drop)
                    };
                    Job { key, target, work: work.boxed() }
                }
                Err(e) => Job {
                    target: key.clone(),
                    key,
                    work: future::ready(Err(e)).boxed(),
                },
            })
            .collect();

        Ok(self.run("download", prefix, jobs, started).await)
    }

    /// Streams the object at `key` in ranges of at most `chunk_size` bytes.
    ///
    /// Up to `max_concurrency` ranges are fetched at once and yielded in
    /// order.
    pub fn download_by_chunks<'a>(
        &'a self,
        key: &'a str,
        chunk_size: u64,
    ) -> Result<BoxStream<'a, Result<Bytes>>> {
        let chunk_size = validate_chunk_size(chunk_size)?;
        Ok(self.bucket.chunks(key, chunk_size, self.max_concurrency))
    }

    /// Lazily lists the entries whose key starts with `prefix`.
    pub fn ls_files<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectEntry>> {
        self.bucket.list(prefix)
    }

    /// Lists like [`ls_files`](Self::ls_files) in pages of at most
    /// `page_len` entries.
    pub fn ls_files_paged<'a>(
        &'a self,
        prefix: &'a str,
        page_len: usize,
    ) -> BoxStream<'a, Result<Vec<ObjectEntry>>> {
        self.bucket.list_pages(prefix, page_len)
    }

    /// Copies every object under `prefix` to `destination_prefix`.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_BATCH)]
    pub async fn copy(
        &self,
        prefix: &str,
        destination_prefix: &str,
        overwrite: bool,
    ) -> Result<BatchReport> {
        let started = Instant::now();
        let keys = self.bucket.list_keys(prefix).await?;

        let jobs = keys
            .into_iter()
            .map(|key| {
                let target = rebase(&key, prefix, destination_prefix);
                let bucket = self.bucket.clone();
                let (source, destination) = (key.clone(), target.clone());
                let work = async move { bucket.copy(&source, &destination, overwrite).await };
                Job { key, target, work: work.boxed() }
            })
            .collect();

        Ok(self.run("copy", prefix, jobs, started).await)
    }

    /// Moves every key under `prefix` to `new_prefix`.
    ///
    /// Each task copies its key and deletes the source only once the copy
    /// succeeded.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_BATCH)]
    pub async fn move_objects(
        &self,
        prefix: &str,
        new_prefix: &str,
        overwrite: bool,
    ) -> Result<BatchReport> {
        let started = Instant::now();
        let keys = self.bucket.list_keys(prefix).await?;

        let jobs = keys
            .into_iter()
            .map(|key| {
                let target = rebase(&key, prefix, new_prefix);
                let bucket = self.bucket.clone();
                let (source, destination) = (key.clone(), target.clone());
                let work = async move { bucket.rename(&source, &destination, overwrite).await };
                Job { key, target, work: work.boxed() }
            })
            .collect();

        Ok(self.run("move", prefix, jobs, started).await)
    }

    /// Deletes every object under `prefix`.
    ///
    /// Keys go out in bulk delete requests, which the store already runs
    /// concurrently, so no per-key tasks are spawned.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_BATCH)]
    pub async fn remove(&self, prefix: &str) -> Result<BatchReport> {
        let started = Instant::now();
        let keys = self.bucket.list_keys(prefix).await?;
        let results = self.bucket.delete_many(&keys).await;

        let outcomes = keys
            .into_iter()
            .zip(results)
            .map(|(key, result)| KeyOutcome::new(key.clone(), key, result))
            .collect();

        Ok(BatchReport::finish("remove", prefix, outcomes, started))
    }

    /// Returns whether an object is stored under exactly `key`.
    pub async fn check_exist(&self, key: &str) -> Result<bool> {
        self.bucket.exists(key).await
    }

    /// Returns whether any object key starts with `prefix`.
    pub async fn prefix_exists(&self, prefix: &str) -> Result<bool> {
        self.bucket.any(prefix).await
    }

    /// Number of objects under `prefix`.
    pub async fn count_files(&self, prefix: &str) -> Result<usize> {
        self.bucket.count(prefix).await
    }

    /// Size in bytes of every object under `prefix`, keyed by object key.
    pub async fn get_sizes(&self, prefix: &str) -> Result<BTreeMap<String, u64>> {
        self.bucket.sizes(prefix).await
    }

    /// Combined size in bytes of every object under `prefix`.
    pub async fn total_size(&self, prefix: &str) -> Result<u64> {
        self.bucket.total_size(prefix).await
    }

    /// Pre-signs every key under `prefix` concurrently and maps each key to
    /// its URL.
    ///
    /// Unlike the batch operations, the first failure in listing order is
    /// returned as the error of the whole call.
    pub async fn get_urls(
        &self,
        prefix: &str,
        expires_in: Duration,
    ) -> Result<BTreeMap<String, Url>> {
        validate_expiry(expires_in)?;
        if !self.bucket.can_sign() {
            return Err(Error::SigningUnsupported);
        }

        let work = self
            .bucket
            .list_keys(prefix)
            .await?
            .into_iter()
            .map(|key| {
                let bucket = self.bucket.clone();
                async move { bucket.presign(&key, expires_in).await.map(|url| (key, url)) }.boxed()
            })
            .collect();

        fan_out(&self.limiter, work).await.into_iter().collect()
    }

    async fn run(
        &self,
        operation: &'static str,
        prefix: &str,
        jobs: Vec<Job>,
        started: Instant,
    ) -> BatchReport {
        let (plan, work): (Vec<_>, Vec<_>) = jobs
            .into_iter()
            .map(|job| ((job.key, job.target), job.work))
            .unzip();

        let outcomes = plan
            .into_iter()
            .zip(fan_out(&self.limiter, work).await)
            .map(|((key, target), result)| KeyOutcome::new(key, target, result))
            .collect();

        BatchReport::finish(operation, prefix, outcomes, started)
    }
}

impl StorageFacade for ConcurrentClient {
    type Chunks<'a> = BoxStream<'a, Result<Bytes>>;
    type Listing<'a> = BoxStream<'a, Result<ObjectEntry>>;
    type Output<'a, T>
        = BoxFuture<'a, T>
    where
        Self: 'a,
        T: 'a;
    type Pages<'a> = BoxStream<'a, Result<Vec<ObjectEntry>>>;
    type Reader<'a> = Box<dyn AsyncRead + Send + Unpin + 'a>;

    fn upload_file<'a>(
        &'a self,
        path: &'a Path,
        key: Option<&'a str>,
        overwrite: bool,
    ) -> BoxFuture<'a, Result<UploadOutput>> {
        ConcurrentClient::upload_file(self, path, key, overwrite).boxed()
    }

    fn upload_stream<'a>(
        &'a self,
        reader: Box<dyn AsyncRead + Send + Unpin + 'a>,
        key: &'a str,
    ) -> BoxFuture<'a, Result<UploadOutput>> {
        ConcurrentClient::upload_stream(self, reader, key).boxed()
    }

    fn download<'a>(
        &'a self,
        prefix: &'a str,
        destination: &'a Path,
        overwrite: bool,
    ) -> BoxFuture<'a, Result<BatchReport>> {
        ConcurrentClient::download(self, prefix, destination, overwrite).boxed()
    }

    fn download_by_chunks<'a>(
        &'a self,
        key: &'a str,
        chunk_size: u64,
    ) -> Result<BoxStream<'a, Result<Bytes>>> {
        ConcurrentClient::download_by_chunks(self, key, chunk_size)
    }

    fn ls_files<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectEntry>> {
        ConcurrentClient::ls_files(self, prefix)
    }

    fn ls_files_paged<'a>(
        &'a self,
        prefix: &'a str,
        page_len: usize,
    ) -> BoxStream<'a, Result<Vec<ObjectEntry>>> {
        ConcurrentClient::ls_files_paged(self, prefix, page_len)
    }

    fn copy<'a>(
        &'a self,
        prefix: &'a str,
        destination_prefix: &'a str,
        overwrite: bool,
    ) -> BoxFuture<'a, Result<BatchReport>> {
        ConcurrentClient::copy(self, prefix, destination_prefix, overwrite).boxed()
    }

    fn move_objects<'a>(
        &'a self,
        prefix: &'a str,
        new_prefix: &'a str,
        overwrite: bool,
    ) -> BoxFuture<'a, Result<BatchReport>> {
        ConcurrentClient::move_objects(self, prefix, new_prefix, overwrite).boxed()
    }

    fn remove<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<BatchReport>> {
        ConcurrentClient::remove(self, prefix).boxed()
    }

    fn check_exist<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        ConcurrentClient::check_exist(self, key).boxed()
    }

    fn prefix_exists<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<bool>> {
        ConcurrentClient::prefix_exists(self, prefix).boxed()
    }

    fn count_files<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<usize>> {
        ConcurrentClient::count_files(self, prefix).boxed()
    }

    fn get_sizes<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<BTreeMap<String, u64>>> {
        ConcurrentClient::get_sizes(self, prefix).boxed()
    }

    fn total_size<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<u64>> {
        ConcurrentClient::total_size(self, prefix).boxed()
    }

    fn get_urls<'a>(
        &'a self,
        prefix: &'a str,
        expires_in: Duration,
    ) -> BoxFuture<'a, Result<BTreeMap<String, Url>>> {
        ConcurrentClient::get_urls(self, prefix, expires_in).boxed()
    }
}

impl std::fmt::Debug for ConcurrentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentClient")
            .field("bucket", &self.bucket)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use object_store::memory::InMemory;

    use super::*;
    use crate::BlockingClient;
    use crate::testing::{memory_bucket, seed};

    fn client() -> ConcurrentClient {
        ConcurrentClient::from_bucket(memory_bucket())
    }

    #[tokio::test]
    async fn check_exist_after_upload() {
        let client = client();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        tokio::fs::write(&path, "# notes").await.unwrap();

        assert!(!client.check_exist("notes.md").await.unwrap());
        let output = client.upload_file(&path, None, false).await.unwrap();
        assert_eq!(output.key, "notes.md");
        assert!(client.check_exist("notes.md").await.unwrap());
    }

    #[tokio::test]
    async fn count_matches_listing() {
        let client = client();
        seed(client.bucket(), "logs/", 9).await;

        let listed: Vec<ObjectEntry> = client.ls_files("logs/").try_collect().await.unwrap();
        assert_eq!(listed.len(), 9);
        assert_eq!(client.count_files("logs/").await.unwrap(), listed.len());
    }

    #[tokio::test]
    async fn sizes_sum_to_payloads() {
        let client = client();
        let total = seed(client.bucket(), "data/", 6).await;

        let sizes = client.get_sizes("data/").await.unwrap();
        assert_eq!(sizes.values().sum::<u64>(), total);
        assert_eq!(client.total_size("data/").await.unwrap(), total);
    }

    #[tokio::test]
    async fn move_leaves_nothing_behind() {
        let client = client().with_max_concurrency(3);
        seed(client.bucket(), "inbox/", 10).await;

        let report = client.move_objects("inbox/", "archive/", false).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.len(), 10);
        assert_eq!(client.count_files("archive/").await.unwrap(), 10);
        assert_eq!(client.count_files("inbox/").await.unwrap(), 0);
        assert!(!client.prefix_exists("inbox/").await.unwrap());
    }

    #[tokio::test]
    async fn move_keeps_sources_that_failed_to_copy() {
        let client = client();
        seed(client.bucket(), "in/", 4).await;
        client
            .upload_stream(&b"taken"[..], "out/3.txt")
            .await
            .unwrap();

        let report = client.move_objects("in/", "out/", false).await.unwrap();
        let failed: Vec<&str> = report.failures().map(|o| o.key.as_str()).collect();
        assert_eq!(failed, vec!["in/3.txt"]);
        assert!(client.check_exist("in/3.txt").await.unwrap());
        assert_eq!(client.count_files("in/").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn copy_reports_listing_order() {
        let client = client();
        seed(client.bucket(), "a/", 5).await;

        let report = client.copy("a/", "b/", false).await.unwrap();
        let targets = report.into_result().unwrap();
        assert_eq!(
            targets,
            vec!["b/0.txt", "b/1.txt", "b/2.txt", "b/3.txt", "b/4.txt"]
        );

        let report = client.copy("a/", "b/", false).await.unwrap();
        assert_eq!(report.failed_count(), 5);
        let report = client.copy("a/", "b/", true).await.unwrap();
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn download_and_remove() {
        let client = client();
        seed(client.bucket(), "exports/", 3).await;

        let dir = tempfile::tempdir().unwrap();
        let report = client
            .download("exports/", dir.path(), false)
            .await
            .unwrap();
        assert!(report.is_complete());
        let local = tokio::fs::read_to_string(dir.path().join("1.txt")).await.unwrap();
        assert_eq!(local, "payload number 1");

        let report = client.remove("exports/").await.unwrap();
        assert_eq!(report.len(), 3);
        assert!(report.is_complete());
        assert!(!client.prefix_exists("exports/").await.unwrap());
    }

    #[tokio::test]
    async fn chunks_are_ordered() {
        let client = client();
        let body: Vec<u8> = (0..100u8).collect();
        client.upload_stream(&body[..], "blob").await.unwrap();

        let chunks: Vec<Bytes> = client
            .download_by_chunks("blob", 7)
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 15);
        assert_eq!(chunks.concat(), body);

        assert!(client.download_by_chunks("blob", 0).is_err());
    }

    #[tokio::test]
    async fn urls_fail_fast_without_signer() {
        let client = ConcurrentClient::from_bucket(Bucket::from_store("test-bucket", InMemory::new()));
        let err = client
            .get_urls("", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SigningUnsupported));

        let client = self::client();
        seed(client.bucket(), "u/", 3).await;
        let urls = client.get_urls("u/", Duration::from_secs(30)).await.unwrap();
        assert_eq!(urls.len(), 3);
        assert!(urls["u/1.txt"].path().ends_with("u/1.txt"));
        assert!(urls["u/2.txt"].as_str().contains("expires=30"));
    }

    #[tokio::test]
    async fn batches_keep_special_characters() {
        let client = client();
        let keys = ["docs/50%.txt", "docs/a[2].txt", "docs/plain.txt", "docs/report#1.txt"];
        for key in keys {
            client.upload_stream(key.as_bytes(), key).await.unwrap();
        }

        let listed: Vec<String> = client
            .ls_files("docs/")
            .map_ok(|entry| entry.key)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(listed, keys);
        assert_eq!(client.count_files("docs/report#").await.unwrap(), 1);

        let report = client.copy("docs/", "copy/", false).await.unwrap();
        assert!(report.is_complete());
        let report = client.move_objects("copy/", "moved/", false).await.unwrap();
        assert!(report.is_complete());
        assert!(client.check_exist("moved/report#1.txt").await.unwrap());
        assert!(!client.prefix_exists("copy/").await.unwrap());

        let urls = client.get_urls("moved/", Duration::from_secs(30)).await.unwrap();
        assert!(urls.contains_key("moved/50%.txt"));

        let report = client.remove("").await.unwrap();
        assert_eq!(report.len(), 8);
        assert!(report.is_complete());
        assert_eq!(client.count_files("").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn facade_returns_futures() {
        let client = client();
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(&b"boxed"[..]);
        let output = StorageFacade::upload_stream(&client, reader, "f/boxed.txt")
            .await
            .unwrap();
        assert_eq!(output.size, 5);
        assert_eq!(StorageFacade::count_files(&client, "f/").await.unwrap(), 1);
    }

    #[test]
    fn matches_blocking_client() {
        let bucket = memory_bucket();
        let blocking = BlockingClient::from_bucket(bucket.clone()).unwrap();
        for index in 0..10 {
            let body = format!("object {index} {}", "x".repeat(index));
            blocking
                .upload_stream(body.as_bytes(), &format!("same/{index:02}.txt"))
                .unwrap();
        }

        let blocking_entries = blocking
            .ls_files("same/")
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let blocking_count = blocking.count_files("same/").unwrap();
        let blocking_sizes = blocking.get_sizes("same/").unwrap();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let concurrent = ConcurrentClient::from_bucket(bucket);
        let (entries, count, sizes) = runtime.block_on(async {
            let entries: Vec<ObjectEntry> = concurrent.ls_files("same/").try_collect().await.unwrap();
            let count = concurrent.count_files("same/").await.unwrap();
            let sizes = concurrent.get_sizes("same/").await.unwrap();
            (entries, count, sizes)
        });

        assert_eq!(blocking_entries, entries);
        assert_eq!(blocking_count, count);
        assert_eq!(blocking_count, 10);
        assert_eq!(blocking_sizes, sizes);
    }
}
