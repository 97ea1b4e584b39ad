//! Bucket-scoped handle over [`object_store::ObjectStore`].
//!
//! [`Bucket`] is a thin, cloneable wrapper around `Arc<dyn ObjectStore>`
//! that owns every per-key call issued by the clients. Async calls are
//! instrumented with [`tracing`]; streams are left to their consumers.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::num::NonZeroU64;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, TryChunksError};
use futures::{StreamExt, TryStreamExt, future, stream};
use http::Method;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use object_store::signer::Signer;
use object_store::{ClientOptions, ObjectStore, PutPayload, WriteMultipart};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use url::Url;

use super::StorageConfig;
use crate::types::key::{ListingScope, store_path};
use crate::types::{ObjectEntry, UploadOutput};
use crate::{Error, Result, TRACING_TARGET_CLIENT, TRACING_TARGET_OBJECTS};

/// Payloads above this size are sent with a multipart upload.
pub const MULTIPART_THRESHOLD: usize = 8 * 1024 * 1024;

/// Longest expiry S3 accepts for a pre-signed URL.
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Cloneable, bucket-scoped handle to an object store.
///
/// All methods accept plain string keys and hand them to the store verbatim,
/// so the keys a listing returns address the same objects again.
#[derive(Clone)]
pub struct Bucket {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    config: Arc<StorageConfig>,
}

impl Bucket {
    /// Connects to the S3-compatible endpoint described by `config`.
    ///
    /// Explicit credentials override the SDK's environment credential chain.
    /// No request is sent until the first operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or the S3
    /// client cannot be built.
    #[tracing::instrument(skip(config), target = TRACING_TARGET_CLIENT, fields(bucket = %config.bucket, endpoint = %config.endpoint_masked()))]
    pub fn connect(config: StorageConfig) -> Result<Self> {
        config.validate().inspect_err(|e| {
            tracing::error!(target: TRACING_TARGET_CLIENT, error = %e, "Configuration validation failed");
        })?;

        let options = ClientOptions::new()
            .with_connect_timeout(config.connect_timeout())
            .with_timeout(config.request_timeout());

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_virtual_hosted_style_request(config.virtual_hosted_style)
            .with_client_options(options);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint.as_str().trim_end_matches('/'))
                .with_allow_http(config.allows_http());
        }

        let creds = &config.credentials;
        if let Some(access_key_id) = creds.access_key_id() {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret_access_key) = creds.secret_access_key() {
            builder = builder.with_secret_access_key(secret_access_key);
        }
        if let Some(token) = creds.session_token() {
            builder = builder.with_token(token);
        }

        let s3 = builder.build().map_err(|e| {
            tracing::error!(target: TRACING_TARGET_CLIENT, error = %e, "Failed to build S3 client");
            Error::Config(format!("Failed to build S3 client: {e}"))
        })?;

        tracing::info!(
            target: TRACING_TARGET_CLIENT,
            bucket = %config.bucket,
            region = %config.region,
            endpoint = %config.endpoint_masked(),
            access_key = %creds.access_key_masked(),
            "S3 client initialized"
        );

        Ok(Self {
            store: Arc::new(s3.clone()),
            signer: Some(Arc::new(s3)),
            config: Arc::new(config),
        })
    }

    /// Wraps an already built store, with default settings for `bucket`.
    ///
    /// The handle cannot sign URLs until a signer is attached with
    /// [`with_signer`](Self::with_signer).
    pub fn from_store(bucket: impl Into<String>, store: impl ObjectStore) -> Self {
        Self::from_parts(StorageConfig::new(bucket), store)
    }

    /// Wraps an already built store with explicit settings.
    pub fn from_parts(config: StorageConfig, store: impl ObjectStore) -> Self {
        Self {
            store: Arc::new(store),
            signer: None,
            config: Arc::new(config),
        }
    }

    /// Attaches the signer used for pre-signed URLs.
    pub fn with_signer(mut self, signer: impl Signer) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    /// Returns the bucket name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.config.bucket
    }

    /// Returns the configuration this handle was built from.
    #[inline]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Returns whether pre-signed URLs can be generated.
    #[inline]
    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    /// Lazily streams the entries whose key starts with `prefix`.
    ///
    /// Pagination is handled by the store; the stream is finite and a new
    /// call lists again from the start.
    pub fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectEntry>> {
        let scope = ListingScope::new(prefix);
        let stream = self.store.list(scope.root());

        stream
            .map_err(Error::from)
            .try_filter(move |meta| future::ready(scope.contains(meta.location.as_ref())))
            .map_ok(ObjectEntry::from)
            .boxed()
    }

    /// Collects every key under `prefix`, in listing order.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_OBJECTS)]
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.list(prefix).map_ok(|entry| entry.key).try_collect().await
    }

    /// Streams the entries under `prefix` in pages of at most `page_len`
    /// entries. A zero `page_len` is treated as one.
    pub fn list_pages(&self, prefix: &str, page_len: usize) -> BoxStream<'_, Result<Vec<ObjectEntry>>> {
        self.list(prefix)
            .try_chunks(page_len.max(1))
            .map_err(|TryChunksError(_, e)| e)
            .boxed()
    }

    /// Streams the entries under `prefix` in pages of the configured size.
    pub fn paged(&self, prefix: &str) -> BoxStream<'_, Result<Vec<ObjectEntry>>> {
        self.list_pages(prefix, self.config.page_size)
    }

    /// Returns whether at least one object lives under `prefix`.
    pub async fn any(&self, prefix: &str) -> Result<bool> {
        Ok(self.list(prefix).try_next().await?.is_some())
    }

    /// Number of objects under `prefix`.
    pub async fn count(&self, prefix: &str) -> Result<usize> {
        self.list(prefix)
            .try_fold(0usize, |count, _| future::ready(Ok(count + 1)))
            .await
    }

    /// Size of every object under `prefix`, keyed by object key.
    pub async fn sizes(&self, prefix: &str) -> Result<BTreeMap<String, u64>> {
        self.list(prefix)
            .map_ok(|entry| (entry.key, entry.size))
            .try_collect()
            .await
    }

    /// Combined size of every object under `prefix`.
    pub async fn total_size(&self, prefix: &str) -> Result<u64> {
        self.list(prefix)
            .try_fold(0u64, |total, entry| future::ready(Ok(total + entry.size)))
            .await
    }

    /// Gets object metadata without downloading the body.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_OBJECTS)]
    pub async fn head(&self, key: &str) -> Result<ObjectEntry> {
        let meta = self.store.head(&store_path(key)?).await?;
        Ok(meta.into())
    }

    /// Probes `key` with a metadata request.
    ///
    /// A not-found response is reported as `false`; any other failure is
    /// propagated.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Uploads `data` to `key`, overwriting any existing object.
    #[tracing::instrument(skip(self, data), target = TRACING_TARGET_OBJECTS, fields(size = data.len()))]
    pub async fn put(&self, key: &str, data: Bytes) -> Result<UploadOutput> {
        let size = data.len() as u64;
        let result = self
            .store
            .put(&store_path(key)?, PutPayload::from(data))
            .await?;

        tracing::debug!(target: TRACING_TARGET_OBJECTS, key, size, "Object uploaded");
        Ok(UploadOutput::new(key, size, result))
    }

    /// Uploads everything `reader` yields to `key`.
    ///
    /// Content up to [`MULTIPART_THRESHOLD`] bytes is sent in a single
    /// request; anything larger goes through the store's multipart writer,
    /// which is aborted if reading or uploading fails.
    #[tracing::instrument(skip(self, reader), target = TRACING_TARGET_OBJECTS)]
    pub async fn put_reader<R>(&self, key: &str, mut reader: R) -> Result<UploadOutput>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = Vec::new();
        (&mut reader)
            .take(MULTIPART_THRESHOLD as u64 + 1)
            .read_to_end(&mut head)
            .await?;

        if head.len() <= MULTIPART_THRESHOLD {
            return self.put(key, Bytes::from(head)).await;
        }

        let upload = self.store.put_multipart(&store_path(key)?).await?;
        let mut writer = WriteMultipart::new(upload);
        let max_concurrency = self.config.max_concurrency;

        match pump(&mut reader, &mut writer, head, max_concurrency).await {
            Ok(size) => {
                let result = writer.finish().await?;
                tracing::debug!(target: TRACING_TARGET_OBJECTS, key, size, "Multipart upload completed");
                Ok(UploadOutput::new(key, size, result))
            }
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    tracing::warn!(target: TRACING_TARGET_OBJECTS, key, error = %abort, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    /// Uploads the local file at `path` to `key`.
    pub async fn put_file(&self, path: &Path, key: &str) -> Result<UploadOutput> {
        let file = File::open(path).await?;
        self.put_reader(key, file).await
    }

    /// Uploads the local file at `path` to `key`, defaulting to the file
    /// name. Unless `overwrite` is set, an existing key is reported as
    /// [`Error::AlreadyExists`].
    pub async fn upload_path(
        &self,
        path: &Path,
        key: Option<&str>,
        overwrite: bool,
    ) -> Result<UploadOutput> {
        let key = match key {
            Some(key) => key.to_string(),
            None => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    Error::InvalidRequest(format!("'{}' has no file name", path.display()))
                })?,
        };

        if !overwrite && self.exists(&key).await? {
            return Err(Error::AlreadyExists { key });
        }

        self.put_file(path, &key).await
    }

    /// Downloads the whole object at `key` into memory.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_OBJECTS)]
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let result = self.store.get(&store_path(key)?).await?;
        Ok(result.bytes().await?)
    }

    /// Downloads `range` of the object at `key`.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_OBJECTS)]
    pub async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        Ok(self.store.get_range(&store_path(key)?, range).await?)
    }

    /// Streams the object at `key` into the local file `destination`,
    /// creating parent directories as needed.
    ///
    /// A partially written file is removed when the transfer fails.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_OBJECTS)]
    pub async fn get_to_file(&self, key: &str, destination: &Path) -> Result<u64> {
        let result = self.store.get(&store_path(key)?).await?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(destination).await?;
        match drain(&mut file, result.into_stream()).await {
            Ok(size) => Ok(size),
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(destination).await;
                Err(e)
            }
        }
    }

    /// Streams the object at `key` as consecutive ranges of at most
    /// `chunk_size` bytes, keeping up to `concurrency` range requests in
    /// flight while yielding them in order.
    pub fn chunks<'a>(
        &'a self,
        key: &'a str,
        chunk_size: NonZeroU64,
        concurrency: usize,
    ) -> BoxStream<'a, Result<Bytes>> {
        stream::once(self.head(key))
            .map_ok(move |entry| {
                stream::iter(chunk_ranges(entry.size, chunk_size))
                    .map(move |range| self.get_range(key, range))
                    .buffered(concurrency.max(1))
            })
            .try_flatten()
            .boxed()
    }

    /// Downloads `key` to `destination` unless a local file is already there
    /// and `overwrite` is unset.
    pub async fn download_to(&self, key: &str, destination: &Path, overwrite: bool) -> Result<u64> {
        if !overwrite && tokio::fs::try_exists(destination).await? {
            return Err(Error::AlreadyExists {
                key: destination.display().to_string(),
            });
        }
        self.get_to_file(key, destination).await
    }

    /// Copies `source` to `destination`, then deletes `source`.
    ///
    /// The source is left in place when the copy fails.
    pub async fn rename(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        self.copy(source, destination, overwrite).await?;
        self.delete(source).await
    }

    /// Server-side copy of `source` to `destination`.
    ///
    /// Unless `overwrite` is set, an existing destination is reported as
    /// [`Error::AlreadyExists`] and nothing is copied.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_OBJECTS)]
    pub async fn copy(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        if !overwrite && self.exists(destination).await? {
            return Err(Error::AlreadyExists {
                key: destination.to_string(),
            });
        }

        self.store
            .copy(&store_path(source)?, &store_path(destination)?)
            .await?;
        Ok(())
    }

    /// Deletes the object at `key`.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_OBJECTS)]
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(&store_path(key)?).await?;
        Ok(())
    }

    /// Deletes every key in `keys` through the store's bulk delete.
    ///
    /// S3 sends up to 1000 keys per `DeleteObjects` request. One result is
    /// returned per key, in the order given; a key the store did not confirm
    /// as deleted carries the failure reported for its request.
    #[tracing::instrument(skip(self, keys), target = TRACING_TARGET_OBJECTS, fields(count = keys.len()))]
    pub async fn delete_many(&self, keys: &[String]) -> Vec<Result<()>> {
        let mut rejected = Vec::with_capacity(keys.len());
        let mut locations: Vec<object_store::Result<StorePath>> = Vec::with_capacity(keys.len());
        for key in keys {
            match store_path(key) {
                Ok(location) => {
                    locations.push(Ok(location));
                    rejected.push(None);
                }
                Err(e) => rejected.push(Some(e)),
            }
        }

        let mut deleted = HashSet::new();
        let mut failures = VecDeque::new();
        let mut responses = self.store.delete_stream(stream::iter(locations).boxed());
        while let Some(response) = responses.next().await {
            match response {
                Ok(location) => {
                    deleted.insert(location.to_string());
                }
                Err(e) => failures.push_back(e),
            }
        }

        let mut last_failure = None;
        keys.iter()
            .zip(rejected)
            .map(|(key, rejected)| {
                if let Some(e) = rejected {
                    return Err(e);
                }
                if deleted.contains(key.trim_matches('/')) {
                    return Ok(());
                }
                match failures.pop_front() {
                    Some(e) => {
                        last_failure = Some(e.to_string());
                        Err(Error::Store(e))
                    }
                    None => Err(Error::Unconfirmed {
                        key: key.clone(),
                        reason: last_failure
                            .clone()
                            .unwrap_or_else(|| "no response from the store".to_string()),
                    }),
                }
            })
            .collect()
    }

    /// Generates a pre-signed GET URL for `key`, valid for `expires_in`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SigningUnsupported`] without a signer and
    /// [`Error::InvalidRequest`] for an expiry outside `1s ..= 7 days`.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_OBJECTS)]
    pub async fn presign(&self, key: &str, expires_in: Duration) -> Result<Url> {
        validate_expiry(expires_in)?;
        let signer = self.signer.as_ref().ok_or(Error::SigningUnsupported)?;

        let url = signer
            .signed_url(Method::GET, &store_path(key)?, expires_in)
            .await?;
        Ok(url)
    }
}

/// Byte ranges of at most `chunk_size` bytes covering `0..size`.
pub fn chunk_ranges(size: u64, chunk_size: NonZeroU64) -> impl Iterator<Item = Range<u64>> {
    let chunk_size = chunk_size.get();
    (0..size.div_ceil(chunk_size)).map(move |index| {
        let start = index * chunk_size;
        start..(start + chunk_size).min(size)
    })
}

pub(crate) fn validate_chunk_size(chunk_size: u64) -> Result<NonZeroU64> {
    NonZeroU64::new(chunk_size).ok_or_else(|| {
        Error::InvalidRequest("chunk size must be greater than zero".to_string())
    })
}

pub(crate) fn validate_expiry(expires_in: Duration) -> Result<()> {
    if expires_in < Duration::from_secs(1) || expires_in > MAX_PRESIGN_EXPIRY {
        return Err(Error::InvalidRequest(format!(
            "expiry must be between 1 second and 7 days, got {expires_in:?}"
        )));
    }
    Ok(())
}

/// Feeds the buffered head and the rest of `reader` into `writer`.
async fn pump<R>(
    reader: &mut R,
    writer: &mut WriteMultipart,
    head: Vec<u8>,
    max_concurrency: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut size = head.len() as u64;
    writer.write(&head);

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }

        writer.wait_for_capacity(max_concurrency).await?;
        writer.write(&buffer[..read]);
        size += read as u64;
    }

    Ok(size)
}

/// Writes every chunk of `stream` to `file`.
async fn drain(
    file: &mut File,
    mut stream: BoxStream<'static, object_store::Result<Bytes>>,
) -> Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = stream.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("bucket", &self.config.bucket)
            .field("endpoint", &self.config.endpoint_masked())
            .field("store", &self.store.to_string())
            .field("can_sign", &self.can_sign())
            .finish()
    }
}
