//! In-memory fixtures shared by the unit tests.

use std::time::Duration;

use bytes::Bytes;
use http::Method;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::signer::Signer;
use url::Url;

use crate::{Bucket, StorageConfig};

/// Signer producing deterministic URLs under `https://signed.test/`, with
/// each key segment percent-encoded the way a real signer does.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSigner;

#[async_trait::async_trait]
impl Signer for StaticSigner {
    async fn signed_url(
        &self,
        method: Method,
        path: &Path,
        expires_in: Duration,
    ) -> object_store::Result<Url> {
        let mut url = Url::parse("https://signed.test/").map_err(|e| object_store::Error::Generic {
            store: "StaticSigner",
            source: Box::new(e),
        })?;
        url.path_segments_mut()
            .expect("https URLs have a path")
            .pop_if_empty()
            .extend(path.parts());
        url.query_pairs_mut()
            .append_pair("method", method.as_str())
            .append_pair("expires", &expires_in.as_secs().to_string());
        Ok(url)
    }
}

/// Empty in-memory bucket with a static signer attached.
pub fn memory_bucket() -> Bucket {
    Bucket::from_parts(StorageConfig::new("test-bucket"), InMemory::new()).with_signer(StaticSigner)
}

/// Uploads `count` small objects named `{prefix}{index}.txt`, returning the
/// total number of bytes written.
pub async fn seed(bucket: &Bucket, prefix: &str, count: usize) -> u64 {
    let mut total = 0;
    for index in 0..count {
        let body = Bytes::from(format!("payload number {index}"));
        total += body.len() as u64;
        bucket
            .put(&format!("{prefix}{index}.txt"), body)
            .await
            .expect("seed upload");
    }
    total
}
