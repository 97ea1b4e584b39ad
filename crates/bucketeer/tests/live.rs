//! Tests against a real S3-compatible endpoint.
//!
//! Ignored by default. Settings come from the environment or a `.env` file:
//! `S3_BUCKET`, `S3_REGION`, `S3_ENDPOINT`, `S3_ACCESS_KEY_ID` and
//! `S3_SECRET_ACCESS_KEY`. The bucket must already exist.
//!
//! ```bash
//! cargo test -p bucketeer --test live -- --ignored
//! ```

use std::time::Duration;

use bucketeer::{BlockingClient, ConcurrentClient, Credentials, StorageConfig};
use futures::TryStreamExt;
use url::Url;

fn live_config() -> Option<StorageConfig> {
    let _ = dotenvy::dotenv();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let Ok(bucket) = std::env::var("S3_BUCKET") else {
        eprintln!("S3_BUCKET is not set, skipping live test");
        return None;
    };

    let mut config = StorageConfig::new(bucket);
    if let Ok(region) = std::env::var("S3_REGION") {
        config = config.with_region(region);
    }
    if let Ok(endpoint) = std::env::var("S3_ENDPOINT") {
        config = config.with_endpoint(Url::parse(&endpoint).expect("S3_ENDPOINT is a URL"));
    }
    if let (Ok(access), Ok(secret)) = (
        std::env::var("S3_ACCESS_KEY_ID"),
        std::env::var("S3_SECRET_ACCESS_KEY"),
    ) {
        config = config.with_credentials(Credentials::new(access, secret));
    }
    Some(config)
}

/// Unique prefix per run so parallel runs do not collide.
fn run_prefix(test: &str) -> String {
    let now = jiff::Timestamp::now().as_nanosecond();
    format!("bucketeer-live/{test}-{now}/")
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a live S3-compatible endpoint"]
async fn presigned_url_expires() {
    let Some(config) = live_config() else { return };
    let client = ConcurrentClient::connect(config).unwrap();
    let prefix = run_prefix("presign");
    let key = format!("{prefix}hello.txt");

    client.upload_stream(&b"hello"[..], &key).await.unwrap();

    let http = reqwest::Client::new();
    let urls = client.get_urls(&prefix, Duration::from_secs(60)).await.unwrap();
    assert_eq!(urls.len(), 1);
    let response = http.get(urls[&key].clone()).send().await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "hello");

    let urls = client.get_urls(&prefix, Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let response = http.get(urls[&key].clone()).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    let _ = client.remove(&prefix).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a live S3-compatible endpoint"]
async fn concurrent_round_trip() {
    let Some(config) = live_config() else { return };
    let client = ConcurrentClient::connect(config).unwrap();
    let prefix = run_prefix("concurrent");
    let moved = format!("{prefix}moved/");

    let mut total = 0u64;
    for index in 0..10 {
        let body = format!("object {index}");
        total += body.len() as u64;
        let key = format!("{prefix}src/{index}.txt");
        client.upload_stream(body.as_bytes(), &key).await.unwrap();
    }

    let src = format!("{prefix}src/");
    let entries: Vec<_> = client.ls_files(&src).try_collect().await.unwrap();
    assert_eq!(entries.len(), 10);
    assert_eq!(client.count_files(&src).await.unwrap(), 10);
    assert_eq!(client.total_size(&src).await.unwrap(), total);

    let report = client.move_objects(&src, &moved, false).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(client.count_files(&moved).await.unwrap(), 10);
    assert!(!client.prefix_exists(&src).await.unwrap());

    let report = client.remove(&prefix).await.unwrap();
    assert_eq!(report.len(), 10);
    assert!(report.is_complete());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a live S3-compatible endpoint"]
async fn special_keys_survive_batches() {
    let Some(config) = live_config() else { return };
    let client = ConcurrentClient::connect(config).unwrap();
    let prefix = run_prefix("special");
    let names = ["50%.txt", "a[2].txt", "plain.txt", "report#1.txt"];

    for name in names {
        let key = format!("{prefix}docs/{name}");
        client.upload_stream(name.as_bytes(), &key).await.unwrap();
    }

    let docs = format!("{prefix}docs/");
    let listed: Vec<String> = client
        .ls_files(&docs)
        .map_ok(|entry| entry.key)
        .try_collect()
        .await
        .unwrap();
    let expected: Vec<String> = names.iter().map(|name| format!("{docs}{name}")).collect();
    assert_eq!(listed, expected);

    let moved = format!("{prefix}moved/");
    assert!(client.move_objects(&docs, &moved, false).await.unwrap().is_complete());
    assert!(client.check_exist(&format!("{moved}report#1.txt")).await.unwrap());

    let report = client.remove(&prefix).await.unwrap();
    assert_eq!(report.len(), 4);
    assert!(report.is_complete());
    assert_eq!(client.count_files(&prefix).await.unwrap(), 0);
}

#[test]
#[ignore = "requires a live S3-compatible endpoint"]
fn blocking_upload_and_check() {
    let Some(config) = live_config() else { return };
    let client = BlockingClient::connect(config).unwrap();
    let prefix = run_prefix("blocking");
    let key = format!("{prefix}report.csv");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.csv");
    std::fs::write(&path, "a,b\n1,2\n").unwrap();

    assert!(!client.check_exist(&key).unwrap());
    client.upload_file(&path, Some(&key), false).unwrap();
    assert!(client.check_exist(&key).unwrap());
    assert!(client.upload_file(&path, Some(&key), false).unwrap_err().is_already_exists());

    let target = tempfile::tempdir().unwrap();
    let report = client.download(&prefix, target.path(), false).unwrap();
    assert!(report.is_complete());
    assert_eq!(
        std::fs::read_to_string(target.path().join("report.csv")).unwrap(),
        "a,b\n1,2\n"
    );

    let chunks = client
        .download_by_chunks(&key, 3)
        .unwrap()
        .collect::<bucketeer::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(chunks.concat(), b"a,b\n1,2\n");

    let _ = client.remove(&prefix).unwrap();
}
