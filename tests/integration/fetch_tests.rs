//! Streaming fetcher behaviour seen from outside the crate.

use http::{HeaderMap, HeaderValue};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use volume_streamer::io::{fetch_paired, FetchOptions, MemorySource, StreamingFetcher};
use volume_streamer::FetchError;

use super::test_utils::*;

#[tokio::test]
async fn test_concatenated_gzip_members_in_one_byte_chunks() {
    let mut body = gzip(b"first half, ");
    body.extend(gzip(b"second half"));
    let source = MemorySource::new().with_chunk_size(1);
    source.insert("mem://two-members.gz", body);

    let bytes = StreamingFetcher::new(source)
        .fetch("mem://two-members.gz")
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"first half, second half");
}

#[tokio::test]
async fn test_raw_fetch_keeps_compression() {
    let compressed = gzip(b"payload");
    let source = MemorySource::new();
    source.insert("mem://blob", compressed.clone());

    let bytes = StreamingFetcher::new(source)
        .fetch_raw("mem://blob", &FetchOptions::new())
        .await
        .unwrap();
    assert_eq!(&bytes[..], &compressed[..]);
}

#[tokio::test]
async fn test_request_headers_override_defaults() {
    let source = HeaderCapturingSource::new(b"ok".to_vec());
    let mut defaults = HeaderMap::new();
    defaults.insert("authorization", HeaderValue::from_static("Bearer default"));
    defaults.insert("x-client", HeaderValue::from_static("viewer"));
    let fetcher = StreamingFetcher::new(source.clone()).with_default_headers(defaults);

    let options = FetchOptions::new().with_header("authorization", "Bearer scoped");
    fetcher.fetch_with("mem://any", &options).await.unwrap();

    let seen = source.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["authorization"], "Bearer scoped");
    assert_eq!(seen[0]["x-client"], "viewer");
}

#[tokio::test]
async fn test_cancel_stops_slow_fetch() {
    let source = MemorySource::new().with_latency(Duration::from_secs(30));
    source.insert("mem://slow", vec![0u8; 64]);
    let token = CancellationToken::new();
    let options = FetchOptions::new().with_cancel(token.clone());

    let fetcher = StreamingFetcher::new(source);
    let handle = tokio::spawn(async move { fetcher.fetch_with("mem://slow", &options).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancelled fetch should finish promptly")
        .unwrap();
    assert!(matches!(result, Err(FetchError::Cancelled { .. })));
}

#[tokio::test]
async fn test_paired_fetch_missing_everywhere() {
    let source = MemorySource::new();
    let fetcher = StreamingFetcher::new(source.clone());

    let paired = fetch_paired(&fetcher, "mem://scan.IMG", &FetchOptions::new())
        .await
        .unwrap();
    assert!(paired.is_none());
    assert_eq!(source.requests(), vec!["mem://scan.IMG", "mem://scan.IMG.gz"]);
}

#[tokio::test]
async fn test_paired_fetch_inflates_compressed_variant() {
    let source = MemorySource::new();
    source.insert("mem://scan.IMG.gz", gzip(&[1, 2, 3]));
    let fetcher = StreamingFetcher::new(source);

    let paired = fetch_paired(&fetcher, "mem://scan.IMG", &FetchOptions::new())
        .await
        .unwrap();
    assert_eq!(paired.as_deref(), Some(&[1u8, 2, 3][..]));
}
