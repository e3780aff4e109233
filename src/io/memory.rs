use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use parking_lot::RwLock;

use crate::error::FetchError;

use super::source::{ByteSource, SourceStream};

#[derive(Clone)]
struct Entry {
    body: Bytes,
    content_encoding: Option<String>,
}

/// In-memory [`ByteSource`] keyed by exact location.
///
/// Unknown locations answer 404. Every `open` is counted, so callers can
/// verify how many requests reached the source. Clones share state.
#[derive(Clone, Default)]
pub struct MemorySource {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    requests: Arc<RwLock<Vec<String>>>,
    request_count: Arc<AtomicUsize>,
    chunk_size: Option<usize>,
    latency: Option<Duration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve bodies in pieces of `size` bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Delay every `open` by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert(&self, location: impl Into<String>, body: impl Into<Bytes>) {
        self.entries.write().insert(
            location.into(),
            Entry {
                body: body.into(),
                content_encoding: None,
            },
        );
    }

    /// Insert a body served with a `Content-Encoding` header.
    pub fn insert_encoded(
        &self,
        location: impl Into<String>,
        body: impl Into<Bytes>,
        encoding: impl Into<String>,
    ) {
        self.entries.write().insert(
            location.into(),
            Entry {
                body: body.into(),
                content_encoding: Some(encoding.into()),
            },
        );
    }

    pub fn remove(&self, location: &str) {
        self.entries.write().remove(location);
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Locations requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.read().clone()
    }

    /// Number of requests for `location`.
    pub fn requests_for(&self, location: &str) -> usize {
        self.requests.read().iter().filter(|r| *r == location).count()
    }

    pub fn reset_tracking(&self) {
        self.request_count.store(0, Ordering::SeqCst);
        self.requests.write().clear();
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn open(&self, location: &str, _headers: &HeaderMap) -> Result<SourceStream, FetchError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.write().push(location.to_string());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let entry = self
            .entries
            .read()
            .get(location)
            .cloned()
            .ok_or_else(|| FetchError::Network {
                url: location.to_string(),
                status: 404,
                reason: "Not Found".to_string(),
            })?;

        let chunks = match self.chunk_size {
            Some(size) => (0..entry.body.len())
                .step_by(size)
                .map(|start| entry.body.slice(start..(start + size).min(entry.body.len())))
                .collect(),
            None => vec![entry.body],
        };
        let stream = SourceStream::from_chunks(chunks);
        Ok(match entry.content_encoding {
            Some(encoding) => stream.with_content_encoding(encoding),
            None => stream,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_serves_and_counts() {
        let source = MemorySource::new().with_chunk_size(2);
        source.insert("mem://a", &b"hello"[..]);

        let stream = source.open("mem://a", &HeaderMap::new()).await.unwrap();
        let chunks: Vec<Bytes> = stream.body.try_collect().await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), b"hello");

        let err = source.open("mem://b", &HeaderMap::new()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(source.request_count(), 2);
        assert_eq!(source.requests_for("mem://b"), 1);
    }
}
