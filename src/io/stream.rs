//! Streaming acquisition with incremental gzip decompression.
//!
//! Bodies are consumed chunk by chunk. When the payload is gzip, either by
//! `Content-Encoding` or by its leading magic bytes, every chunk is pushed
//! through an incremental inflater as it arrives, so the compressed body is
//! never held in memory as a whole.

use std::io::Write;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use flate2::write::MultiGzDecoder;
use futures::stream::{BoxStream, StreamExt};
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::format::detect::GZIP_MAGIC;

use super::source::{ByteSource, RoutingSource};

/// Per-request options for [`StreamingFetcher`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Extra request headers, merged over the fetcher's defaults
    pub headers: HeaderMap,

    /// Aborts the fetch between chunks once triggered
    pub cancel: Option<CancellationToken>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Fetches whole resources from any [`ByteSource`].
#[derive(Clone)]
pub struct StreamingFetcher {
    source: Arc<dyn ByteSource>,
    default_headers: HeaderMap,
}

impl Default for StreamingFetcher {
    fn default() -> Self {
        Self::new(RoutingSource::new())
    }
}

impl StreamingFetcher {
    pub fn new(source: impl ByteSource + 'static) -> Self {
        Self::from_arc(Arc::new(source))
    }

    pub fn from_arc(source: Arc<dyn ByteSource>) -> Self {
        Self {
            source,
            default_headers: HeaderMap::new(),
        }
    }

    /// Headers sent with every request unless a request overrides them.
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }

    /// Fetch `url`, decompressing gzip payloads.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.fetch_with(url, &FetchOptions::default()).await
    }

    /// Fetch `url` with per-request headers and cancellation, decompressing
    /// gzip payloads.
    pub async fn fetch_with(&self, url: &str, options: &FetchOptions) -> Result<Bytes, FetchError> {
        self.fetch_inner(url, options, true).await
    }

    /// Fetch `url` without decompression.
    pub async fn fetch_raw(&self, url: &str, options: &FetchOptions) -> Result<Bytes, FetchError> {
        self.fetch_inner(url, options, false).await
    }

    async fn fetch_inner(
        &self,
        url: &str,
        options: &FetchOptions,
        decompress: bool,
    ) -> Result<Bytes, FetchError> {
        let mut headers = self.default_headers.clone();
        for (name, value) in &options.headers {
            headers.insert(name.clone(), value.clone());
        }
        let cancel = options.cancel.as_ref();

        let opened = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(cancelled(url)),
                opened = self.source.open(url, &headers) => opened?,
            },
            None => self.source.open(url, &headers).await?,
        };

        let mut body = opened.body;

        // Buffer until the magic is decidable
        let mut head = BytesMut::new();
        let mut exhausted = false;
        while head.len() < GZIP_MAGIC.len() {
            match next_chunk(&mut body, cancel, url).await? {
                Some(chunk) => head.extend_from_slice(&chunk),
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        let declared_gzip = opened
            .content_encoding
            .as_deref()
            .map(|e| e.contains("gzip"))
            .unwrap_or(false);
        let gzip = decompress && (declared_gzip || head.starts_with(&GZIP_MAGIC));

        if gzip {
            debug!(url = %url, declared = declared_gzip, "inflating gzip body");
            let mut inflater = MultiGzDecoder::new(Vec::new());
            inflater
                .write_all(&head)
                .map_err(|e| inflate_error(url, e))?;
            if !exhausted {
                while let Some(chunk) = next_chunk(&mut body, cancel, url).await? {
                    inflater
                        .write_all(&chunk)
                        .map_err(|e| inflate_error(url, e))?;
                }
            }
            let inflated = inflater.finish().map_err(|e| inflate_error(url, e))?;
            return Ok(Bytes::from(inflated));
        }

        let mut buffer = head;
        if !exhausted {
            while let Some(chunk) = next_chunk(&mut body, cancel, url).await? {
                buffer.extend_from_slice(&chunk);
            }
        }
        Ok(buffer.freeze())
    }
}

async fn next_chunk(
    body: &mut BoxStream<'static, Result<Bytes, FetchError>>,
    cancel: Option<&CancellationToken>,
    url: &str,
) -> Result<Option<Bytes>, FetchError> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(cancelled(url)),
            chunk = body.next() => chunk.transpose(),
        },
        None => body.next().await.transpose(),
    }
}

fn cancelled(url: &str) -> FetchError {
    FetchError::Cancelled {
        url: url.to_string(),
    }
}

fn inflate_error(url: &str, error: std::io::Error) -> FetchError {
    FetchError::Stream {
        url: url.to_string(),
        message: format!("gzip decompression failed: {error}"),
    }
}
