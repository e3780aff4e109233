use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use http::header::CONTENT_ENCODING;
use http::HeaderMap;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::FetchError;

/// An opened response body.
pub struct SourceStream {
    /// `Content-Encoding` reported by the server, if any
    pub content_encoding: Option<String>,

    /// Body chunks in arrival order
    pub body: BoxStream<'static, Result<Bytes, FetchError>>,
}

impl SourceStream {
    /// A body that yields `chunks` in order.
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self {
            content_encoding: None,
            body: stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }

    pub fn with_content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }
}

impl std::fmt::Debug for SourceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStream")
            .field("content_encoding", &self.content_encoding)
            .finish_non_exhaustive()
    }
}

/// Trait for opening a location as a stream of bytes.
///
/// This abstraction lets acquisition work against HTTP endpoints, local
/// files and object storage without knowing which one it is talking to.
/// Implementations must report a missing resource as
/// [`FetchError::Network`] with status 404.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Open `location`, sending `headers` where the transport supports them.
    async fn open(&self, location: &str, headers: &HeaderMap) -> Result<SourceStream, FetchError>;
}

#[async_trait]
impl<T: ByteSource + ?Sized> ByteSource for Arc<T> {
    async fn open(&self, location: &str, headers: &HeaderMap) -> Result<SourceStream, FetchError> {
        (**self).open(location, headers).await
    }
}

fn not_found(url: &str) -> FetchError {
    FetchError::Network {
        url: url.to_string(),
        status: 404,
        reason: "Not Found".to_string(),
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// HTTP(S) source backed by `reqwest`.
#[derive(Clone, Default)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn open(&self, location: &str, headers: &HeaderMap) -> Result<SourceStream, FetchError> {
        let response = self
            .client
            .get(location)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| FetchError::Connection {
                url: location.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network {
                url: location.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let content_encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);

        let url = location.to_string();
        let body = response
            .bytes_stream()
            .map_err(move |e| FetchError::Stream {
                url: url.clone(),
                message: e.to_string(),
            })
            .boxed();

        Ok(SourceStream {
            content_encoding,
            body,
        })
    }
}

// =============================================================================
// Local files
// =============================================================================

/// Local filesystem source. Accepts plain paths and `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSource;

impl FileSource {
    fn path_of(location: &str) -> PathBuf {
        let path = location.strip_prefix("file://").unwrap_or(location);
        let path = path.split(['?', '#']).next().unwrap_or(path);
        let decoded = urlencoding::decode(path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(decoded)
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn open(&self, location: &str, _headers: &HeaderMap) -> Result<SourceStream, FetchError> {
        let path = Self::path_of(location);
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                not_found(location)
            } else {
                FetchError::Connection {
                    url: location.to_string(),
                    message: e.to_string(),
                }
            }
        })?;
        debug!(path = %path.display(), "opened local file");

        let url = location.to_string();
        let body = ReaderStream::new(file)
            .map_err(move |e| FetchError::Stream {
                url: url.clone(),
                message: e.to_string(),
            })
            .boxed();

        Ok(SourceStream {
            content_encoding: None,
            body,
        })
    }
}

// =============================================================================
// S3
// =============================================================================

/// S3 (or S3-compatible) source for `s3://bucket/key` locations.
#[derive(Clone)]
pub struct S3Source {
    client: Client,
}

impl S3Source {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Split `s3://bucket/key` into its parts.
    pub fn parse_location(location: &str) -> Result<(String, String), FetchError> {
        let rest = location
            .strip_prefix("s3://")
            .ok_or_else(|| FetchError::InvalidUrl(location.to_string()))?;
        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok((bucket.to_string(), key.to_string()))
            }
            _ => Err(FetchError::InvalidUrl(location.to_string())),
        }
    }
}

#[async_trait]
impl ByteSource for S3Source {
    async fn open(&self, location: &str, _headers: &HeaderMap) -> Result<SourceStream, FetchError> {
        let (bucket, key) = Self::parse_location(location)?;
        let response = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false)
                    || e.raw_response()
                        .map(|r| r.status().as_u16() == 404)
                        .unwrap_or(false);
                if missing {
                    return not_found(location);
                }
                FetchError::Connection {
                    url: location.to_string(),
                    message: e.to_string(),
                }
            })?;

        let content_encoding = response.content_encoding().map(str::to_ascii_lowercase);
        let url = location.to_string();
        let body = stream::unfold(response.body, move |mut body| {
            let url = url.clone();
            async move {
                body.next().await.map(|chunk| {
                    let chunk = chunk.map_err(|e| FetchError::Stream {
                        url,
                        message: e.to_string(),
                    });
                    (chunk, body)
                })
            }
        })
        .boxed();

        Ok(SourceStream {
            content_encoding,
            body,
        })
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);
    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    // S3-compatible services generally need path-style addressing
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();
    Client::from_conf(s3_config)
}

// =============================================================================
// Routing
// =============================================================================

/// Dispatches on the location scheme: `http(s)://`, `s3://`, `file://` or a
/// bare path.
#[derive(Clone, Default)]
pub struct RoutingSource {
    http: HttpSource,
    file: FileSource,
    s3: Option<S3Source>,
}

impl RoutingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http(mut self, http: HttpSource) -> Self {
        self.http = http;
        self
    }

    pub fn with_s3(mut self, s3: S3Source) -> Self {
        self.s3 = Some(s3);
        self
    }
}

/// Lowercase scheme of a location, `None` for bare paths.
pub fn scheme_of(location: &str) -> Option<String> {
    let (scheme, _) = location.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then(|| scheme.to_ascii_lowercase())
}

#[async_trait]
impl ByteSource for RoutingSource {
    async fn open(&self, location: &str, headers: &HeaderMap) -> Result<SourceStream, FetchError> {
        match scheme_of(location).as_deref() {
            Some("http") | Some("https") => self.http.open(location, headers).await,
            Some("s3") => match &self.s3 {
                Some(s3) => s3.open(location, headers).await,
                None => Err(FetchError::UnsupportedScheme(
                    "s3 (no S3 client configured)".to_string(),
                )),
            },
            Some("file") | None => self.file.open(location, headers).await,
            Some(other) => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn collect(stream: SourceStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream.body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[test]
    fn test_scheme_of() {
        assert_eq!(scheme_of("https://host/a.nii").as_deref(), Some("https"));
        assert_eq!(scheme_of("S3://bucket/key").as_deref(), Some("s3"));
        assert_eq!(scheme_of("/data/a.nii"), None);
        assert_eq!(scheme_of("relative/a.nii"), None);
    }

    #[test]
    fn test_parse_s3_location() {
        let (bucket, key) = S3Source::parse_location("s3://scans/sub-01/t1.nii.gz").unwrap();
        assert_eq!(bucket, "scans");
        assert_eq!(key, "sub-01/t1.nii.gz");
        assert!(S3Source::parse_location("s3://bucket-only").is_err());
        assert!(S3Source::parse_location("https://x/y").is_err());
    }

    #[tokio::test]
    async fn test_file_source_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"voxels").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let stream = FileSource.open(&path, &HeaderMap::new()).await.unwrap();
        assert_eq!(collect(stream).await, b"voxels");

        let url = format!("file://{path}");
        let stream = RoutingSource::new().open(&url, &HeaderMap::new()).await.unwrap();
        assert_eq!(collect(stream).await, b"voxels");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.BRIK");
        let err = FileSource
            .open(path.to_str().unwrap(), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unsupported_schemes() {
        let router = RoutingSource::new();
        let err = router.open("ftp://host/file", &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme(s) if s == "ftp"));

        let err = router.open("s3://bucket/key", &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme(_)));
    }
}
