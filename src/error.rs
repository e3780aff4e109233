use thiserror::Error;

/// Errors raised while acquiring bytes from a file, HTTP endpoint or object store
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("Request for {url} failed with HTTP {status}: {reason}")]
    Network {
        url: String,
        status: u16,
        reason: String,
    },

    /// Transport-level failure before a response was received
    #[error("Connection error for {url}: {message}")]
    Connection { url: String, message: String },

    /// Body absent, body read failure or decompression failure
    #[error("Stream error for {url}: {message}")]
    Stream { url: String, message: String },

    /// Caller cancelled the fetch before it completed
    #[error("Fetch of {url} was cancelled")]
    Cancelled { url: String },

    /// No byte source is registered for the URL scheme
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The location could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// HTTP status carried by a `Network` error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Network { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the resource does not exist (HTTP 404 or a missing file/object).
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Errors related to format detection and decoding
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// Magic bytes or signature do not match the expected format
    #[error("Invalid {format} signature: {found}")]
    InvalidMagic { format: &'static str, found: String },

    /// Buffer is shorter than the structure requires
    #[error("{format} data truncated: need {required} bytes, got {actual}")]
    Truncated {
        format: &'static str,
        required: usize,
        actual: usize,
    },

    /// Header fields are structurally invalid
    #[error("Invalid {format} header: {message}")]
    InvalidHeader {
        format: &'static str,
        message: String,
    },

    /// Element type cannot be represented
    #[error("Unsupported {format} datatype: {code}")]
    UnsupportedDatatype { format: &'static str, code: String },

    /// No decoder recognises the input
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Raster image codec failure
    #[error("Image decode error: {0}")]
    Image(String),

    /// Archive container failure
    #[error("Archive error: {0}")]
    Archive(String),

    /// Compressed payload could not be inflated
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Chunked store metadata or chunk failure
    #[error("Zarr error: {0}")]
    Zarr(String),
}

/// Errors surfaced by the ingestion entry points
#[derive(Debug, Clone, Error)]
pub enum VolumeError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Paired data file disagrees with the shape its header declares
    #[error("Dimension mismatch: header implies {expected} bytes of voxel data, paired file has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors that can occur while loading a tile or chunk
///
/// These never escape the tile and chunk clients; they are logged and turned
/// into an absent payload.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Response body could not be decoded into a payload
    #[error("Failed to decode {key}: {message}")]
    Decode { key: String, message: String },

    /// Requested pyramid level does not exist
    #[error("Invalid level {level}: pyramid has {max_levels} levels")]
    InvalidLevel { level: usize, max_levels: usize },
}
