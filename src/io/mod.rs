//! I/O layer for whole-resource fetches.
//!
//! This module provides:
//! - [`ByteSource`]: the async seam every backend implements (HTTP, file, S3)
//! - [`StreamingFetcher`]: collects a body, inflating gzip as chunks arrive
//! - [`fetch_paired`]: companion data files with a compressed fallback
//! - [`MemorySource`]: in-memory source with request tracking for tests

mod memory;
mod paired;
mod source;
mod stream;

pub use memory::MemorySource;
pub use paired::{fetch_paired, paired_url, sibling_url, COMPRESSED_SUFFIX};
pub use source::{
    create_s3_client, scheme_of, ByteSource, FileSource, HttpSource, RoutingSource, S3Source,
    SourceStream,
};
pub use stream::{FetchOptions, StreamingFetcher};
