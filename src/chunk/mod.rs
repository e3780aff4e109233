//! Chunked access to Zarr stores.
//!
//! Mirrors the [`tile`](crate::tile) module for chunked arrays: a client that
//! discovers the pyramid and reads chunks, a bounded cache of decoded
//! chunks, and a service combining the two with in-flight deduplication.

mod cache;
mod client;
mod service;

pub use cache::{ChunkCache, ChunkKey, TypedArray, DEFAULT_CHUNK_CACHE_CAPACITY};
pub use client::{ZarrChunkClient, ZarrPyramidInfo, ZarrPyramidLevel};
pub use service::ChunkService;
