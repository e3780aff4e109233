//! # Volume Streamer
//!
//! Streaming ingestion of volumetric medical images for a browser-class
//! renderer.
//!
//! Volumes are fetched from local paths, HTTP(S) or S3, inflated while the
//! body streams in, decoded into a typed voxel buffer with a header, and
//! given a plausible voxel-to-world transform. Tiled and chunked pyramids are
//! served through bounded LRU caches that never fetch the same key twice
//! concurrently.
//!
//! ## Features
//!
//! - **Formats**: NIfTI-1/2, Analyze, ECAT7, AFNI, MGH/MGZ, NRRD,
//!   NumPy `.npy`/`.npz`, PNG/JPEG/BMP and Zarr v2
//! - **Streaming gzip**: bodies are inflated chunk by chunk as they arrive
//! - **Paired files**: AFNI `.HEAD`/`.BRIK`, Analyze `.hdr`/`.img` and
//!   detached NRRD headers, with a `.gz` fallback for the data file
//! - **Affine repair**: qform/sform selection and a fallback for degenerate
//!   transforms
//! - **Caching**: tile and chunk LRU caches with in-flight deduplication
//!
//! ## Architecture
//!
//! - [`io`] - Byte sources, streaming fetcher and paired-file resolution
//! - [`mod@format`] - Format detection and decoders
//! - [`affine`] - Header transform pipeline
//! - [`volume`] - Volume types and the loader tying the above together
//! - [`zarr`] - Zarr v2 arrays and slab reads
//! - [`cache`] - Bounded LRU cache with loading markers
//! - [`tile`] - Pyramid tile client, cache and service
//! - [`chunk`] - Zarr chunk client, cache and service
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use volume_streamer::{LoadOptions, StreamingFetcher, VolumeLoader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), volume_streamer::VolumeError> {
//!     let loader = VolumeLoader::new(StreamingFetcher::default());
//!
//!     let volume = loader
//!         .load_url("https://example.com/brain.nii.gz", &LoadOptions::new())
//!         .await?;
//!     println!("{:?} {:?}", volume.header.datatype, &volume.header.dims[1..4]);
//!     Ok(())
//! }
//! ```

pub mod affine;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod tile;
pub mod volume;
pub mod zarr;

// Re-export commonly used types
pub use affine::{is_affine_plausible, process_affine};
pub use cache::{BoundedCache, CachePayload, LoadingGuard};
pub use chunk::{ChunkCache, ChunkKey, ChunkService, TypedArray, ZarrChunkClient};
pub use config::{Command, Config};
pub use error::{FetchError, FormatError, TileError, VolumeError};
pub use format::{DecodeInput, DecoderRegistry, VolumeDecoder, VolumeFormat};
pub use io::{
    create_s3_client, fetch_paired, paired_url, ByteSource, FetchOptions, MemorySource,
    RoutingSource, StreamingFetcher,
};
pub use tile::{TileBitmap, TileCache, TileClient, TileKey, TileService};
pub use volume::{DataType, Header, LoadOptions, RawVoxelBuffer, Volume, VolumeLoader};
pub use zarr::{read_volume, SliceSelection, ZarrArray, ZarrStore};
