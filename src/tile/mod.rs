//! Tiled access to remote pyramidal images.
//!
//! A tile server exposes each image as a pyramid of fixed-size tiles. This
//! module fetches tiles over the streaming fetcher, decodes them to bitmaps
//! and keeps recently used ones in a bounded cache.
//!
//! # Components
//!
//! - [`TileService`]: cache lookup, deduplicated fetch and insert
//! - [`TileClient`]: URL construction, tile and pyramid metadata fetches
//! - [`TileCache`]: LRU of [`TileBitmap`]s that releases evicted bitmaps
//! - [`BitmapAllocator`]: hook for bitmaps that own external resources
//!
//! # Example
//!
//! ```
//! use volume_streamer::io::StreamingFetcher;
//! use volume_streamer::tile::{TileClient, TileClientConfig, TileKey, TileService};
//!
//! # async fn run() {
//! let client = TileClient::new(
//!     StreamingFetcher::default(),
//!     TileClientConfig::new("http://localhost:3000"),
//! );
//! let service = TileService::with_capacity(client, 256);
//!
//! if let Some(response) = service.get_tile(&TileKey::new("slide.tif", 0, 2, 3)).await {
//!     println!("{}x{} (cached: {})", response.tile.width(), response.tile.height(), response.cache_hit);
//! }
//! # }
//! ```

mod bitmap;
mod cache;
mod client;
mod service;

pub use bitmap::{BitmapAllocator, TileBitmap};
pub use cache::{TileCache, TileKey, DEFAULT_TILE_CACHE_CAPACITY};
pub use client::{
    PyramidInfo, PyramidLevel, TileClient, TileClientConfig, DEFAULT_INFO_PATTERN,
    DEFAULT_TILE_PATTERN,
};
pub use service::{TileResponse, TileService};
