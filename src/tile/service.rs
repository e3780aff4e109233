//! Tile service: cache lookup, deduplicated fetch, cache insert.
//!
//! ```text
//! get_tile(key)
//!   1. cached?           -> return it
//!   2. already loading?  -> wait for that load, return its result
//!   3. mark loading, fetch from the tile server
//!   4. insert (evicting the oldest tile if full), clear the mark
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::cache::BoundedCache;
use crate::error::TileError;

use super::bitmap::TileBitmap;
use super::cache::{TileCache, TileKey, DEFAULT_TILE_CACHE_CAPACITY};
use super::client::{PyramidInfo, TileClient};

/// Result of a tile request.
#[derive(Debug, Clone)]
pub struct TileResponse {
    pub tile: TileBitmap,

    /// Whether the tile was already cached
    pub cache_hit: bool,
}

/// Cached access to a tile server.
///
/// Concurrent requests for the same tile share one fetch.
pub struct TileService {
    client: TileClient,
    cache: Arc<TileCache>,
}

impl TileService {
    pub fn new(client: TileClient) -> Self {
        Self::with_capacity(client, DEFAULT_TILE_CACHE_CAPACITY)
    }

    pub fn with_capacity(client: TileClient, capacity: usize) -> Self {
        Self::with_cache(client, Arc::new(BoundedCache::new(capacity)))
    }

    pub fn with_cache(client: TileClient, cache: Arc<TileCache>) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn client(&self) -> &TileClient {
        &self.client
    }

    pub async fn pyramid_info(&self, name: &str) -> Result<PyramidInfo, TileError> {
        self.client.fetch_info(name).await
    }

    /// Get a tile, fetching it on a miss.
    ///
    /// Returns `None` when the tile could not be fetched or decoded. A
    /// request that arrives while the same tile is loading waits for that
    /// load and does not retry if it failed.
    pub async fn get_tile(&self, key: &TileKey) -> Option<TileResponse> {
        let cache_key = key.to_string();
        loop {
            if let Some(tile) = self.cache.get(&cache_key) {
                return Some(TileResponse {
                    tile,
                    cache_hit: true,
                });
            }

            if self.cache.is_loading(&cache_key) {
                debug!(tile = %cache_key, "waiting for in-flight tile");
                self.cache.wait_for(&cache_key).await;
                return self.cache.get(&cache_key).map(|tile| TileResponse {
                    tile,
                    cache_hit: true,
                });
            }

            // Lost the race to another caller; go round and wait on theirs
            let Some(_loading) = self.cache.begin_loading(&cache_key) else {
                continue;
            };

            let tile = self.client.fetch_tile(key).await?;
            self.cache.set(cache_key.as_str(), tile.clone());
            return Some(TileResponse {
                tile,
                cache_hit: false,
            });
        }
    }

    /// Fetch every tile in `keys` that is neither cached nor loading.
    ///
    /// Returns how many tiles were added to the cache.
    pub async fn prefetch(&self, keys: &[TileKey]) -> usize {
        let mut claimed = Vec::new();
        let mut guards = Vec::new();
        for key in keys {
            let cache_key = key.to_string();
            if self.cache.has(&cache_key) {
                continue;
            }
            if let Some(guard) = self.cache.begin_loading(&cache_key) {
                claimed.push(key.clone());
                guards.push(guard);
            }
        }

        let fetched = self.client.fetch_tiles(&claimed).await;
        let count = fetched.len();
        for (key, tile) in fetched {
            self.cache.set(key.to_string(), tile);
        }
        drop(guards);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemorySource, StreamingFetcher};
    use crate::tile::TileClientConfig;
    use image::{ImageFormat, RgbaImage};
    use std::io::Cursor;
    use std::time::Duration;

    fn png() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbaImage::new(2, 2)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn service(source: &MemorySource, capacity: usize) -> TileService {
        let client = TileClient::new(
            StreamingFetcher::new(source.clone()),
            TileClientConfig::new("http://tiles"),
        );
        TileService::with_capacity(client, capacity)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let source = MemorySource::new();
        source.insert("http://tiles/api/images/s/tile/0/0/0", png());
        let service = service(&source, 4);
        let key = TileKey::new("s", 0, 0, 0);

        assert!(!service.get_tile(&key).await.unwrap().cache_hit);
        assert!(service.get_tile(&key).await.unwrap().cache_hit);
        assert_eq!(source.request_count(), 1);
        assert_eq!(service.cache().loading_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_clears_loading() {
        let source = MemorySource::new();
        let service = service(&source, 4);
        let key = TileKey::new("s", 0, 3, 3);

        assert!(service.get_tile(&key).await.is_none());
        assert!(!service.cache().is_loading("s:0/3/3"));
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_fetch() {
        let source = MemorySource::new().with_latency(Duration::from_millis(30));
        source.insert("http://tiles/api/images/s/tile/0/1/1", png());
        let service = Arc::new(service(&source, 4));
        let key = TileKey::new("s", 0, 1, 1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let key = key.clone();
                tokio::spawn(async move { service.get_tile(&key).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(source.request_count(), 1);
    }

    #[tokio::test]
    async fn test_prefetch_skips_cached() {
        let source = MemorySource::new();
        for x in 0..3 {
            source.insert(format!("http://tiles/api/images/s/tile/0/{x}/0"), png());
        }
        let service = service(&source, 8);
        service.get_tile(&TileKey::new("s", 0, 0, 0)).await.unwrap();

        let keys: Vec<_> = (0..3).map(|x| TileKey::new("s", 0, x, 0)).collect();
        assert_eq!(service.prefetch(&keys).await, 2);
        assert_eq!(service.cache().len(), 3);
        assert_eq!(source.request_count(), 3);
        assert_eq!(service.cache().loading_count(), 0);
    }
}
