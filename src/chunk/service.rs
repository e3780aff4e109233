use std::sync::Arc;

use tracing::debug;

use crate::cache::BoundedCache;
use crate::error::VolumeError;

use super::cache::{ChunkCache, ChunkKey, TypedArray, DEFAULT_CHUNK_CACHE_CAPACITY};
use super::client::{ZarrChunkClient, ZarrPyramidInfo};

/// Cached, deduplicated chunk access for one store.
pub struct ChunkService {
    client: ZarrChunkClient,
    cache: Arc<ChunkCache>,
}

impl ChunkService {
    pub fn new(client: ZarrChunkClient) -> Self {
        Self::with_capacity(client, DEFAULT_CHUNK_CACHE_CAPACITY)
    }

    pub fn with_capacity(client: ZarrChunkClient, capacity: usize) -> Self {
        Self::with_cache(client, Arc::new(BoundedCache::new(capacity)))
    }

    pub fn with_cache(client: ZarrChunkClient, cache: Arc<ChunkCache>) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    pub fn client(&self) -> &ZarrChunkClient {
        &self.client
    }

    pub async fn pyramid_info(&self) -> Result<ZarrPyramidInfo, VolumeError> {
        self.client.fetch_info().await
    }

    /// Key for a chunk of this service's store.
    pub fn key(&self, level: u32, x: u32, y: u32, z: Option<u32>) -> ChunkKey {
        ChunkKey {
            name: self.client.url().into(),
            level,
            x,
            y,
            z,
        }
    }

    /// Get a chunk, fetching it on a miss.
    ///
    /// A request that arrives while the same chunk is loading waits for that
    /// load instead of fetching again.
    pub async fn get_chunk(&self, key: &ChunkKey) -> Option<TypedArray> {
        let cache_key = key.to_string();
        loop {
            if let Some(chunk) = self.cache.get(&cache_key) {
                return Some(chunk);
            }

            if self.cache.is_loading(&cache_key) {
                debug!(chunk = %cache_key, "waiting for in-flight chunk");
                self.cache.wait_for(&cache_key).await;
                return self.cache.get(&cache_key);
            }

            let Some(_loading) = self.cache.begin_loading(&cache_key) else {
                continue;
            };

            let chunk = self
                .client
                .fetch_chunk(key.level, key.x, key.y, key.z)
                .await?;
            self.cache.set(cache_key.as_str(), chunk.clone());
            return Some(chunk);
        }
    }

    /// Fetch every chunk in `keys` that is neither cached nor loading.
    ///
    /// Returns how many chunks were added to the cache.
    pub async fn prefetch(&self, keys: &[ChunkKey]) -> usize {
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

        let fetched = self.client.fetch_chunks(&claimed).await;
        let count = fetched.len();
        for (key, chunk) in fetched {
            self.cache.set(key.to_string(), chunk);
        }
        drop(guards);
        count
    }
}
