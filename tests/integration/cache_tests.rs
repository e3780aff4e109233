//! Cache eviction, release and in-flight deduplication tests.

use std::sync::Arc;
use std::time::Duration;

use volume_streamer::chunk::{ChunkService, ZarrChunkClient};
use volume_streamer::io::{FetchOptions, MemorySource, StreamingFetcher};
use volume_streamer::tile::{TileClient, TileClientConfig, TileKey, TileService};

use super::test_utils::*;

const TILE_BASE: &str = "http://tiles.test";

fn tile_url(name: &str, level: u32, x: u32, y: u32) -> String {
    format!("{TILE_BASE}/api/images/{name}/tile/{level}/{x}/{y}")
}

fn tile_service(
    source: &MemorySource,
    allocator: &Arc<CountingAllocator>,
    capacity: usize,
) -> TileService {
    let client = TileClient::new(
        StreamingFetcher::new(source.clone()),
        TileClientConfig::new(TILE_BASE),
    )
    .with_allocator(allocator.clone());
    TileService::with_capacity(client, capacity)
}

// =============================================================================
// Tile Cache
// =============================================================================

#[tokio::test]
async fn test_evicted_tile_released_exactly_once() {
    let source = MemorySource::new();
    for x in 0..3 {
        source.insert(tile_url("slide", 0, x, 0), png(2, 2, [x as u8, 0, 0, 255]));
    }
    let allocator = CountingAllocator::new();
    let service = tile_service(&source, &allocator, 2);

    let mut ids = Vec::new();
    for x in 0..3 {
        let response = service.get_tile(&TileKey::new("slide", 0, x, 0)).await.unwrap();
        ids.push(response.tile.resource_id().unwrap());
    }

    assert_eq!(allocator.uploads(), 3);
    assert_eq!(allocator.releases_of(ids[0]), 1);
    assert_eq!(allocator.releases_of(ids[1]), 0);
    assert_eq!(allocator.releases_of(ids[2]), 0);
    assert_eq!(service.cache().len(), 2);
    assert_eq!(service.cache().keys(), vec!["slide:0/2/0", "slide:0/1/0"]);

    // Evicted tile is fetched again
    let again = service.get_tile(&TileKey::new("slide", 0, 0, 0)).await.unwrap();
    assert!(!again.cache_hit);
    assert_eq!(source.requests_for(&tile_url("slide", 0, 0, 0)), 2);
    assert_eq!(allocator.releases_of(ids[1]), 1);
}

#[tokio::test]
async fn test_held_tile_survives_eviction() {
    let source = MemorySource::new();
    for x in 0..2 {
        source.insert(tile_url("slide", 0, x, 0), png(2, 2, [x as u8, 0, 0, 255]));
    }
    let allocator = CountingAllocator::new();
    let service = tile_service(&source, &allocator, 1);

    let held = service.get_tile(&TileKey::new("slide", 0, 0, 0)).await.unwrap();
    let id = held.tile.resource_id().unwrap();
    service.get_tile(&TileKey::new("slide", 0, 1, 0)).await.unwrap();

    assert!(!service.cache().has("slide:0/0/0"));
    assert_eq!(allocator.releases_of(id), 0);
    assert_eq!(held.tile.width(), 2);

    drop(held);
    assert_eq!(allocator.releases_of(id), 1);
}

#[tokio::test]
async fn test_clear_releases_everything_once() {
    let source = MemorySource::new();
    for y in 0..2 {
        source.insert(tile_url("s", 1, 0, y), png(1, 1, [0, 0, 0, 255]));
    }
    let allocator = CountingAllocator::new();
    let service = tile_service(&source, &allocator, 8);
    for y in 0..2 {
        service.get_tile(&TileKey::new("s", 1, 0, y)).await.unwrap();
    }

    service.cache().clear();
    assert_eq!(allocator.total_releases(), 2);
    assert!(service.cache().is_empty());

    service.cache().clear();
    assert_eq!(allocator.total_releases(), 2);
}

#[tokio::test]
async fn test_concurrent_tile_requests_fetch_once() {
    let source = MemorySource::new().with_latency(Duration::from_millis(40));
    source.insert(tile_url("scan", 2, 5, 7), png(4, 4, [1, 2, 3, 255]));
    let allocator = CountingAllocator::new();
    let service = Arc::new(tile_service(&source, &allocator, 4));
    let key = TileKey::new("scan", 2, 5, 7);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let service = service.clone();
            let key = key.clone();
            tokio::spawn(async move { service.get_tile(&key).await })
        })
        .collect();

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.tile.width(), 4);
    }
    assert_eq!(source.request_count(), 1);
    assert_eq!(allocator.uploads(), 1);
    assert_eq!(service.cache().loading_count(), 0);
}

#[tokio::test]
async fn test_failed_leader_lets_later_requests_retry() {
    let source = MemorySource::new().with_latency(Duration::from_millis(20));
    let allocator = CountingAllocator::new();
    let service = Arc::new(tile_service(&source, &allocator, 4));
    let key = TileKey::new("gone", 0, 0, 0);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            let key = key.clone();
            tokio::spawn(async move { service.get_tile(&key).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_none());
    }
    assert_eq!(source.request_count(), 1);
    assert!(!service.cache().is_loading("gone:0/0/0"));

    // The tile appears later and is picked up
    source.insert(tile_url("gone", 0, 0, 0), png(1, 1, [0, 0, 0, 255]));
    assert!(service.get_tile(&key).await.is_some());
    assert_eq!(source.request_count(), 2);
}

// =============================================================================
// Chunk Cache
// =============================================================================

const STORE: &str = "mem://cells.zarr";

fn chunk_service(source: &MemorySource, capacity: usize) -> ChunkService {
    insert_zarr_u8(source, STORE, [4, 4, 4], [2, 2, 2]);
    let client = ZarrChunkClient::new(
        StreamingFetcher::new(source.clone()),
        STORE,
        FetchOptions::new(),
    );
    ChunkService::with_capacity(client, capacity)
}

#[tokio::test]
async fn test_chunks_addressed_depth_first() {
    let source = MemorySource::new();
    let service = chunk_service(&source, 8);

    let info = service.pyramid_info().await.unwrap();
    assert!(info.is_3d);
    assert_eq!(info.levels[0].chunks, vec![2, 2, 2]);

    let chunk = service
        .get_chunk(&service.key(0, 1, 0, Some(1)))
        .await
        .unwrap();
    assert_eq!(chunk.len(), 8);
    // First sample of chunk z=1, y=0, x=1 sits at array index (2, 0, 2)
    assert_eq!(chunk.get_f64(0), Some(34.0));
    assert_eq!(source.requests_for(&format!("{STORE}/1.0.1")), 1);
}

#[tokio::test]
async fn test_chunk_cache_bounded_and_deduplicated() {
    let source = MemorySource::new().with_latency(Duration::from_millis(20));
    let service = Arc::new(chunk_service(&source, 4));
    service.pyramid_info().await.unwrap();
    source.reset_tracking();

    let keys: Vec<_> = (0..2)
        .flat_map(|z| (0..2).map(move |x| (x, z)))
        .map(|(x, z)| service.key(0, x, 0, Some(z)))
        .collect();

    // Every key requested twice at once
    let handles: Vec<_> = keys
        .iter()
        .chain(keys.iter())
        .cloned()
        .map(|key| {
            let service = service.clone();
            tokio::spawn(async move { service.get_chunk(&key).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }
    assert_eq!(source.request_count(), 4);
    assert_eq!(service.cache().loading_count(), 0);

    for x in 0..2 {
        service.get_chunk(&service.key(0, x, 1, Some(0))).await.unwrap();
    }
    assert_eq!(source.request_count(), 6);
    assert_eq!(service.cache().len(), 4);
    let survivors = keys
        .iter()
        .filter(|key| service.cache().has(&key.to_string()))
        .count();
    assert_eq!(survivors, 2);
}
