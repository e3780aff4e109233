use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TileError;
use crate::io::{FetchOptions, StreamingFetcher};

use super::bitmap::{BitmapAllocator, TileBitmap};
use super::cache::TileKey;

/// Default tile path. Placeholders: `{name}`, `{level}`, `{x}`, `{y}`.
pub const DEFAULT_TILE_PATTERN: &str = "/api/images/{name}/tile/{level}/{x}/{y}";

/// Default pyramid metadata path. Placeholder: `{name}`.
pub const DEFAULT_INFO_PATTERN: &str = "/api/images/{name}/info";

// =============================================================================
// Configuration
// =============================================================================

/// Where a tile server lives and how its URLs are built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileClientConfig {
    /// Prefix for every URL, e.g. `http://localhost:3000`; empty for relative
    pub base_url: String,

    pub tile_pattern: String,

    pub info_pattern: String,
}

impl TileClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for TileClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            tile_pattern: DEFAULT_TILE_PATTERN.to_string(),
            info_pattern: DEFAULT_INFO_PATTERN.to_string(),
        }
    }
}

// =============================================================================
// Pyramid metadata
// =============================================================================

/// One resolution level of a tiled image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PyramidLevel {
    pub index: u32,
    pub width: u64,
    pub height: u64,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl PyramidLevel {
    /// Number of tile columns and rows.
    pub fn tile_grid(&self) -> (u64, u64) {
        (
            self.width.div_ceil(u64::from(self.tile_width.max(1))),
            self.height.div_ceil(u64::from(self.tile_height.max(1))),
        )
    }
}

/// Pyramid description returned by the info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidInfo {
    #[serde(default)]
    pub name: String,
    pub levels: Vec<PyramidLevel>,
}

impl PyramidInfo {
    /// Check that `level` exists.
    pub fn level(&self, level: u32) -> Result<&PyramidLevel, TileError> {
        self.levels
            .get(level as usize)
            .ok_or(TileError::InvalidLevel {
                level: level as usize,
                max_levels: self.levels.len(),
            })
    }
}

// =============================================================================
// Client
// =============================================================================

/// Fetches tiles and pyramid metadata from a tile server.
#[derive(Clone)]
pub struct TileClient {
    fetcher: StreamingFetcher,
    config: TileClientConfig,
    options: FetchOptions,
    allocator: Option<Arc<dyn BitmapAllocator>>,
}

impl TileClient {
    pub fn new(fetcher: StreamingFetcher, config: TileClientConfig) -> Self {
        Self {
            fetcher,
            config,
            options: FetchOptions::default(),
            allocator: None,
        }
    }

    /// Request options (headers, cancellation) used for every fetch.
    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Upload every decoded tile to `allocator`.
    pub fn with_allocator(mut self, allocator: Arc<dyn BitmapAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn config(&self) -> &TileClientConfig {
        &self.config
    }

    /// URL of one tile. The image name is percent-encoded.
    pub fn tile_url(&self, name: &str, level: u32, x: u32, y: u32) -> String {
        let path = self
            .config
            .tile_pattern
            .replace("{name}", &urlencoding::encode(name))
            .replace("{level}", &level.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string());
        format!("{}{}", self.config.base_url, path)
    }

    pub fn info_url(&self, name: &str) -> String {
        let path = self
            .config
            .info_pattern
            .replace("{name}", &urlencoding::encode(name));
        format!("{}{}", self.config.base_url, path)
    }

    /// Fetch the pyramid description of `name`.
    pub async fn fetch_info(&self, name: &str) -> Result<PyramidInfo, TileError> {
        let url = self.info_url(name);
        let body = self.fetcher.fetch_with(&url, &self.options).await?;
        let mut info: PyramidInfo =
            serde_json::from_slice(&body).map_err(|e| TileError::Decode {
                key: url.clone(),
                message: e.to_string(),
            })?;
        info.name = name.to_string();
        Ok(info)
    }

    /// Fetch and decode one tile.
    ///
    /// Any failure is logged and reported as `None`.
    pub async fn fetch_tile(&self, key: &TileKey) -> Option<TileBitmap> {
        match self.try_fetch_tile(key).await {
            Ok(tile) => Some(tile),
            Err(e) => {
                debug!(tile = %key, error = %e, "tile fetch failed");
                None
            }
        }
    }

    async fn try_fetch_tile(&self, key: &TileKey) -> Result<TileBitmap, TileError> {
        let url = self.tile_url(&key.name, key.level, key.x, key.y);
        let body = self.fetcher.fetch_raw(&url, &self.options).await?;
        let image = image::load_from_memory(&body)
            .map_err(|e| TileError::Decode {
                key: key.to_string(),
                message: e.to_string(),
            })?
            .to_rgba8();

        Ok(match &self.allocator {
            Some(allocator) => TileBitmap::with_allocator(image, allocator.clone()),
            None => TileBitmap::new(image),
        })
    }

    /// Fetch many tiles concurrently. Failed tiles are left out.
    pub async fn fetch_tiles(&self, keys: &[TileKey]) -> Vec<(TileKey, TileBitmap)> {
        let results = join_all(keys.iter().map(|key| async move {
            self.fetch_tile(key).await.map(|tile| (key.clone(), tile))
        }))
        .await;
        results.into_iter().flatten().collect()
    }
}
