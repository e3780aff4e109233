use std::collections::HashMap;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FormatError, VolumeError};
use crate::io::{FetchOptions, StreamingFetcher};
use crate::zarr::{ZarrArray, ZarrStore};

use super::cache::{ChunkKey, TypedArray};

/// Highest level index tried when a store has no multiscale metadata.
const MAX_GUESSED_LEVELS: u32 = 20;

// =============================================================================
// Pyramid metadata
// =============================================================================

/// One resolution level of a chunked store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZarrPyramidLevel {
    /// Level index (0 = highest resolution)
    pub index: u32,

    /// Array path inside the store, `/` for a root array
    pub path: String,

    pub shape: Vec<usize>,

    pub chunks: Vec<usize>,

    /// Element type name, e.g. `uint16`
    pub dtype: String,
}

/// Layout of a chunked store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZarrPyramidInfo {
    pub name: String,
    pub levels: Vec<ZarrPyramidLevel>,
    pub is_3d: bool,
    pub ndim: usize,
}

#[derive(Debug, Deserialize)]
struct Multiscale {
    datasets: Vec<MultiscaleDataset>,
}

#[derive(Debug, Deserialize)]
struct MultiscaleDataset {
    path: String,
}

/// First multiscale entry of a group's attributes; newer layouts nest it
/// under `ome`.
fn first_multiscale(attrs: &serde_json::Value) -> Option<Multiscale> {
    let list = match attrs.get("ome") {
        Some(ome) if ome.is_object() => ome.get("multiscales")?,
        _ => attrs.get("multiscales")?,
    };
    let first = list.as_array()?.first()?.clone();
    serde_json::from_value(first).ok()
}

// =============================================================================
// Client
// =============================================================================

/// Reads chunks of a (possibly multiscale) Zarr store.
pub struct ZarrChunkClient {
    store: ZarrStore,
    levels: RwLock<HashMap<u32, ZarrArray>>,
}

impl ZarrChunkClient {
    pub fn new(fetcher: StreamingFetcher, base_url: &str, options: FetchOptions) -> Self {
        Self {
            store: ZarrStore::new(fetcher, base_url, options),
            levels: RwLock::new(HashMap::new()),
        }
    }

    /// Store root URL.
    pub fn url(&self) -> &str {
        self.store.root()
    }

    /// Discover the pyramid.
    ///
    /// A single array at the root is level 0. Otherwise the group's
    /// multiscale metadata lists the levels, and without it `/0`, `/1`, ...
    /// are tried in turn until one is missing.
    pub async fn fetch_info(&self) -> Result<ZarrPyramidInfo, VolumeError> {
        let mut found: Vec<(u32, String, ZarrArray)> = Vec::new();

        match ZarrArray::open(&self.store, "").await {
            Ok(array) => found.push((0, "/".to_string(), array)),
            Err(e) => {
                debug!(url = self.url(), error = %e, "no root array, reading group metadata");
                let attrs = self.store.get_json(".zattrs").await.unwrap_or_else(|e| {
                    debug!(error = %e, "unreadable group attributes");
                    None
                });
                match attrs.as_ref().and_then(first_multiscale) {
                    Some(multiscale) if !multiscale.datasets.is_empty() => {
                        for (index, dataset) in multiscale.datasets.iter().enumerate() {
                            let path = format!("/{}", dataset.path.trim_start_matches('/'));
                            match ZarrArray::open(&self.store, &path).await {
                                Ok(array) => found.push((index as u32, path, array)),
                                Err(e) => warn!(path = %path, error = %e, "failed to open level"),
                            }
                        }
                    }
                    _ => {
                        for index in 0..MAX_GUESSED_LEVELS {
                            let path = format!("/{index}");
                            match ZarrArray::open(&self.store, &path).await {
                                Ok(array) => found.push((index, path, array)),
                                Err(_) => break,
                            }
                        }
                    }
                }
            }
        }

        if found.is_empty() {
            return Err(FormatError::Zarr(format!("no zarr arrays found at {}", self.url())).into());
        }

        let levels: Vec<ZarrPyramidLevel> = found
            .iter()
            .map(|(index, path, array)| ZarrPyramidLevel {
                index: *index,
                path: path.clone(),
                shape: array.shape().to_vec(),
                chunks: array.chunks().to_vec(),
                dtype: array.dtype().element.datatype().name().to_string(),
            })
            .collect();
        {
            let mut cached = self.levels.write();
            for (index, _, array) in found {
                cached.insert(index, array);
            }
        }

        let ndim = levels[0].shape.len();
        Ok(ZarrPyramidInfo {
            name: self.url().to_string(),
            levels,
            is_3d: ndim >= 3,
            ndim,
        })
    }

    async fn open_level(&self, level: u32) -> Result<ZarrArray, VolumeError> {
        let cached = self.levels.read().get(&level).cloned();
        if let Some(array) = cached {
            return Ok(array);
        }

        let path = if level == 0 {
            String::new()
        } else {
            format!("/{level}")
        };
        let array = match ZarrArray::open(&self.store, &path).await {
            Ok(array) => array,
            Err(_) if level == 0 => ZarrArray::open(&self.store, "/0").await?,
            Err(e) => return Err(e),
        };
        self.levels.write().insert(level, array.clone());
        Ok(array)
    }

    /// Fetch one chunk by chunk-grid coordinates.
    ///
    /// 3D stores are addressed as `[z, y, x]`, 2D stores as `[y, x]`; any
    /// leading axes (time, channel) are taken at chunk 0. Failures are
    /// logged and reported as `None`.
    pub async fn fetch_chunk(&self, level: u32, x: u32, y: u32, z: Option<u32>) -> Option<TypedArray> {
        match self.try_fetch_chunk(level, x, y, z).await {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                debug!(level, x, y, ?z, error = %e, "chunk fetch failed");
                None
            }
        }
    }

    async fn try_fetch_chunk(
        &self,
        level: u32,
        x: u32,
        y: u32,
        z: Option<u32>,
    ) -> Result<TypedArray, VolumeError> {
        let array = self.open_level(level).await?;
        let rank = array.shape().len();

        let spatial: Vec<usize> = match z {
            Some(z) if rank >= 3 => vec![z as usize, y as usize, x as usize],
            _ => vec![y as usize, x as usize],
        };
        if spatial.len() > rank {
            return Err(FormatError::Zarr(format!(
                "{rank}D array cannot be addressed with {} chunk coordinates",
                spatial.len()
            ))
            .into());
        }
        let mut coords = vec![0; rank - spatial.len()];
        coords.extend(spatial);

        let data = array.fetch_chunk(&coords).await?;
        TypedArray::from_le_bytes(array.dtype().element, &data).ok_or_else(|| {
            FormatError::UnsupportedDatatype {
                format: "Zarr",
                code: array.dtype().element.datatype().name().to_string(),
            }
            .into()
        })
    }

    /// Fetch many chunks of `level` concurrently. Failed chunks are left out.
    pub async fn fetch_chunks(&self, keys: &[ChunkKey]) -> Vec<(ChunkKey, TypedArray)> {
        let results = join_all(keys.iter().map(|key| async move {
            self.fetch_chunk(key.level, key.x, key.y, key.z)
                .await
                .map(|chunk| (key.clone(), chunk))
        }))
        .await;
        results.into_iter().flatten().collect()
    }

    /// Forget opened arrays so the next access re-reads their metadata.
    pub fn clear_array_cache(&self) {
        self.levels.write().clear();
    }
}
