//! Tile cache keys.
//!
//! Tiles are cached by image name, pyramid level and tile column/row. The
//! string form `name:level/x/y` is the key used in the cache.

use std::fmt;
use std::sync::Arc;

use crate::cache::BoundedCache;

use super::bitmap::TileBitmap;

/// Default number of tiles kept in memory.
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 500;

/// Cache of decoded tiles. Evicted tiles release their bitmap resource.
pub type TileCache = BoundedCache<TileBitmap>;

/// Identifies one tile of one image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Image name as known to the tile server
    pub name: Arc<str>,

    /// Pyramid level (0 = highest resolution)
    pub level: u32,

    /// Tile column
    pub x: u32,

    /// Tile row
    pub y: u32,
}

impl TileKey {
    pub fn new(name: impl Into<Arc<str>>, level: u32, x: u32, y: u32) -> Self {
        Self {
            name: name.into(),
            level,
            x,
            y,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}/{}", self.name, self.level, self.x, self.y)
    }
}
