//! Chunk cache keys and payloads.

use std::fmt;
use std::sync::Arc;

use crate::cache::{BoundedCache, CachePayload};
use crate::zarr::ElementType;

/// Default number of chunks kept in memory.
pub const DEFAULT_CHUNK_CACHE_CAPACITY: usize = 500;

/// Cache of decoded chunks. Chunks are plain memory; nothing is released on
/// eviction.
pub type ChunkCache = BoundedCache<TypedArray>;

/// Identifies one chunk of one store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    /// Store name or URL
    pub name: Arc<str>,

    /// Pyramid level (0 = highest resolution)
    pub level: u32,

    pub x: u32,

    pub y: u32,

    /// Chunk depth index, absent for 2D stores
    pub z: Option<u32>,
}

impl ChunkKey {
    pub fn new_2d(name: impl Into<Arc<str>>, level: u32, x: u32, y: u32) -> Self {
        Self {
            name: name.into(),
            level,
            x,
            y,
            z: None,
        }
    }

    pub fn new_3d(name: impl Into<Arc<str>>, level: u32, x: u32, y: u32, z: u32) -> Self {
        Self {
            name: name.into(),
            level,
            x,
            y,
            z: Some(z),
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}/{}", self.name, self.level, self.x, self.y)?;
        if let Some(z) = self.z {
            write!(f, "/{z}")?;
        }
        Ok(())
    }
}

/// Decoded chunk samples.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    U8(Arc<[u8]>),
    I8(Arc<[i8]>),
    U16(Arc<[u16]>),
    I16(Arc<[i16]>),
    U32(Arc<[u32]>),
    I32(Arc<[i32]>),
    F32(Arc<[f32]>),
    F64(Arc<[f64]>),
}

macro_rules! from_le {
    ($variant:ident, $ty:ty, $data:expr) => {{
        const SIZE: usize = std::mem::size_of::<$ty>();
        if $data.len() % SIZE != 0 {
            return None;
        }
        TypedArray::$variant(
            $data
                .chunks_exact(SIZE)
                .map(|b| {
                    let mut raw = [0u8; SIZE];
                    raw.copy_from_slice(b);
                    <$ty>::from_le_bytes(raw)
                })
                .collect(),
        )
    }};
}

impl TypedArray {
    /// Interpret little-endian `data` as elements of `element`.
    ///
    /// Returns `None` for 64-bit integer elements, and when `data` ends in a
    /// partial element.
    pub fn from_le_bytes(element: ElementType, data: &[u8]) -> Option<Self> {
        let array = match element {
            ElementType::Bool | ElementType::U8 => TypedArray::U8(data.into()),
            ElementType::I8 => TypedArray::I8(data.iter().map(|&b| b as i8).collect()),
            ElementType::U16 => from_le!(U16, u16, data),
            ElementType::I16 => from_le!(I16, i16, data),
            ElementType::U32 => from_le!(U32, u32, data),
            ElementType::I32 => from_le!(I32, i32, data),
            ElementType::F32 => from_le!(F32, f32, data),
            ElementType::F64 => from_le!(F64, f64, data),
            ElementType::U64 | ElementType::I64 => return None,
        };
        Some(array)
    }

    pub fn len(&self) -> usize {
        match self {
            TypedArray::U8(v) => v.len(),
            TypedArray::I8(v) => v.len(),
            TypedArray::U16(v) => v.len(),
            TypedArray::I16(v) => v.len(),
            TypedArray::U32(v) => v.len(),
            TypedArray::I32(v) => v.len(),
            TypedArray::F32(v) => v.len(),
            TypedArray::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample `index` widened to `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        Some(match self {
            TypedArray::U8(v) => f64::from(*v.get(index)?),
            TypedArray::I8(v) => f64::from(*v.get(index)?),
            TypedArray::U16(v) => f64::from(*v.get(index)?),
            TypedArray::I16(v) => f64::from(*v.get(index)?),
            TypedArray::U32(v) => f64::from(*v.get(index)?),
            TypedArray::I32(v) => f64::from(*v.get(index)?),
            TypedArray::F32(v) => f64::from(*v.get(index)?),
            TypedArray::F64(v) => *v.get(index)?,
        })
    }
}

impl CachePayload for TypedArray {}
