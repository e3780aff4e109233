use std::sync::Arc;

use image::RgbaImage;

use crate::cache::CachePayload;

/// Owner of bitmap resources outside this process's heap, such as GPU
/// textures.
///
/// Every id returned by `upload` is passed to `release` exactly once, after
/// the cache and every caller holding a clone of the tile have let go of it.
pub trait BitmapAllocator: Send + Sync {
    /// Register `image` and return its resource id.
    fn upload(&self, image: &RgbaImage) -> u64;

    /// Free the resource behind `id`.
    fn release(&self, id: u64);
}

/// One uploaded resource. Returned to the allocator when dropped.
struct BitmapHandle {
    id: u64,
    allocator: Arc<dyn BitmapAllocator>,
}

impl Drop for BitmapHandle {
    fn drop(&mut self) {
        self.allocator.release(self.id);
    }
}

/// A decoded tile bitmap, optionally backed by an allocator resource.
///
/// Clones share the resource. It is released when the last clone is dropped.
#[derive(Clone)]
pub struct TileBitmap {
    image: Arc<RgbaImage>,
    handle: Option<Arc<BitmapHandle>>,
}

impl TileBitmap {
    /// A bitmap with no external resource.
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            handle: None,
        }
    }

    /// Upload `image` to `allocator` and wrap the resulting resource.
    pub fn with_allocator(image: RgbaImage, allocator: Arc<dyn BitmapAllocator>) -> Self {
        let id = allocator.upload(&image);
        Self {
            image: Arc::new(image),
            handle: Some(Arc::new(BitmapHandle { id, allocator })),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Allocator resource id, if the bitmap was uploaded.
    pub fn resource_id(&self) -> Option<u64> {
        self.handle.as_ref().map(|h| h.id)
    }
}

impl std::fmt::Debug for TileBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileBitmap")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("resource_id", &self.resource_id())
            .finish()
    }
}

// Releasing drops the cache's clone; the handle frees the resource once no
// caller holds one either.
impl CachePayload for TileBitmap {
    fn shares_resource(&self, other: &Self) -> bool {
        match (&self.handle, &other.handle) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => Arc::ptr_eq(&self.image, &other.image),
            _ => false,
        }
    }
}
