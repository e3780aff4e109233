//! Canonical volume representation and the ingestion entry point.
//!
//! Every decoder produces a [`Volume`]: a [`Header`] plus a [`RawVoxelBuffer`].
//! The [`VolumeLoader`] ties acquisition, detection, decoding and affine
//! repair together:
//!
//! ```text
//! source ──▶ StreamingFetcher ──▶ detect ──▶ decoder ──▶ process_affine ──▶ Volume
//! ```

mod datatype;
mod header;
mod loader;

use bytes::Bytes;

pub use datatype::DataType;
pub(crate) use datatype::swap_bytes_in_place;
pub use header::{affine_from_rows, affine_to_rows, Affine, Header, IDENTITY, ZERO_AFFINE};
pub use loader::{LoadOptions, VolumeLoader};

use crate::error::{FormatError, VolumeError};

/// Typed voxel bytes.
///
/// The length always equals `datatype.buffer_len(voxel_count)`; multi-byte
/// elements are stored little-endian.
#[derive(Debug, Clone, PartialEq)]
pub struct RawVoxelBuffer {
    datatype: DataType,
    data: Bytes,
}

impl RawVoxelBuffer {
    /// Wrap `data`, checking it holds exactly `voxel_count` elements.
    pub fn new(
        datatype: DataType,
        data: impl Into<Bytes>,
        voxel_count: usize,
    ) -> Result<Self, VolumeError> {
        let data = data.into();
        let expected = datatype
            .buffer_len(voxel_count)
            .ok_or_else(|| FormatError::InvalidHeader {
                format: "volume",
                message: format!("{voxel_count} {datatype:?} voxels overflow the addressable size"),
            })?;
        if data.len() != expected {
            return Err(VolumeError::DimensionMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { datatype, data })
    }

    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// A decoded volume ready for the renderer.
#[derive(Debug, Clone)]
pub struct Volume {
    pub header: Header,
    pub voxels: RawVoxelBuffer,
}

impl Volume {
    /// Pair a header with its voxel bytes, validating the length.
    pub fn new(header: Header, data: impl Into<Bytes>) -> Result<Self, VolumeError> {
        let voxel_count = header.voxel_count().ok_or_else(|| header.overflow("volume"))?;
        let voxels = RawVoxelBuffer::new(header.datatype, data, voxel_count)?;
        Ok(Self { header, voxels })
    }
}
