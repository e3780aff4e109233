//! Zarr arrays as volumes.

use tracing::debug;

use crate::error::{FormatError, VolumeError};
use crate::io::{FetchOptions, StreamingFetcher};
use crate::volume::{DataType, Header, Volume};

use super::array::{Region, ZarrArray};
use super::metadata::{Dtype, ElementType};
use super::selection::SliceSelection;
use super::store::ZarrStore;

/// Trailing extent that marks a 4D array as colour.
const RGB_CHANNELS: usize = 3;

/// Read the slab of the Zarr array at `location` selected by its query.
///
/// Indices past the end of an axis are clamped to its last position.
pub async fn read_volume(
    fetcher: &StreamingFetcher,
    location: &str,
    options: &FetchOptions,
) -> Result<Volume, VolumeError> {
    let (root, selection) = SliceSelection::parse(location)?;
    let store = ZarrStore::new(fetcher.clone(), &root, options.clone());
    let array = ZarrArray::open(&store, "").await?;

    let shape = array.shape().to_vec();
    if !(3..=4).contains(&shape.len()) {
        return Err(FormatError::Zarr(format!(
            "expected a 3D or 4D array, {root} has {} axes",
            shape.len()
        ))
        .into());
    }

    let selection = selection.clamp_to(&shape);
    debug!(root = %root, ?shape, ?selection, "reading zarr slab");
    let region = array.get_region(&selection.to_axes(shape.len())).await?;
    volume_from_region(region, array.dtype())
}

/// Turn a `(height, width, depth[, channels])` region into a volume.
///
/// Depth becomes the slowest axis. A trailing axis of three `u8` channels
/// becomes RGB24; other 4D regions keep channel 0.
pub fn volume_from_region(region: Region, dtype: Dtype) -> Result<Volume, VolumeError> {
    let Region { shape, data } = region;
    if shape.len() < 3 || shape.iter().any(|&n| n == 0) {
        return Err(FormatError::Zarr(format!("cannot build a volume from region {shape:?}")).into());
    }
    let size = dtype.size();
    let expected = shape.iter().try_fold(size, |bytes, &n| bytes.checked_mul(n));
    if expected != Some(data.len()) {
        return Err(FormatError::Zarr(format!(
            "region {shape:?} does not match its {} data bytes",
            data.len()
        ))
        .into());
    }
    let (height, width, depth) = (shape[0], shape[1], shape[2]);
    let slice_voxels = height * width;

    let (datatype, voxels) = match shape.get(3).copied() {
        Some(RGB_CHANNELS) => {
            if !matches!(dtype.element, ElementType::U8 | ElementType::Bool) {
                return Err(FormatError::Zarr(format!(
                    "RGB arrays must hold uint8 samples, found {}",
                    dtype.element.datatype()
                ))
                .into());
            }
            let rgb = depth_last(&data, slice_voxels, depth, RGB_CHANNELS);
            (DataType::Rgb24, rgb)
        }
        Some(channels) => {
            let first: Vec<u8> = data
                .chunks_exact(size * channels)
                .flat_map(|voxel| &voxel[..size])
                .copied()
                .collect();
            (
                dtype.element.datatype(),
                depth_last(&first, slice_voxels, depth, size),
            )
        }
        None => (
            dtype.element.datatype(),
            depth_last(&data, slice_voxels, depth, size),
        ),
    };

    let extent = |n: usize| {
        i64::try_from(n).map_err(|_| FormatError::Zarr(format!("extent {n} is too large")))
    };
    let mut header = Header::new(datatype, extent(width)?, extent(height)?, extent(depth)?);
    header.set_centered_raster_affine();
    Volume::new(header, voxels)
}

/// Reorder `[voxel][slice]` elements into `[slice][voxel]`.
fn depth_last(src: &[u8], slice_voxels: usize, depth: usize, element: usize) -> Vec<u8> {
    if depth == 1 {
        return src.to_vec();
    }
    let mut out = vec![0u8; src.len()];
    for voxel in 0..slice_voxels {
        for slice in 0..depth {
            let from = (voxel * depth + slice) * element;
            let to = (slice * slice_voxels + voxel) * element;
            out[to..to + element].copy_from_slice(&src[from..from + element]);
        }
    }
    out
}
