//! PNG, JPEG and BMP import as a single-slice volume.

use image::RgbaImage;

use crate::error::{FormatError, VolumeError};
use crate::volume::{DataType, Header, Volume};

use super::registry::{DecodeInput, VolumeDecoder};

/// Decoder for 2D raster images.
///
/// Images whose red, green and blue channels agree everywhere are stored as
/// one byte per pixel; everything else is kept as packed RGBA.
pub struct RasterDecoder;

impl VolumeDecoder for RasterDecoder {
    fn name(&self) -> &'static str {
        "Raster image"
    }

    fn decode(&self, input: &DecodeInput<'_>) -> Result<Volume, VolumeError> {
        let image = image::load_from_memory(input.data)
            .map_err(|e| FormatError::Image(e.to_string()))?
            .to_rgba8();
        volume_from_rgba(image)
    }
}

/// Build the single-slice volume for an RGBA bitmap.
pub fn volume_from_rgba(image: RgbaImage) -> Result<Volume, VolumeError> {
    let (width, height) = image.dimensions();
    let grayscale = image.pixels().all(|p| p[0] == p[1] && p[0] == p[2]);

    let datatype = if grayscale {
        DataType::UInt8
    } else {
        DataType::Rgba32
    };
    let mut header = Header::new(datatype, width as i64, height as i64, 1);
    header.set_centered_raster_affine();

    let voxels = if grayscale {
        image.pixels().map(|p| p[0]).collect()
    } else {
        image.into_raw()
    };
    Volume::new(header, voxels)
}
