//! Decoders for volumetric imaging formats.
//!
//! # Format Detection
//!
//! [`DecoderRegistry`] walks an ordered table of signature predicates and
//! hands the buffer to the first matching [`VolumeDecoder`]. Supported
//! buffer formats:
//!
//! - **NIfTI-1/2, Analyze**: [`nifti::NiftiDecoder`]
//! - **ECAT7**: [`ecat::EcatDecoder`]
//! - **AFNI**: [`afni::AfniDecoder`]
//! - **MGH/MGZ**: [`mgh::MghDecoder`]
//! - **NRRD**: [`nrrd::NrrdDecoder`]
//! - **NumPy**: [`numpy::NpyDecoder`], [`numpy::NpzDecoder`]
//! - **PNG/JPEG/BMP**: [`raster::RasterDecoder`]
//!
//! Zarr stores are addressed by URL and read through [`crate::zarr`].

pub mod afni;
pub mod detect;
pub mod ecat;
pub mod mgh;
pub mod nifti;
pub mod nrrd;
pub mod numpy;
pub mod raster;
pub mod registry;

use std::io::Read;

use flate2::read::MultiGzDecoder;

use crate::error::FormatError;

pub use detect::{extension, format_from_extension, is_gzip, is_zarr_location, VolumeFormat};
pub use registry::{DecodeInput, DecoderRegistry, Predicate, VolumeDecoder};

/// Inflate an in-memory gzip buffer (all members).
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(data.len().saturating_mul(2));
    MultiGzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| FormatError::Decompression(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_gunzip_multiple_members() {
        let mut joined = Vec::new();
        for part in [&b"hello "[..], &b"world"[..]] {
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(part).unwrap();
            joined.extend(enc.finish().unwrap());
        }
        assert_eq!(gunzip(&joined).unwrap(), b"hello world");
    }

    #[test]
    fn test_gunzip_corrupt() {
        let err = gunzip(&[0x1F, 0x8B, 0x08, 0x00, 0xFF]).unwrap_err();
        assert!(matches!(err, FormatError::Decompression(_)));
    }
}
