//! FreeSurfer MGH and MGZ decoder.
//!
//! MGH is a fixed 284-byte big-endian header followed by the voxels and an
//! optional tagged footer. MGZ is the same file gzip-compressed. The
//! voxel-to-RAS transform is built from the direction cosines, the voxel
//! spacing and the RAS coordinate of the volume centre.

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, warn};

use crate::error::{FormatError, VolumeError};
use crate::volume::{swap_bytes_in_place, Affine, DataType, Header, Volume};

use super::detect::{is_gzip, MGH_HEADER_SIZE};
use super::gunzip;
use super::registry::{DecodeInput, VolumeDecoder};

const FORMAT: &str = "MGH";

/// Header field byte offsets.
mod offsets {
    pub const VERSION: usize = 0;
    pub const WIDTH: usize = 4;
    pub const FRAMES: usize = 16;
    pub const TYPE: usize = 20;
    pub const GOOD_RAS: usize = 28;
    pub const SPACING: usize = 30;
    pub const DIRECTIONS: usize = 42;
    pub const CENTER: usize = 78;
}

/// Direction cosines used when the header flags its own as unset.
const CORONAL_COSINES: [[f64; 3]; 3] = [[-1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]];

/// Decoder for `.mgh` and `.mgz` files.
pub struct MghDecoder;

impl VolumeDecoder for MghDecoder {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn decode(&self, input: &DecodeInput<'_>) -> Result<Volume, VolumeError> {
        let inflated;
        let data = if is_gzip(input.data) {
            inflated = gunzip(input.data)?;
            &inflated[..]
        } else {
            input.data
        };
        if data.len() < MGH_HEADER_SIZE {
            return Err(FormatError::Truncated {
                format: FORMAT,
                required: MGH_HEADER_SIZE,
                actual: data.len(),
            }
            .into());
        }

        let header = parse_header(data)?;
        let required = header.required_bytes(FORMAT)?;
        let end = MGH_HEADER_SIZE
            .checked_add(required)
            .ok_or_else(|| header.overflow(FORMAT))?;
        let Some(payload) = data.get(MGH_HEADER_SIZE..end) else {
            return Err(FormatError::Truncated {
                format: FORMAT,
                required: end,
                actual: data.len(),
            }
            .into());
        };
        if data.len() > end {
            debug!(footer = data.len() - end, "ignoring MGH footer");
        }

        let mut voxels = payload.to_vec();
        swap_bytes_in_place(&mut voxels, header.datatype.swap_width());
        Volume::new(header, voxels)
    }
}

fn parse_header(b: &[u8]) -> Result<Header, FormatError> {
    use offsets::*;

    let version = BigEndian::read_i32(&b[VERSION..]);
    let mut dims = [0i64; 3];
    for (i, d) in dims.iter_mut().enumerate() {
        *d = BigEndian::read_i32(&b[WIDTH + 4 * i..]) as i64;
    }
    if dims.iter().any(|&d| d < 1) {
        return Err(FormatError::InvalidHeader {
            format: FORMAT,
            message: format!("dimensions must be positive, got {dims:?}"),
        });
    }

    let code = BigEndian::read_i32(&b[TYPE..]);
    let datatype = match code {
        0 => DataType::UInt8,
        1 => DataType::Int32,
        3 => DataType::Float32,
        4 => DataType::Int16,
        other => {
            return Err(FormatError::UnsupportedDatatype {
                format: FORMAT,
                code: other.to_string(),
            })
        }
    };

    let mut header = Header::new(datatype, dims[0], dims[1], dims[2]);
    header.little_endian = false;
    header.vox_offset = MGH_HEADER_SIZE as u64;
    if version != 1 {
        warn!(version, "unexpected MGH version");
        header.warn(format!("unexpected MGH version {version}"));
    }

    let frames = BigEndian::read_i32(&b[FRAMES..]).max(1) as i64;
    header.dims[4] = frames;
    if frames > 1 {
        header.dims[0] = 4;
    }

    let mut spacing = [0.0f64; 3];
    for (i, s) in spacing.iter_mut().enumerate() {
        *s = (BigEndian::read_f32(&b[SPACING + 4 * i..]) as f64).abs();
    }
    header.pix_dims[1..4].copy_from_slice(&spacing);
    header.pix_dims[4] = 0.0;

    let (cosines, center) = if BigEndian::read_i16(&b[GOOD_RAS..]) > 0 {
        let mut cosines = [[0.0f64; 3]; 3];
        for (axis, cosine) in cosines.iter_mut().enumerate() {
            for (k, c) in cosine.iter_mut().enumerate() {
                *c = BigEndian::read_f32(&b[DIRECTIONS + 12 * axis + 4 * k..]) as f64;
            }
        }
        let mut center = [0.0f64; 3];
        for (k, c) in center.iter_mut().enumerate() {
            *c = BigEndian::read_f32(&b[CENTER + 4 * k..]) as f64;
        }
        (cosines, center)
    } else {
        (CORONAL_COSINES, [0.0; 3])
    };

    header.affine = vox_to_ras(&cosines, &spacing, &center, &dims);
    header.sform_code = 1;
    header.qform_code = 0;
    Ok(header)
}

/// Voxel-to-RAS matrix placing voxel `dims / 2` at `center`.
///
/// `cosines[axis]` is the RAS direction of voxel axis `axis`.
fn vox_to_ras(
    cosines: &[[f64; 3]; 3],
    spacing: &[f64; 3],
    center: &[f64; 3],
    dims: &[i64; 3],
) -> Affine {
    let mut affine = crate::volume::IDENTITY;
    for row in 0..3 {
        for axis in 0..3 {
            affine[row][axis] = cosines[axis][row] * spacing[axis];
        }
        let offset: f64 = (0..3).map(|axis| affine[row][axis] * dims[axis] as f64 / 2.0).sum();
        affine[row][3] = center[row] - offset;
    }
    affine
}
