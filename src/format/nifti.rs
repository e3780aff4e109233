//! NIfTI-1, NIfTI-2 and Analyze 7.5 decoder.
//!
//! Handles both byte orders (chosen by whichever reading of `sizeof_hdr`
//! gives 348 or 540), gzip-compressed input, single-file (`n+1`, `n+2`) and
//! two-file (`ni1`, `ni2`, magic-less Analyze) layouts. Voxel data is
//! normalised to little-endian.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::debug;

use crate::error::{FormatError, VolumeError};
use crate::volume::{swap_bytes_in_place, DataType, Header, Volume};

use super::detect::{is_gzip, NIFTI1_HEADER_SIZE, NIFTI2_HEADER_SIZE};
use super::gunzip;
use super::registry::{DecodeInput, VolumeDecoder};

const FORMAT: &str = "NIfTI";

/// NIfTI-1 field byte offsets.
mod offsets_v1 {
    pub const DIM: usize = 40;
    pub const DATATYPE: usize = 70;
    pub const PIXDIM: usize = 76;
    pub const VOX_OFFSET: usize = 108;
    pub const SCL_SLOPE: usize = 112;
    pub const SCL_INTER: usize = 116;
    pub const CAL_MAX: usize = 124;
    pub const CAL_MIN: usize = 128;
    pub const DESCRIP: usize = 148;
    pub const QFORM_CODE: usize = 252;
    pub const SFORM_CODE: usize = 254;
    pub const QUATERN_B: usize = 256;
    pub const QOFFSET_X: usize = 268;
    pub const SROW_X: usize = 280;
    pub const MAGIC: usize = 344;
}

/// NIfTI-2 field byte offsets.
mod offsets_v2 {
    pub const MAGIC: usize = 4;
    pub const DATATYPE: usize = 12;
    pub const DIM: usize = 16;
    pub const PIXDIM: usize = 104;
    pub const VOX_OFFSET: usize = 168;
    pub const SCL_SLOPE: usize = 176;
    pub const SCL_INTER: usize = 184;
    pub const CAL_MAX: usize = 192;
    pub const CAL_MIN: usize = 200;
    pub const DESCRIP: usize = 240;
    pub const QFORM_CODE: usize = 344;
    pub const SFORM_CODE: usize = 348;
    pub const QUATERN_B: usize = 352;
    pub const QOFFSET_X: usize = 376;
    pub const SROW_X: usize = 400;
}

/// Where the voxel data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Voxels follow the header at `vox_offset`
    SingleFile,
    /// Voxels are in a separate `.img` file
    Paired,
}

/// Decoder for `.nii`, `.nii.gz` and `.hdr`/`.img` pairs.
pub struct NiftiDecoder;

impl VolumeDecoder for NiftiDecoder {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn decode(&self, input: &DecodeInput<'_>) -> Result<Volume, VolumeError> {
        let inflated;
        let data = if is_gzip(input.data) {
            inflated = gunzip(input.data)?;
            debug!(
                compressed = input.data.len(),
                inflated = inflated.len(),
                "decompressed NIfTI"
            );
            &inflated[..]
        } else {
            input.data
        };

        let (mut header, layout) = parse_header(data)?;
        let required = header.required_bytes(FORMAT)?;
        let offset = usize::try_from(header.vox_offset).unwrap_or(usize::MAX);

        let mut voxels = match layout {
            Layout::SingleFile => {
                let start = offset;
                let end = start
                    .checked_add(required)
                    .ok_or_else(|| FormatError::InvalidHeader {
                        format: FORMAT,
                        message: format!("vox_offset {start} plus {required} data bytes overflows"),
                    })?;
                if data.len() < end {
                    return Err(FormatError::Truncated {
                        format: FORMAT,
                        required: end,
                        actual: data.len(),
                    }
                    .into());
                }
                data[start..end].to_vec()
            }
            Layout::Paired => {
                let paired = input.paired.ok_or_else(|| FormatError::InvalidHeader {
                    format: FORMAT,
                    message: "two-file dataset requires the paired image data".to_string(),
                })?;
                let inflated_img;
                let img = if is_gzip(paired) {
                    inflated_img = gunzip(paired)?;
                    &inflated_img[..]
                } else {
                    paired
                };
                // .img files may carry a leading offset
                let start = offset.min(img.len());
                let img = &img[start..];
                if img.len() < required {
                    return Err(VolumeError::DimensionMismatch {
                        expected: required,
                        actual: img.len(),
                    });
                }
                img[..required].to_vec()
            }
        };

        if !header.little_endian {
            swap_bytes_in_place(&mut voxels, header.datatype.swap_width());
        }

        reset_default_calibration(&mut header);
        Volume::new(header, voxels)
    }
}

/// An exact `0..255` window on non-byte data is an unset default.
fn reset_default_calibration(header: &mut Header) {
    if header.datatype != DataType::UInt8 && header.cal_min == 0.0 && header.cal_max == 255.0 {
        debug!("resetting default 0..255 calibration window");
        header.cal_min = 0.0;
        header.cal_max = 0.0;
    }
}

/// Parse either header version in either byte order.
fn parse_header(data: &[u8]) -> Result<(Header, Layout), FormatError> {
    if data.len() < 4 {
        return Err(FormatError::Truncated {
            format: FORMAT,
            required: 4,
            actual: data.len(),
        });
    }

    let le = LittleEndian::read_i32(&data[0..4]) as usize;
    let be = BigEndian::read_i32(&data[0..4]) as usize;
    let (size, little_endian) = if le == NIFTI1_HEADER_SIZE || le == NIFTI2_HEADER_SIZE {
        (le, true)
    } else if be == NIFTI1_HEADER_SIZE || be == NIFTI2_HEADER_SIZE {
        (be, false)
    } else {
        return Err(FormatError::InvalidMagic {
            format: FORMAT,
            found: format!("0x{:08x}", BigEndian::read_u32(&data[0..4])),
        });
    };

    if data.len() < size {
        return Err(FormatError::Truncated {
            format: FORMAT,
            required: size,
            actual: data.len(),
        });
    }

    match (size, little_endian) {
        (NIFTI1_HEADER_SIZE, true) => parse_v1::<LittleEndian>(data, true),
        (NIFTI1_HEADER_SIZE, false) => parse_v1::<BigEndian>(data, false),
        (_, true) => parse_v2::<LittleEndian>(data, true),
        (_, false) => parse_v2::<BigEndian>(data, false),
    }
}

fn checked_datatype(code: i16) -> Result<DataType, FormatError> {
    let datatype = DataType::from_code(code)?;
    if !datatype.is_decodable() {
        return Err(FormatError::UnsupportedDatatype {
            format: FORMAT,
            code: datatype.name().to_string(),
        });
    }
    Ok(datatype)
}

fn checked_dims(dims: [i64; 8]) -> Result<[i64; 8], FormatError> {
    if !(1..=7).contains(&dims[0]) {
        return Err(FormatError::InvalidHeader {
            format: FORMAT,
            message: format!("dim[0] must be 1..=7, got {}", dims[0]),
        });
    }
    let ndim = dims[0] as usize;
    if let Some(bad) = dims[1..=ndim].iter().find(|&&d| d < 1) {
        return Err(FormatError::InvalidHeader {
            format: FORMAT,
            message: format!("dimension extent must be positive, got {bad}"),
        });
    }
    Ok(dims)
}

fn description(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

#[allow(clippy::wildcard_imports)]
fn parse_v1<E: ByteOrder>(b: &[u8], little_endian: bool) -> Result<(Header, Layout), FormatError> {
    use offsets_v1::*;

    let magic = &b[MAGIC..MAGIC + 4];
    let (layout, analyze) = match magic {
        b"n+1\0" => (Layout::SingleFile, false),
        b"ni1\0" => (Layout::Paired, false),
        _ => (Layout::Paired, true),
    };

    let mut dims = [1i64; 8];
    for (i, d) in dims.iter_mut().enumerate() {
        *d = E::read_i16(&b[DIM + 2 * i..]) as i64;
    }
    let dims = checked_dims(dims)?;
    let datatype = checked_datatype(E::read_i16(&b[DATATYPE..]))?;

    let mut header = Header::new(datatype, 1, 1, 1);
    header.dims = dims;
    header.little_endian = little_endian;
    for (i, p) in header.pix_dims.iter_mut().enumerate() {
        *p = E::read_f32(&b[PIXDIM + 4 * i..]) as f64;
    }
    header.scl_slope = E::read_f32(&b[SCL_SLOPE..]) as f64;
    header.scl_inter = E::read_f32(&b[SCL_INTER..]) as f64;
    header.cal_max = E::read_f32(&b[CAL_MAX..]) as f64;
    header.cal_min = E::read_f32(&b[CAL_MIN..]) as f64;
    header.description = description(&b[DESCRIP..DESCRIP + 80]);

    let vox_offset = E::read_f32(&b[VOX_OFFSET..]);
    header.vox_offset = if vox_offset.is_finite() && vox_offset > 0.0 {
        vox_offset as u64
    } else {
        0
    };

    if analyze {
        // Analyze 7.5 stores unrelated fields where NIfTI keeps its transforms
        debug!("no NIfTI magic, reading as Analyze 7.5");
        header.affine = crate::volume::ZERO_AFFINE;
        header.pix_dims[0] = 1.0;
        return Ok((header, layout));
    }

    if layout == Layout::SingleFile && header.vox_offset < NIFTI1_HEADER_SIZE as u64 {
        header.vox_offset = 352;
    }

    header.qform_code = E::read_i16(&b[QFORM_CODE..]) as i32;
    header.sform_code = E::read_i16(&b[SFORM_CODE..]) as i32;
    header.quatern_b = E::read_f32(&b[QUATERN_B..]) as f64;
    header.quatern_c = E::read_f32(&b[QUATERN_B + 4..]) as f64;
    header.quatern_d = E::read_f32(&b[QUATERN_B + 8..]) as f64;
    header.qoffset_x = E::read_f32(&b[QOFFSET_X..]) as f64;
    header.qoffset_y = E::read_f32(&b[QOFFSET_X + 4..]) as f64;
    header.qoffset_z = E::read_f32(&b[QOFFSET_X + 8..]) as f64;
    for row in 0..3 {
        for col in 0..4 {
            header.affine[row][col] = E::read_f32(&b[SROW_X + 16 * row + 4 * col..]) as f64;
        }
    }
    header.affine[3] = [0.0, 0.0, 0.0, 1.0];

    Ok((header, layout))
}

#[allow(clippy::wildcard_imports)]
fn parse_v2<E: ByteOrder>(b: &[u8], little_endian: bool) -> Result<(Header, Layout), FormatError> {
    use offsets_v2::*;

    let magic = &b[MAGIC..MAGIC + 4];
    let layout = match magic {
        b"n+2\0" => Layout::SingleFile,
        b"ni2\0" => Layout::Paired,
        _ => {
            return Err(FormatError::InvalidMagic {
                format: "NIfTI-2",
                found: String::from_utf8_lossy(magic).escape_debug().to_string(),
            })
        }
    };

    let mut dims = [1i64; 8];
    for (i, d) in dims.iter_mut().enumerate() {
        *d = E::read_i64(&b[DIM + 8 * i..]);
    }
    let dims = checked_dims(dims)?;
    let datatype = checked_datatype(E::read_i16(&b[DATATYPE..]))?;

    let mut header = Header::new(datatype, 1, 1, 1);
    header.dims = dims;
    header.little_endian = little_endian;
    for (i, p) in header.pix_dims.iter_mut().enumerate() {
        *p = E::read_f64(&b[PIXDIM + 8 * i..]);
    }
    header.scl_slope = E::read_f64(&b[SCL_SLOPE..]);
    header.scl_inter = E::read_f64(&b[SCL_INTER..]);
    header.cal_max = E::read_f64(&b[CAL_MAX..]);
    header.cal_min = E::read_f64(&b[CAL_MIN..]);
    header.description = description(&b[DESCRIP..DESCRIP + 80]);

    let vox_offset = E::read_i64(&b[VOX_OFFSET..]);
    header.vox_offset = vox_offset.max(0) as u64;
    if layout == Layout::SingleFile && header.vox_offset < NIFTI2_HEADER_SIZE as u64 {
        header.vox_offset = 544;
    }

    header.qform_code = E::read_i32(&b[QFORM_CODE..]);
    header.sform_code = E::read_i32(&b[SFORM_CODE..]);
    header.quatern_b = E::read_f64(&b[QUATERN_B..]);
    header.quatern_c = E::read_f64(&b[QUATERN_B + 8..]);
    header.quatern_d = E::read_f64(&b[QUATERN_B + 16..]);
    header.qoffset_x = E::read_f64(&b[QOFFSET_X..]);
    header.qoffset_y = E::read_f64(&b[QOFFSET_X + 8..]);
    header.qoffset_z = E::read_f64(&b[QOFFSET_X + 16..]);
    for row in 0..3 {
        for col in 0..4 {
            header.affine[row][col] = E::read_f64(&b[SROW_X + 32 * row + 8 * col..]);
        }
    }
    header.affine[3] = [0.0, 0.0, 0.0, 1.0];

    Ok((header, layout))
}
