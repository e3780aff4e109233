//! ECAT7 PET decoder.
//!
//! An ECAT7 file is a 512-byte main header followed by a chain of 512-byte
//! directory blocks. Each directory entry points at a frame whose subheader
//! sits in the block just before the pixel data. Frames are rescaled to
//! `f32` and concatenated in directory order.
//!
//! All fields are big-endian.

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, warn};

use crate::error::{FormatError, VolumeError};
use crate::volume::{DataType, Header, Volume};

use super::detect::ECAT_MAGIC;
use super::registry::{DecodeInput, VolumeDecoder};

const FORMAT: &str = "ECAT7";

/// Size of every header and directory block.
const BLOCK_SIZE: usize = 512;

/// Directory entries per block.
const ENTRIES_PER_BLOCK: usize = 31;

/// Offset of the file type in the main header.
const FILE_TYPE_OFFSET: usize = 50;

/// Subheader field offsets.
mod subheader {
    pub const DATA_TYPE: usize = 0;
    pub const X_DIM: usize = 4;
    pub const Y_DIM: usize = 6;
    pub const Z_DIM: usize = 8;
    pub const SCALE_FACTOR: usize = 26;
    pub const X_PIXEL_SIZE: usize = 34;
    pub const Y_PIXEL_SIZE: usize = 38;
    pub const Z_PIXEL_SIZE: usize = 42;
    pub const FRAME_DURATION: usize = 46;
}

/// Decoder for `.v` ECAT7 image files.
pub struct EcatDecoder;

impl VolumeDecoder for EcatDecoder {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn decode(&self, input: &DecodeInput<'_>) -> Result<Volume, VolumeError> {
        let data = input.data;
        let signature = read_u32(data, 0)?;
        let file_type = BigEndian::read_i16(field(data, FILE_TYPE_OFFSET, 2)?);
        if signature != ECAT_MAGIC || !(1..=14).contains(&file_type) {
            return Err(FormatError::InvalidMagic {
                format: FORMAT,
                found: format!("0x{signature:08x} (file type {file_type})"),
            }
            .into());
        }

        let frames = read_directory(data)?;
        build_volume(data, &frames)
    }
}

/// One directory entry.
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Image start, in bytes
    image_offset: usize,
}

/// Walk directory blocks until an invalid block or a zero entry.
fn read_directory(data: &[u8]) -> Result<Vec<Frame>, FormatError> {
    let mut frames = Vec::new();
    let mut pos = BLOCK_SIZE;

    loop {
        if pos + 16 > data.len() {
            break;
        }
        let hdr0 = BigEndian::read_i32(field(data, pos, 4)?);
        let hdr3 = BigEndian::read_i32(field(data, pos + 12, 4)?);
        if hdr0.wrapping_add(hdr3) != ENTRIES_PER_BLOCK as i32 {
            break;
        }

        // r[n][1] of each 16-byte entry
        let mut entry = pos + 20;
        let mut end_of_list = false;
        for _ in 0..ENTRIES_PER_BLOCK {
            let block = BigEndian::read_i32(field(data, entry, 4)?);
            entry += 16;
            if block == 0 {
                end_of_list = true;
                break;
            }
            let image_offset = (block as usize)
                .checked_mul(BLOCK_SIZE)
                .filter(|&offset| offset >= BLOCK_SIZE)
                .ok_or_else(|| FormatError::InvalidHeader {
                    format: FORMAT,
                    message: format!("directory entry points at block {block}"),
                })?;
            frames.push(Frame { image_offset });
        }
        if end_of_list {
            break;
        }
        pos += BLOCK_SIZE;
    }

    if frames.is_empty() {
        return Err(FormatError::InvalidHeader {
            format: FORMAT,
            message: "directory lists no frames".to_string(),
        });
    }
    debug!(frames = frames.len(), "read ECAT directory");
    Ok(frames)
}

fn build_volume(data: &[u8], frames: &[Frame]) -> Result<Volume, VolumeError> {
    use subheader::*;

    let mut header = Header::new(DataType::Float32, 1, 1, 1);
    let mut shape: Option<[usize; 3]> = None;
    let mut durations = Vec::new();
    let mut voxels: Vec<u8> = Vec::new();

    for frame in frames {
        let sub = frame.image_offset - BLOCK_SIZE;
        let data_type = BigEndian::read_u16(field(data, sub + DATA_TYPE, 2)?);
        let dims = [
            BigEndian::read_u16(field(data, sub + X_DIM, 2)?) as usize,
            BigEndian::read_u16(field(data, sub + Y_DIM, 2)?) as usize,
            BigEndian::read_u16(field(data, sub + Z_DIM, 2)?) as usize,
        ];
        let scale = read_f32(data, sub + SCALE_FACTOR)?;

        let width = match data_type {
            1 => 1,
            6 => 2,
            7 => 4,
            other => {
                warn!(data_type = other, "unknown ECAT data type, skipping frame");
                header.warn(format!("skipped frame with unknown ECAT data type {other}"));
                continue;
            }
        };

        match shape {
            None => shape = Some(dims),
            Some(first) if first != dims => {
                return Err(FormatError::InvalidHeader {
                    format: FORMAT,
                    message: format!("frame shape {dims:?} differs from first frame {first:?}"),
                }
                .into());
            }
            Some(_) => {}
        }

        // cm -> mm, ms -> s
        header.pix_dims[1] = read_f32(data, sub + X_PIXEL_SIZE)? as f64 * 10.0;
        header.pix_dims[2] = read_f32(data, sub + Y_PIXEL_SIZE)? as f64 * 10.0;
        header.pix_dims[3] = read_f32(data, sub + Z_PIXEL_SIZE)? as f64 * 10.0;
        durations.push(read_u32(data, sub + FRAME_DURATION)? as f64 / 1000.0);

        let count = dims[0] * dims[1] * dims[2];
        let raw = field(data, frame.image_offset, count * width)?;
        voxels.reserve(count * 4);
        for sample in raw.chunks_exact(width) {
            let value = match width {
                1 => sample[0] as f32,
                2 => BigEndian::read_u16(sample) as f32,
                _ => BigEndian::read_u32(sample) as f32,
            };
            voxels.extend_from_slice(&(value * scale).to_le_bytes());
        }
    }

    let Some([nx, ny, nz]) = shape else {
        return Err(FormatError::UnsupportedDatatype {
            format: FORMAT,
            code: "no frame with a supported data type".to_string(),
        }
        .into());
    };

    let volumes = durations.len();
    header.dims[1] = nx as i64;
    header.dims[2] = ny as i64;
    header.dims[3] = nz as i64;
    header.dims[4] = volumes as i64;
    if volumes > 1 {
        header.dims[0] = 4;
    }
    header.pix_dims[4] = durations[0];
    if durations.iter().any(|&d| d != durations[0]) {
        warn!("ECAT frame durations vary");
        header.warn("frame durations vary");
    }

    let [sx, sy, sz] = [header.pix_dims[1], header.pix_dims[2], header.pix_dims[3]];
    header.sform_code = 1;
    header.affine = [
        [-sx, 0.0, 0.0, (nx as f64 - 2.0) * 0.5 * sx],
        [0.0, -sy, 0.0, (ny as f64 - 2.0) * 0.5 * sy],
        [0.0, 0.0, -sz, (nz as f64 - 2.0) * 0.5 * sz],
        [0.0, 0.0, 0.0, 1.0],
    ];
    header.little_endian = false;

    Volume::new(header, voxels)
}

fn field(data: &[u8], offset: usize, len: usize) -> Result<&[u8], FormatError> {
    data.get(offset..offset.saturating_add(len))
        .ok_or(FormatError::Truncated {
            format: FORMAT,
            required: offset.saturating_add(len),
            actual: data.len(),
        })
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, FormatError> {
    field(data, offset, 4).map(BigEndian::read_u32)
}

fn read_f32(data: &[u8], offset: usize) -> Result<f32, FormatError> {
    field(data, offset, 4).map(BigEndian::read_f32)
}
