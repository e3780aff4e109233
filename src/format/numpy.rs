//! NumPy `.npy` and `.npz` decoders.
//!
//! A `.npy` file is a magic string, a version, a little-endian header length
//! and a Python dict literal describing `descr`, `fortran_order` and `shape`,
//! followed by the raw array. The last three axes become `(z, y, x)`.

use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::error::{FormatError, VolumeError};
use crate::volume::{DataType, Header, Volume};

use super::registry::{DecodeInput, VolumeDecoder};

const FORMAT: &str = "NumPy";
const MAGIC: &[u8] = b"\x93NUMPY";

/// Map a dtype tag to a voxel type.
fn datatype_for(descr: &str) -> Option<DataType> {
    let datatype = match descr {
        "|b1" | "|u1" | "<u1" => DataType::UInt8,
        "|i1" | "<i1" => DataType::Int8,
        "<i2" => DataType::Int16,
        "<u2" => DataType::UInt16,
        "<i4" => DataType::Int32,
        "<u4" => DataType::UInt32,
        "<i8" => DataType::Int64,
        "<u8" => DataType::UInt64,
        "<f4" => DataType::Float32,
        "<f8" => DataType::Float64,
        _ => return None,
    };
    Some(datatype)
}

/// Parsed `.npy` preamble.
#[derive(Debug, Clone, PartialEq)]
struct NpyHeader {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
    data_offset: usize,
}

fn invalid(message: impl Into<String>) -> FormatError {
    FormatError::InvalidHeader {
        format: FORMAT,
        message: message.into(),
    }
}

fn parse_preamble(data: &[u8]) -> Result<NpyHeader, FormatError> {
    if !data.starts_with(MAGIC) {
        return Err(FormatError::InvalidMagic {
            format: FORMAT,
            found: String::from_utf8_lossy(&data[..data.len().min(6)]).escape_debug().to_string(),
        });
    }
    if data.len() < 10 {
        return Err(FormatError::Truncated {
            format: FORMAT,
            required: 10,
            actual: data.len(),
        });
    }

    // Version 1 uses a u16 length, versions 2 and 3 a u32
    let (header_len, text_start) = match data[6] {
        1 => (LittleEndian::read_u16(&data[8..10]) as usize, 10),
        2 | 3 if data.len() >= 12 => (LittleEndian::read_u32(&data[8..12]) as usize, 12),
        version => return Err(invalid(format!("unsupported version {version}"))),
    };
    let text_end = text_start + header_len;
    let text = data.get(text_start..text_end).ok_or(FormatError::Truncated {
        format: FORMAT,
        required: text_end,
        actual: data.len(),
    })?;
    let text = String::from_utf8_lossy(text);

    let descr = quoted_value(&text, "descr").ok_or_else(|| invalid("descr not found"))?;
    let fortran_order = dict_value(&text, "fortran_order")
        .map(|v| v.starts_with("True"))
        .unwrap_or(false);
    let shape = shape_value(&text)?;

    Ok(NpyHeader {
        descr,
        fortran_order,
        shape,
        data_offset: text_end,
    })
}

/// Text following `'key':`.
fn dict_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{key}':");
    let start = text.find(&pattern)? + pattern.len();
    Some(text[start..].trim_start())
}

fn quoted_value(text: &str, key: &str) -> Option<String> {
    let rest = dict_value(text, key)?;
    let rest = rest.strip_prefix('\'')?;
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

fn shape_value(text: &str) -> Result<Vec<usize>, FormatError> {
    let rest = dict_value(text, "shape").ok_or_else(|| invalid("shape not found"))?;
    let rest = rest
        .strip_prefix('(')
        .ok_or_else(|| invalid("shape is not a tuple"))?;
    let end = rest.find(')').ok_or_else(|| invalid("unterminated shape"))?;
    rest[..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| invalid(format!("bad shape entry {s:?}")))
        })
        .collect()
}

/// Decoder for a single `.npy` array.
pub struct NpyDecoder;

impl VolumeDecoder for NpyDecoder {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn decode(&self, input: &DecodeInput<'_>) -> Result<Volume, VolumeError> {
        let npy = parse_preamble(input.data)?;
        if npy.fortran_order {
            return Err(invalid("Fortran-ordered arrays are not supported").into());
        }
        let datatype = datatype_for(&npy.descr).ok_or_else(|| FormatError::UnsupportedDatatype {
            format: FORMAT,
            code: npy.descr.clone(),
        })?;

        let axis = |from_end: usize| -> usize {
            npy.shape
                .len()
                .checked_sub(from_end)
                .map(|i| npy.shape[i])
                .unwrap_or(1)
        };
        let too_large = || invalid(format!("shape {:?} is too large", npy.shape));
        let extent = |n: usize| i64::try_from(n).map_err(|_| too_large());
        let leading = npy
            .shape
            .iter()
            .rev()
            .skip(3)
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
            .ok_or_else(too_large)?;

        let mut header = Header::new(
            datatype,
            extent(axis(1))?,
            extent(axis(2))?,
            extent(axis(3))?,
        );
        if npy.shape.len() > 3 {
            header.dims[0] = 4;
            header.dims[4] = extent(leading)?;
        }
        header.vox_offset = npy.data_offset as u64;
        header.set_centered_raster_affine();

        let required = header.required_bytes(FORMAT)?;
        let end = npy.data_offset.checked_add(required).ok_or_else(too_large)?;
        let payload = input.data.get(npy.data_offset..end).ok_or(FormatError::Truncated {
            format: FORMAT,
            required: end,
            actual: input.data.len(),
        })?;
        debug!(shape = ?npy.shape, descr = %npy.descr, "decoded npy array");
        Volume::new(header, payload.to_vec())
    }
}

/// Decoder for `.npz` archives.
///
/// Only the first `.npy` entry is read; further arrays in the archive are
/// ignored.
pub struct NpzDecoder;

impl VolumeDecoder for NpzDecoder {
    fn name(&self) -> &'static str {
        "NumPy archive"
    }

    fn decode(&self, input: &DecodeInput<'_>) -> Result<Volume, VolumeError> {
        let archive_err = |e: zip::result::ZipError| FormatError::Archive(e.to_string());
        let mut archive = zip::ZipArchive::new(Cursor::new(input.data)).map_err(archive_err)?;
        let entries = archive.len();

        for index in 0..entries {
            let mut entry = archive.by_index(index).map_err(archive_err)?;
            if !entry.name().to_ascii_lowercase().ends_with(".npy") {
                continue;
            }
            let name = entry.name().to_string();
            let mut array = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut array)
                .map_err(|e| FormatError::Archive(format!("{name}: {e}")))?;
            if entries > 1 {
                debug!(entry = %name, entries, "reading first array only");
            }
            return NpyDecoder.decode(&DecodeInput::new(&array, &name));
        }

        Err(FormatError::Archive("archive contains no .npy entry".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn npy(descr: &str, shape: &str, payload: &[u8]) -> Vec<u8> {
        npy_ordered(descr, false, shape, payload)
    }

    fn npy_ordered(descr: &str, fortran: bool, shape: &str, payload: &[u8]) -> Vec<u8> {
        let order = if fortran { "True" } else { "False" };
        let mut dict =
            format!("{{'descr': '{descr}', 'fortran_order': {order}, 'shape': {shape}, }}");
        // Pad so the data starts on a 64-byte boundary
        while (10 + dict.len() + 1) % 64 != 0 {
            dict.push(' ');
        }
        dict.push('\n');
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        out.extend_from_slice(dict.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn decode(data: &[u8]) -> Result<Volume, VolumeError> {
        NpyDecoder.decode(&DecodeInput::new(data, "array.npy"))
    }

    #[test]
    fn test_parse_preamble() {
        let file = npy("<f4", "(4, 3, 2)", &[]);
        let header = parse_preamble(&file).unwrap();
        assert_eq!(header.descr, "<f4");
        assert!(!header.fortran_order);
        assert_eq!(header.shape, vec![4, 3, 2]);
        assert_eq!(header.data_offset % 64, 0);
        assert_eq!(header.data_offset, file.len());
    }

    #[test]
    fn test_decode_3d_float() {
        let payload: Vec<u8> = (0..24).flat_map(|v| (v as f32).to_le_bytes()).collect();
        let volume = decode(&npy("<f4", "(4, 3, 2)", &payload)).unwrap();

        assert_eq!(volume.header.datatype, DataType::Float32);
        // x = last axis, z = first
        assert_eq!(&volume.header.dims[0..4], &[3, 2, 3, 4]);
        assert_eq!(volume.voxels.len(), 96);
    }

    #[test]
    fn test_decode_2d_and_bool() {
        let volume = decode(&npy("|b1", "(2, 5)", &[1; 10])).unwrap();
        assert_eq!(volume.header.datatype, DataType::UInt8);
        assert_eq!(&volume.header.dims[1..4], &[5, 2, 1]);
    }

    #[test]
    fn test_leading_axes_fold_into_volumes() {
        let volume = decode(&npy("<u2", "(3, 2, 2, 2)", &[0; 48])).unwrap();
        assert_eq!(volume.header.dims[0], 4);
        assert_eq!(volume.header.dims[4], 3);
        assert_eq!(volume.voxels.len(), 48);
    }

    #[test]
    fn test_unknown_dtype() {
        let err = decode(&npy("<c8", "(2,)", &[0; 16])).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::Format(FormatError::UnsupportedDatatype { .. })
        ));
    }

    #[test]
    fn test_fortran_order_rejected() {
        let file = npy_ordered("<i2", true, "(2, 2)", &[0; 8]);
        let err = decode(&file).unwrap_err();
        assert!(err.to_string().contains("Fortran"));
    }

    #[test]
    fn test_truncated_payload() {
        let err = decode(&npy("<i4", "(10,)", &[0; 12])).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::Format(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_shape_overflow_is_invalid_header() {
        for shape in ["(4294967296, 4294967296, 1)", "(65536, 65536, 65536, 65536, 2)"] {
            let err = decode(&npy("|u1", shape, &[0; 8])).unwrap_err();
            assert!(
                matches!(err, VolumeError::Format(FormatError::InvalidHeader { .. })),
                "{shape}: {err}"
            );
        }
    }

    #[test]
    fn test_npz_reads_first_array() {
        let first = npy("<u1", "(2, 2)", &[1, 2, 3, 4]);
        let second = npy("<u1", "(3,)", &[9, 9, 9]);

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer.start_file("meta.txt", options).unwrap();
        writer.write_all(b"ignored").unwrap();
        writer.start_file("first.NPY", options).unwrap();
        writer.write_all(&first).unwrap();
        writer.start_file("second.npy", options).unwrap();
        writer.write_all(&second).unwrap();
        let archive = writer.finish().unwrap().into_inner();

        let volume = NpzDecoder
            .decode(&DecodeInput::new(&archive, "arrays.npz"))
            .unwrap();
        assert_eq!(&volume.header.dims[1..4], &[2, 2, 1]);
        assert_eq!(volume.voxels.data().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_npz_without_arrays() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"nothing").unwrap();
        let archive = writer.finish().unwrap().into_inner();

        let err = NpzDecoder
            .decode(&DecodeInput::new(&archive, "empty.npz"))
            .unwrap_err();
        assert!(matches!(err, VolumeError::Format(FormatError::Archive(_))));
    }
}
