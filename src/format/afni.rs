//! AFNI HEAD/BRIK decoder.
//!
//! The `.HEAD` file is plain text made of attribute records:
//!
//! ```text
//! type = integer-attribute
//! name = DATASET_DIMENSIONS
//! count = 5
//!  64 64 30 0 0
//! ```
//!
//! Voxels live in the paired `.BRIK` file (optionally gzipped).

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{FormatError, VolumeError};
use crate::volume::{swap_bytes_in_place, DataType, Header, Volume, IDENTITY};

use super::detect::is_gzip;
use super::gunzip;
use super::registry::{DecodeInput, VolumeDecoder};

const FORMAT: &str = "AFNI";

/// Attribute value.
#[derive(Debug, Clone, PartialEq)]
enum Attribute {
    Text(String),
    Numbers(Vec<f64>),
}

impl Attribute {
    fn numbers(&self) -> &[f64] {
        match self {
            Attribute::Numbers(values) => values,
            Attribute::Text(_) => &[],
        }
    }
}

/// Parse every `type`/`name`/`count` record.
fn parse_attributes(text: &str) -> HashMap<String, Attribute> {
    let mut attributes = HashMap::new();
    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();
        i += 1;
        // whitespace around '=' varies between writers
        let Some(kind) = line.strip_prefix("type").and_then(value_after_equals) else {
            continue;
        };
        let Some(name) = lines
            .get(i)
            .and_then(|l| l.trim().strip_prefix("name"))
            .and_then(value_after_equals)
        else {
            continue;
        };
        i += 1;
        let count = lines
            .get(i)
            .and_then(|l| l.trim().strip_prefix("count"))
            .and_then(value_after_equals)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        i += 1;
        if count == 0 {
            continue;
        }

        if kind.starts_with("string") {
            let Some(raw) = lines.get(i) else { break };
            i += 1;
            let value = raw.trim().trim_start_matches('\'').trim_end_matches('~');
            attributes.insert(name.to_string(), Attribute::Text(value.to_string()));
        } else {
            // numeric arrays may wrap over several lines
            let mut values = Vec::with_capacity(count);
            while values.len() < count && i < lines.len() {
                values.extend(
                    lines[i]
                        .split_whitespace()
                        .filter_map(|v| v.parse::<f64>().ok()),
                );
                i += 1;
            }
            values.truncate(count);
            attributes.insert(name.to_string(), Attribute::Numbers(values));
        }
    }
    attributes
}

fn value_after_equals(rest: &str) -> Option<&str> {
    let value = rest.trim_start().strip_prefix('=')?.trim();
    (!value.is_empty()).then_some(value)
}

/// Decoder for AFNI datasets.
pub struct AfniDecoder;

impl VolumeDecoder for AfniDecoder {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn decode(&self, input: &DecodeInput<'_>) -> Result<Volume, VolumeError> {
        let text = String::from_utf8_lossy(input.data);
        let attributes = parse_attributes(&text);
        let header = build_header(&attributes)?;

        let paired = input.paired.ok_or_else(|| FormatError::InvalidHeader {
            format: FORMAT,
            message: format!("{} has no paired BRIK data", input.name),
        })?;
        let expected = header.required_bytes(FORMAT)?;

        let inflated;
        let brik = if is_gzip(paired) {
            inflated = gunzip(paired)?;
            &inflated[..]
        } else {
            paired
        };
        if brik.len() < expected {
            return Err(VolumeError::DimensionMismatch {
                expected,
                actual: brik.len(),
            });
        }

        let mut voxels = brik[..expected].to_vec();
        if !header.little_endian {
            swap_bytes_in_place(&mut voxels, header.datatype.swap_width());
        }
        Volume::new(header, voxels)
    }
}

fn build_header(attributes: &HashMap<String, Attribute>) -> Result<Header, FormatError> {
    let dims = attributes
        .get("DATASET_DIMENSIONS")
        .map(Attribute::numbers)
        .filter(|d| d.len() >= 3)
        .ok_or_else(|| FormatError::InvalidHeader {
            format: FORMAT,
            message: "DATASET_DIMENSIONS missing".to_string(),
        })?;

    let brick_types = attributes
        .get("BRICK_TYPES")
        .map(Attribute::numbers)
        .unwrap_or(&[]);
    let datatype = match brick_types.first().map(|&t| t as i64) {
        Some(0) => DataType::UInt8,
        Some(1) => DataType::Int16,
        Some(3) => DataType::Float32,
        Some(other) => {
            return Err(FormatError::UnsupportedDatatype {
                format: FORMAT,
                code: other.to_string(),
            })
        }
        None => {
            return Err(FormatError::InvalidHeader {
                format: FORMAT,
                message: "BRICK_TYPES missing".to_string(),
            })
        }
    };
    if brick_types.iter().any(|&t| t != brick_types[0]) {
        warn!("AFNI sub-bricks have mixed types, reading all as the first");
    }

    let mut header = Header::new(datatype, dims[0] as i64, dims[1] as i64, dims[2] as i64);
    header.dims[4] = brick_types.len().max(1) as i64;
    if header.dims[4] > 1 {
        header.dims[0] = 4;
    }

    if let Some(Attribute::Text(order)) = attributes.get("BYTEORDER_STRING") {
        if order.contains("MSB_FIRST") {
            header.little_endian = false;
        } else if order.contains("LSB_FIRST") {
            header.little_endian = true;
        }
    }

    if let Some(taxis) = attributes.get("TAXIS_FLOATS").map(Attribute::numbers) {
        // [origin, step, ...]
        if let Some(&step) = taxis.get(1) {
            header.pix_dims[4] = step;
        }
    }

    let ijk = attributes
        .get("IJK_TO_DICOM_REAL")
        .map(Attribute::numbers)
        .filter(|m| m.len() >= 12);
    match ijk {
        Some(m) => {
            // DICOM is LPS, the canonical space is RAS
            header.affine = [
                [-m[0], -m[1], -m[2], -m[3]],
                [-m[4], -m[5], -m[6], -m[7]],
                [m[8], m[9], m[10], m[11]],
                [0.0, 0.0, 0.0, 1.0],
            ];
            header.sform_code = 2;
            set_spacing_from_affine(&mut header);
        }
        None => set_affine_from_axes(&mut header, attributes),
    }

    debug!(dims = ?&header.dims[0..5], datatype = %header.datatype, "parsed AFNI header");
    Ok(header)
}

/// Column lengths of the linear part.
fn set_spacing_from_affine(header: &mut Header) {
    for col in 0..3 {
        let length = (0..3)
            .map(|row| header.affine[row][col].powi(2))
            .sum::<f64>()
            .sqrt();
        header.pix_dims[col + 1] = length;
    }
}

/// Build the transform from ORIENT_SPECIFIC, ORIGIN and DELTA.
fn set_affine_from_axes(header: &mut Header, attributes: &HashMap<String, Attribute>) {
    const ORIENT_AXES: &[u8] = b"xxyyzzg";

    let triple = |key: &str, default: [f64; 3]| -> [f64; 3] {
        match attributes.get(key).map(Attribute::numbers) {
            Some(v) if v.len() >= 3 => [v[0], v[1], v[2]],
            _ => default,
        }
    };
    let orient = triple("ORIENT_SPECIFIC", [0.0, 2.0, 4.0]);
    let origin = triple("ORIGIN", [0.0; 3]);
    let delta = triple("DELTA", [1.0; 3]);

    let mut axis_of = [None::<usize>; 3];
    for (ii, &code) in orient.iter().enumerate() {
        let slot = match ORIENT_AXES.get(code as usize) {
            Some(b'x') => 0,
            Some(b'y') => 1,
            _ => 2,
        };
        axis_of[slot] = Some(ii);
    }
    let [Some(xa), Some(ya), Some(za)] = axis_of else {
        debug!("AFNI orientation does not cover every axis, leaving transform unset");
        return;
    };

    header.sform_code = 2;
    header.pix_dims[1] = delta[0].abs();
    header.pix_dims[2] = delta[1].abs();
    header.pix_dims[3] = delta[2].abs();
    header.affine = IDENTITY;
    header.affine[0][xa] = -delta[xa];
    header.affine[1][ya] = -delta[ya];
    header.affine[2][za] = delta[za];
    header.affine[0][3] = -origin[xa];
    header.affine[1][3] = -origin[ya];
    header.affine[2][3] = origin[za];
}
