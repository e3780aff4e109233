//! NRRD decoder.
//!
//! A NRRD file is a text header terminated by a blank line. The voxels either
//! follow it (`.nrrd`) or live in the file named by its `data file` field
//! (`.nhdr`), which the loader fetches as the paired buffer. Raw and gzip
//! encodings in either byte order are read. `space directions` and
//! `space origin` are converted to a RAS transform.

use tracing::{debug, warn};

use crate::error::{FormatError, VolumeError};
use crate::volume::{swap_bytes_in_place, DataType, Header, Volume};

use super::detect::{is_gzip, is_nrrd};
use super::gunzip;
use super::registry::{DecodeInput, VolumeDecoder};

const FORMAT: &str = "NRRD";

fn invalid(message: impl Into<String>) -> FormatError {
    FormatError::InvalidHeader {
        format: FORMAT,
        message: message.into(),
    }
}

// =============================================================================
// Header
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Raw,
    Gzip,
}

/// Fields of a NRRD header that shape the decoded volume.
#[derive(Debug, Clone, PartialEq)]
struct NrrdHeader {
    datatype: Option<DataType>,
    sizes: Vec<i64>,
    dimension: Option<usize>,
    encoding: Encoding,
    little_endian: bool,
    spacings: Vec<f64>,
    directions: Option<[[f64; 3]; 3]>,
    origin: [f64; 3],
    /// Per-axis sign turning the header's space into RAS
    space_signs: [f64; 3],
    micron_units: bool,
    byte_skip: i64,
    data_file: Option<String>,
    /// Offset of the first byte after the header
    data_offset: usize,
}

/// Split off the header text. The header ends at the first blank line, or at
/// the end of the buffer for a detached header.
fn split_header(data: &[u8]) -> (&[u8], usize) {
    let mut line_start = 0;
    for (i, &b) in data.iter().enumerate() {
        if b != b'\n' {
            continue;
        }
        let line = &data[line_start..i];
        if line.is_empty() || line == b"\r" {
            return (&data[..line_start], i + 1);
        }
        line_start = i + 1;
    }
    (data, data.len())
}

/// Fields as `(lowercase key, value)` with the value's case kept.
fn fields(text: &str) -> impl Iterator<Item = (String, &str)> {
    text.lines().skip(1).filter_map(|line| {
        let line = line.trim_end_matches('\r');
        if line.starts_with('#') {
            return None;
        }
        // `key:=value` lines are free-form metadata
        let (key, value) = line.split_once(':')?;
        if value.starts_with('=') {
            return None;
        }
        Some((key.trim().to_ascii_lowercase(), value.trim()))
    })
}

fn numbers(value: &str) -> Vec<f64> {
    value
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '(' | ')'))
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .collect()
}

fn datatype_for(name: &str) -> Option<DataType> {
    let datatype = match name {
        "uchar" | "unsigned char" | "uint8" | "uint8_t" => DataType::UInt8,
        "signed char" | "int8" | "int8_t" => DataType::Int8,
        "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
            DataType::Int16
        }
        "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
            DataType::UInt16
        }
        "int" | "signed int" | "int32" | "int32_t" => DataType::Int32,
        "uint" | "unsigned int" | "uint32" | "uint32_t" => DataType::UInt32,
        "longlong" | "long long" | "long long int" | "signed long long" | "int64" | "int64_t" => {
            DataType::Int64
        }
        "ulonglong" | "unsigned long long" | "unsigned long long int" | "uint64" | "uint64_t" => {
            DataType::UInt64
        }
        "float" => DataType::Float32,
        "double" => DataType::Float64,
        _ => return None,
    };
    Some(datatype)
}

/// Space directions: one `(x,y,z)` vector per spatial axis, `none` for the
/// others. Only the leading three axes can be spatial.
fn parse_directions(value: &str) -> Result<Option<[[f64; 3]; 3]>, FormatError> {
    let mut vectors = Vec::new();
    for token in value.split(')') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if let Some(rest) = token.strip_prefix("none") {
            if vectors.len() < 3 {
                return Ok(None);
            }
            if rest.trim().is_empty() {
                continue;
            }
        }
        let v = numbers(token.trim_start_matches("none"));
        if v.len() != 3 {
            return Err(invalid(format!("bad space direction {token:?}")));
        }
        vectors.push([v[0], v[1], v[2]]);
    }
    match vectors.as_slice() {
        [x, y, z] => Ok(Some([*x, *y, *z])),
        _ => Ok(None),
    }
}

fn space_signs(value: &str) -> Option<[f64; 3]> {
    let signs = match value.to_ascii_lowercase().as_str() {
        "right-anterior-superior" | "ras" => [1.0, 1.0, 1.0],
        "left-anterior-superior" | "las" => [-1.0, 1.0, 1.0],
        "left-posterior-superior" | "lps" => [-1.0, -1.0, 1.0],
        _ => return None,
    };
    Some(signs)
}

/// Path of the detached data file named by a NRRD header, if any.
///
/// Multi-file forms (`LIST` and numbered patterns) are not reported.
pub fn data_file(data: &[u8]) -> Option<String> {
    if !is_nrrd(data) {
        return None;
    }
    let (text, _) = split_header(data);
    let text = String::from_utf8_lossy(text);
    let file = fields(&text)
        .find(|(key, _)| key == "data file" || key == "datafile")
        .map(|(_, value)| value.to_string())?;
    if file.eq_ignore_ascii_case("list") || file.contains(char::is_whitespace) {
        return None;
    }
    Some(file)
}

fn parse_header(data: &[u8]) -> Result<NrrdHeader, FormatError> {
    if !is_nrrd(data) {
        let found = String::from_utf8_lossy(&data[..data.len().min(8)])
            .escape_debug()
            .to_string();
        return Err(FormatError::InvalidMagic {
            format: FORMAT,
            found,
        });
    }
    let (text, data_offset) = split_header(data);
    let text = String::from_utf8_lossy(text);

    let mut header = NrrdHeader {
        datatype: None,
        sizes: Vec::new(),
        dimension: None,
        encoding: Encoding::Raw,
        little_endian: true,
        spacings: Vec::new(),
        directions: None,
        origin: [0.0; 3],
        space_signs: [1.0; 3],
        micron_units: false,
        byte_skip: 0,
        data_file: None,
        data_offset,
    };

    for (key, value) in fields(&text) {
        let lower = value.to_ascii_lowercase();
        match key.as_str() {
            "type" => {
                header.datatype = Some(datatype_for(&lower).ok_or_else(|| {
                    FormatError::UnsupportedDatatype {
                        format: FORMAT,
                        code: value.to_string(),
                    }
                })?);
            }
            "dimension" => {
                let n = value
                    .parse::<usize>()
                    .map_err(|_| invalid(format!("bad dimension {value:?}")))?;
                header.dimension = Some(n);
            }
            "sizes" => {
                header.sizes = value
                    .split_whitespace()
                    .map(|s| s.parse::<i64>().map_err(|_| invalid(format!("bad size {s:?}"))))
                    .collect::<Result<_, _>>()?;
            }
            "encoding" => {
                header.encoding = match lower.as_str() {
                    "raw" => Encoding::Raw,
                    "gzip" | "gz" => Encoding::Gzip,
                    other => {
                        return Err(FormatError::UnsupportedFormat {
                            reason: format!("NRRD encoding {other:?}"),
                        })
                    }
                };
            }
            "endian" => header.little_endian = lower != "big",
            "spacings" => header.spacings = numbers(value),
            "space directions" => header.directions = parse_directions(value)?,
            "space origin" => {
                if let [x, y, z] = numbers(value)[..] {
                    header.origin = [x, y, z];
                }
            }
            "space units" => header.micron_units = lower.contains("micron"),
            "space" => match space_signs(value) {
                Some(signs) => header.space_signs = signs,
                None => warn!(space = value, "unsupported NRRD space, assuming RAS"),
            },
            "byte skip" | "byteskip" => {
                header.byte_skip = value
                    .parse()
                    .map_err(|_| invalid(format!("bad byte skip {value:?}")))?;
            }
            "data file" | "datafile" => header.data_file = Some(value.to_string()),
            _ => debug!(field = %key, "ignoring NRRD field"),
        }
    }
    Ok(header)
}

impl NrrdHeader {
    fn to_header(&self) -> Result<Header, FormatError> {
        let datatype = self.datatype.ok_or_else(|| invalid("type field missing"))?;
        let ndim = self.sizes.len();
        if !(1..=7).contains(&ndim) {
            return Err(invalid(format!("expected 1 to 7 sizes, got {ndim}")));
        }
        if self.dimension.is_some_and(|n| n != ndim) {
            return Err(invalid(format!(
                "dimension {:?} disagrees with {ndim} sizes",
                self.dimension
            )));
        }
        if let Some(bad) = self.sizes.iter().find(|&&n| n < 1) {
            return Err(invalid(format!("sizes must be positive, got {bad}")));
        }

        let mut header = Header::new(datatype, 1, 1, 1);
        header.dims[0] = ndim.max(3) as i64;
        header.dims[1..=ndim].copy_from_slice(&self.sizes);
        header.little_endian = self.little_endian;
        header.vox_offset = self.data_offset as u64;
        for (pix, &s) in header.pix_dims[1..].iter_mut().zip(&self.spacings) {
            if s.is_finite() && s != 0.0 {
                *pix = s.abs();
            }
        }

        match self.directions {
            Some(directions) => {
                let unit = if self.micron_units { 0.001 } else { 1.0 };
                for row in 0..3 {
                    let sign = self.space_signs[row] * unit;
                    for (axis, direction) in directions.iter().enumerate() {
                        header.affine[row][axis] = direction[row] * sign;
                    }
                    header.affine[row][3] = self.origin[row] * sign;
                }
                for axis in 0..3 {
                    let length = (0..3)
                        .map(|row| header.affine[row][axis].powi(2))
                        .sum::<f64>()
                        .sqrt();
                    header.pix_dims[axis + 1] = length;
                }
                header.sform_code = 2;
            }
            None => {
                for axis in 0..3 {
                    header.affine[axis][axis] = header.pix_dims[axis + 1];
                }
            }
        }
        Ok(header)
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Decoder for `.nrrd` files and `.nhdr` headers.
pub struct NrrdDecoder;

impl VolumeDecoder for NrrdDecoder {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn decode(&self, input: &DecodeInput<'_>) -> Result<Volume, VolumeError> {
        let nrrd = parse_header(input.data)?;
        let header = nrrd.to_header()?;
        let required = header.required_bytes(FORMAT)?;

        let detached = nrrd.data_file.is_some();
        let source = match &nrrd.data_file {
            Some(file) => {
                if file.eq_ignore_ascii_case("list") || file.contains(char::is_whitespace) {
                    return Err(FormatError::UnsupportedFormat {
                        reason: format!("multi-file NRRD data {file:?}"),
                    }
                    .into());
                }
                input.paired.ok_or_else(|| {
                    invalid(format!(
                        "{} names data file {file:?}, which was not supplied",
                        input.name
                    ))
                })?
            }
            None => &input.data[nrrd.data_offset..],
        };

        let inflated;
        let body = match nrrd.encoding {
            Encoding::Raw => match usize::try_from(nrrd.byte_skip) {
                Ok(skip) => source.get(skip..).unwrap_or_default(),
                // -1: the data is the last `required` bytes
                Err(_) => &source[source.len().saturating_sub(required)..],
            },
            Encoding::Gzip => {
                let skip = usize::try_from(nrrd.byte_skip).unwrap_or(0);
                if is_gzip(source) {
                    inflated = gunzip(source)?;
                    inflated.get(skip..).unwrap_or_default()
                } else if detached {
                    // Data files are inflated while they stream in
                    source.get(skip..).unwrap_or_default()
                } else {
                    return Err(FormatError::Decompression(format!(
                        "{} declares gzip encoding but the data is not gzip",
                        input.name
                    ))
                    .into());
                }
            }
        };

        if body.len() < required {
            return Err(if detached {
                VolumeError::DimensionMismatch {
                    expected: required,
                    actual: body.len(),
                }
            } else {
                FormatError::Truncated {
                    format: FORMAT,
                    required,
                    actual: body.len(),
                }
                .into()
            });
        }
        if body.len() > required {
            debug!(extra = body.len() - required, "truncating trailing NRRD data");
        }

        let mut voxels = body[..required].to_vec();
        if !header.little_endian {
            swap_bytes_in_place(&mut voxels, header.datatype.swap_width());
        }
        Volume::new(header, voxels)
    }
}
