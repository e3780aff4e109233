//! Zarr v2 `.zarray` metadata.

use serde::Deserialize;

use crate::error::FormatError;
use crate::volume::DataType;

/// Element types a store may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl ElementType {
    pub const fn size(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Voxel type used once the element lands in a volume.
    pub const fn datatype(self) -> DataType {
        match self {
            Self::Bool | Self::U8 => DataType::UInt8,
            Self::I8 => DataType::Int8,
            Self::U16 => DataType::UInt16,
            Self::I16 => DataType::Int16,
            Self::U32 => DataType::UInt32,
            Self::I32 => DataType::Int32,
            Self::U64 => DataType::UInt64,
            Self::I64 => DataType::Int64,
            Self::F32 => DataType::Float32,
            Self::F64 => DataType::Float64,
        }
    }

    /// Little-endian encoding of `value` as one element.
    pub fn encode(self, value: f64) -> Vec<u8> {
        match self {
            Self::Bool | Self::U8 => vec![value as u8],
            Self::I8 => (value as i8).to_le_bytes().to_vec(),
            Self::U16 => (value as u16).to_le_bytes().to_vec(),
            Self::I16 => (value as i16).to_le_bytes().to_vec(),
            Self::U32 => (value as u32).to_le_bytes().to_vec(),
            Self::I32 => (value as i32).to_le_bytes().to_vec(),
            Self::U64 => (value as u64).to_le_bytes().to_vec(),
            Self::I64 => (value as i64).to_le_bytes().to_vec(),
            Self::F32 => (value as f32).to_le_bytes().to_vec(),
            Self::F64 => value.to_le_bytes().to_vec(),
        }
    }
}

/// A parsed `dtype` string such as `<u2` or `|u1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtype {
    pub element: ElementType,
    pub big_endian: bool,
}

impl Dtype {
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let unsupported = || FormatError::UnsupportedDatatype {
            format: "Zarr",
            code: text.to_string(),
        };
        let (order, kind) = match (text.get(..1), text.get(1..)) {
            (Some(order), Some(kind)) => (order, kind),
            _ => return Err(unsupported()),
        };
        let big_endian = match order {
            "<" | "|" => false,
            ">" => true,
            _ => return Err(unsupported()),
        };
        let element = match kind {
            "b1" => ElementType::Bool,
            "u1" => ElementType::U8,
            "i1" => ElementType::I8,
            "u2" => ElementType::U16,
            "i2" => ElementType::I16,
            "u4" => ElementType::U32,
            "i4" => ElementType::I32,
            "u8" => ElementType::U64,
            "i8" => ElementType::I64,
            "f4" => ElementType::F32,
            "f8" => ElementType::F64,
            _ => return Err(unsupported()),
        };
        Ok(Self {
            element,
            big_endian,
        })
    }

    pub const fn size(&self) -> usize {
        self.element.size()
    }
}

/// Chunk compression codecs understood by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
    Gzip,
}

#[derive(Debug, Deserialize)]
struct CompressorConfig {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawArrayMetadata {
    zarr_format: u32,
    shape: Vec<usize>,
    chunks: Vec<usize>,
    dtype: String,
    compressor: Option<CompressorConfig>,
    #[serde(default)]
    fill_value: serde_json::Value,
    #[serde(default = "default_order")]
    order: String,
    #[serde(default)]
    filters: Option<Vec<serde_json::Value>>,
    #[serde(default = "default_separator")]
    dimension_separator: String,
}

fn default_order() -> String {
    "C".to_string()
}

fn default_separator() -> String {
    ".".to_string()
}

/// Validated array metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayMetadata {
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: Dtype,
    pub compression: Compression,
    pub fill_value: f64,
    pub dimension_separator: String,
}

fn zarr_error(message: impl Into<String>) -> FormatError {
    FormatError::Zarr(message.into())
}

impl ArrayMetadata {
    /// Parse and validate a `.zarray` document.
    pub fn from_json(text: &[u8]) -> Result<Self, FormatError> {
        let raw: RawArrayMetadata = serde_json::from_slice(text)
            .map_err(|e| zarr_error(format!("invalid .zarray: {e}")))?;

        if raw.zarr_format != 2 {
            return Err(FormatError::UnsupportedFormat {
                reason: format!("Zarr format version {}", raw.zarr_format),
            });
        }
        if raw.shape.is_empty() {
            return Err(zarr_error("zero-dimensional arrays are not supported"));
        }
        if raw.shape.len() != raw.chunks.len() {
            return Err(zarr_error(format!(
                "shape has {} axes but chunks has {}",
                raw.shape.len(),
                raw.chunks.len()
            )));
        }
        if raw.chunks.contains(&0) {
            return Err(zarr_error("chunk extents must be positive"));
        }
        if raw.order != "C" {
            return Err(zarr_error(format!("unsupported memory order {:?}", raw.order)));
        }
        if raw.filters.as_ref().is_some_and(|f| !f.is_empty()) {
            return Err(zarr_error("filters are not supported"));
        }

        let compression = match raw.compressor.as_ref().map(|c| c.id.as_str()) {
            None => Compression::None,
            Some("zlib") => Compression::Zlib,
            Some("gzip") => Compression::Gzip,
            Some(other) => return Err(zarr_error(format!("unsupported compressor {other:?}"))),
        };
        let separator = match raw.dimension_separator.as_str() {
            "." | "/" => raw.dimension_separator,
            other => return Err(zarr_error(format!("invalid dimension separator {other:?}"))),
        };

        let dtype = Dtype::parse(&raw.dtype)?;
        if raw
            .chunks
            .iter()
            .try_fold(dtype.size(), |bytes, &n| bytes.checked_mul(n))
            .is_none()
        {
            return Err(zarr_error(format!("chunks {:?} are too large", raw.chunks)));
        }

        Ok(Self {
            shape: raw.shape,
            chunks: raw.chunks,
            dtype,
            compression,
            fill_value: fill_value(&raw.fill_value)?,
            dimension_separator: separator,
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements in one chunk.
    pub fn chunk_len(&self) -> usize {
        self.chunks.iter().product()
    }

    /// Number of chunks along each axis.
    pub fn grid(&self) -> Vec<usize> {
        self.shape
            .iter()
            .zip(&self.chunks)
            .map(|(&extent, &chunk)| extent.div_ceil(chunk))
            .collect()
    }

    /// Store key of the chunk at grid position `coords`.
    pub fn chunk_key(&self, coords: &[usize]) -> String {
        coords
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(&self.dimension_separator)
    }
}

fn fill_value(value: &serde_json::Value) -> Result<f64, FormatError> {
    match value {
        serde_json::Value::Null => Ok(0.0),
        serde_json::Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| zarr_error(format!("fill value {n} out of range"))),
        serde_json::Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => Err(zarr_error(format!("unsupported fill value {other:?}"))),
        },
        other => Err(zarr_error(format!("unsupported fill value {other}"))),
    }
}
