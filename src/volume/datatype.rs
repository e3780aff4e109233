//! Voxel element types.
//!
//! Codes follow the NIfTI-1 `datatype` field, which every decoder in this
//! crate maps its own element tags onto.

use serde::Serialize;

use crate::error::FormatError;

/// Voxel element type, tagged with its NIfTI datatype code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum DataType {
    /// 1 bit per voxel, packed
    Binary = 1,
    UInt8 = 2,
    Int16 = 4,
    Int32 = 8,
    Float32 = 16,
    /// Pair of f32 (real, imaginary)
    Complex64 = 32,
    Float64 = 64,
    /// Packed 8-bit R, G, B
    Rgb24 = 128,
    Int8 = 256,
    UInt16 = 512,
    UInt32 = 768,
    Int64 = 1024,
    UInt64 = 1280,
    Float128 = 1536,
    /// Pair of f64 (real, imaginary)
    Complex128 = 1792,
    Complex256 = 2048,
    /// Packed 8-bit R, G, B, A
    Rgba32 = 2304,
}

impl DataType {
    /// Parse a NIfTI datatype code.
    pub fn from_code(code: i16) -> Result<Self, FormatError> {
        let datatype = match code {
            1 => Self::Binary,
            2 => Self::UInt8,
            4 => Self::Int16,
            8 => Self::Int32,
            16 => Self::Float32,
            32 => Self::Complex64,
            64 => Self::Float64,
            128 => Self::Rgb24,
            256 => Self::Int8,
            512 => Self::UInt16,
            768 => Self::UInt32,
            1024 => Self::Int64,
            1280 => Self::UInt64,
            1536 => Self::Float128,
            1792 => Self::Complex128,
            2048 => Self::Complex256,
            2304 => Self::Rgba32,
            _ => {
                return Err(FormatError::UnsupportedDatatype {
                    format: "NIfTI",
                    code: code.to_string(),
                })
            }
        };
        Ok(datatype)
    }

    /// The NIfTI datatype code.
    pub const fn code(self) -> i16 {
        self as i16
    }

    /// Bits per voxel, as stored in the NIfTI `bitpix` field.
    pub const fn bits_per_voxel(self) -> usize {
        match self {
            Self::Binary => 1,
            Self::UInt8 | Self::Int8 => 8,
            Self::Int16 | Self::UInt16 => 16,
            Self::Rgb24 => 24,
            Self::Int32 | Self::UInt32 | Self::Float32 | Self::Rgba32 => 32,
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::Complex64 => 64,
            Self::Float128 | Self::Complex128 => 128,
            Self::Complex256 => 256,
        }
    }

    /// Bytes per element.
    ///
    /// Binary voxels are packed 8 to a byte; use [`DataType::buffer_len`]
    /// for sizing buffers.
    pub const fn bytes_per_element(self) -> usize {
        match self {
            Self::Binary => 1,
            other => other.bits_per_voxel() / 8,
        }
    }

    /// Byte length of a buffer holding `voxels` elements of this type.
    ///
    /// `None` when the length does not fit in `usize`.
    pub const fn buffer_len(self, voxels: usize) -> Option<usize> {
        match self {
            Self::Binary => Some(voxels.div_ceil(8)),
            other => voxels.checked_mul(other.bytes_per_element()),
        }
    }

    /// Width of the scalar component used for byte swapping.
    ///
    /// Complex types swap each real/imaginary half independently; packed
    /// colour and single-byte types never swap.
    pub const fn swap_width(self) -> usize {
        match self {
            Self::Binary | Self::UInt8 | Self::Int8 | Self::Rgb24 | Self::Rgba32 => 1,
            Self::Complex64 => 4,
            Self::Complex128 => 8,
            Self::Complex256 => 16,
            other => other.bytes_per_element(),
        }
    }

    /// Whether this crate can hand the type to a renderer.
    pub const fn is_decodable(self) -> bool {
        !matches!(self, Self::Float128 | Self::Complex256)
    }

    /// Short lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Complex64 => "complex64",
            Self::Float64 => "float64",
            Self::Rgb24 => "rgb24",
            Self::Int8 => "int8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float128 => "float128",
            Self::Complex128 => "complex128",
            Self::Complex256 => "complex256",
            Self::Rgba32 => "rgba32",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reverse the byte order of every `width`-byte element in place.
pub(crate) fn swap_bytes_in_place(data: &mut [u8], width: usize) {
    if width <= 1 {
        return;
    }
    for element in data.chunks_exact_mut(width) {
        element.reverse();
    }
}
