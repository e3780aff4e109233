//! Canonical volume header.

use serde::Serialize;

use crate::error::FormatError;

use super::datatype::DataType;

/// Row-major 4x4 matrix mapping voxel indices to world millimetres.
pub type Affine = [[f64; 4]; 4];

/// 4x4 identity.
pub const IDENTITY: Affine = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// All-zero matrix (the state of an unset sform).
pub const ZERO_AFFINE: Affine = [[0.0; 4]; 4];

/// Metadata for one decoded volume.
///
/// Built once by a decoder, passed through [`crate::affine::process_affine`],
/// then read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    /// `dims[0]` is the number of dimensions, `dims[1..=7]` the extents
    pub dims: [i64; 8],

    /// `pix_dims[0]` is the qfac sign factor, `pix_dims[1..=7]` the spacing
    pub pix_dims: [f64; 8],

    pub affine: Affine,

    pub datatype: DataType,

    pub scl_slope: f64,
    pub scl_inter: f64,

    /// Display window; `0..0` means unset
    pub cal_min: f64,
    pub cal_max: f64,

    pub qform_code: i32,
    pub sform_code: i32,

    pub quatern_b: f64,
    pub quatern_c: f64,
    pub quatern_d: f64,
    pub qoffset_x: f64,
    pub qoffset_y: f64,
    pub qoffset_z: f64,

    /// Byte offset of voxel data in single-file formats
    pub vox_offset: u64,

    /// Byte order of the source file (voxel buffers are always normalised
    /// to little-endian)
    pub little_endian: bool,

    pub description: String,

    /// Non-fatal problems found while decoding or repairing
    pub warnings: Vec<String>,
}

impl Header {
    /// A 3D header with unit spacing and an identity transform.
    pub fn new(datatype: DataType, nx: i64, ny: i64, nz: i64) -> Self {
        Self {
            dims: [3, nx, ny, nz, 1, 1, 1, 1],
            pix_dims: [1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
            affine: IDENTITY,
            datatype,
            scl_slope: 1.0,
            scl_inter: 0.0,
            cal_min: 0.0,
            cal_max: 0.0,
            qform_code: 0,
            sform_code: 0,
            quatern_b: 0.0,
            quatern_c: 0.0,
            quatern_d: 0.0,
            qoffset_x: 0.0,
            qoffset_y: 0.0,
            qoffset_z: 0.0,
            vox_offset: 0,
            little_endian: true,
            description: String::new(),
            warnings: Vec::new(),
        }
    }

    /// Number of voxels across all declared dimensions.
    ///
    /// Extents of zero or below are counted as one. `None` when the product
    /// does not fit in `usize`.
    pub fn voxel_count(&self) -> Option<usize> {
        let ndim = self.dims[0].clamp(1, 7) as usize;
        self.dims[1..=ndim].iter().try_fold(1usize, |count, &d| {
            count.checked_mul(usize::try_from(d.max(1)).ok()?)
        })
    }

    /// Byte length the voxel buffer must have, or `None` on overflow.
    pub fn voxel_bytes(&self) -> Option<usize> {
        self.datatype.buffer_len(self.voxel_count()?)
    }

    /// [`voxel_bytes`](Self::voxel_bytes) as a decode error for `format`.
    pub(crate) fn required_bytes(&self, format: &'static str) -> Result<usize, FormatError> {
        self.voxel_bytes().ok_or_else(|| self.overflow(format))
    }

    pub(crate) fn overflow(&self, format: &'static str) -> FormatError {
        FormatError::InvalidHeader {
            format,
            message: format!(
                "dimensions {:?} of {:?} overflow the addressable size",
                &self.dims[1..=self.dims[0].clamp(1, 7) as usize],
                self.datatype
            ),
        }
    }

    /// Record a non-fatal problem.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Set the affine used by synthetic single-volume formats: +x, -y, -z
    /// axes centred on the grid.
    pub(crate) fn set_centered_raster_affine(&mut self) {
        let [sx, sy, sz] = [self.pix_dims[1], self.pix_dims[2], self.pix_dims[3]];
        let [nx, ny, nz] = [
            self.dims[1] as f64,
            self.dims[2] as f64,
            self.dims[3] as f64,
        ];
        self.affine = [
            [sx, 0.0, 0.0, -(nx - 2.0) * 0.5 * sx],
            [0.0, -sy, 0.0, (ny - 2.0) * 0.5 * sy],
            [0.0, 0.0, -sz, (nz - 2.0) * 0.5 * sz],
            [0.0, 0.0, 0.0, 1.0],
        ];
    }
}

/// Convert an affine to nested rows, the shape renderers and JSON use.
pub fn affine_to_rows(affine: &Affine) -> Vec<Vec<f64>> {
    affine.iter().map(|row| row.to_vec()).collect()
}

/// Convert nested rows back to an affine.
///
/// Returns `None` unless the input is exactly 4 rows of 4 values.
pub fn affine_from_rows(rows: &[Vec<f64>]) -> Option<Affine> {
    if rows.len() != 4 {
        return None;
    }
    let mut affine = ZERO_AFFINE;
    for (dst, src) in affine.iter_mut().zip(rows) {
        if src.len() != 4 {
            return None;
        }
        dst.copy_from_slice(src);
    }
    Some(affine)
}
