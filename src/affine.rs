//! Spatial transform validation and repair.
//!
//! Real-world headers frequently carry unusable transforms: zero spacing,
//! an unset sform, quaternions that do not normalise. None of this is fatal.
//! [`process_affine`] always returns a header whose affine passes
//! [`is_affine_plausible`], degrading to a diagonal matrix when nothing better
//! is available.
//!
//! The pipeline is four `Header -> Header` steps, applied in order:
//!
//! 1. [`check_spacing`]
//! 2. [`check_rescale`]
//! 3. [`apply_qform`]
//! 4. [`repair_affine`]

use tracing::debug;

use crate::volume::{Affine, Header};

/// Residual below which the quaternion is treated as a 180 degree rotation.
const QUATERNION_EPSILON: f64 = 1.0e-7;

/// Determinant of the upper-left 3x3 block.
pub fn linear_determinant(affine: &Affine) -> f64 {
    let m = affine;
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// A transform is plausible when every entry is finite and the linear part
/// does not collapse any axis.
pub fn is_affine_plausible(affine: &Affine) -> bool {
    if affine.iter().flatten().any(|v| !v.is_finite()) {
        return false;
    }
    linear_determinant(affine).abs() > f64::EPSILON
}

/// Log zero spatial spacing. Correction happens in [`repair_affine`].
pub fn check_spacing(header: Header) -> Header {
    if header.pix_dims[1..=3].iter().any(|&s| s == 0.0) {
        debug!(pix_dims = ?&header.pix_dims[1..=3], "pixdims not plausible");
    }
    header
}

/// Force a usable linear rescale.
pub fn check_rescale(mut header: Header) -> Header {
    if header.scl_slope.is_nan() || header.scl_slope == 0.0 {
        header.scl_slope = 1.0;
    }
    if header.scl_inter.is_nan() {
        header.scl_inter = 0.0;
    }
    header
}

/// Replace the rotation/scale/translation with the quaternion form when it is
/// requested, when the current affine is unusable, or when the qform has the
/// higher declared priority.
pub fn apply_qform(mut header: Header, prefer_qform: bool) -> Header {
    let plausible = is_affine_plausible(&header.affine);
    if !prefer_qform && plausible && header.qform_code <= header.sform_code {
        return header;
    }
    debug!("spatial transform based on qform");

    let (a, b, c, d) = quaternion(header.quatern_b, header.quatern_c, header.quatern_d);
    let qfac = if header.pix_dims[0] == 0.0 {
        1.0
    } else {
        header.pix_dims[0]
    };

    let rotation = [
        [
            a * a + b * b - c * c - d * d,
            2.0 * b * c - 2.0 * a * d,
            2.0 * b * d + 2.0 * a * c,
        ],
        [
            2.0 * b * c + 2.0 * a * d,
            a * a + c * c - b * b - d * d,
            2.0 * c * d - 2.0 * a * b,
        ],
        [
            2.0 * b * d - 2.0 * a * c,
            2.0 * c * d + 2.0 * a * b,
            a * a + d * d - c * c - b * b,
        ],
    ];

    for (row, rot_row) in rotation.iter().enumerate() {
        for (col, &r) in rot_row.iter().enumerate() {
            let mut value = r * header.pix_dims[col + 1];
            if col == 2 {
                value *= qfac;
            }
            header.affine[row][col] = value;
        }
    }
    header.affine[0][3] = header.qoffset_x;
    header.affine[1][3] = header.qoffset_y;
    header.affine[2][3] = header.qoffset_z;
    header.affine[3] = [0.0, 0.0, 0.0, 1.0];
    header
}

/// Reconstruct `a` from the unit constraint.
///
/// When `b² + c² + d²` reaches 1 the remaining vector is renormalised and
/// `a` is zero.
fn quaternion(b: f64, c: f64, d: f64) -> (f64, f64, f64, f64) {
    let norm = b * b + c * c + d * d;
    let residual = 1.0 - norm;
    if residual < QUATERNION_EPSILON {
        if norm > 0.0 && norm.is_finite() {
            let scale = 1.0 / norm.sqrt();
            return (0.0, b * scale, c * scale, d * scale);
        }
        return (0.0, b, c, d);
    }
    (residual.sqrt(), b, c, d)
}

/// Last resort: replace an unusable affine with a diagonal one built from the
/// spacing, centred so that voxel `dims / 2 - 1` sits at the origin.
pub fn repair_affine(mut header: Header) -> Header {
    if is_affine_plausible(&header.affine) {
        return header;
    }
    debug!("defective header: spatial transform does not make sense, using diagonal");

    let mut spacing = [1.0; 3];
    for (axis, s) in spacing.iter_mut().enumerate() {
        let value = header.pix_dims[axis + 1];
        if value.is_finite() && value != 0.0 {
            *s = value;
        }
        header.pix_dims[axis + 1] = *s;
    }

    let mut affine = [[0.0; 4]; 4];
    for (axis, &s) in spacing.iter().enumerate() {
        let extent = header.dims[axis + 1].max(1) as f64;
        affine[axis][axis] = s;
        affine[axis][3] = -(extent / 2.0 - 1.0) * s;
    }
    affine[3][3] = 1.0;
    header.affine = affine;
    header.warn("spatial transform was implausible; replaced with a diagonal matrix from voxel spacing");
    header
}

/// Run the full validation and repair pipeline.
pub fn process_affine(header: Header, prefer_qform: bool) -> Header {
    let header = check_spacing(header);
    let header = check_rescale(header);
    let header = apply_qform(header, prefer_qform);
    repair_affine(header)
}
