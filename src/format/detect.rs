//! Format detection for volumetric imaging files.
//!
//! Detection examines magic bytes first and falls back to the file
//! extension for formats that carry no signature (AFNI `.HEAD`, Analyze
//! `.hdr`, Zarr stores). Supported formats:
//!
//! - **NIfTI-1 / NIfTI-2 / Analyze 7.5**: `sizeof_hdr` of 348 or 540 in
//!   either byte order
//! - **ECAT7**: big-endian `MATR` signature
//! - **AFNI**: `.HEAD` attribute text
//! - **MGH/MGZ**: version 1 big-endian header with an `.mgh`/`.mgz` name
//! - **NRRD**: `NRRD000` text magic (attached `.nrrd` or detached `.nhdr`)
//! - **NumPy**: `\x93NUMPY` (single array) or a zip archive (`.npz`)
//! - **Raster image**: PNG, JPEG, BMP
//! - **Zarr**: chunked store addressed by URL

// =============================================================================
// VolumeFormat
// =============================================================================

/// Detected volume format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeFormat {
    /// NIfTI-1, NIfTI-2 or magic-less Analyze 7.5
    Nifti,

    /// ECAT7 PET list-structured file
    Ecat,

    /// AFNI HEAD/BRIK pair
    Afni,

    /// FreeSurfer MGH, optionally gzip-compressed as MGZ
    Mgh,

    /// NRRD with attached or detached data
    Nrrd,

    /// Single NumPy array
    Npy,

    /// Zip archive of NumPy arrays
    Npz,

    /// 2D raster image
    Raster,

    /// Chunked Zarr store
    Zarr,
}

impl VolumeFormat {
    /// Get a human-readable name for the format.
    pub const fn name(&self) -> &'static str {
        match self {
            VolumeFormat::Nifti => "NIfTI",
            VolumeFormat::Ecat => "ECAT7",
            VolumeFormat::Afni => "AFNI",
            VolumeFormat::Mgh => "MGH",
            VolumeFormat::Nrrd => "NRRD",
            VolumeFormat::Npy => "NumPy",
            VolumeFormat::Npz => "NumPy archive",
            VolumeFormat::Raster => "Raster image",
            VolumeFormat::Zarr => "Zarr",
        }
    }
}

impl std::fmt::Display for VolumeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Signatures
// =============================================================================

/// gzip member header.
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// NIfTI-1 / Analyze header size.
pub const NIFTI1_HEADER_SIZE: usize = 348;

/// NIfTI-2 header size.
pub const NIFTI2_HEADER_SIZE: usize = 540;

/// ECAT7 signature ("MATR") as a big-endian integer.
pub const ECAT_MAGIC: u32 = 0x4D41_5452;

/// MGH header size; voxels start right after it.
pub const MGH_HEADER_SIZE: usize = 284;

const NRRD_MAGIC: &[u8] = b"NRRD000";

const NUMPY_MAGIC: &[u8] = b"\x93NUMPY";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const BMP_MAGIC: &[u8] = b"BM";

/// Check for the gzip magic.
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Check for a NIfTI-1, NIfTI-2 or Analyze header in either byte order.
pub fn is_nifti(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    let raw = [data[0], data[1], data[2], data[3]];
    let le = i32::from_le_bytes(raw) as usize;
    let be = i32::from_be_bytes(raw) as usize;
    [le, be]
        .iter()
        .any(|&size| size == NIFTI1_HEADER_SIZE || size == NIFTI2_HEADER_SIZE)
}

/// Check for the ECAT7 `MATR` signature.
pub fn is_ecat(data: &[u8]) -> bool {
    data.len() >= 4 && u32::from_be_bytes([data[0], data[1], data[2], data[3]]) == ECAT_MAGIC
}

/// Check for an MGH file, or a gzip stream named like one.
///
/// MGH has no magic beyond its version field, so the name must agree.
pub fn is_mgh(data: &[u8], name: &str) -> bool {
    if !matches!(extension(name).as_str(), "mgh" | "mgz") {
        return false;
    }
    is_gzip(data) || (data.len() >= MGH_HEADER_SIZE && data[..4] == 1i32.to_be_bytes())
}

/// Check for the `NRRD000x` magic line.
pub fn is_nrrd(data: &[u8]) -> bool {
    data.starts_with(NRRD_MAGIC)
}

/// Check for a `.npy` array.
pub fn is_npy(data: &[u8]) -> bool {
    data.starts_with(NUMPY_MAGIC)
}

/// Check for a zip local file header.
pub fn is_zip(data: &[u8]) -> bool {
    data.starts_with(ZIP_MAGIC)
}

/// Check for a PNG, JPEG or BMP signature.
pub fn is_raster(data: &[u8]) -> bool {
    data.starts_with(PNG_MAGIC) || data.starts_with(JPEG_MAGIC) || data.starts_with(BMP_MAGIC)
}

/// Check for AFNI attribute text (`type = ...-attribute`).
pub fn is_afni_head(data: &[u8]) -> bool {
    let head = &data[..data.len().min(256)];
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start();
    trimmed.starts_with("type") && trimmed.contains("-attribute")
}

// =============================================================================
// Extensions
// =============================================================================

/// Lowercase extension of a path or URL, ignoring any query string,
/// fragment and a trailing `.gz`.
///
/// ```
/// use volume_streamer::format::extension;
///
/// assert_eq!(extension("http://host/brain.nii.gz?token=1"), "nii");
/// assert_eq!(extension("scan+orig.HEAD"), "head");
/// assert_eq!(extension("noext"), "");
/// ```
pub fn extension(name: &str) -> String {
    let path = name.split(['?', '#']).next().unwrap_or(name);
    let file = path.rsplit('/').next().unwrap_or(path);
    let lower = file.to_ascii_lowercase();
    let stem = lower.strip_suffix(".gz").unwrap_or(&lower);
    match stem.rsplit_once('.') {
        Some((_, ext)) => ext.to_string(),
        None => String::new(),
    }
}

/// Whether a location names a Zarr store.
pub fn is_zarr_location(name: &str) -> bool {
    let path = name.split(['?', '#']).next().unwrap_or(name);
    path.trim_end_matches('/')
        .to_ascii_lowercase()
        .split('/')
        .any(|segment| segment.ends_with(".zarr"))
}

/// Guess the format from the file name alone.
pub fn format_from_extension(name: &str) -> Option<VolumeFormat> {
    if is_zarr_location(name) {
        return Some(VolumeFormat::Zarr);
    }
    match extension(name).as_str() {
        "nii" | "hdr" | "img" => Some(VolumeFormat::Nifti),
        "v" | "ecat" => Some(VolumeFormat::Ecat),
        "head" | "brik" => Some(VolumeFormat::Afni),
        "mgh" | "mgz" => Some(VolumeFormat::Mgh),
        "nrrd" | "nhdr" => Some(VolumeFormat::Nrrd),
        "npy" => Some(VolumeFormat::Npy),
        "npz" => Some(VolumeFormat::Npz),
        "png" | "jpg" | "jpeg" | "bmp" => Some(VolumeFormat::Raster),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_nifti_both_byte_orders() {
        assert!(is_nifti(&348i32.to_le_bytes()));
        assert!(is_nifti(&348i32.to_be_bytes()));
        assert!(is_nifti(&540i32.to_le_bytes()));
        assert!(!is_nifti(&349i32.to_le_bytes()));
        assert!(!is_nifti(&[0x5C, 0x01]));
    }

    #[test]
    fn test_is_ecat() {
        assert!(is_ecat(b"MATRIX72v"));
        assert!(!is_ecat(b"RTAM"));
    }

    #[test]
    fn test_magic_checks() {
        assert!(is_gzip(&[0x1F, 0x8B, 0x08]));
        assert!(!is_gzip(&[0x1F]));
        assert!(is_npy(b"\x93NUMPY\x01\x00"));
        assert!(is_zip(b"PK\x03\x04rest"));
        assert!(is_raster(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]));
        assert!(is_raster(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!is_raster(b"\x93NUMPY"));
    }

    #[test]
    fn test_is_mgh_needs_name_and_version() {
        let mut header = vec![0u8; MGH_HEADER_SIZE];
        header[3] = 1;
        assert!(is_mgh(&header, "brain.mgh"));
        assert!(is_mgh(&[0x1F, 0x8B, 0x08], "http://host/T1.MGZ?x=1"));
        assert!(!is_mgh(&header, "brain.nii"));
        header[3] = 2;
        assert!(!is_mgh(&header, "brain.mgh"));
        assert!(!is_mgh(&[0, 0, 0, 1], "brain.mgh"));
    }

    #[test]
    fn test_is_nrrd() {
        assert!(is_nrrd(b"NRRD0004\ntype: float\n"));
        assert!(!is_nrrd(b"NRRD"));
    }

    #[test]
    fn test_is_afni_head() {
        let head = b"\ntype = string-attribute\nname = BYTEORDER_STRING\ncount = 10\n";
        assert!(is_afni_head(head));
        assert!(!is_afni_head(b"typewriter"));
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("brain.nii.gz"), "nii");
        assert_eq!(extension("/data/scan.HDR"), "hdr");
        assert_eq!(extension("http://host/a.b/c.npz#frag"), "npz");
        assert_eq!(extension("archive.gz"), "");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(format_from_extension("t1.nii.gz"), Some(VolumeFormat::Nifti));
        assert_eq!(format_from_extension("scan+orig.HEAD"), Some(VolumeFormat::Afni));
        assert_eq!(
            format_from_extension("https://host/data.zarr/0?z=10"),
            Some(VolumeFormat::Zarr)
        );
        assert_eq!(format_from_extension("image.PNG"), Some(VolumeFormat::Raster));
        assert_eq!(format_from_extension("aseg.mgz"), Some(VolumeFormat::Mgh));
        assert_eq!(format_from_extension("dwi.nhdr"), Some(VolumeFormat::Nrrd));
        assert_eq!(format_from_extension("readme.txt"), None);
    }

    #[test]
    fn test_volume_format_name() {
        assert_eq!(VolumeFormat::Nifti.name(), "NIfTI");
        assert_eq!(VolumeFormat::Ecat.to_string(), "ECAT7");
    }
}
