//! Decoder registry.
//!
//! Maps a signature predicate to a decoder. The table is built once and
//! walked in registration order, so adding a format is a single
//! [`DecoderRegistry::register`] call.

use tracing::debug;

use crate::error::{FormatError, VolumeError};
use crate::volume::Volume;

use super::afni::AfniDecoder;
use super::detect::{
    format_from_extension, is_afni_head, is_ecat, is_gzip, is_mgh, is_nifti, is_npy, is_nrrd,
    is_raster, is_zip, VolumeFormat,
};
use super::ecat::EcatDecoder;
use super::mgh::MghDecoder;
use super::nifti::NiftiDecoder;
use super::nrrd::NrrdDecoder;
use super::numpy::{NpyDecoder, NpzDecoder};
use super::raster::RasterDecoder;

/// Input handed to a decoder.
#[derive(Debug, Clone, Copy)]
pub struct DecodeInput<'a> {
    /// Primary file contents
    pub data: &'a [u8],

    /// Secondary file for header/data split formats (BRIK, IMG, detached NRRD)
    pub paired: Option<&'a [u8]>,

    /// File name or URL, used for diagnostics and extension fallback
    pub name: &'a str,
}

impl<'a> DecodeInput<'a> {
    pub fn new(data: &'a [u8], name: &'a str) -> Self {
        Self {
            data,
            paired: None,
            name,
        }
    }

    pub fn with_paired(mut self, paired: Option<&'a [u8]>) -> Self {
        self.paired = paired;
        self
    }
}

/// Turns a raw buffer into a [`Volume`].
///
/// Decoders are synchronous and stateless; the returned header still has to
/// go through [`crate::affine::process_affine`].
pub trait VolumeDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, input: &DecodeInput<'_>) -> Result<Volume, VolumeError>;
}

/// Signature predicate over `(data, name)`.
pub type Predicate = fn(&[u8], &str) -> bool;

struct Registration {
    format: VolumeFormat,
    matches: Predicate,
    decoder: Box<dyn VolumeDecoder>,
}

/// Ordered dispatch table from signature to decoder.
pub struct DecoderRegistry {
    entries: Vec<Registration>,
}

impl DecoderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry with every buffer decoder this crate ships.
    ///
    /// Zarr stores are not buffers and are read by [`crate::volume::VolumeLoader`]
    /// directly.
    pub fn with_default_decoders() -> Self {
        let mut registry = Self::new();
        registry.register(VolumeFormat::Npy, |d, _| is_npy(d), Box::new(NpyDecoder));
        registry.register(VolumeFormat::Npz, |d, _| is_zip(d), Box::new(NpzDecoder));
        registry.register(VolumeFormat::Ecat, |d, _| is_ecat(d), Box::new(EcatDecoder));
        registry.register(VolumeFormat::Mgh, is_mgh, Box::new(MghDecoder));
        registry.register(VolumeFormat::Nrrd, |d, _| is_nrrd(d), Box::new(NrrdDecoder));
        registry.register(
            VolumeFormat::Nifti,
            |d, _| is_nifti(d) || is_gzip(d),
            Box::new(NiftiDecoder),
        );
        registry.register(VolumeFormat::Raster, |d, _| is_raster(d), Box::new(RasterDecoder));
        registry.register(VolumeFormat::Afni, |d, _| is_afni_head(d), Box::new(AfniDecoder));
        registry
    }

    /// Append a decoder. Earlier registrations win when predicates overlap.
    pub fn register(
        &mut self,
        format: VolumeFormat,
        matches: Predicate,
        decoder: Box<dyn VolumeDecoder>,
    ) {
        self.entries.push(Registration {
            format,
            matches,
            decoder,
        });
    }

    /// Formats with a registered decoder, in dispatch order.
    pub fn formats(&self) -> Vec<VolumeFormat> {
        self.entries.iter().map(|e| e.format).collect()
    }

    /// Identify the format of `data`, falling back to the extension of `name`
    /// when no signature matches.
    pub fn detect(&self, data: &[u8], name: &str) -> Option<VolumeFormat> {
        if let Some(entry) = self.entries.iter().find(|e| (e.matches)(data, name)) {
            return Some(entry.format);
        }
        format_from_extension(name)
    }

    /// Decoder registered for `format`.
    pub fn decoder(&self, format: VolumeFormat) -> Option<&dyn VolumeDecoder> {
        self.entries
            .iter()
            .find(|e| e.format == format)
            .map(|e| e.decoder.as_ref())
    }

    /// Detect and decode.
    pub fn decode(&self, input: &DecodeInput<'_>) -> Result<Volume, VolumeError> {
        let format = self
            .detect(input.data, input.name)
            .ok_or_else(|| FormatError::UnsupportedFormat {
                reason: format!("no decoder recognises {}", input.name),
            })?;
        self.decode_as(format, input)
    }

    /// Decode with the decoder for an already known format.
    pub fn decode_as(
        &self,
        format: VolumeFormat,
        input: &DecodeInput<'_>,
    ) -> Result<Volume, VolumeError> {
        let decoder = self
            .decoder(format)
            .ok_or_else(|| FormatError::UnsupportedFormat {
                reason: format!("{} cannot be decoded from a buffer", format.name()),
            })?;
        debug!(name = input.name, decoder = decoder.name(), "decoding volume");
        decoder.decode(input)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_default_decoders()
    }
}
