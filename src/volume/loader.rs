use std::sync::Arc;

use tracing::{debug, info};

use crate::affine::process_affine;
use crate::error::VolumeError;
use crate::format::{
    extension, gunzip, is_gzip, is_zarr_location, nrrd, DecodeInput, DecoderRegistry,
};
use crate::io::{fetch_paired, paired_url, sibling_url, FetchOptions, StreamingFetcher};
use crate::zarr;

use super::Volume;

/// Options for one load.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Use the quaternion transform even when a plausible sform exists
    pub prefer_qform: bool,

    /// Companion data file to use instead of the one derived from the URL
    pub paired_url: Option<String>,

    /// Headers and cancellation for every request of this load
    pub fetch: FetchOptions,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefer_qform(mut self, prefer: bool) -> Self {
        self.prefer_qform = prefer;
        self
    }

    pub fn with_paired_url(mut self, url: impl Into<String>) -> Self {
        self.paired_url = Some(url.into());
        self
    }

    pub fn with_fetch_options(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }
}

/// Turns buffers and locations into volumes with a usable affine.
#[derive(Clone)]
pub struct VolumeLoader {
    registry: Arc<DecoderRegistry>,
    fetcher: StreamingFetcher,
}

impl Default for VolumeLoader {
    fn default() -> Self {
        Self::new(StreamingFetcher::default())
    }
}

impl VolumeLoader {
    /// A loader with every built-in decoder.
    pub fn new(fetcher: StreamingFetcher) -> Self {
        Self::with_registry(fetcher, DecoderRegistry::with_default_decoders())
    }

    pub fn with_registry(fetcher: StreamingFetcher, registry: DecoderRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            fetcher,
        }
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    pub fn fetcher(&self) -> &StreamingFetcher {
        &self.fetcher
    }

    /// Decode an in-memory file.
    ///
    /// # Arguments
    ///
    /// * `data` - File contents, possibly gzip-compressed
    /// * `name` - File name or URL, used for detection by extension
    /// * `paired` - Companion data file for split header/data formats
    /// * `prefer_qform` - Forwarded to [`process_affine`]
    pub fn load_buffer(
        &self,
        data: &[u8],
        name: &str,
        paired: Option<&[u8]>,
        prefer_qform: bool,
    ) -> Result<Volume, VolumeError> {
        let inflated;
        let data = if is_gzip(data) {
            inflated = gunzip(data)?;
            debug!(name, compressed = data.len(), inflated = inflated.len(), "inflated gzip buffer");
            &inflated[..]
        } else {
            data
        };

        let input = DecodeInput::new(data, name).with_paired(paired);
        let mut volume = self.registry.decode(&input)?;
        volume.header = process_affine(volume.header, prefer_qform);
        Ok(volume)
    }

    /// Fetch and decode the volume at `url`.
    ///
    /// Split header/data formats fetch their companion file as well, and a
    /// detached NRRD header fetches the data file it names. Zarr locations
    /// read the slab selected by the query string.
    pub async fn load_url(&self, url: &str, options: &LoadOptions) -> Result<Volume, VolumeError> {
        if is_zarr_location(url) {
            let mut volume = zarr::read_volume(&self.fetcher, url, &options.fetch).await?;
            volume.header = process_affine(volume.header, options.prefer_qform);
            log_loaded(url, &volume);
            return Ok(volume);
        }

        let data = self.fetcher.fetch_with(url, &options.fetch).await?;

        let ext = extension(url);
        let companion = paired_url(url, &ext, options.paired_url.as_deref())
            .or_else(|| nrrd::data_file(&data).map(|file| sibling_url(url, &file)));
        let paired = match companion {
            Some(companion) => {
                debug!(url, companion = %companion, "fetching paired file");
                fetch_paired(&self.fetcher, &companion, &options.fetch).await?
            }
            None => None,
        };

        let volume = self.load_buffer(&data, url, paired.as_deref(), options.prefer_qform)?;
        log_loaded(url, &volume);
        Ok(volume)
    }
}

fn log_loaded(url: &str, volume: &Volume) {
    info!(
        url,
        datatype = %volume.header.datatype,
        dims = ?&volume.header.dims[1..4],
        warnings = volume.header.warnings.len(),
        "loaded volume"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use crate::volume::DataType;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn npy_u8(shape: &str, payload: &[u8]) -> Vec<u8> {
        let mut dict = format!("{{'descr': '|u1', 'fortran_order': False, 'shape': {shape}, }}");
        while (10 + dict.len() + 1) % 64 != 0 {
            dict.push(' ');
        }
        dict.push('\n');
        let mut out = b"\x93NUMPY\x01\x00".to_vec();
        out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
        out.extend_from_slice(dict.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_load_buffer_inflates_and_repairs() {
        let file = gzip(&npy_u8("(2, 3, 4)", &[7; 24]));
        let volume = VolumeLoader::default()
            .load_buffer(&file, "stack.npy", None, false)
            .unwrap();

        assert_eq!(volume.header.datatype, DataType::UInt8);
        assert_eq!(&volume.header.dims[1..4], &[4, 3, 2]);
        assert!(crate::affine::is_affine_plausible(&volume.header.affine));
    }

    #[test]
    fn test_unknown_buffer() {
        let err = VolumeLoader::default()
            .load_buffer(b"plain text", "notes.txt", None, false)
            .unwrap_err();
        assert!(err.to_string().contains("notes.txt"));
    }

    #[tokio::test]
    async fn test_load_url_streams_through_fetcher() {
        let source = MemorySource::new().with_chunk_size(7);
        source.insert("mem://vol/stack.npy.gz", gzip(&npy_u8("(1, 2, 2)", &[1, 2, 3, 4])));
        let loader = VolumeLoader::new(StreamingFetcher::new(source.clone()));

        let volume = loader
            .load_url("mem://vol/stack.npy.gz", &LoadOptions::new())
            .await
            .unwrap();
        assert_eq!(&volume.voxels.data()[..], &[1, 2, 3, 4]);
        // No companion for .npy
        assert_eq!(source.request_count(), 1);
    }

    #[tokio::test]
    async fn test_load_url_missing() {
        let loader = VolumeLoader::new(StreamingFetcher::new(MemorySource::new()));
        let err = loader
            .load_url("mem://absent.nii", &LoadOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::Fetch(e) if e.is_not_found()));
    }
}
