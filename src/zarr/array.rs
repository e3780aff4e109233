use std::io::Read;
use std::ops::Range;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::{FormatError, VolumeError};
use crate::volume::swap_bytes_in_place;

use super::metadata::{ArrayMetadata, Compression, Dtype};
use super::store::{join_key, ZarrStore};

/// Concurrent chunk requests issued by a region read.
const REGION_CONCURRENCY: usize = 4;

/// A dense block read out of an array, little-endian, C order.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

/// One Zarr v2 array inside a store.
#[derive(Clone)]
pub struct ZarrArray {
    store: ZarrStore,
    path: String,
    metadata: ArrayMetadata,
}

impl std::fmt::Debug for ZarrArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrArray")
            .field("root", &self.store.root())
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl ZarrArray {
    /// Open the array at `path` ("" or "/" for the store root).
    pub async fn open(store: &ZarrStore, path: &str) -> Result<Self, VolumeError> {
        let key = join_key(path, ".zarray");
        let Some(document) = store.get(&key).await? else {
            if store.get(&join_key(path, "zarr.json")).await?.is_some() {
                return Err(FormatError::UnsupportedFormat {
                    reason: "Zarr v3 stores are not supported".to_string(),
                }
                .into());
            }
            return Err(FormatError::Zarr(format!(
                "no array metadata at {}",
                store.url_for(&key)
            ))
            .into());
        };
        let metadata = ArrayMetadata::from_json(&document)?;
        debug!(
            root = store.root(),
            path,
            shape = ?metadata.shape,
            chunks = ?metadata.chunks,
            "opened zarr array"
        );
        Ok(Self {
            store: store.clone(),
            path: path.trim_matches('/').to_string(),
            metadata,
        })
    }

    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    pub fn shape(&self) -> &[usize] {
        &self.metadata.shape
    }

    pub fn chunks(&self) -> &[usize] {
        &self.metadata.chunks
    }

    pub fn dtype(&self) -> Dtype {
        self.metadata.dtype
    }

    /// Path of this array relative to the store root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded chunk at grid position `coords`, little-endian.
    ///
    /// A chunk absent from the store reads as the fill value.
    pub async fn fetch_chunk(&self, coords: &[usize]) -> Result<Vec<u8>, VolumeError> {
        let grid = self.metadata.grid();
        if coords.len() != grid.len() || coords.iter().zip(&grid).any(|(c, g)| c >= g) {
            return Err(FormatError::Zarr(format!(
                "chunk {coords:?} outside grid {grid:?}"
            ))
            .into());
        }

        let key = join_key(&self.path, &self.metadata.chunk_key(coords));
        match self.store.get(&key).await? {
            Some(raw) => Ok(self.decode_chunk(&raw, &key)?),
            None => {
                debug!(key = %key, "chunk missing, using fill value");
                Ok(self.fill_chunk())
            }
        }
    }

    fn fill_chunk(&self) -> Vec<u8> {
        let element = self.metadata.dtype.element.encode(self.metadata.fill_value);
        element.repeat(self.metadata.chunk_len())
    }

    fn decode_chunk(&self, raw: &[u8], key: &str) -> Result<Vec<u8>, FormatError> {
        let inflate_err = |e: std::io::Error| FormatError::Zarr(format!("chunk {key}: {e}"));
        let mut data = match self.metadata.compression {
            Compression::None => raw.to_vec(),
            Compression::Zlib => {
                let mut out = Vec::new();
                flate2::read::ZlibDecoder::new(raw)
                    .read_to_end(&mut out)
                    .map_err(inflate_err)?;
                out
            }
            Compression::Gzip => {
                let mut out = Vec::new();
                flate2::read::MultiGzDecoder::new(raw)
                    .read_to_end(&mut out)
                    .map_err(inflate_err)?;
                out
            }
        };

        let size = self.metadata.dtype.size();
        let expected = self.metadata.chunk_len() * size;
        if data.len() < expected {
            return Err(FormatError::Zarr(format!(
                "chunk {key} holds {} bytes, expected {expected}",
                data.len()
            )));
        }
        data.truncate(expected);
        if self.metadata.dtype.big_endian {
            swap_bytes_in_place(&mut data, size);
        }
        Ok(data)
    }

    /// Read a block of the array.
    ///
    /// `selection` has one entry per axis: `Some(i)` keeps only index `i`
    /// (the axis stays, with length 1), `None` keeps the whole axis.
    pub async fn get_region(&self, selection: &[Option<usize>]) -> Result<Region, VolumeError> {
        let shape = &self.metadata.shape;
        let chunks = &self.metadata.chunks;
        if selection.len() != shape.len() {
            return Err(FormatError::Zarr(format!(
                "selection has {} axes, array has {}",
                selection.len(),
                shape.len()
            ))
            .into());
        }

        let mut ranges: Vec<Range<usize>> = Vec::with_capacity(shape.len());
        for (axis, (&extent, pick)) in shape.iter().zip(selection).enumerate() {
            let range = match *pick {
                Some(index) if index >= extent => {
                    return Err(FormatError::Zarr(format!(
                        "index {index} out of bounds for axis {axis} with extent {extent}"
                    ))
                    .into());
                }
                Some(index) => index..index + 1,
                None => 0..extent,
            };
            ranges.push(range);
        }

        let out_shape: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        let size = self.metadata.dtype.size();
        let len = out_shape
            .iter()
            .try_fold(size, |bytes, &n| bytes.checked_mul(n))
            .ok_or_else(|| FormatError::Zarr(format!("region {out_shape:?} is too large")))?;
        let mut out = vec![0u8; len];
        if out.is_empty() {
            return Ok(Region {
                shape: out_shape,
                data: out,
            });
        }

        let first: Vec<usize> = ranges.iter().zip(chunks).map(|(r, c)| r.start / c).collect();
        let last: Vec<usize> = ranges
            .iter()
            .zip(chunks)
            .map(|(r, c)| (r.end - 1) / c + 1)
            .collect();
        let mut wanted = Vec::new();
        for_each_index(&first, &last, |coords| wanted.push(coords.to_vec()));

        let chunk_strides = c_strides(chunks);
        let out_strides = c_strides(&out_shape);
        let rank = shape.len();
        let inner = rank - 1;

        let mut fetched = stream::iter(wanted)
            .map(|coords| async move {
                let data = self.fetch_chunk(&coords).await?;
                Ok::<_, VolumeError>((coords, data))
            })
            .buffer_unordered(REGION_CONCURRENCY);

        while let Some((coords, chunk)) = fetched.try_next().await? {
            let origin: Vec<usize> = coords.iter().zip(chunks).map(|(c, n)| c * n).collect();
            let lo: Vec<usize> = (0..rank).map(|d| ranges[d].start.max(origin[d])).collect();
            let hi: Vec<usize> = (0..rank)
                .map(|d| ranges[d].end.min(origin[d] + chunks[d]))
                .collect();
            let run = (hi[inner] - lo[inner]) * size;

            for_each_index(&lo[..inner], &hi[..inner], |outer| {
                let mut src = lo[inner] - origin[inner];
                let mut dst = lo[inner] - ranges[inner].start;
                for d in 0..inner {
                    src += (outer[d] - origin[d]) * chunk_strides[d];
                    dst += (outer[d] - ranges[d].start) * out_strides[d];
                }
                let src = src * size;
                let dst = dst * size;
                out[dst..dst + run].copy_from_slice(&chunk[src..src + run]);
            });
        }

        Ok(Region {
            shape: out_shape,
            data: out,
        })
    }
}

/// Element strides of a C-ordered array.
fn c_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Visit every index in the box `[lo, hi)` in C order.
fn for_each_index(lo: &[usize], hi: &[usize], mut visit: impl FnMut(&[usize])) {
    if lo.iter().zip(hi).any(|(l, h)| l >= h) {
        return;
    }
    let mut index = lo.to_vec();
    loop {
        visit(&index);
        let mut axis = index.len();
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < hi[axis] {
                break;
            }
            index[axis] = lo[axis];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FetchOptions, MemorySource, StreamingFetcher};
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    const ROOT: &str = "mem://store.zarr";

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// 5x4 u8 array in 2x3 chunks holding `row * 10 + col`. Chunk (2, 1)
    /// is left out to exercise fill values.
    fn small_store() -> (MemorySource, ZarrStore) {
        let source = MemorySource::new();
        source.insert(
            format!("{ROOT}/.zarray"),
            r#"{"zarr_format":2,"shape":[5,4],"chunks":[2,3],"dtype":"|u1",
                "compressor":{"id":"zlib"},"fill_value":255,"order":"C","filters":null}"#,
        );
        for cr in 0..3 {
            for cc in 0..2 {
                if (cr, cc) == (2, 1) {
                    continue;
                }
                let mut chunk = vec![0u8; 6];
                for r in 0..2 {
                    for c in 0..3 {
                        let (row, col) = (cr * 2 + r, cc * 3 + c);
                        chunk[r * 3 + c] = (row * 10 + col) as u8;
                    }
                }
                source.insert(format!("{ROOT}/{cr}.{cc}"), zlib(&chunk));
            }
        }
        let store = ZarrStore::new(
            StreamingFetcher::new(source.clone()),
            ROOT,
            FetchOptions::default(),
        );
        (source, store)
    }

    #[test]
    fn test_for_each_index_order() {
        let mut seen = Vec::new();
        for_each_index(&[0, 1], &[2, 3], |i| seen.push(i.to_vec()));
        assert_eq!(seen, vec![vec![0, 1], vec![0, 2], vec![1, 1], vec![1, 2]]);

        let mut count = 0;
        for_each_index(&[], &[], |_| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_c_strides() {
        assert_eq!(c_strides(&[5, 4, 3]), vec![12, 3, 1]);
        assert_eq!(c_strides(&[7]), vec![1]);
    }

    #[tokio::test]
    async fn test_full_read_with_missing_chunk() {
        let (_, store) = small_store();
        let array = ZarrArray::open(&store, "").await.unwrap();
        let region = array.get_region(&[None, None]).await.unwrap();

        assert_eq!(region.shape, vec![5, 4]);
        assert_eq!(region.data[0], 0);
        assert_eq!(region.data[4 + 3], 13);
        assert_eq!(region.data[4 * 4 + 2], 42);
        // Row 4, col 3 lives in the missing chunk
        assert_eq!(region.data[4 * 4 + 3], 255);
    }

    #[tokio::test]
    async fn test_single_index_keeps_axis() {
        let (source, store) = small_store();
        let array = ZarrArray::open(&store, "/").await.unwrap();
        source.reset_tracking();

        let region = array.get_region(&[Some(3), None]).await.unwrap();
        assert_eq!(region.shape, vec![1, 4]);
        assert_eq!(region.data, vec![30, 31, 32, 33]);
        // Only the two chunks of chunk-row 1 are read
        assert_eq!(source.request_count(), 2);
    }

    #[tokio::test]
    async fn test_out_of_bounds_selection() {
        let (_, store) = small_store();
        let array = ZarrArray::open(&store, "").await.unwrap();
        assert!(array.get_region(&[Some(5), None]).await.is_err());
        assert!(array.get_region(&[None]).await.is_err());
        assert!(array.fetch_chunk(&[3, 0]).await.is_err());
    }

    #[tokio::test]
    async fn test_big_endian_chunks_are_swapped() {
        let source = MemorySource::new();
        source.insert(
            format!("{ROOT}/.zarray"),
            r#"{"zarr_format":2,"shape":[2],"chunks":[2],"dtype":">u2",
                "compressor":null,"fill_value":0,"order":"C","filters":null}"#,
        );
        source.insert(format!("{ROOT}/0"), vec![0x01, 0x02, 0x03, 0x04]);
        let store = ZarrStore::new(StreamingFetcher::new(source), ROOT, FetchOptions::default());

        let array = ZarrArray::open(&store, "").await.unwrap();
        let chunk = array.fetch_chunk(&[0]).await.unwrap();
        assert_eq!(chunk, vec![0x02, 0x01, 0x04, 0x03]);
    }

    #[tokio::test]
    async fn test_missing_metadata() {
        let source = MemorySource::new();
        source.insert(format!("{ROOT}/zarr.json"), "{}");
        let store = ZarrStore::new(StreamingFetcher::new(source), ROOT, FetchOptions::default());

        let err = ZarrArray::open(&store, "").await.unwrap_err();
        assert!(err.to_string().contains("v3"));
        let err = ZarrArray::open(&store, "/0").await.unwrap_err();
        assert!(matches!(err, VolumeError::Format(FormatError::Zarr(_))));
    }
}
