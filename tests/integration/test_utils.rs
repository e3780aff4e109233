//! Test utilities for integration tests.
//!
//! File builders for the supported formats plus mock sources and allocators
//! that record what the library asked of them.

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use flate2::write::GzEncoder;
use flate2::Compression;
use http::HeaderMap;
use image::{ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use volume_streamer::error::FetchError;
use volume_streamer::io::{ByteSource, MemorySource, SourceStream};
use volume_streamer::tile::BitmapAllocator;

// =============================================================================
// File Builders
// =============================================================================

/// Gzip `data` into a single member.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Little-endian NIfTI-1 header for a `uint8` volume with a scaling sform.
///
/// With `single_file` the voxels follow the header at offset 352 (`n+1`);
/// otherwise the header is an `.hdr` for a separate `.img` (`ni1`).
pub fn nifti1_header(dims: [i16; 3], spacing: f32, single_file: bool) -> Vec<u8> {
    let mut b = vec![0u8; if single_file { 352 } else { 348 }];
    LittleEndian::write_i32(&mut b[0..], 348);
    LittleEndian::write_i16(&mut b[40..], 3);
    for (i, d) in dims.iter().enumerate() {
        LittleEndian::write_i16(&mut b[42 + 2 * i..], *d);
    }
    for i in 3..7 {
        LittleEndian::write_i16(&mut b[42 + 2 * i..], 1);
    }
    // uint8, 8 bits
    LittleEndian::write_i16(&mut b[70..], 2);
    LittleEndian::write_i16(&mut b[72..], 8);
    LittleEndian::write_f32(&mut b[76..], 1.0);
    for i in 1..4 {
        LittleEndian::write_f32(&mut b[76 + 4 * i..], spacing);
    }
    LittleEndian::write_f32(&mut b[108..], if single_file { 352.0 } else { 0.0 });
    LittleEndian::write_f32(&mut b[112..], 1.0);
    // sform_code = scanner
    LittleEndian::write_i16(&mut b[254..], 1);
    LittleEndian::write_f32(&mut b[280..], spacing);
    LittleEndian::write_f32(&mut b[296 + 4..], spacing);
    LittleEndian::write_f32(&mut b[312 + 8..], spacing);
    let magic: &[u8; 4] = if single_file { b"n+1\0" } else { b"ni1\0" };
    b[344..348].copy_from_slice(magic);
    b
}

/// Single-file NIfTI-1 volume holding `voxels`.
pub fn nifti1_file(dims: [i16; 3], voxels: &[u8]) -> Vec<u8> {
    let mut file = nifti1_header(dims, 2.0, true);
    file.extend_from_slice(voxels);
    file
}

/// AFNI `.HEAD` text for a little-endian `short` dataset.
pub fn afni_head(dims: [usize; 3]) -> String {
    format!(
        "\ntype = string-attribute\nname = BYTEORDER_STRING\ncount = 10\n'LSB_FIRST~\n\n\
         type = integer-attribute\nname = DATASET_DIMENSIONS\ncount = 5\n {} {} {} 0 0\n\n\
         type = integer-attribute\nname = BRICK_TYPES\ncount = 1\n 1\n\n\
         type = float-attribute\nname = DELTA\ncount = 3\n 1 1 1\n\n\
         type = float-attribute\nname = ORIGIN\ncount = 3\n 0 0 0\n",
        dims[0], dims[1], dims[2]
    )
}

/// Little-endian `i16` voxels counting up from zero.
pub fn int16_ramp(count: usize) -> Vec<u8> {
    (0..count as i16).flat_map(|v| v.to_le_bytes()).collect()
}

/// `.npy` file of `uint8` samples.
pub fn npy_u8(shape: &[usize], payload: &[u8]) -> Vec<u8> {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let tuple = if dims.len() == 1 {
        format!("({},)", dims[0])
    } else {
        format!("({})", dims.join(", "))
    };
    let mut dict = format!("{{'descr': '|u1', 'fortran_order': False, 'shape': {tuple}, }}");
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

/// PNG image filled with `color`.
pub fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Serve an uncompressed `uint8` Zarr v2 array from `source` at `root`.
///
/// Each chunk's samples are their flat index within the whole array, modulo
/// 256.
pub fn insert_zarr_u8(source: &MemorySource, root: &str, shape: [usize; 3], chunks: [usize; 3]) {
    source.insert(
        format!("{root}/.zarray"),
        serde_json::json!({
            "zarr_format": 2,
            "shape": shape,
            "chunks": chunks,
            "dtype": "|u1",
            "compressor": null,
            "fill_value": 0,
            "order": "C",
            "filters": null,
        })
        .to_string(),
    );

    let grid: Vec<usize> = (0..3).map(|a| shape[a].div_ceil(chunks[a])).collect();
    for c0 in 0..grid[0] {
        for c1 in 0..grid[1] {
            for c2 in 0..grid[2] {
                let mut chunk = Vec::with_capacity(chunks.iter().product());
                for i in 0..chunks[0] {
                    for j in 0..chunks[1] {
                        for k in 0..chunks[2] {
                            let (a, b, c) = (c0 * chunks[0] + i, c1 * chunks[1] + j, c2 * chunks[2] + k);
                            chunk.push(((a * shape[1] + b) * shape[2] + c) as u8);
                        }
                    }
                }
                source.insert(format!("{root}/{c0}.{c1}.{c2}"), chunk);
            }
        }
    }
}

// =============================================================================
// Header Capturing Source
// =============================================================================

/// Serves one fixed body and records the headers of every request.
#[derive(Clone)]
pub struct HeaderCapturingSource {
    body: Vec<u8>,
    seen: Arc<Mutex<Vec<HeaderMap>>>,
}

impl HeaderCapturingSource {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Vec<HeaderMap> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ByteSource for HeaderCapturingSource {
    async fn open(&self, _location: &str, headers: &HeaderMap) -> Result<SourceStream, FetchError> {
        self.seen.lock().push(headers.clone());
        Ok(SourceStream::from_chunks(vec![self.body.clone().into()]))
    }
}

// =============================================================================
// Counting Allocator
// =============================================================================

/// Bitmap allocator that counts uploads and releases per id.
#[derive(Default)]
pub struct CountingAllocator {
    next: AtomicU64,
    released: Mutex<HashMap<u64, usize>>,
}

impl CountingAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn uploads(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// How many times `id` was released.
    pub fn releases_of(&self, id: u64) -> usize {
        self.released.lock().get(&id).copied().unwrap_or(0)
    }

    pub fn total_releases(&self) -> usize {
        self.released.lock().values().sum()
    }
}

impl BitmapAllocator for CountingAllocator {
    fn upload(&self, _image: &RgbaImage) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    fn release(&self, id: u64) {
        *self.released.lock().entry(id).or_insert(0) += 1;
    }
}
