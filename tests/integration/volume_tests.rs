//! End-to-end volume loading through the streaming fetcher.

use volume_streamer::io::{FileSource, MemorySource, RoutingSource, StreamingFetcher};
use volume_streamer::{is_affine_plausible, DataType, LoadOptions, VolumeError, VolumeLoader};

use super::test_utils::*;

fn loader(source: &MemorySource) -> VolumeLoader {
    VolumeLoader::new(StreamingFetcher::new(source.clone()))
}

// =============================================================================
// Single-file formats
// =============================================================================

#[tokio::test]
async fn test_gzipped_nifti_streamed_in_small_chunks() {
    let voxels: Vec<u8> = (0..24).collect();
    let source = MemorySource::new().with_chunk_size(5);
    source.insert("mem://data/t1.nii.gz", gzip(&nifti1_file([2, 3, 4], &voxels)));

    let volume = loader(&source)
        .load_url("mem://data/t1.nii.gz", &LoadOptions::new())
        .await
        .unwrap();

    assert_eq!(volume.header.datatype, DataType::UInt8);
    assert_eq!(&volume.header.dims[1..4], &[2, 3, 4]);
    assert_eq!(&volume.voxels.data()[..], &voxels[..]);
    assert_eq!(volume.header.affine[0][0], 2.0);
    assert_eq!(source.requests(), vec!["mem://data/t1.nii.gz"]);
}

#[tokio::test]
async fn test_server_side_gzip_encoding() {
    let source = MemorySource::new();
    source.insert_encoded(
        "mem://data/stack.npy",
        gzip(&npy_u8(&[2, 2, 2], &[9; 8])),
        "gzip",
    );

    let volume = loader(&source)
        .load_url("mem://data/stack.npy", &LoadOptions::new())
        .await
        .unwrap();
    assert_eq!(volume.voxels.len(), 8);
}

#[tokio::test]
async fn test_png_becomes_single_slice() {
    let source = MemorySource::new();
    source.insert("mem://img/slice.png", png(4, 3, [200, 100, 50, 255]));

    let volume = loader(&source)
        .load_url("mem://img/slice.png", &LoadOptions::new())
        .await
        .unwrap();

    assert_eq!(&volume.header.dims[1..4], &[4, 3, 1]);
    assert!(is_affine_plausible(&volume.header.affine));
}

#[tokio::test]
async fn test_unrecognised_payload() {
    let source = MemorySource::new();
    source.insert("mem://data/readme.txt", "not a volume");

    let err = loader(&source)
        .load_url("mem://data/readme.txt", &LoadOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::Format(_)));
}

// =============================================================================
// Paired formats
// =============================================================================

#[tokio::test]
async fn test_afni_falls_back_to_compressed_brik() {
    let brik = int16_ramp(8);
    let source = MemorySource::new();
    source.insert("mem://afni/scan+orig.HEAD", afni_head([2, 2, 2]));
    source.insert("mem://afni/scan+orig.BRIK.gz", gzip(&brik));

    let volume = loader(&source)
        .load_url("mem://afni/scan+orig.HEAD", &LoadOptions::new())
        .await
        .unwrap();

    assert_eq!(volume.header.datatype, DataType::Int16);
    assert_eq!(&volume.voxels.data()[..], &brik[..]);
    assert_eq!(
        source.requests(),
        vec![
            "mem://afni/scan+orig.HEAD",
            "mem://afni/scan+orig.BRIK",
            "mem://afni/scan+orig.BRIK.gz",
        ]
    );
}

#[tokio::test]
async fn test_afni_prefers_uncompressed_brik() {
    let source = MemorySource::new();
    source.insert("mem://afni/scan+orig.HEAD", afni_head([2, 2, 2]));
    source.insert("mem://afni/scan+orig.BRIK", int16_ramp(8));
    source.insert("mem://afni/scan+orig.BRIK.gz", gzip(&[0; 16]));

    let volume = loader(&source)
        .load_url("mem://afni/scan+orig.HEAD", &LoadOptions::new())
        .await
        .unwrap();

    assert_eq!(&volume.voxels.data()[..], &int16_ramp(8)[..]);
    assert_eq!(source.requests_for("mem://afni/scan+orig.BRIK.gz"), 0);
}

#[tokio::test]
async fn test_missing_companion_is_decode_error() {
    let source = MemorySource::new();
    source.insert("mem://afni/lonely+orig.HEAD", afni_head([2, 2, 2]));

    let result = loader(&source)
        .load_url("mem://afni/lonely+orig.HEAD", &LoadOptions::new())
        .await;
    assert!(result.is_err());
    // Data file tried once plain, once compressed
    assert_eq!(source.request_count(), 3);
}

#[tokio::test]
async fn test_analyze_pair_with_explicit_companion() {
    let img: Vec<u8> = (0..8).collect();
    let source = MemorySource::new();
    source.insert("mem://a/scan.hdr", nifti1_header([2, 2, 2], 1.0, false));
    source.insert("mem://elsewhere/voxels.raw", img.clone());

    let options = LoadOptions::new().with_paired_url("mem://elsewhere/voxels.raw");
    let volume = loader(&source)
        .load_url("mem://a/scan.hdr", &options)
        .await
        .unwrap();

    assert_eq!(&volume.voxels.data()[..], &img[..]);
    assert_eq!(source.requests_for("mem://a/scan.img"), 0);
}

fn nhdr(fields: &str) -> String {
    format!("NRRD0004\ntype: uint8\ndimension: 3\nsizes: 2 2 2\n{fields}\n\n")
}

#[tokio::test]
async fn test_detached_nrrd_fetches_named_data_file() {
    let raw: Vec<u8> = (0..8).collect();
    let source = MemorySource::new();
    source.insert("mem://n/scan.nhdr", nhdr("encoding: raw\ndata file: ./scan.raw"));
    source.insert("mem://n/scan.raw", raw.clone());

    let volume = loader(&source)
        .load_url("mem://n/scan.nhdr", &LoadOptions::new())
        .await
        .unwrap();

    assert_eq!(volume.header.datatype, DataType::UInt8);
    assert_eq!(&volume.voxels.data()[..], &raw[..]);
    assert_eq!(source.requests(), vec!["mem://n/scan.nhdr", "mem://n/scan.raw"]);
}

#[tokio::test]
async fn test_detached_nrrd_gzip_data_file() {
    let raw: Vec<u8> = (10..18).collect();
    let source = MemorySource::new();
    source.insert("mem://n/scan.nhdr", nhdr("encoding: gzip\ndata file: scan.raw.gz"));
    source.insert("mem://n/scan.raw.gz", gzip(&raw));

    let volume = loader(&source)
        .load_url("mem://n/scan.nhdr", &LoadOptions::new())
        .await
        .unwrap();
    assert_eq!(&volume.voxels.data()[..], &raw[..]);
}

#[tokio::test]
async fn test_local_files_through_routing_source() {
    let dir = tempfile::tempdir().unwrap();
    let head = dir.path().join("anat+orig.HEAD");
    std::fs::write(&head, afni_head([2, 2, 1])).unwrap();
    std::fs::write(dir.path().join("anat+orig.BRIK.gz"), gzip(&int16_ramp(4))).unwrap();

    let loader = VolumeLoader::new(StreamingFetcher::new(RoutingSource::new()));
    let location = head.to_string_lossy().to_string();
    let volume = loader.load_url(&location, &LoadOptions::new()).await.unwrap();

    assert_eq!(&volume.header.dims[1..4], &[2, 2, 1]);
    assert_eq!(&volume.voxels.data()[..], &int16_ramp(4)[..]);

    let missing = VolumeLoader::new(StreamingFetcher::new(FileSource))
        .load_url(&dir.path().join("absent.nii").to_string_lossy(), &LoadOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(missing, VolumeError::Fetch(e) if e.is_not_found()));
}

// =============================================================================
// Zarr
// =============================================================================

#[tokio::test]
async fn test_zarr_slab_with_clamped_index() {
    let source = MemorySource::new();
    insert_zarr_u8(&source, "mem://s/vol.zarr", [4, 3, 5], [2, 2, 5]);

    let volume = loader(&source)
        .load_url("mem://s/vol.zarr?z=99", &LoadOptions::new())
        .await
        .unwrap();

    // (height 4, width 3, one slice at the last depth index)
    assert_eq!(&volume.header.dims[1..4], &[3, 4, 1]);
    let expected: Vec<u8> = (0..12).map(|v| (v * 5 + 4) as u8).collect();
    assert_eq!(&volume.voxels.data()[..], &expected[..]);
    assert!(is_affine_plausible(&volume.header.affine));
}

#[tokio::test]
async fn test_zarr_full_volume_depth_becomes_slowest_axis() {
    let source = MemorySource::new();
    insert_zarr_u8(&source, "mem://s/small.zarr", [2, 2, 2], [2, 2, 2]);

    let volume = loader(&source)
        .load_url("mem://s/small.zarr", &LoadOptions::new())
        .await
        .unwrap();

    assert_eq!(&volume.header.dims[1..4], &[2, 2, 2]);
    // Source order is [voxel][slice]; output is [slice][voxel]
    assert_eq!(&volume.voxels.data()[..], &[0, 2, 4, 6, 1, 3, 5, 7]);
}
