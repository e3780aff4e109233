//! Header/data companion resolution.
//!
//! AFNI datasets split into `.HEAD` and `.BRIK`, and Analyze-style NIfTI pairs
//! split into `.hdr` and `.img`. The data file is derived from the header URL
//! unless the caller supplies one, and is often stored compressed.

use bytes::Bytes;
use tracing::debug;

use crate::error::FetchError;

use super::stream::{FetchOptions, StreamingFetcher};

/// Compression suffix tried when the companion file is missing.
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// URL of the data file that accompanies the header at `url`.
///
/// `extension` is the lowercase extension of the primary file. A non-empty
/// `explicit` URL always wins. Otherwise only the extension of the final path
/// segment is swapped, in the case it was written in. Returns `None` when the
/// primary format has no companion.
///
/// # Example
///
/// ```
/// use volume_streamer::io::paired_url;
///
/// assert_eq!(
///     paired_url("https://host/scan.HEAD", "head", None).as_deref(),
///     Some("https://host/scan.BRIK"),
/// );
/// ```
pub fn paired_url(url: &str, extension: &str, explicit: Option<&str>) -> Option<String> {
    if let Some(explicit) = explicit.filter(|u| !u.is_empty()) {
        return Some(explicit.to_string());
    }

    let (from, to) = match extension {
        "head" => ("HEAD", "BRIK"),
        "hdr" => ("HDR", "IMG"),
        _ => return None,
    };

    // Only the path is rewritten; query strings often carry signatures
    let split = url.find(['?', '#']).unwrap_or(url.len());
    let (path, suffix) = url.split_at(split);
    let name_start = path.rfind(['/', '\\']).map_or(0, |i| i + 1);
    let (dir, name) = path.split_at(name_start);

    let (stem, compressed) = match name.len().checked_sub(COMPRESSED_SUFFIX.len()) {
        Some(at)
            if name
                .get(at..)
                .is_some_and(|s| s.eq_ignore_ascii_case(COMPRESSED_SUFFIX)) =>
        {
            name.split_at(at)
        }
        _ => (name, ""),
    };
    let dot = stem.rfind('.')?;
    let ext = &stem[dot + 1..];
    if !ext.eq_ignore_ascii_case(from) {
        return None;
    }
    let to = if ext.bytes().all(|b| b.is_ascii_uppercase()) {
        to.to_string()
    } else {
        to.to_ascii_lowercase()
    };
    Some(format!("{dir}{}.{to}{compressed}{suffix}", &stem[..dot]))
}

/// Location of `file` next to the file at `base`.
///
/// Absolute paths and URLs are returned unchanged. The query string of
/// `base` is not carried over.
///
/// ```
/// use volume_streamer::io::sibling_url;
///
/// assert_eq!(
///     sibling_url("https://host/dwi/scan.nhdr?sig=1", "scan.raw.gz"),
///     "https://host/dwi/scan.raw.gz",
/// );
/// ```
pub fn sibling_url(base: &str, file: &str) -> String {
    if file.contains("://") || file.starts_with('/') {
        return file.to_string();
    }
    let split = base.find(['?', '#']).unwrap_or(base.len());
    let path = &base[..split];
    let dir = path.rfind(['/', '\\']).map_or("", |i| &path[..=i]);
    format!("{dir}{}", file.trim_start_matches("./"))
}

/// Fetch the companion file at `url`.
///
/// A not-found answer triggers exactly one retry with [`COMPRESSED_SUFFIX`]
/// appended. `Ok(None)` means neither location exists; any other failure is
/// returned as is.
pub async fn fetch_paired(
    fetcher: &StreamingFetcher,
    url: &str,
    options: &FetchOptions,
) -> Result<Option<Bytes>, FetchError> {
    match fetcher.fetch_with(url, options).await {
        Ok(bytes) => return Ok(Some(bytes)),
        Err(e) if e.is_not_found() => {
            debug!(url = %url, "paired file not found, trying compressed variant");
        }
        Err(e) => return Err(e),
    }

    let compressed = format!("{url}{COMPRESSED_SUFFIX}");
    match fetcher.fetch_with(&compressed, options).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.is_not_found() => {
            debug!(url = %compressed, "compressed paired file not found");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
