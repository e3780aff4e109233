use bytes::Bytes;

use crate::error::{FetchError, FormatError, VolumeError};
use crate::io::{FetchOptions, StreamingFetcher};

/// Key/value view of a Zarr hierarchy rooted at a URL or path.
#[derive(Clone)]
pub struct ZarrStore {
    fetcher: StreamingFetcher,
    root: String,
    options: FetchOptions,
}

impl ZarrStore {
    /// `root` must not carry a query string.
    pub fn new(fetcher: StreamingFetcher, root: &str, options: FetchOptions) -> Self {
        Self {
            fetcher,
            root: root.trim_end_matches('/').to_string(),
            options,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Absolute location of `key` below the root.
    pub fn url_for(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            self.root.clone()
        } else {
            format!("{}/{}", self.root, key)
        }
    }

    /// Raw bytes stored under `key`, `None` when the key is absent.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, FetchError> {
        match self.fetcher.fetch_raw(&self.url_for(key), &self.options).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// JSON document stored under `key`.
    pub async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, VolumeError> {
        let Some(bytes) = self.get(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| FormatError::Zarr(format!("invalid JSON in {key}: {e}")))?;
        Ok(Some(value))
    }
}

/// Join a node path and a key, both possibly empty or slash-prefixed.
pub(crate) fn join_key(path: &str, key: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}/{key}")
    }
}
