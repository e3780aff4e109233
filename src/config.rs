//! Configuration for the `volume-streamer` command line tool.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `VOLUME_` prefix:
//!
//! - `VOLUME_TILE_BASE_URL` - Base URL of the tile server
//! - `VOLUME_TILE_PATTERN` - Tile path template (default: `/api/images/{name}/tile/{level}/{x}/{y}`)
//! - `VOLUME_INFO_PATTERN` - Pyramid info path template (default: `/api/images/{name}/info`)
//! - `VOLUME_CACHE_TILES` - Max decoded tiles to cache (default: 500)
//! - `VOLUME_CACHE_CHUNKS` - Max decoded chunks to cache (default: 500)
//! - `VOLUME_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `VOLUME_S3_REGION` - AWS region (default: us-east-1)
//! - `VOLUME_HEADERS` - Extra request headers, comma-separated `name:value`
//! - `VOLUME_PREFER_QFORM` - Prefer the quaternion transform (default: false)

use clap::{Parser, Subcommand};
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

use crate::chunk::DEFAULT_CHUNK_CACHE_CAPACITY;
use crate::tile::{DEFAULT_INFO_PATTERN, DEFAULT_TILE_CACHE_CAPACITY, DEFAULT_TILE_PATTERN};

// =============================================================================
// Default Values
// =============================================================================

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

// =============================================================================
// CLI Arguments
// =============================================================================

/// Volume Streamer - streaming loader for volumetric medical images.
///
/// Reads NIfTI, Analyze, ECAT7, AFNI, MGH, NRRD, NumPy, raster and Zarr
/// volumes from local paths, HTTP(S) URLs or S3, and fetches pyramid tiles and
/// chunks.
#[derive(Parser, Debug, Clone)]
#[command(name = "volume-streamer")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    // =========================================================================
    // Tile Configuration
    // =========================================================================
    /// Base URL of the tile server.
    #[arg(long, global = true, env = "VOLUME_TILE_BASE_URL")]
    pub tile_base_url: Option<String>,

    /// Tile path template with `{name}`, `{level}`, `{x}` and `{y}` placeholders.
    #[arg(long, global = true, default_value = DEFAULT_TILE_PATTERN, env = "VOLUME_TILE_PATTERN")]
    pub tile_pattern: String,

    /// Pyramid info path template with a `{name}` placeholder.
    #[arg(long, global = true, default_value = DEFAULT_INFO_PATTERN, env = "VOLUME_INFO_PATTERN")]
    pub info_pattern: String,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Maximum number of decoded tiles to keep in cache.
    #[arg(long, global = true, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "VOLUME_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Maximum number of decoded chunks to keep in cache.
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_CACHE_CAPACITY, env = "VOLUME_CACHE_CHUNKS")]
    pub cache_chunks: usize,

    // =========================================================================
    // S3 Configuration
    // =========================================================================
    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    ///
    /// If not specified, uses the default AWS S3 endpoint.
    #[arg(long, global = true, env = "VOLUME_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, global = true, default_value = DEFAULT_REGION, env = "VOLUME_S3_REGION")]
    pub s3_region: String,

    // =========================================================================
    // Request Configuration
    // =========================================================================
    /// Extra request header as `name:value`. May be repeated.
    #[arg(long = "header", global = true, env = "VOLUME_HEADERS", value_delimiter = ',')]
    pub headers: Vec<String>,

    /// Use the quaternion transform even when the sform is plausible.
    #[arg(long, global = true, default_value_t = false, env = "VOLUME_PREFER_QFORM")]
    pub prefer_qform: bool,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load a volume and print its header as JSON.
    Inspect {
        /// Path, file:// URL, http(s):// URL, s3:// URL or Zarr store
        source: String,

        /// Companion data file for split header/data formats
        #[arg(long)]
        paired: Option<String>,
    },

    /// Fetch one pyramid tile and print its size.
    Tile {
        /// Image name on the tile server
        name: String,
        level: u32,
        x: u32,
        y: u32,
    },

    /// Print the pyramid levels of a Zarr store as JSON.
    ZarrInfo {
        /// Store root URL
        url: String,
    },
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.cache_chunks == 0 {
            return Err("cache_chunks must be greater than 0".to_string());
        }

        if matches!(self.command, Command::Tile { .. }) && self.tile_base_url.is_none() {
            return Err(
                "Tile base URL is required. Set --tile-base-url or VOLUME_TILE_BASE_URL"
                    .to_string(),
            );
        }

        if !self.tile_pattern.contains("{name}") {
            return Err("tile_pattern must contain {name}".to_string());
        }

        self.request_headers().map(|_| ())
    }

    /// Parse the `--header` values into a header map.
    pub fn request_headers(&self) -> Result<HeaderMap, String> {
        let mut map = HeaderMap::new();
        for raw in &self.headers {
            let (name, value) = raw
                .split_once(':')
                .ok_or_else(|| format!("Invalid header {raw:?}, expected name:value"))?;
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|e| format!("Invalid header name {name:?}: {e}"))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| format!("Invalid header value for {name}: {e}"))?;
            map.append(name, value);
        }
        Ok(map)
    }
}

// =============================================================================
// Tests
// =============================================================================
