//! Volume Streamer - command line front end for the volume loader.
//!
//! Loads volumes, tiles and chunked stores from local paths, HTTP(S) or S3
//! and prints what it found.

use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use volume_streamer::{
    chunk::{ChunkService, ZarrChunkClient},
    config::{Command, Config},
    create_s3_client,
    io::{FetchOptions, RoutingSource, S3Source, StreamingFetcher},
    tile::{TileClient, TileClientConfig, TileKey, TileService},
    LoadOptions, VolumeLoader,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let fetcher = match build_fetcher(&config).await {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.command.clone() {
        Command::Inspect { source, paired } => {
            run_inspect(&config, fetcher, &source, paired).await
        }
        Command::Tile { name, level, x, y } => {
            run_tile(&config, fetcher, TileKey::new(name.as_str(), level, x, y)).await
        }
        Command::ZarrInfo { url } => run_zarr_info(&config, fetcher, &url).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "volume_streamer=debug"
    } else {
        "volume_streamer=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Build a fetcher for every supported scheme from the configuration.
async fn build_fetcher(config: &Config) -> Result<StreamingFetcher, String> {
    let headers = config.request_headers()?;

    let s3_client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
    let source = RoutingSource::new().with_s3(S3Source::new(s3_client));

    debug!(headers = headers.len(), region = %config.s3_region, "built fetcher");
    Ok(StreamingFetcher::new(source).with_default_headers(headers))
}

fn print_json(value: &impl serde::Serialize) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(
    config: &Config,
    fetcher: StreamingFetcher,
    source: &str,
    paired: Option<String>,
) -> ExitCode {
    let loader = VolumeLoader::new(fetcher);
    let mut options = LoadOptions::new().prefer_qform(config.prefer_qform);
    options.paired_url = paired;

    match loader.load_url(source, &options).await {
        Ok(volume) => {
            info!(
                "Loaded {} voxels ({} bytes)",
                volume.header.voxel_count().unwrap_or_default(),
                volume.voxels.len()
            );
            print_json(&volume.header)
        }
        Err(e) => {
            error!("Failed to load {}: {}", source, e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(config: &Config, fetcher: StreamingFetcher, key: TileKey) -> ExitCode {
    let client_config = TileClientConfig {
        base_url: config.tile_base_url.clone().unwrap_or_default(),
        tile_pattern: config.tile_pattern.clone(),
        info_pattern: config.info_pattern.clone(),
    };
    let service =
        TileService::with_capacity(TileClient::new(fetcher, client_config), config.cache_tiles);

    match service.pyramid_info(&key.name).await {
        Ok(info) => {
            if let Err(e) = info.level(key.level) {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
        // Some servers have no info endpoint; the tile request decides
        Err(e) => debug!("pyramid info unavailable: {}", e),
    }

    match service.get_tile(&key).await {
        Some(response) => {
            println!(
                "{} {}x{}",
                key,
                response.tile.width(),
                response.tile.height()
            );
            ExitCode::SUCCESS
        }
        None => {
            error!("Tile {} could not be loaded", key);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Zarr Info Command
// =============================================================================

async fn run_zarr_info(config: &Config, fetcher: StreamingFetcher, url: &str) -> ExitCode {
    let client = ZarrChunkClient::new(fetcher, url, FetchOptions::new());
    let service = ChunkService::with_capacity(client, config.cache_chunks);

    match service.pyramid_info().await {
        Ok(info) => print_json(&info),
        Err(e) => {
            error!("Failed to read {}: {}", url, e);
            ExitCode::FAILURE
        }
    }
}
