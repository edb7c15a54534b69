//! `globelayer simulate`: run a headless frame loop and report cache and
//! request behaviour.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use globelayer::{
    EllipsoidTerrainProvider, ImageryLayer, ImageryLayerCollection, ImageryProvider,
    InMemoryTextures, TerrainProvider, TerrainTile,
};
use tracing::info;

use super::common;
use crate::error::CliError;

/// Arguments for the simulate command.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Terrain level of the simulated tiles
    #[arg(long, default_value = "3", value_parser = common::parse_level)]
    pub level: u32,

    /// Maximum number of terrain tiles to load
    #[arg(long, default_value = "64")]
    pub max_tiles: usize,

    /// Give up after this many frames
    #[arg(long, default_value = "2000")]
    pub frames: usize,

    /// Fail this many synthetic requests first
    #[arg(long, default_value = "0")]
    pub failures: u32,

    /// Synthetic response latency in milliseconds
    #[arg(long, default_value = "5")]
    pub latency_ms: u64,

    /// Fetch from the configured URL instead of the synthetic provider
    #[arg(long)]
    pub live: bool,
}

/// Run the simulate command.
pub fn run(args: SimulateArgs, config_path: Option<&std::path::Path>) -> Result<(), CliError> {
    let config = common::load_config(config_path)?;
    if args.live && config.provider.url.is_none() {
        return Err(CliError::Arguments(
            "--live requires [provider] url in the config file".to_string(),
        ));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(simulate(args, config))
}

async fn simulate(
    args: SimulateArgs,
    config: globelayer::config::LayerConfigFile,
) -> Result<(), CliError> {
    let provider: Arc<dyn ImageryProvider> = if args.live {
        common::build_provider(&config.provider)?
    } else {
        let synthetic = common::synthetic_provider(&config.provider)
            .with_latency(Duration::from_millis(args.latency_ms));
        synthetic.fail_next(args.failures);
        Arc::new(synthetic)
    };

    let textures = Arc::new(InMemoryTextures::new());
    let options = config.to_layer_options();
    let mut layers = ImageryLayerCollection::new();
    let id = layers.add(ImageryLayer::new(provider, textures.clone(), options.clone())?);

    let terrain = EllipsoidTerrainProvider::new();
    let mut tiles = terrain_tiles(&terrain, args.level, &options.rectangle, args.max_tiles);
    for tile in &mut tiles {
        layers.create_skeletons(tile, &terrain);
    }
    let bindings: usize = tiles.iter().map(|tile| tile.imagery.len()).sum();
    info!(tiles = tiles.len(), bindings, "Simulation started");
    println!(
        "Simulating {} terrain tiles at level {} ({} imagery bindings)",
        tiles.len(),
        args.level,
        bindings
    );

    let started = Instant::now();
    let mut frames = 0;
    let mut done = false;
    while frames < args.frames && !done {
        frames += 1;
        done = true;
        for tile in &mut tiles {
            done &= layers.process_tile(tile, &terrain, false)?;
        }
        layers.update(textures.as_ref());
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let ready = tiles
        .iter()
        .flat_map(|tile| tile.imagery.iter())
        .filter(|binding| binding.ready_imagery().is_some())
        .count();

    println!();
    println!(
        "{} after {} frames ({:.2?})",
        if done { "Finished" } else { "Stopped" },
        frames,
        started.elapsed()
    );
    println!("  Bindings with imagery: {}/{}", ready, bindings);
    if let Some(layer) = layers.get(id) {
        let stats = layer.stats();
        println!("  Cache:    {}", stats.cache);
        println!(
            "  Requests: {} issued, {} succeeded, {} failed, {} retried, {} throttled",
            stats.pipeline.issued,
            stats.pipeline.succeeded,
            stats.pipeline.failed,
            stats.pipeline.retried,
            stats.pipeline.throttled
        );
    }
    println!("  Textures: {} live", textures.live_count());

    for tile in &mut tiles {
        layers.release_tile(tile);
    }
    println!("  After release: {} live textures", textures.live_count());
    Ok(())
}

/// Terrain tiles at `level` overlapping `rectangle`, row by row.
fn terrain_tiles(
    terrain: &EllipsoidTerrainProvider,
    level: u32,
    rectangle: &globelayer::Rectangle,
    limit: usize,
) -> Vec<TerrainTile> {
    let scheme = terrain.tiling_scheme();
    let columns = scheme.number_of_x_tiles_at_level(level);
    let rows = scheme.number_of_y_tiles_at_level(level);

    (0..rows)
        .flat_map(|y| (0..columns).map(move |x| (x, y)))
        .map(|(x, y)| TerrainTile::from_provider(terrain, x, y, level))
        .filter(|tile| tile.rectangle.intersection(rectangle).is_some())
        .take(limit)
        .collect()
}
