//! `globelayer match`: show which imagery tiles a terrain tile maps to.

use clap::Args;
use globelayer::geometry::Cartographic;
use globelayer::layer::match_imagery;
use globelayer::{EllipsoidTerrainProvider, TerrainProvider, TerrainTile};

use super::common;
use crate::error::CliError;

/// Arguments for the match command.
#[derive(Debug, Args)]
pub struct MatchArgs {
    /// Terrain tile level
    #[arg(long, value_parser = common::parse_level)]
    pub level: u32,

    /// Terrain tile column (with --y)
    #[arg(long, requires = "y", conflicts_with_all = ["lat", "lon"])]
    pub x: Option<u32>,

    /// Terrain tile row (with --x)
    #[arg(long, requires = "x")]
    pub y: Option<u32>,

    /// Latitude in decimal degrees (with --lon)
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude in decimal degrees (with --lat)
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Treat the layer as an overlay rather than the base layer
    #[arg(long)]
    pub overlay: bool,
}

/// Run the match command.
pub fn run(args: MatchArgs, config_path: Option<&std::path::Path>) -> Result<(), CliError> {
    let config = common::load_config(config_path)?;
    let provider = common::build_provider(&config.provider)?;
    let terrain = EllipsoidTerrainProvider::new();

    let (x, y) = match (args.x, args.y, args.lat, args.lon) {
        (Some(x), Some(y), _, _) => (x, y),
        (_, _, Some(lat), Some(lon)) => terrain
            .tiling_scheme()
            .position_to_tile_xy(&Cartographic::from_degrees(lon, lat), args.level)
            .ok_or_else(|| {
                CliError::Arguments(format!("position {}, {} is outside the terrain", lat, lon))
            })?,
        _ => {
            return Err(CliError::Arguments(
                "specify either --x/--y or --lat/--lon".to_string(),
            ))
        }
    };

    let tile = TerrainTile::from_provider(&terrain, x, y, args.level);
    let target_error = terrain.level_maximum_geometric_error(args.level);

    println!("Terrain tile {}/{}/{}", args.level, x, y);
    println!("  Rectangle: {}", tile.rectangle);
    println!("  Geometric error: {:.2} m", target_error);
    println!("Provider: {}", provider.name());

    let options = config.to_layer_options();
    let Some(matched) = match_imagery(
        provider.as_ref(),
        &options.rectangle,
        !args.overlay,
        &tile.rectangle,
        target_error,
        &options.tolerances,
    ) else {
        println!("  No imagery covers this tile.");
        return Ok(());
    };

    println!(
        "  Imagery level {} ({} tiles, {} texture coordinates)",
        matched.level,
        matched.tiles.len(),
        if matched.use_web_mercator_t {
            "Web Mercator"
        } else {
            "geographic"
        }
    );
    for entry in &matched.tiles {
        let t = entry.tex_coords;
        println!(
            "    {:>6} {:>6}  u [{:.4}, {:.4}]  v [{:.4}, {:.4}]",
            entry.x, entry.y, t.min_u, t.max_u, t.min_v, t.max_v
        );
    }
    Ok(())
}
