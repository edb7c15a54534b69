//! Terrain tile contract.
//!
//! The quadtree that selects terrain tiles lives outside this crate. The
//! engine only needs each tile's coordinates and rectangle, a place to keep
//! its ordered imagery bindings, and the terrain's geometric error per
//! level.

use std::f64::consts::TAU;

use crate::geometry::{Ellipsoid, Rectangle};
use crate::imagery::TileImagery;
use crate::layer::ImageryLayerCollection;
use crate::tiling::{GeographicTilingScheme, TilingScheme};

/// Heightmap width assumed when estimating geometric error.
pub const DEFAULT_HEIGHTMAP_WIDTH: u32 = 64;

/// Geometric error of level-zero tiles for a heightmap terrain.
///
/// `max_radius * 2π * 0.25 / (tile_image_width * tiles_at_level_zero)`.
pub fn estimated_level_zero_geometric_error_for_heightmap(
    ellipsoid: &Ellipsoid,
    tile_image_width: u32,
    number_of_tiles_at_level_zero: u32,
) -> f64 {
    ellipsoid.maximum_radius() * TAU * 0.25
        / (tile_image_width as f64 * number_of_tiles_at_level_zero as f64)
}

/// Source of terrain tiles.
pub trait TerrainProvider {
    fn tiling_scheme(&self) -> &dyn TilingScheme;

    /// Maximum geometric error in metres for tiles at `level`.
    fn level_maximum_geometric_error(&self, level: u32) -> f64;
}

/// Smooth ellipsoid terrain on a geographic tiling scheme.
pub struct EllipsoidTerrainProvider {
    tiling_scheme: GeographicTilingScheme,
    level_zero_maximum_geometric_error: f64,
}

impl EllipsoidTerrainProvider {
    pub fn new() -> Self {
        Self::with_tiling_scheme(GeographicTilingScheme::new())
    }

    pub fn with_tiling_scheme(tiling_scheme: GeographicTilingScheme) -> Self {
        let level_zero_maximum_geometric_error = estimated_level_zero_geometric_error_for_heightmap(
            &tiling_scheme.ellipsoid(),
            DEFAULT_HEIGHTMAP_WIDTH,
            tiling_scheme.number_of_x_tiles_at_level(0),
        );
        Self {
            tiling_scheme,
            level_zero_maximum_geometric_error,
        }
    }
}

impl Default for EllipsoidTerrainProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TerrainProvider for EllipsoidTerrainProvider {
    fn tiling_scheme(&self) -> &dyn TilingScheme {
        &self.tiling_scheme
    }

    fn level_maximum_geometric_error(&self, level: u32) -> f64 {
        self.level_zero_maximum_geometric_error / (1u64 << level.min(63)) as f64
    }
}

/// A terrain tile and the imagery bound to it, in layer order.
#[derive(Debug)]
pub struct TerrainTile {
    pub x: u32,
    pub y: u32,
    pub level: u32,
    pub rectangle: Rectangle,
    pub imagery: Vec<TileImagery>,
}

impl TerrainTile {
    pub fn new(x: u32, y: u32, level: u32, rectangle: Rectangle) -> Self {
        Self {
            x,
            y,
            level,
            rectangle,
            imagery: Vec::new(),
        }
    }

    /// Tile `(x, y, level)` of the terrain provider's tiling scheme.
    pub fn from_provider(terrain: &dyn TerrainProvider, x: u32, y: u32, level: u32) -> Self {
        let rectangle = terrain.tiling_scheme().tile_xy_to_rectangle(x, y, level);
        Self::new(x, y, level, rectangle)
    }

    /// Release every imagery binding of this tile.
    pub fn free_imagery(&mut self, layers: &mut ImageryLayerCollection) {
        for mut binding in self.imagery.drain(..) {
            if let Some(layer) = layers.get_mut(binding.layer()) {
                binding.free_resources(layer);
            }
        }
    }
}
