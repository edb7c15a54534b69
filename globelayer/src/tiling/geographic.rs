//! Equirectangular tiling scheme.

use crate::geometry::{Cartographic, Ellipsoid, Rectangle};

use super::{tiles_at_level, ProjectionKind, TilingScheme};

/// Geographic (equirectangular) tiling scheme.
///
/// Native units are degrees. By default the root level has two tiles side
/// by side covering the whole globe.
#[derive(Debug, Clone, PartialEq)]
pub struct GeographicTilingScheme {
    ellipsoid: Ellipsoid,
    rectangle: Rectangle,
    level_zero_tiles_x: u32,
    level_zero_tiles_y: u32,
}

impl GeographicTilingScheme {
    pub fn new() -> Self {
        Self::with_root_tiles(2, 1)
    }

    /// Scheme over the whole globe with a custom root tile grid.
    pub fn with_root_tiles(level_zero_tiles_x: u32, level_zero_tiles_y: u32) -> Self {
        Self {
            ellipsoid: Ellipsoid::WGS84,
            rectangle: Rectangle::MAX_VALUE,
            level_zero_tiles_x: level_zero_tiles_x.max(1),
            level_zero_tiles_y: level_zero_tiles_y.max(1),
        }
    }

    /// Restrict the scheme to a sub-rectangle of the globe.
    pub fn with_rectangle(mut self, rectangle: Rectangle) -> Self {
        self.rectangle = rectangle;
        self
    }

    pub fn with_ellipsoid(mut self, ellipsoid: Ellipsoid) -> Self {
        self.ellipsoid = ellipsoid;
        self
    }

    fn tile_size(&self, level: u32) -> (f64, f64) {
        (
            self.rectangle.width() / self.number_of_x_tiles_at_level(level) as f64,
            self.rectangle.height() / self.number_of_y_tiles_at_level(level) as f64,
        )
    }
}

impl Default for GeographicTilingScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl TilingScheme for GeographicTilingScheme {
    fn rectangle(&self) -> Rectangle {
        self.rectangle
    }

    fn ellipsoid(&self) -> Ellipsoid {
        self.ellipsoid
    }

    fn projection(&self) -> ProjectionKind {
        ProjectionKind::Geographic
    }

    fn number_of_x_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(self.level_zero_tiles_x, level)
    }

    fn number_of_y_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(self.level_zero_tiles_y, level)
    }

    fn tile_xy_to_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let (tile_width, tile_height) = self.tile_size(level);

        let west = self.rectangle.west + x as f64 * tile_width;
        let east = self.rectangle.west + (x + 1) as f64 * tile_width;
        let north = self.rectangle.north - y as f64 * tile_height;
        let south = self.rectangle.north - (y + 1) as f64 * tile_height;

        Rectangle::new(west, south, east, north)
    }

    fn tile_xy_to_native_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let rect = self.tile_xy_to_rectangle(x, y, level);
        self.rectangle_to_native_rectangle(&rect)
    }

    fn rectangle_to_native_rectangle(&self, rectangle: &Rectangle) -> Rectangle {
        Rectangle::new(
            rectangle.west.to_degrees(),
            rectangle.south.to_degrees(),
            rectangle.east.to_degrees(),
            rectangle.north.to_degrees(),
        )
    }

    fn position_to_tile_xy(&self, position: &Cartographic, level: u32) -> Option<(u32, u32)> {
        if !self.rectangle.contains(position) {
            return None;
        }

        let x_tiles = self.number_of_x_tiles_at_level(level);
        let y_tiles = self.number_of_y_tiles_at_level(level);
        let (tile_width, tile_height) = self.tile_size(level);

        let mut longitude = position.longitude;
        if self.rectangle.east < self.rectangle.west {
            longitude += std::f64::consts::TAU;
        }

        let x = (((longitude - self.rectangle.west) / tile_width) as u32).min(x_tiles - 1);
        let y =
            (((self.rectangle.north - position.latitude) / tile_height) as u32).min(y_tiles - 1);

        Some((x, y))
    }
}
