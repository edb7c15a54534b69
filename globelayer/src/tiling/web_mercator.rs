//! Spherical Web Mercator tiling scheme.

use std::f64::consts::{FRAC_PI_2, PI};

use crate::geometry::{Cartographic, Ellipsoid, Rectangle};

use super::{tiles_at_level, ProjectionKind, TilingScheme};

/// Maximum latitude (radians) representable in Web Mercator, ±85.05112878°.
pub const WEB_MERCATOR_MAXIMUM_LATITUDE: f64 = 1.484_422_229_745_332_4;

/// Web Mercator tiling scheme with a single root tile.
///
/// Native units are metres on the projection plane.
#[derive(Debug, Clone, PartialEq)]
pub struct WebMercatorTilingScheme {
    ellipsoid: Ellipsoid,
    level_zero_tiles_x: u32,
    level_zero_tiles_y: u32,
}

impl WebMercatorTilingScheme {
    pub fn new() -> Self {
        Self {
            ellipsoid: Ellipsoid::WGS84,
            level_zero_tiles_x: 1,
            level_zero_tiles_y: 1,
        }
    }

    pub fn with_root_tiles(mut self, x: u32, y: u32) -> Self {
        self.level_zero_tiles_x = x.max(1);
        self.level_zero_tiles_y = y.max(1);
        self
    }

    fn semimajor_axis(&self) -> f64 {
        self.ellipsoid.maximum_radius()
    }

    fn native_extent(&self) -> Rectangle {
        let half = PI * self.semimajor_axis();
        Rectangle::new(-half, -half, half, half)
    }

    /// Project a geodetic position to native metres.
    pub fn project(&self, longitude: f64, latitude: f64) -> (f64, f64) {
        let radius = self.semimajor_axis();
        let latitude =
            latitude.clamp(-WEB_MERCATOR_MAXIMUM_LATITUDE, WEB_MERCATOR_MAXIMUM_LATITUDE);
        let sin_latitude = latitude.sin();
        let y = 0.5 * ((1.0 + sin_latitude) / (1.0 - sin_latitude)).ln();
        (longitude * radius, y * radius)
    }

    /// Inverse of [`project`](Self::project).
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        let one_over_radius = 1.0 / self.semimajor_axis();
        let longitude = x * one_over_radius;
        let latitude = FRAC_PI_2 - 2.0 * (-y * one_over_radius).exp().atan();
        (longitude, latitude)
    }

    fn native_tile_size(&self, level: u32) -> (f64, f64) {
        let extent = self.native_extent();
        (
            (extent.east - extent.west) / self.number_of_x_tiles_at_level(level) as f64,
            (extent.north - extent.south) / self.number_of_y_tiles_at_level(level) as f64,
        )
    }
}

impl Default for WebMercatorTilingScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl TilingScheme for WebMercatorTilingScheme {
    fn rectangle(&self) -> Rectangle {
        Rectangle::new(
            -PI,
            -WEB_MERCATOR_MAXIMUM_LATITUDE,
            PI,
            WEB_MERCATOR_MAXIMUM_LATITUDE,
        )
    }

    fn ellipsoid(&self) -> Ellipsoid {
        self.ellipsoid
    }

    fn projection(&self) -> ProjectionKind {
        ProjectionKind::WebMercator
    }

    fn number_of_x_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(self.level_zero_tiles_x, level)
    }

    fn number_of_y_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(self.level_zero_tiles_y, level)
    }

    fn tile_xy_to_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let native = self.tile_xy_to_native_rectangle(x, y, level);
        let (west, south) = self.unproject(native.west, native.south);
        let (east, north) = self.unproject(native.east, native.north);
        Rectangle::new(west, south, east, north)
    }

    fn tile_xy_to_native_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let extent = self.native_extent();
        let (tile_width, tile_height) = self.native_tile_size(level);

        let west = extent.west + x as f64 * tile_width;
        let east = extent.west + (x + 1) as f64 * tile_width;
        let north = extent.north - y as f64 * tile_height;
        let south = extent.north - (y + 1) as f64 * tile_height;

        Rectangle::new(west, south, east, north)
    }

    fn rectangle_to_native_rectangle(&self, rectangle: &Rectangle) -> Rectangle {
        let (west, south) = self.project(rectangle.west, rectangle.south);
        let (east, north) = self.project(rectangle.east, rectangle.north);
        Rectangle::new(west, south, east, north)
    }

    fn position_to_tile_xy(&self, position: &Cartographic, level: u32) -> Option<(u32, u32)> {
        if !self.rectangle().contains(position) {
            return None;
        }

        let extent = self.native_extent();
        let x_tiles = self.number_of_x_tiles_at_level(level);
        let y_tiles = self.number_of_y_tiles_at_level(level);
        let (tile_width, tile_height) = self.native_tile_size(level);

        let (x, y) = self.project(position.longitude, position.latitude);
        let x = (((x - extent.west) / tile_width) as u32).min(x_tiles - 1);
        let y = (((extent.north - y) / tile_height) as u32).min(y_tiles - 1);

        Some((x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maximum_latitude_constant() {
        assert!((WEB_MERCATOR_MAXIMUM_LATITUDE.to_degrees() - 85.051_128_78).abs() < 1e-6);
    }

    #[test]
    fn test_root_tile_covers_scheme_rectangle() {
        let scheme = WebMercatorTilingScheme::new();
        let root = scheme.tile_xy_to_rectangle(0, 0, 0);
        assert!(root.equals_epsilon(&scheme.rectangle(), 1e-9));
    }

    #[test]
    fn test_project_unproject_roundtrip() {
        let scheme = WebMercatorTilingScheme::new();
        let (x, y) = scheme.project(0.3, 0.7);
        let (longitude, latitude) = scheme.unproject(x, y);
        assert!((longitude - 0.3).abs() < 1e-12);
        assert!((latitude - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_equator_splits_level_one() {
        let scheme = WebMercatorTilingScheme::new();
        let north_west = scheme.tile_xy_to_rectangle(0, 0, 1);
        assert!(north_west.south.abs() < 1e-12);
        assert!(north_west.east.abs() < 1e-12);
    }

    #[test]
    fn test_position_to_tile_xy() {
        let scheme = WebMercatorTilingScheme::new();
        let position = Cartographic::from_degrees(-74.006, 40.7128);
        let (x, y) = scheme.position_to_tile_xy(&position, 16).unwrap();
        assert_eq!(x, 19295);
        assert_eq!(y, 24640);
    }

    #[test]
    fn test_deep_levels_do_not_overflow() {
        let scheme = WebMercatorTilingScheme::new();
        let position = Cartographic::from_degrees(179.9, -85.0);
        assert_eq!(scheme.number_of_x_tiles_at_level(32), u32::MAX);
        assert!(scheme.position_to_tile_xy(&position, 40).is_some());
    }

    #[test]
    fn test_polar_position_is_outside() {
        let scheme = WebMercatorTilingScheme::new();
        let position = Cartographic::from_degrees(0.0, 89.0);
        assert_eq!(scheme.position_to_tile_xy(&position, 3), None);
    }

    #[test]
    fn test_native_rectangle_of_root() {
        let scheme = WebMercatorTilingScheme::new();
        let native = scheme.rectangle_to_native_rectangle(&scheme.rectangle());
        let half = PI * 6_378_137.0;
        assert!(native.equals_epsilon(&Rectangle::new(-half, -half, half, half), 1e-3));
    }
}
