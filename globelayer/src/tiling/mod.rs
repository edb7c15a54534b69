//! Tiling scheme contract and the two reference schemes.
//!
//! A tiling scheme maps between geodetic rectangles and a quadtree of
//! `(x, y, level)` tile coordinates. The engine only relies on the
//! [`TilingScheme`] trait; the projection math lives in the implementations.
//!
//! Tile `y` increases southward from the north edge of the scheme, `x`
//! increases eastward from its west edge.

mod geographic;
mod web_mercator;

pub use geographic::GeographicTilingScheme;
pub use web_mercator::{WebMercatorTilingScheme, WEB_MERCATOR_MAXIMUM_LATITUDE};

use crate::geometry::{Cartographic, Ellipsoid, Rectangle};

/// Deepest level the engine addresses. Tile counts of the reference schemes
/// still fit in a `u32` there.
pub const MAXIMUM_LEVEL: u32 = 30;

/// Tiles along one axis at `level`, saturating instead of overflowing.
fn tiles_at_level(level_zero_tiles: u32, level: u32) -> u32 {
    1u32.checked_shl(level)
        .map_or(u32::MAX, |factor| level_zero_tiles.saturating_mul(factor))
}

/// Map projection a tiling scheme is laid out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionKind {
    /// Equirectangular: tiles are equal-sized in longitude and latitude.
    Geographic,
    /// Spherical Web Mercator.
    WebMercator,
}

/// Contract between the engine and a tiling scheme.
///
/// Implementations must be pure: the same inputs always yield the same
/// outputs, so results may be freely recomputed.
pub trait TilingScheme: Send + Sync {
    /// Rectangle covered by the whole scheme.
    fn rectangle(&self) -> Rectangle;

    fn ellipsoid(&self) -> Ellipsoid;

    fn projection(&self) -> ProjectionKind;

    fn number_of_x_tiles_at_level(&self, level: u32) -> u32;

    fn number_of_y_tiles_at_level(&self, level: u32) -> u32;

    /// Geodetic rectangle of a tile, in radians.
    fn tile_xy_to_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle;

    /// Rectangle of a tile in the scheme's projected (native) units.
    fn tile_xy_to_native_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle;

    /// Project a geodetic rectangle into native units.
    fn rectangle_to_native_rectangle(&self, rectangle: &Rectangle) -> Rectangle;

    /// Tile containing the position, or `None` if the position lies outside
    /// the scheme's rectangle.
    fn position_to_tile_xy(&self, position: &Cartographic, level: u32) -> Option<(u32, u32)>;

    fn projection_is_geographic(&self) -> bool {
        self.projection() == ProjectionKind::Geographic
    }
}
