//! Terrain-to-imagery tile matching.
//!
//! Given a terrain tile, find the imagery level whose texel spacing matches
//! the terrain's geometric error, enumerate the imagery tiles overlapping the
//! tile at that level, and compute where each one lands inside the terrain
//! tile in texture coordinates.
//!
//! Everything here is pure; [`ImageryLayer`](super::ImageryLayer) turns the
//! result into cached imagery and tile bindings.

use crate::geometry::{Rectangle, TexCoordRect};
use crate::provider::ImageryProvider;
use crate::tiling::{ProjectionKind, MAXIMUM_LEVEL, WEB_MERCATOR_MAXIMUM_LATITUDE};

use super::options::Tolerances;

/// One imagery tile overlapping a terrain tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchedImagery {
    pub x: u32,
    pub y: u32,
    pub tex_coords: TexCoordRect,
}

/// Imagery tiles covering one terrain tile, west to east then north to south.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageryMatch {
    pub level: u32,
    /// Texture coordinates were computed in Web Mercator native units.
    pub use_web_mercator_t: bool,
    pub tiles: Vec<MatchedImagery>,
}

/// Unclamped imagery level whose texel spacing is closest to
/// `texel_spacing` metres.
///
/// Texel spacing at level zero is `max_radius * scheme_width *
/// latitude_factor / (tile_width * x_tiles_at_level_0)` and halves with
/// every level. `latitude_factor` is the cosine of
/// `latitude_closest_to_equator` for projected schemes and 1 for geographic
/// ones.
pub fn level_with_maximum_texel_spacing(
    provider: &dyn ImageryProvider,
    texel_spacing: f64,
    latitude_closest_to_equator: f64,
) -> i64 {
    let scheme = provider.tiling_scheme();
    let latitude_factor = if scheme.projection_is_geographic() {
        1.0
    } else {
        latitude_closest_to_equator.cos()
    };

    let level_zero_texel_spacing = scheme.ellipsoid().maximum_radius()
        * scheme.rectangle().width()
        * latitude_factor
        / (provider.tile_width() as f64 * scheme.number_of_x_tiles_at_level(0) as f64);

    // NaN (non-positive spacing) saturates to 0, infinity to i64::MAX.
    (level_zero_texel_spacing / texel_spacing).log2().round() as i64
}

/// Imagery level for a terrain tile with the given target geometric error,
/// clamped to the provider's level range and to [`MAXIMUM_LEVEL`].
pub fn select_imagery_level(
    provider: &dyn ImageryProvider,
    target_geometric_error: f64,
    latitude_closest_to_equator: f64,
) -> u32 {
    let level = level_with_maximum_texel_spacing(
        provider,
        target_geometric_error,
        latitude_closest_to_equator,
    )
    .max(0);
    let level = u32::try_from(level).unwrap_or(u32::MAX);
    level
        .min(provider.maximum_level())
        .max(provider.minimum_level())
        .min(MAXIMUM_LEVEL)
}

/// Match a terrain tile against a provider's tiles.
///
/// Returns `None` when the layer has nothing to contribute: no overlap for a
/// non-base layer, empty provider bounds, or corners the tiling scheme cannot
/// place. A base layer always contributes, stretching its edge texels over
/// terrain outside its bounds.
pub fn match_imagery(
    provider: &dyn ImageryProvider,
    layer_rectangle: &Rectangle,
    is_base_layer: bool,
    tile_rectangle: &Rectangle,
    target_geometric_error: f64,
    tolerances: &Tolerances,
) -> Option<ImageryMatch> {
    let scheme = provider.tiling_scheme();

    let imagery_bounds = provider.rectangle().intersection(layer_rectangle)?;
    let overlap = match tile_rectangle.intersection(&imagery_bounds) {
        Some(overlap) => overlap,
        None if is_base_layer => clamp_to_bounds(tile_rectangle, &imagery_bounds),
        None => return None,
    };

    let use_web_mercator_t = scheme.projection() == ProjectionKind::WebMercator
        && tile_rectangle.north < WEB_MERCATOR_MAXIMUM_LATITUDE
        && tile_rectangle.south > -WEB_MERCATOR_MAXIMUM_LATITUDE;

    let latitude = if overlap.south > 0.0 {
        overlap.south
    } else if overlap.north < 0.0 {
        overlap.north
    } else {
        0.0
    };
    let level = select_imagery_level(provider, target_geometric_error, latitude);

    let (mut west_x, mut north_y) = scheme.position_to_tile_xy(&overlap.northwest(), level)?;
    let (mut east_x, mut south_y) = scheme.position_to_tile_xy(&overlap.southeast(), level)?;

    // Drop a row or column when the overlap only grazes it.
    let close_x = tile_rectangle.width() / tolerances.edge_snap_divisor;
    let close_y = tile_rectangle.height() / tolerances.edge_snap_divisor;

    let northwest = scheme.tile_xy_to_rectangle(west_x, north_y, level);
    if (northwest.south - tile_rectangle.north).abs() < close_y && north_y < south_y {
        north_y += 1;
    }
    if (northwest.east - tile_rectangle.west).abs() < close_x && west_x < east_x {
        west_x += 1;
    }

    let southeast = scheme.tile_xy_to_rectangle(east_x, south_y, level);
    if (southeast.north - tile_rectangle.south).abs() < close_y && south_y > north_y {
        south_y -= 1;
    }
    if (southeast.west - tile_rectangle.east).abs() < close_x && east_x > west_x {
        east_x -= 1;
    }

    let first_clipped = scheme
        .tile_xy_to_rectangle(west_x, north_y, level)
        .intersection(&imagery_bounds);

    // From here on, all texture coordinate math is done in the units the
    // texture is laid out in.
    let (terrain, bounds, first_clipped) = if use_web_mercator_t {
        (
            scheme.rectangle_to_native_rectangle(tile_rectangle),
            scheme.rectangle_to_native_rectangle(&imagery_bounds),
            first_clipped.map(|r| scheme.rectangle_to_native_rectangle(&r)),
        )
    } else {
        (*tile_rectangle, imagery_bounds, first_clipped)
    };
    let close_x = terrain.width() / tolerances.edge_snap_divisor;
    let close_y = terrain.height() / tolerances.edge_snap_divisor;
    let imagery_rectangle = |x: u32, y: u32| {
        if use_web_mercator_t {
            scheme.tile_xy_to_native_rectangle(x, y, level)
        } else {
            scheme.tile_xy_to_rectangle(x, y, level)
        }
    };
    let snap = |value: f64| snap_unit(value, tolerances.uv_epsilon);

    // The first tile may start inside the terrain tile when the imagery
    // bounds do.
    let mut max_u = 0.0;
    let mut min_v = 1.0;
    if let Some(clipped) = first_clipped.filter(|_| !is_base_layer) {
        if (clipped.west - terrain.west).abs() >= close_x {
            max_u = ((clipped.west - terrain.west) / terrain.width()).clamp(0.0, 1.0);
        }
        if (clipped.north - terrain.north).abs() >= close_y {
            min_v = ((clipped.north - terrain.south) / terrain.height()).clamp(0.0, 1.0);
        }
    }
    let initial_min_v = min_v;

    let mut tiles = Vec::new();
    for x in west_x..=east_x {
        let min_u = max_u;

        let Some(column) = imagery_rectangle(x, north_y).simple_intersection(&bounds) else {
            continue;
        };
        max_u = ((column.east - terrain.west) / terrain.width()).min(1.0);
        if x == east_x && (is_base_layer || (column.east - terrain.east).abs() < close_x) {
            max_u = 1.0;
        }

        min_v = initial_min_v;
        for y in north_y..=south_y {
            let max_v = min_v;

            let Some(clipped) = imagery_rectangle(x, y).simple_intersection(&bounds) else {
                continue;
            };
            min_v = ((clipped.south - terrain.south) / terrain.height()).max(0.0);
            if y == south_y && (is_base_layer || (clipped.south - terrain.south).abs() < close_y) {
                min_v = 0.0;
            }

            tiles.push(MatchedImagery {
                x,
                y,
                tex_coords: TexCoordRect::new(snap(min_u), snap(min_v), snap(max_u), snap(max_v)),
            });
        }
    }

    Some(ImageryMatch {
        level,
        use_web_mercator_t,
        tiles,
    })
}

/// Degenerate overlap for a terrain tile outside the imagery bounds: each
/// edge pair is clamped to the nearest bounds edge.
fn clamp_to_bounds(tile: &Rectangle, bounds: &Rectangle) -> Rectangle {
    let (south, north) = if tile.south >= bounds.north {
        (bounds.north, bounds.north)
    } else if tile.north <= bounds.south {
        (bounds.south, bounds.south)
    } else {
        (tile.south.max(bounds.south), tile.north.min(bounds.north))
    };

    let (west, east) = if tile.west >= bounds.east {
        (bounds.east, bounds.east)
    } else if tile.east <= bounds.west {
        (bounds.west, bounds.west)
    } else {
        (tile.west.max(bounds.west), tile.east.min(bounds.east))
    };

    Rectangle::new(west, south, east, north)
}

fn snap_unit(value: f64, epsilon: f64) -> f64 {
    if value.abs() < epsilon {
        0.0
    } else if (value - 1.0).abs() < epsilon {
        1.0
    } else {
        value
    }
}
