//! Geometric primitives shared by the tiling, layer and texture modules.

mod rectangle;

pub use rectangle::{negative_pi_to_pi, zero_to_two_pi, Rectangle};

/// A position on the ellipsoid in radians (height in metres).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Cartographic {
    pub const fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    pub fn from_degrees(longitude: f64, latitude: f64) -> Self {
        Self::new(longitude.to_radians(), latitude.to_radians(), 0.0)
    }
}

/// Reference ellipsoid radii in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub radii: [f64; 3],
}

impl Ellipsoid {
    /// WGS84 ellipsoid.
    pub const WGS84: Ellipsoid = Ellipsoid {
        radii: [6_378_137.0, 6_378_137.0, 6_356_752.314_245_179],
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { radii: [x, y, z] }
    }

    pub fn maximum_radius(&self) -> f64 {
        self.radii[0].max(self.radii[1]).max(self.radii[2])
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::WGS84
    }
}

/// Where an imagery texture lands inside a terrain tile, in `[0, 1]` units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexCoordRect {
    pub min_u: f64,
    pub min_v: f64,
    pub max_u: f64,
    pub max_v: f64,
}

impl TexCoordRect {
    /// The whole terrain tile.
    pub const UNIT: TexCoordRect = TexCoordRect {
        min_u: 0.0,
        min_v: 0.0,
        max_u: 1.0,
        max_v: 1.0,
    };

    pub const fn new(min_u: f64, min_v: f64, max_u: f64, max_v: f64) -> Self {
        Self {
            min_u,
            min_v,
            max_u,
            max_v,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_u - self.min_u
    }

    pub fn height(&self) -> f64 {
        self.max_v - self.min_v
    }

    pub fn equals_epsilon(&self, other: &TexCoordRect, epsilon: f64) -> bool {
        (self.min_u - other.min_u).abs() <= epsilon
            && (self.min_v - other.min_v).abs() <= epsilon
            && (self.max_u - other.max_u).abs() <= epsilon
            && (self.max_v - other.max_v).abs() <= epsilon
    }
}

/// Affine mapping from a terrain tile's unit quad into an imagery texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureTransform {
    pub translate_x: f64,
    pub translate_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl TextureTransform {
    pub const IDENTITY: TextureTransform = TextureTransform {
        translate_x: 0.0,
        translate_y: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
    };

    /// Map a terrain-tile `(u, v)` into imagery texture space.
    pub fn apply(&self, u: f64, v: f64) -> (f64, f64) {
        (
            self.translate_x + u * self.scale_x,
            self.translate_y + v * self.scale_y,
        )
    }
}
