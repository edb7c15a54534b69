//! Geodetic rectangles in radians.
//!
//! Intersection follows the globe convention that a rectangle whose `east`
//! is less than its `west` crosses the antimeridian.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;

use super::Cartographic;

/// Tolerance used when comparing longitudes against rectangle edges.
const EDGE_EPSILON: f64 = 1e-14;

/// A rectangle on the ellipsoid, in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Rectangle {
    /// The whole globe.
    pub const MAX_VALUE: Rectangle = Rectangle {
        west: -PI,
        south: -FRAC_PI_2,
        east: PI,
        north: FRAC_PI_2,
    };

    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Build a rectangle from edges given in degrees.
    pub fn from_degrees(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west: west.to_radians(),
            south: south.to_radians(),
            east: east.to_radians(),
            north: north.to_radians(),
        }
    }

    /// Width in radians, accounting for antimeridian crossing.
    pub fn width(&self) -> f64 {
        if self.east < self.west {
            self.east + TAU - self.west
        } else {
            self.east - self.west
        }
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn northwest(&self) -> Cartographic {
        Cartographic::new(self.west, self.north, 0.0)
    }

    pub fn southeast(&self) -> Cartographic {
        Cartographic::new(self.east, self.south, 0.0)
    }

    /// True when the position lies inside or on the edge of this rectangle.
    pub fn contains(&self, position: &Cartographic) -> bool {
        let mut longitude = position.longitude;
        let latitude = position.latitude;
        let west = self.west;
        let mut east = self.east;

        if east < west {
            east += TAU;
            if longitude < 0.0 {
                longitude += TAU;
            }
        }

        (longitude > west || (longitude - west).abs() <= EDGE_EPSILON)
            && (longitude < east || (longitude - east).abs() <= EDGE_EPSILON)
            && latitude >= self.south
            && latitude <= self.north
    }

    /// Intersection of two rectangles, handling the antimeridian.
    ///
    /// Returns `None` when the rectangles do not overlap. Rectangles that
    /// merely touch along an edge do not overlap.
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let mut rectangle_east = self.east;
        let mut rectangle_west = self.west;
        let mut other_east = other.east;
        let mut other_west = other.west;

        if rectangle_east < rectangle_west && other_east > 0.0 {
            rectangle_east += TAU;
        } else if other_east < other_west && rectangle_east > 0.0 {
            other_east += TAU;
        }

        if rectangle_east < rectangle_west && other_west < 0.0 {
            other_west += TAU;
        } else if other_east < other_west && rectangle_west < 0.0 {
            rectangle_west += TAU;
        }

        let west = negative_pi_to_pi(rectangle_west.max(other_west));
        let east = negative_pi_to_pi(rectangle_east.min(other_east));

        if (self.west < self.east || other.west < other.east) && east <= west {
            return None;
        }

        let south = self.south.max(other.south);
        let north = self.north.min(other.north);

        if south >= north {
            return None;
        }

        Some(Rectangle::new(west, south, east, north))
    }

    /// Intersection without antimeridian handling.
    ///
    /// Also used on projected (native) rectangles, where the edges are plain
    /// linear coordinates.
    pub fn simple_intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let west = self.west.max(other.west);
        let south = self.south.max(other.south);
        let east = self.east.min(other.east);
        let north = self.north.min(other.north);

        if south >= north || west >= east {
            return None;
        }

        Some(Rectangle::new(west, south, east, north))
    }

    /// Component-wise comparison within an absolute tolerance.
    pub fn equals_epsilon(&self, other: &Rectangle, epsilon: f64) -> bool {
        (self.west - other.west).abs() <= epsilon
            && (self.south - other.south).abs() <= epsilon
            && (self.east - other.east).abs() <= epsilon
            && (self.north - other.north).abs() <= epsilon
    }
}

impl Default for Rectangle {
    fn default() -> Self {
        Self::MAX_VALUE
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}, {:.6}, {:.6}]",
            self.west.to_degrees(),
            self.south.to_degrees(),
            self.east.to_degrees(),
            self.north.to_degrees()
        )
    }
}

/// Wrap an angle into `[0, 2π]`.
pub fn zero_to_two_pi(angle: f64) -> f64 {
    if (0.0..=TAU).contains(&angle) {
        return angle;
    }
    let modulo = angle.rem_euclid(TAU);
    if modulo.abs() < EDGE_EPSILON && angle.abs() > EDGE_EPSILON {
        return TAU;
    }
    modulo
}

/// Wrap an angle into `[-π, π]`.
pub fn negative_pi_to_pi(angle: f64) -> f64 {
    if (-PI..=PI).contains(&angle) {
        return angle;
    }
    zero_to_two_pi(angle + PI) - PI
}
