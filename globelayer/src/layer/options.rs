//! Layer configuration.
//!
//! `ImageryLayerOptions` combines everything an [`ImageryLayer`](super::ImageryLayer)
//! needs besides its provider and texture backend.

use serde::{Deserialize, Serialize};

use crate::error::{ImageryError, Result};
use crate::geometry::Rectangle;
use crate::pipeline::RetryPolicy;
use crate::texture::TextureSampling;

/// Default edge-snap divisor: a corner within 1/512 of a tile edge is on it.
pub const DEFAULT_EDGE_SNAP_DIVISOR: f64 = 512.0;

/// Default reprojection threshold in radians per texel.
pub const DEFAULT_REPROJECTION_PRECISION: f64 = 1e-5;

/// Default tolerance for texture coordinates.
pub const DEFAULT_UV_EPSILON: f64 = 1e-6;

/// Default maximum number of concurrent requests per layer.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Empirical floating-point tolerances used by tile matching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    /// A tile corner within `tile_extent / edge_snap_divisor` of an edge is
    /// treated as lying on that edge.
    pub edge_snap_divisor: f64,

    /// Reproject only when `rectangle.width / texture.width` exceeds this.
    pub reprojection_precision: f64,

    /// Texture coordinates this close to 0 or 1 are snapped to it.
    pub uv_epsilon: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            edge_snap_divisor: DEFAULT_EDGE_SNAP_DIVISOR,
            reprojection_precision: DEFAULT_REPROJECTION_PRECISION,
            uv_epsilon: DEFAULT_UV_EPSILON,
        }
    }
}

/// Visual parameters passed through to the renderer untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderParameters {
    pub alpha: f64,
    pub brightness: f64,
    pub contrast: f64,
    /// Hue shift in radians.
    pub hue: f64,
    pub saturation: f64,
    pub gamma: f64,
    /// Hidden layers are skipped when skeletons are created.
    pub show: bool,
}

impl Default for RenderParameters {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            brightness: 1.0,
            contrast: 1.0,
            hue: 0.0,
            saturation: 1.0,
            gamma: 1.0,
            show: true,
        }
    }
}

/// Request pipeline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    /// Requests beyond this are throttled and retried on a later frame.
    pub max_in_flight: usize,
    /// Retry policy for the default error reporter.
    pub retry_policy: RetryPolicy,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            retry_policy: RetryPolicy::exponential(3),
        }
    }
}

/// Options for an imagery layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageryLayerOptions {
    /// Clamp applied on top of the provider's rectangle.
    pub rectangle: Rectangle,
    pub minimum_terrain_level: Option<u32>,
    pub maximum_terrain_level: Option<u32>,
    pub sampling: TextureSampling,
    pub render: RenderParameters,
    pub tolerances: Tolerances,
    pub request: RequestConfig,
}

impl Default for ImageryLayerOptions {
    fn default() -> Self {
        Self {
            rectangle: Rectangle::MAX_VALUE,
            minimum_terrain_level: None,
            maximum_terrain_level: None,
            sampling: TextureSampling::default(),
            render: RenderParameters::default(),
            tolerances: Tolerances::default(),
            request: RequestConfig::default(),
        }
    }
}

impl ImageryLayerOptions {
    pub fn with_rectangle(mut self, rectangle: Rectangle) -> Self {
        self.rectangle = rectangle;
        self
    }

    /// Restrict the terrain levels this layer contributes to.
    pub fn with_terrain_levels(mut self, minimum: Option<u32>, maximum: Option<u32>) -> Self {
        self.minimum_terrain_level = minimum;
        self.maximum_terrain_level = maximum;
        self
    }

    pub fn with_sampling(mut self, sampling: TextureSampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_render(mut self, render: RenderParameters) -> Self {
        self.render = render;
        self
    }

    pub fn with_tolerances(mut self, tolerances: Tolerances) -> Self {
        self.tolerances = tolerances;
        self
    }

    pub fn with_request(mut self, request: RequestConfig) -> Self {
        self.request = request;
        self
    }

    /// Check the options for programming errors.
    pub fn validate(&self) -> Result<()> {
        validate_sampling(&self.sampling)?;

        if let (Some(min), Some(max)) = (self.minimum_terrain_level, self.maximum_terrain_level) {
            if min > max {
                return Err(ImageryError::Configuration(format!(
                    "minimum terrain level {} exceeds maximum terrain level {}",
                    min, max
                )));
            }
        }
        if self.tolerances.edge_snap_divisor <= 0.0 {
            return Err(ImageryError::Configuration(
                "edge snap divisor must be positive".to_string(),
            ));
        }
        if self.request.max_in_flight == 0 {
            return Err(ImageryError::Configuration(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Imagery textures may only be sampled with `Nearest` or `Linear`
/// minification.
pub(crate) fn validate_sampling(sampling: &TextureSampling) -> Result<()> {
    if !sampling.minification_filter.is_valid_for_imagery() {
        return Err(ImageryError::Configuration(format!(
            "minification filter must be Nearest or Linear, got {:?}",
            sampling.minification_filter
        )));
    }
    Ok(())
}
