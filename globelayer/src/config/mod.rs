//! INI configuration for imagery layers.
//!
//! A config file describes one layer and the provider feeding it:
//!
//! ```ini
//! [layer]
//! rectangle = -10.0, 35.0, 30.0, 60.0
//! minimum_terrain_level = 0
//! maximum_terrain_level = 20
//! minification_filter = linear
//! magnification_filter = linear
//! alpha = 1.0
//! show = true
//!
//! [provider]
//! url = https://tiles.example.com/{z}/{x}/{y}.png
//! scheme = webmercator
//! minimum_level = 0
//! maximum_level = 18
//! tile_width = 256
//! tile_height = 256
//!
//! [request]
//! max_in_flight = 64
//! max_attempts = 3
//! initial_delay_ms = 100
//!
//! [tolerances]
//! edge_snap_divisor = 512
//! reprojection_precision = 0.00001
//! ```
//!
//! `rectangle` lists west, south, east and north in degrees. Every key is
//! optional; missing keys keep their defaults.

mod parser;

use std::path::Path;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::geometry::Rectangle;
use crate::layer::{
    ImageryLayerOptions, RenderParameters, RequestConfig, Tolerances, DEFAULT_MAX_IN_FLIGHT,
};
use crate::pipeline::{RetryPolicy, DEFAULT_INITIAL_DELAY_MS};
use crate::texture::TextureSampling;
use crate::tiling::ProjectionKind;

/// Errors from loading a config file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] ini::ParseError),

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// `[layer]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSection {
    pub rectangle: Rectangle,
    pub minimum_terrain_level: Option<u32>,
    pub maximum_terrain_level: Option<u32>,
    pub sampling: TextureSampling,
    pub render: RenderParameters,
}

impl Default for LayerSection {
    fn default() -> Self {
        Self {
            rectangle: Rectangle::MAX_VALUE,
            minimum_terrain_level: None,
            maximum_terrain_level: None,
            sampling: TextureSampling::default(),
            render: RenderParameters::default(),
        }
    }
}

/// `[provider]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSection {
    /// URL template; without one a synthetic provider is used.
    pub url: Option<String>,
    pub scheme: ProjectionKind,
    pub minimum_level: u32,
    pub maximum_level: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            url: None,
            scheme: ProjectionKind::Geographic,
            minimum_level: 0,
            maximum_level: 18,
            tile_width: 256,
            tile_height: 256,
        }
    }
}

/// `[request]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSection {
    pub max_in_flight: usize,
    /// Attempts per tile including the first; 1 disables retries.
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RequestSection {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_attempts: 3,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
        }
    }
}

/// Parsed contents of a layer config file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerConfigFile {
    pub layer: LayerSection,
    pub provider: ProviderSection,
    pub request: RequestSection,
    pub tolerances: Tolerances,
}

impl LayerConfigFile {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        parser::parse_ini(&ini)
    }

    /// Parse configuration from INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(text)?;
        parser::parse_ini(&ini)
    }

    /// Layer options described by this file.
    pub fn to_layer_options(&self) -> ImageryLayerOptions {
        let retry_policy = if self.request.max_attempts <= 1 {
            RetryPolicy::None
        } else {
            RetryPolicy::exponential_from(self.request.max_attempts, self.request.initial_delay)
        };

        ImageryLayerOptions::default()
            .with_rectangle(self.layer.rectangle)
            .with_terrain_levels(
                self.layer.minimum_terrain_level,
                self.layer.maximum_terrain_level,
            )
            .with_sampling(self.layer.sampling)
            .with_render(self.layer.render)
            .with_tolerances(self.tolerances)
            .with_request(RequestConfig {
                max_in_flight: self.request.max_in_flight,
                retry_policy,
            })
    }
}
