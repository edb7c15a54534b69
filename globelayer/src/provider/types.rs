//! Core provider types and the imagery provider contract.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;

use super::discard::DiscardPolicy;
use crate::error::FailureKind;
use crate::geometry::Rectangle;
use crate::tiling::TilingScheme;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Future returned by [`ImageryProvider::request_image`].
pub type ImageFuture = BoxFuture<'static, Result<DecodedImage, ProviderError>>;

/// Errors that can occur while fetching or decoding a tile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Transport-level failure (connection, HTTP status, body read).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The payload could not be decoded into an image.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The provider has no tiles at this level.
    #[error("Unsupported level: {0}")]
    UnsupportedLevel(u32),

    /// The provider is not ready to serve requests yet.
    #[error("Provider is not ready")]
    NotReady,
}

impl ProviderError {
    /// Classify the error for the error reporter.
    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::DecodeError(_) => FailureKind::DecodeFailure,
            _ => FailureKind::NetworkFailure,
        }
    }
}

/// A decoded RGBA image, cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pixels: Arc<RgbaImage>,
}

impl DecodedImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// Decode an encoded image (PNG, JPEG, ...) from memory.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProviderError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| ProviderError::DecodeError(e.to_string()))?;
        Ok(Self::new(image.to_rgba8()))
    }

    /// A single-colour image.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, image::Rgba(rgba)))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// RGBA value at a pixel, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        Some(self.pixels.get_pixel(x, y).0)
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }
}

/// Attribution attached to imagery tiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credit {
    pub text: String,
    pub show_on_screen: bool,
}

impl Credit {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            show_on_screen: false,
        }
    }
}

impl fmt::Display for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Source of imagery tiles for one layer.
///
/// The engine calls into the provider only from the frame-driver thread;
/// the returned futures run on the async runtime.
pub trait ImageryProvider: Send + Sync {
    /// Human-readable provider name for logs and error reports.
    fn name(&self) -> &str;

    /// Whether the provider has finished initialising. Skeleton creation is
    /// deferred behind a placeholder until this returns true.
    fn is_ready(&self) -> bool {
        true
    }

    fn minimum_level(&self) -> u32 {
        0
    }

    fn maximum_level(&self) -> u32;

    /// Tile width in pixels.
    fn tile_width(&self) -> u32;

    /// Tile height in pixels.
    fn tile_height(&self) -> u32;

    /// Rectangle the provider has imagery for.
    fn rectangle(&self) -> Rectangle {
        self.tiling_scheme().rectangle()
    }

    fn tiling_scheme(&self) -> &dyn TilingScheme;

    /// Start fetching a tile.
    ///
    /// Returns `None` when the provider is throttling requests; the engine
    /// will ask again on a later frame.
    fn request_image(&self, x: u32, y: u32, level: u32) -> Option<ImageFuture>;

    /// Policy for recognising "no data" tiles.
    fn discard_policy(&self) -> Option<&dyn DiscardPolicy> {
        None
    }

    /// Attribution for a tile, captured when the tile is requested.
    fn tile_credits(&self, _x: u32, _y: u32, _level: u32) -> Vec<Credit> {
        Vec::new()
    }
}
