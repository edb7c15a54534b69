//! GPU texture contract.
//!
//! The engine never touches a graphics API directly. Decoded imagery is handed
//! to a [`TextureUploader`] and reprojection work to a [`Reprojector`]; both
//! only see opaque [`TextureHandle`]s.

mod error;
mod memory;

pub use error::TextureError;
pub use memory::InMemoryTextures;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::DecodedImage;
use crate::reprojection::{ReprojectionCommand, ReprojectionOutcome};

/// Opaque handle to a GPU-resident texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    id: u64,
    width: u32,
    height: u32,
}

impl TextureHandle {
    pub fn new(id: u64, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{} ({}x{})", self.id, self.width, self.height)
    }
}

/// Minification filters a sampler can be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureMinificationFilter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

impl TextureMinificationFilter {
    /// Only the non-mipmapped filters may be requested for imagery; mipmaps
    /// are generated by the uploader.
    pub fn is_valid_for_imagery(&self) -> bool {
        matches!(self, Self::Nearest | Self::Linear)
    }
}

impl std::str::FromStr for TextureMinificationFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "linear" => Ok(Self::Linear),
            "nearest_mipmap_nearest" => Ok(Self::NearestMipmapNearest),
            "linear_mipmap_nearest" => Ok(Self::LinearMipmapNearest),
            "nearest_mipmap_linear" => Ok(Self::NearestMipmapLinear),
            "linear_mipmap_linear" => Ok(Self::LinearMipmapLinear),
            other => Err(format!("unknown minification filter '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureMagnificationFilter {
    Nearest,
    Linear,
}

impl std::str::FromStr for TextureMagnificationFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "linear" => Ok(Self::Linear),
            other => Err(format!("unknown magnification filter '{}'", other)),
        }
    }
}

/// Sampler settings applied to every imagery texture of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextureSampling {
    pub minification_filter: TextureMinificationFilter,
    pub magnification_filter: TextureMagnificationFilter,
    pub maximum_anisotropy: Option<f32>,
}

impl TextureSampling {
    /// Mipmaps are only worth building for fully linear sampling.
    pub fn wants_mipmaps(&self) -> bool {
        self.minification_filter == TextureMinificationFilter::Linear
            && self.magnification_filter == TextureMagnificationFilter::Linear
    }
}

impl Default for TextureSampling {
    fn default() -> Self {
        Self {
            minification_filter: TextureMinificationFilter::Linear,
            magnification_filter: TextureMagnificationFilter::Linear,
            maximum_anisotropy: None,
        }
    }
}

/// Uploads decoded imagery to GPU-resident storage.
pub trait TextureUploader: Send + Sync {
    fn upload(
        &self,
        image: &DecodedImage,
        sampling: &TextureSampling,
    ) -> Result<TextureHandle, TextureError>;

    /// Free a texture. Called exactly once per uploaded or reprojected texture.
    fn destroy(&self, texture: TextureHandle);
}

/// Executes reprojection commands on the GPU.
///
/// Commands are produced by `ImageryLayer::queue_reprojection_commands` and
/// their outcome must be handed back to `ImageryLayer::complete_reprojection`.
pub trait Reprojector {
    fn reproject(&self, command: &ReprojectionCommand) -> ReprojectionOutcome;
}
