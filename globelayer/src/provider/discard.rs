//! Discard policies for "no data" tiles.
//!
//! Many imagery servers answer requests outside their coverage with a fixed
//! placeholder image instead of an error. A [`DiscardPolicy`] recognises such
//! tiles so the engine can mark them `Invalid` and fall back to an ancestor.

use std::sync::OnceLock;

use tracing::debug;

use super::http::AsyncHttpClient;
use super::types::{DecodedImage, ProviderError};

/// Capability set consulted when a decoded tile is turned into a texture.
pub trait DiscardPolicy: Send + Sync {
    /// Whether [`should_discard`](Self::should_discard) can be answered yet.
    fn is_ready(&self) -> bool;

    /// Whether the decoded tile is a "no data" sentinel.
    fn should_discard(&self, image: &DecodedImage) -> bool;
}

/// Policy that keeps every tile.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDiscardPolicy;

impl DiscardPolicy for NeverDiscardPolicy {
    fn is_ready(&self) -> bool {
        true
    }

    fn should_discard(&self, _image: &DecodedImage) -> bool {
        false
    }
}

/// Discards tiles that match a known "missing tile" image at a set of
/// sample pixels.
///
/// The policy becomes ready once the reference image has been supplied,
/// either directly or by fetching it.
#[derive(Debug)]
pub struct DiscardMissingTileImagePolicy {
    pixels_to_check: Vec<(u32, u32)>,
    disable_check_if_all_pixels_are_transparent: bool,
    /// `Some(None)` means the reference was loaded but checking is disabled.
    reference: OnceLock<Option<Vec<[u8; 4]>>>,
}

impl DiscardMissingTileImagePolicy {
    pub fn new(pixels_to_check: Vec<(u32, u32)>) -> Self {
        Self {
            pixels_to_check,
            disable_check_if_all_pixels_are_transparent: false,
            reference: OnceLock::new(),
        }
    }

    /// Disable discarding when every sampled reference pixel is fully
    /// transparent.
    pub fn with_disable_if_transparent(mut self, disable: bool) -> Self {
        self.disable_check_if_all_pixels_are_transparent = disable;
        self
    }

    /// Supply the reference image. Later calls are ignored.
    pub fn set_missing_image(&self, missing: &DecodedImage) {
        let samples: Vec<[u8; 4]> = self
            .pixels_to_check
            .iter()
            .map(|&(x, y)| missing.pixel(x, y).unwrap_or([0, 0, 0, 0]))
            .collect();

        let all_transparent = samples.iter().all(|rgba| rgba[3] == 0);
        let reference = if self.disable_check_if_all_pixels_are_transparent && all_transparent {
            debug!("missing-tile reference is fully transparent, discarding disabled");
            None
        } else {
            Some(samples)
        };

        let _ = self.reference.set(reference);
    }

    /// Fetch and decode the reference image, then install it.
    pub async fn load_missing_image(
        &self,
        client: &dyn AsyncHttpClient,
        url: &str,
    ) -> Result<(), ProviderError> {
        let bytes = client.get(url).await?;
        let image = DecodedImage::decode(&bytes)?;
        self.set_missing_image(&image);
        Ok(())
    }
}

impl DiscardPolicy for DiscardMissingTileImagePolicy {
    fn is_ready(&self) -> bool {
        self.reference.get().is_some()
    }

    fn should_discard(&self, image: &DecodedImage) -> bool {
        let Some(Some(reference)) = self.reference.get() else {
            return false;
        };

        self.pixels_to_check
            .iter()
            .zip(reference)
            .all(|(&(x, y), expected)| image.pixel(x, y) == Some(*expected))
    }
}
