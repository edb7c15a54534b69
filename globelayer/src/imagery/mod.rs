//! Imagery tiles, their per-layer cache and their bindings to terrain tiles.
//!
//! # Ownership
//!
//! Every [`Imagery`] lives in the arena of its layer's [`ImageryCache`] and
//! is addressed through a generation-checked [`ImageryHandle`]. Holders
//! (tile bindings, child imagery, pending reprojections) each own one
//! reference; the imagery is evicted the moment the count reaches zero, and
//! every handle to it resolves to `None` from then on.

mod cache;
mod state;
mod tile_imagery;

pub use cache::{CacheStats, ImageryCache};
pub use state::ImageryState;
pub use tile_imagery::TileImagery;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::geometry::Rectangle;
use crate::provider::{Credit, DecodedImage};
use crate::texture::TextureHandle;

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an imagery layer, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl LayerId {
    pub fn next() -> Self {
        Self(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Tile coordinates within the provider's tiling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageryKey {
    pub x: u32,
    pub y: u32,
    pub level: u32,
}

impl ImageryKey {
    pub const fn new(x: u32, y: u32, level: u32) -> Self {
        Self { x, y, level }
    }

    /// Key of the tile one level up, or `None` at level 0.
    pub fn parent(&self) -> Option<ImageryKey> {
        if self.level == 0 {
            return None;
        }
        Some(Self::new(self.x / 2, self.y / 2, self.level - 1))
    }
}

impl fmt::Display for ImageryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}

/// Generation-checked reference to an imagery slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageryHandle {
    layer: LayerId,
    index: u32,
    generation: u32,
}

impl ImageryHandle {
    pub(crate) fn new(layer: LayerId, index: u32, generation: u32) -> Self {
        Self {
            layer,
            index,
            generation,
        }
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

/// One imagery tile of one layer.
#[derive(Debug)]
pub struct Imagery {
    key: ImageryKey,
    layer: LayerId,
    state: ImageryState,
    reference_count: u32,
    rectangle: Rectangle,
    parent: Option<ImageryHandle>,
    pub(crate) image: Option<DecodedImage>,
    pub(crate) texture: Option<TextureHandle>,
    pub(crate) texture_web_mercator: Option<TextureHandle>,
    pub(crate) credits: Vec<Credit>,
}

impl Imagery {
    pub(crate) fn new(
        key: ImageryKey,
        layer: LayerId,
        rectangle: Rectangle,
        parent: Option<ImageryHandle>,
    ) -> Self {
        Self {
            key,
            layer,
            state: ImageryState::Unloaded,
            reference_count: 0,
            rectangle,
            parent,
            image: None,
            texture: None,
            texture_web_mercator: None,
            credits: Vec::new(),
        }
    }

    pub(crate) fn placeholder(layer: LayerId) -> Self {
        let mut imagery = Self::new(ImageryKey::new(0, 0, 0), layer, Rectangle::MAX_VALUE, None);
        imagery.state = ImageryState::Placeholder;
        imagery
    }

    pub fn key(&self) -> ImageryKey {
        self.key
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn state(&self) -> ImageryState {
        self.state
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    pub fn rectangle(&self) -> Rectangle {
        self.rectangle
    }

    pub fn parent(&self) -> Option<ImageryHandle> {
        self.parent
    }

    /// Geographic texture, set once the tile is usable on a geographic mesh.
    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    /// Texture in the provider's native Web Mercator projection.
    pub fn texture_web_mercator(&self) -> Option<TextureHandle> {
        self.texture_web_mercator
    }

    pub fn image(&self) -> Option<&DecodedImage> {
        self.image.as_ref()
    }

    pub fn credits(&self) -> &[Credit] {
        &self.credits
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Returns whether the state changed. Rejected transitions are logged and
    /// leave the imagery untouched.
    pub(crate) fn transition(&mut self, next: ImageryState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                layer = %self.layer,
                x = self.key.x,
                y = self.key.y,
                level = self.key.level,
                from = %self.state,
                to = %next,
                "Rejected imagery state transition"
            );
            return false;
        }
        debug!(
            layer = %self.layer,
            x = self.key.x,
            y = self.key.y,
            level = self.key.level,
            from = %self.state,
            to = %next,
            "Imagery state transition"
        );
        self.state = next;
        true
    }

    /// Put a terminal imagery back to `Unloaded` so it can be requested again.
    ///
    /// Returns false unless the imagery is `Failed` or `Invalid`.
    pub(crate) fn reset(&mut self) -> bool {
        if !self.state.is_terminal() {
            return false;
        }
        debug!(
            layer = %self.layer,
            x = self.key.x,
            y = self.key.y,
            level = self.key.level,
            from = %self.state,
            "Imagery reset for explicit retry"
        );
        self.state = ImageryState::Unloaded;
        self.image = None;
        true
    }

    pub(crate) fn increment(&mut self) -> u32 {
        self.reference_count += 1;
        self.reference_count
    }

    pub(crate) fn decrement(&mut self) -> u32 {
        self.reference_count = self.reference_count.saturating_sub(1);
        self.reference_count
    }

    /// Textures owned by this imagery, each listed once.
    pub(crate) fn take_textures(&mut self) -> Vec<TextureHandle> {
        let mut textures = Vec::with_capacity(2);
        if let Some(texture) = self.texture.take() {
            textures.push(texture);
        }
        if let Some(texture) = self.texture_web_mercator.take() {
            if !textures.contains(&texture) {
                textures.push(texture);
            }
        }
        textures
    }
}
