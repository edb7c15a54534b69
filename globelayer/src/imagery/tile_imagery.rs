//! Binding of one imagery tile to one terrain tile.

use crate::error::Result;
use crate::geometry::{Rectangle, TexCoordRect, TextureTransform};
use crate::layer::ImageryLayer;

use super::{ImageryHandle, ImageryState, LayerId};

/// A terrain tile's reference to imagery of one layer.
///
/// `loading_imagery` is the tile it wants; `ready_imagery` is what it can
/// draw now, either the loaded tile itself or the nearest ready ancestor.
/// Each present handle holds one reference.
#[derive(Debug)]
pub struct TileImagery {
    layer: LayerId,
    loading_imagery: Option<ImageryHandle>,
    ready_imagery: Option<ImageryHandle>,
    texture_coordinate_rectangle: TexCoordRect,
    texture_transform: Option<TextureTransform>,
    use_web_mercator_t: bool,
}

impl TileImagery {
    /// Bind `handle`, taking over the reference the caller holds on it.
    pub fn new(
        handle: ImageryHandle,
        texture_coordinate_rectangle: TexCoordRect,
        use_web_mercator_t: bool,
    ) -> Self {
        Self {
            layer: handle.layer(),
            loading_imagery: Some(handle),
            ready_imagery: None,
            texture_coordinate_rectangle,
            texture_transform: None,
            use_web_mercator_t,
        }
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn loading_imagery(&self) -> Option<ImageryHandle> {
        self.loading_imagery
    }

    pub fn ready_imagery(&self) -> Option<ImageryHandle> {
        self.ready_imagery
    }

    /// Part of the terrain tile this imagery covers, in unit coordinates.
    pub fn texture_coordinate_rectangle(&self) -> TexCoordRect {
        self.texture_coordinate_rectangle
    }

    /// Transform for sampling `ready_imagery`; set whenever it changes.
    pub fn texture_transform(&self) -> Option<TextureTransform> {
        self.texture_transform
    }

    /// Whether the imagery is sampled in Web Mercator space.
    pub fn use_web_mercator_t(&self) -> bool {
        self.use_web_mercator_t
    }

    pub fn is_placeholder(&self, layer: &ImageryLayer) -> bool {
        self.loading_imagery
            .and_then(|handle| layer.imagery(handle))
            .is_some_and(|imagery| imagery.state() == ImageryState::Placeholder)
    }

    /// Advance the binding by one step.
    ///
    /// Returns true when nothing more will change: the wanted imagery is
    /// ready, or it failed and no ancestor is still loading.
    pub fn process_state_machine(
        &mut self,
        tile_rectangle: &Rectangle,
        layer: &mut ImageryLayer,
        skip_loading: bool,
    ) -> Result<bool> {
        let Some(loading) = self.loading_imagery else {
            return Ok(true);
        };
        let need_geographic = !self.use_web_mercator_t;

        layer.process_imagery(loading, need_geographic, skip_loading)?;

        let Some(imagery) = layer.imagery(loading) else {
            // Evicted underneath us; nothing left to wait for.
            self.loading_imagery = None;
            return Ok(true);
        };
        let loading_state = imagery.state();
        let parent = imagery.parent();

        if self.is_usable(layer, loading) {
            if let Some(previous) = self.ready_imagery.replace(loading) {
                layer.release_imagery(previous);
            }
            self.loading_imagery = None;
            self.texture_transform =
                layer.calculate_texture_translation_and_scale(tile_rectangle, self);
            return Ok(true);
        }

        // Borrow an ancestor until the wanted tile arrives.
        let mut ancestor = parent;
        let mut closest_loading = None;
        while let Some(handle) = ancestor {
            if self.is_usable(layer, handle) {
                break;
            }
            let Some(candidate) = layer.imagery(handle) else {
                ancestor = None;
                break;
            };
            if !candidate.state().is_terminal() && closest_loading.is_none() {
                closest_loading = Some(handle);
            }
            ancestor = candidate.parent();
        }

        if self.ready_imagery != ancestor {
            if let Some(previous) = self.ready_imagery.take() {
                layer.release_imagery(previous);
            }
            if let Some(handle) = ancestor {
                layer.add_imagery_reference(handle);
                self.ready_imagery = Some(handle);
                self.texture_transform =
                    layer.calculate_texture_translation_and_scale(tile_rectangle, self);
            } else {
                self.texture_transform = None;
            }
        }

        if loading_state.is_terminal() {
            if let Some(handle) = closest_loading {
                layer.process_imagery(handle, need_geographic, skip_loading)?;
                return Ok(false);
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Ready, and carrying the texture this binding samples.
    fn is_usable(&self, layer: &ImageryLayer, handle: ImageryHandle) -> bool {
        layer.imagery(handle).is_some_and(|imagery| {
            imagery.state() == ImageryState::Ready
                && (self.use_web_mercator_t || imagery.texture().is_some())
        })
    }

    /// Release both references held by this binding.
    pub fn free_resources(&mut self, layer: &mut ImageryLayer) {
        if let Some(handle) = self.loading_imagery.take() {
            layer.release_imagery(handle);
        }
        if let Some(handle) = self.ready_imagery.take() {
            layer.release_imagery(handle);
        }
        self.texture_transform = None;
    }
}
