//! Ordered stack of imagery layers.

use tracing::{debug, info};

use crate::error::Result;
use crate::imagery::LayerId;
use crate::reprojection::{ReprojectionCommand, ReprojectionOutcome};
use crate::terrain::{TerrainProvider, TerrainTile};
use crate::texture::Reprojector;

use super::ImageryLayer;

/// Layers in draw order; index 0 is the base layer.
#[derive(Default)]
pub struct ImageryLayerCollection {
    layers: Vec<ImageryLayer>,
}

impl ImageryLayerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer on top of the stack and return its id.
    pub fn add(&mut self, mut layer: ImageryLayer) -> LayerId {
        layer.set_base_layer(self.layers.is_empty());
        let id = layer.id();
        info!(layer = %id, index = self.layers.len(), "Imagery layer added");
        self.layers.push(layer);
        id
    }

    /// Remove a layer, first releasing every binding `tiles` hold on it.
    pub fn remove(&mut self, id: LayerId, tiles: &mut [TerrainTile]) -> Option<ImageryLayer> {
        let index = self.index_of(id)?;
        let mut layer = self.layers.remove(index);

        for tile in tiles.iter_mut() {
            let mut kept = Vec::with_capacity(tile.imagery.len());
            for mut binding in tile.imagery.drain(..) {
                if binding.layer() == id {
                    binding.free_resources(&mut layer);
                } else {
                    kept.push(binding);
                }
            }
            tile.imagery = kept;
        }

        layer.set_base_layer(false);
        if let Some(base) = self.layers.first_mut() {
            base.set_base_layer(true);
        }
        info!(layer = %id, "Imagery layer removed");
        Some(layer)
    }

    pub fn get(&self, id: LayerId) -> Option<&ImageryLayer> {
        self.layers.iter().find(|layer| layer.id() == id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut ImageryLayer> {
        self.layers.iter_mut().find(|layer| layer.id() == id)
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id() == id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageryLayer> {
        self.layers.iter()
    }

    /// Create skeletons for a new terrain tile from every shown layer, in
    /// layer order.
    pub fn create_skeletons(&mut self, tile: &mut TerrainTile, terrain: &dyn TerrainProvider) {
        for layer in self.layers.iter_mut().filter(|layer| layer.show()) {
            layer.create_skeletons(tile, terrain, None);
        }
    }

    /// Advance every binding of `tile`. Returns true once all are done.
    ///
    /// Placeholders of layers whose provider has become ready are replaced
    /// by real skeletons at the same position.
    pub fn process_tile(
        &mut self,
        tile: &mut TerrainTile,
        terrain: &dyn TerrainProvider,
        skip_loading: bool,
    ) -> Result<bool> {
        let mut done = true;
        let mut index = 0;
        while index < tile.imagery.len() {
            let Some(layer) = self
                .layers
                .iter_mut()
                .find(|layer| layer.id() == tile.imagery[index].layer())
            else {
                // Layer removed without the tile; drop the orphaned binding.
                tile.imagery.remove(index);
                continue;
            };

            if tile.imagery[index].is_placeholder(layer) {
                if !layer.is_ready() {
                    done = false;
                    index += 1;
                    continue;
                }
                let mut placeholder = tile.imagery.remove(index);
                placeholder.free_resources(layer);
                let before = tile.imagery.len();
                layer.create_skeletons(tile, terrain, Some(index));
                debug!(
                    layer = %layer.id(),
                    x = tile.x,
                    y = tile.y,
                    level = tile.level,
                    "Replaced placeholder imagery"
                );
                // Process the new skeletons on this same pass.
                if tile.imagery.len() == before {
                    continue;
                }
            }

            let rectangle = tile.rectangle;
            let binding = &mut tile.imagery[index];
            done &= binding.process_state_machine(&rectangle, layer, skip_loading)?;
            index += 1;
        }
        Ok(done)
    }

    /// Release every binding of a terrain tile leaving the scene.
    pub fn release_tile(&mut self, tile: &mut TerrainTile) {
        tile.free_imagery(self);
    }

    /// Apply completed requests and run queued reprojections on every layer.
    pub fn update(&mut self, reprojector: &dyn Reprojector) -> usize {
        self.layers
            .iter_mut()
            .map(|layer| layer.process_completions() + layer.execute_reprojections(reprojector))
            .sum()
    }

    /// Drain the reprojection queues of all layers, for a host that runs the
    /// commands itself and reports back through
    /// [`ImageryLayer::complete_reprojection`].
    pub fn queue_reprojection_commands(&mut self) -> Vec<ReprojectionCommand> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.queue_reprojection_commands())
            .collect()
    }

    /// Route a host-run reprojection result back to its layer. Results for
    /// removed layers are dropped.
    pub fn complete_reprojection(
        &mut self,
        command: &ReprojectionCommand,
        outcome: ReprojectionOutcome,
    ) -> bool {
        match self.get_mut(command.handle().layer()) {
            Some(layer) => {
                layer.complete_reprojection(command, outcome);
                true
            }
            None => false,
        }
    }

    pub fn cancel_reprojections(&mut self) {
        for layer in &mut self.layers {
            layer.cancel_reprojections();
        }
    }
}
