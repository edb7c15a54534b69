//! Imagery layers.
//!
//! An [`ImageryLayer`] owns one provider, its imagery cache, the request
//! pipeline and the reprojection queue. It is the entry point the renderer
//! calls once per terrain tile to create skeletons, and once per frame to
//! apply completed work.
//!
//! # Frame loop
//!
//! ```text
//! new terrain tile ──► create_skeletons ──► TileImagery bindings
//!                                               │
//! every frame:                                  ▼
//!   process_completions ◄── fetches     TileImagery::process_state_machine
//!   execute_reprojections                  └─► process_imagery
//!                                               ├─ Unloaded  → request_imagery
//!                                               ├─ Received  → create_texture
//!                                               └─ TextureLoaded → reproject_texture
//! ```
//!
//! All methods must be called from the single frame-driver thread.

mod collection;
mod options;
mod skeleton;

pub use collection::ImageryLayerCollection;
pub use options::{
    ImageryLayerOptions, RenderParameters, RequestConfig, Tolerances, DEFAULT_EDGE_SNAP_DIVISOR,
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_REPROJECTION_PRECISION, DEFAULT_UV_EPSILON,
};
pub use skeleton::{
    level_with_maximum_texel_spacing, match_imagery, select_imagery_level, ImageryMatch,
    MatchedImagery,
};

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{ImageryError, Result};
use crate::geometry::{Rectangle, TexCoordRect, TextureTransform};
use crate::imagery::{
    CacheStats, Imagery, ImageryCache, ImageryHandle, ImageryState, LayerId, TileImagery,
};
use crate::pipeline::{
    Completion, ErrorReporter, FetchOutcome, PipelineStats, RequestPipeline, RetryDecision,
    RetryPolicyErrorReporter, TileProviderError,
};
use crate::provider::ImageryProvider;
use crate::reprojection::{
    ReprojectionCommand, ReprojectionOutcome, ReprojectionScheduler,
};
use crate::terrain::{TerrainProvider, TerrainTile};
use crate::texture::{Reprojector, TextureSampling, TextureUploader};

use options::validate_sampling;

/// Snapshot of a layer's counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerStats {
    pub cache: CacheStats,
    pub pipeline: PipelineStats,
    pub in_flight: usize,
    pub pending_reprojections: usize,
}

/// One imagery layer of the globe.
pub struct ImageryLayer {
    id: LayerId,
    provider: Arc<dyn ImageryProvider>,
    textures: Arc<dyn TextureUploader>,
    options: ImageryLayerOptions,
    is_base_layer: bool,
    cache: ImageryCache,
    pipeline: RequestPipeline,
    reprojection: ReprojectionScheduler,
    error_reporter: Box<dyn ErrorReporter>,
    placeholder: ImageryHandle,
}

impl ImageryLayer {
    /// Create a layer that spawns its requests on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ImageryError::NoRuntime`] outside a runtime, or
    /// [`ImageryError::Configuration`] for invalid options.
    pub fn new(
        provider: Arc<dyn ImageryProvider>,
        textures: Arc<dyn TextureUploader>,
        options: ImageryLayerOptions,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| ImageryError::NoRuntime)?;
        Self::with_runtime(provider, textures, options, runtime)
    }

    /// Create a layer that spawns its requests on `runtime`.
    pub fn with_runtime(
        provider: Arc<dyn ImageryProvider>,
        textures: Arc<dyn TextureUploader>,
        options: ImageryLayerOptions,
        runtime: Handle,
    ) -> Result<Self> {
        options.validate()?;

        let id = LayerId::next();
        let mut cache = ImageryCache::new(id);
        let placeholder = cache.insert_placeholder();
        let pipeline = RequestPipeline::new(runtime, options.request.max_in_flight);
        let error_reporter = Box::new(RetryPolicyErrorReporter::new(
            options.request.retry_policy.clone(),
        ));

        info!(
            layer = %id,
            provider = provider.name(),
            minimum_level = provider.minimum_level(),
            maximum_level = provider.maximum_level(),
            "Imagery layer created"
        );

        Ok(Self {
            id,
            provider,
            textures,
            options,
            is_base_layer: false,
            cache,
            pipeline,
            reprojection: ReprojectionScheduler::new(),
            error_reporter,
            placeholder,
        })
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn provider(&self) -> &dyn ImageryProvider {
        self.provider.as_ref()
    }

    pub fn options(&self) -> &ImageryLayerOptions {
        &self.options
    }

    pub fn is_base_layer(&self) -> bool {
        self.is_base_layer
    }

    /// Set by [`ImageryLayerCollection`] for the layer at index 0.
    pub fn set_base_layer(&mut self, is_base_layer: bool) {
        self.is_base_layer = is_base_layer;
    }

    /// Whether the provider is ready and real skeletons can be created.
    pub fn is_ready(&self) -> bool {
        self.provider.is_ready()
    }

    pub fn show(&self) -> bool {
        self.options.render.show
    }

    pub fn set_show(&mut self, show: bool) {
        self.options.render.show = show;
    }

    pub fn render_parameters(&self) -> &RenderParameters {
        &self.options.render
    }

    pub fn set_render_parameters(&mut self, render: RenderParameters) {
        self.options.render = render;
    }

    pub fn sampling(&self) -> &TextureSampling {
        &self.options.sampling
    }

    /// Change the sampler for textures created from now on.
    ///
    /// # Errors
    ///
    /// [`ImageryError::Configuration`] for a mipmapped minification filter.
    pub fn set_sampling(&mut self, sampling: TextureSampling) -> Result<()> {
        validate_sampling(&sampling)?;
        self.options.sampling = sampling;
        Ok(())
    }

    pub fn set_error_reporter(&mut self, reporter: Box<dyn ErrorReporter>) {
        self.error_reporter = reporter;
    }

    pub fn imagery(&self, handle: ImageryHandle) -> Option<&Imagery> {
        self.cache.get(handle)
    }

    pub fn cache(&self) -> &ImageryCache {
        &self.cache
    }

    pub fn stats(&self) -> LayerStats {
        LayerStats {
            cache: self.cache.stats(),
            pipeline: self.pipeline.stats(),
            in_flight: self.pipeline.in_flight(),
            pending_reprojections: self.reprojection.pending(),
        }
    }

    // =========================================================================
    // Skeletons
    // =========================================================================

    /// Match a terrain tile against this layer without touching the cache.
    pub fn match_tile(
        &self,
        tile_rectangle: &Rectangle,
        tile_level: u32,
        terrain: &dyn TerrainProvider,
    ) -> Option<ImageryMatch> {
        match_imagery(
            self.provider.as_ref(),
            &self.options.rectangle,
            self.is_base_layer,
            tile_rectangle,
            terrain.level_maximum_geometric_error(tile_level),
            &self.options.tolerances,
        )
    }

    /// Bind the imagery tiles overlapping `tile` into its imagery list.
    ///
    /// Bindings are inserted at `insertion_point` (the end of the list when
    /// `None`), in west-to-east, north-to-south order. Returns whether this
    /// layer contributes to the tile. While the provider is not ready a
    /// single placeholder binding is inserted instead.
    pub fn create_skeletons(
        &mut self,
        tile: &mut TerrainTile,
        terrain: &dyn TerrainProvider,
        insertion_point: Option<usize>,
    ) -> bool {
        if self
            .options
            .minimum_terrain_level
            .is_some_and(|minimum| tile.level < minimum)
            || self
                .options
                .maximum_terrain_level
                .is_some_and(|maximum| tile.level > maximum)
        {
            return false;
        }

        let mut insertion_point = insertion_point
            .unwrap_or(tile.imagery.len())
            .min(tile.imagery.len());

        if !self.is_ready() {
            self.cache.add_reference(self.placeholder);
            tile.imagery.insert(
                insertion_point,
                TileImagery::new(self.placeholder, TexCoordRect::UNIT, false),
            );
            return true;
        }

        let Some(matched) = self.match_tile(&tile.rectangle, tile.level, terrain) else {
            return false;
        };

        debug!(
            layer = %self.id,
            x = tile.x,
            y = tile.y,
            level = tile.level,
            imagery_level = matched.level,
            count = matched.tiles.len(),
            "Created imagery skeletons"
        );

        for entry in matched.tiles {
            let handle = self.get_imagery_from_cache(entry.x, entry.y, matched.level);
            tile.imagery.insert(
                insertion_point,
                TileImagery::new(handle, entry.tex_coords, matched.use_web_mercator_t),
            );
            insertion_point += 1;
        }
        true
    }

    /// Affine transform from the terrain tile's unit square into the texture
    /// space of the binding's ready imagery.
    ///
    /// Returns `None` when the binding has no ready imagery.
    pub fn calculate_texture_translation_and_scale(
        &self,
        tile_rectangle: &Rectangle,
        tile_imagery: &TileImagery,
    ) -> Option<TextureTransform> {
        let imagery = self.cache.get(tile_imagery.ready_imagery()?)?;
        let mut imagery_rectangle = imagery.rectangle();
        let mut terrain_rectangle = *tile_rectangle;

        if tile_imagery.use_web_mercator_t() {
            let scheme = self.provider.tiling_scheme();
            imagery_rectangle = scheme.rectangle_to_native_rectangle(&imagery_rectangle);
            terrain_rectangle = scheme.rectangle_to_native_rectangle(&terrain_rectangle);
        }

        let terrain_width = terrain_rectangle.width();
        let terrain_height = terrain_rectangle.height();
        let scale_x = terrain_width / imagery_rectangle.width();
        let scale_y = terrain_height / imagery_rectangle.height();

        Some(TextureTransform {
            translate_x: scale_x * (terrain_rectangle.west - imagery_rectangle.west)
                / terrain_width,
            translate_y: scale_y * (terrain_rectangle.south - imagery_rectangle.south)
                / terrain_height,
            scale_x,
            scale_y,
        })
    }

    // =========================================================================
    // References
    // =========================================================================

    /// Imagery for a tile of this layer's provider, with one reference added
    /// for the caller.
    pub fn get_imagery_from_cache(&mut self, x: u32, y: u32, level: u32) -> ImageryHandle {
        self.cache.get_or_create(
            x,
            y,
            level,
            self.provider.tiling_scheme(),
            self.provider.minimum_level(),
        )
    }

    pub fn add_imagery_reference(&mut self, handle: ImageryHandle) -> u32 {
        self.cache.add_reference(handle)
    }

    /// Release one reference. Imagery reaching zero is evicted immediately:
    /// its request is cancelled and its textures destroyed.
    pub fn release_imagery(&mut self, handle: ImageryHandle) -> u32 {
        let remaining = self.cache.release_reference(handle);
        self.destroy_evicted();
        remaining
    }

    fn destroy_evicted(&mut self) {
        for (handle, mut imagery) in self.cache.take_evicted() {
            self.pipeline.forget(handle);
            for texture in imagery.take_textures() {
                self.textures.destroy(texture);
            }
        }
    }

    // =========================================================================
    // Imagery state machine
    // =========================================================================

    /// Advance one imagery by one step.
    ///
    /// `need_geographic` asks for a geographic texture (reprojecting Web
    /// Mercator imagery when needed); `skip_loading` suppresses new
    /// requests.
    pub fn process_imagery(
        &mut self,
        handle: ImageryHandle,
        need_geographic: bool,
        skip_loading: bool,
    ) -> Result<()> {
        let Some(state) = self.cache.get(handle).map(Imagery::state) else {
            return Ok(());
        };

        if state == ImageryState::Unloaded && !skip_loading {
            self.request_imagery(handle);
        }

        if self.state_of(handle) == Some(ImageryState::Received) {
            self.create_texture(handle)?;
        }

        let Some(imagery) = self.cache.get(handle) else {
            return Ok(());
        };
        let needs_reprojection = imagery.state() == ImageryState::TextureLoaded
            || (imagery.state() == ImageryState::Ready
                && need_geographic
                && imagery.texture().is_none());
        if needs_reprojection && !self.reprojection.is_pending(handle) {
            self.reproject_texture(handle, need_geographic);
        }
        Ok(())
    }

    fn state_of(&self, handle: ImageryHandle) -> Option<ImageryState> {
        self.cache.get(handle).map(Imagery::state)
    }

    /// Start fetching an `Unloaded` imagery.
    ///
    /// The imagery moves to `Transitioning`, or stays `Unloaded` when the
    /// request is throttled. Imagery in any other state, including one
    /// already being fetched, is left alone. Returns whether a fetch was
    /// issued.
    pub fn request_imagery(&mut self, handle: ImageryHandle) -> bool {
        self.issue_request(handle, None)
    }

    /// Issue a fetch. Without `delay` the imagery must be `Unloaded`; with
    /// one it is a retry of a `Transitioning` imagery whose fetch failed.
    fn issue_request(&mut self, handle: ImageryHandle, delay: Option<Duration>) -> bool {
        let Some(imagery) = self.cache.get_mut(handle) else {
            return false;
        };
        let ready_to_issue = match (imagery.state(), delay) {
            (ImageryState::Unloaded, None) => imagery.transition(ImageryState::Transitioning),
            (ImageryState::Transitioning, Some(_)) => !self.pipeline.is_in_flight(handle),
            _ => false,
        };
        if !ready_to_issue {
            return false;
        }

        if !self.pipeline.has_capacity() {
            self.pipeline.record_throttled();
            imagery.transition(ImageryState::Unloaded);
            return false;
        }

        let key = imagery.key();
        match self.provider.request_image(key.x, key.y, key.level) {
            Some(fetch) => {
                imagery.credits = self.provider.tile_credits(key.x, key.y, key.level);
                self.pipeline.issue(handle, fetch, delay);
                true
            }
            None => {
                // Provider is throttling; try again on a later frame.
                self.pipeline.record_throttled();
                imagery.transition(ImageryState::Unloaded);
                false
            }
        }
    }

    /// Cancel an in-flight request, e.g. because the tile was deprioritised.
    /// The imagery returns to `Unloaded` when the cancellation is applied.
    pub fn cancel_request(&mut self, handle: ImageryHandle) -> bool {
        self.pipeline.cancel(handle)
    }

    /// Explicitly request a `Failed` or `Invalid` imagery again.
    ///
    /// Resets it to `Unloaded`; the next state machine step issues a new
    /// request. Returns false for any other state.
    pub fn retry_imagery(&mut self, handle: ImageryHandle) -> bool {
        match self.cache.get_mut(handle) {
            Some(imagery) => {
                let reset = imagery.reset();
                if reset {
                    self.pipeline.reset_retries(handle);
                }
                reset
            }
            None => false,
        }
    }

    /// Apply every completed request. Returns how many were applied.
    pub fn process_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Some(completion) = self.pipeline.try_next() {
            self.apply_completion(completion);
            applied += 1;
        }
        applied
    }

    /// Wait for the next completed request and apply it. Returns false when
    /// nothing is in flight.
    pub async fn next_completion(&mut self) -> bool {
        match self.pipeline.next().await {
            Some(completion) => {
                self.apply_completion(completion);
                true
            }
            None => false,
        }
    }

    fn apply_completion(&mut self, completion: Completion) {
        let Completion { handle, outcome, .. } = completion;
        let Some(imagery) = self.cache.get_mut(handle) else {
            debug!(layer = %self.id, "Dropping completion for evicted imagery");
            return;
        };

        let error = match outcome {
            FetchOutcome::Cancelled => {
                imagery.transition(ImageryState::Unloaded);
                return;
            }
            FetchOutcome::Image(image) => {
                if imagery.transition(ImageryState::Received) {
                    imagery.image = Some(image);
                }
                self.pipeline.reset_retries(handle);
                self.error_reporter.report_success();
                return;
            }
            FetchOutcome::Failed(error) => error,
        };

        let key = imagery.key();
        let report = TileProviderError {
            provider: self.provider.name().to_string(),
            x: key.x,
            y: key.y,
            level: key.level,
            kind: error.kind(),
            message: error.to_string(),
            times_retried: self.pipeline.retries(handle),
        };

        match self.error_reporter.report(&report) {
            RetryDecision::Retry { delay } => {
                if self.issue_request(handle, Some(delay)) {
                    self.pipeline.record_retry(handle);
                } else {
                    // Throttled back to Unloaded; the next request starts afresh.
                    self.pipeline.reset_retries(handle);
                }
            }
            RetryDecision::GiveUp => {
                warn!(
                    layer = %self.id,
                    x = key.x,
                    y = key.y,
                    level = key.level,
                    kind = %report.kind,
                    error = %error,
                    "Imagery request failed"
                );
                imagery_transition(&mut self.cache, handle, ImageryState::Failed);
                self.pipeline.reset_retries(handle);
            }
        }
    }

    /// Turn a `Received` image into a texture.
    ///
    /// The imagery stays `Received` while the discard policy is not ready,
    /// becomes `Invalid` when the policy discards it, `Failed` when the
    /// upload fails, and `TextureLoaded` otherwise.
    ///
    /// # Errors
    ///
    /// [`ImageryError::Configuration`] if the layer's sampler is invalid.
    pub fn create_texture(&mut self, handle: ImageryHandle) -> Result<()> {
        validate_sampling(&self.options.sampling)?;

        let Some(imagery) = self.cache.get_mut(handle) else {
            return Ok(());
        };
        if imagery.state() != ImageryState::Received {
            return Ok(());
        }
        let Some(image) = imagery.image.take() else {
            imagery.transition(ImageryState::Failed);
            return Ok(());
        };

        if let Some(policy) = self.provider.discard_policy() {
            if !policy.is_ready() {
                imagery.image = Some(image);
                return Ok(());
            }
            if policy.should_discard(&image) {
                imagery.transition(ImageryState::Invalid);
                return Ok(());
            }
        }

        let key = imagery.key();
        match self.textures.upload(&image, &self.options.sampling) {
            Ok(texture) => {
                if self.provider.tiling_scheme().projection_is_geographic() {
                    imagery.texture = Some(texture);
                } else {
                    imagery.texture_web_mercator = Some(texture);
                }
                imagery.transition(ImageryState::TextureLoaded);
            }
            Err(error) => {
                warn!(
                    layer = %self.id,
                    x = key.x,
                    y = key.y,
                    level = key.level,
                    error = %error,
                    "Texture upload failed"
                );
                imagery.transition(ImageryState::Failed);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Reprojection
    // =========================================================================

    /// Make a loaded imagery usable, queueing a reprojection when a
    /// geographic texture is needed from Web Mercator imagery.
    ///
    /// Without reprojection the imagery becomes `Ready` immediately. With
    /// one, it keeps its state until the command completes, and the command
    /// holds its own reference.
    pub fn reproject_texture(&mut self, handle: ImageryHandle, need_geographic: bool) {
        let precision = self.options.tolerances.reprojection_precision;
        let geographic = self.provider.tiling_scheme().projection_is_geographic();

        let Some(imagery) = self.cache.get_mut(handle) else {
            return;
        };
        let Some(texture) = imagery.texture_web_mercator.or(imagery.texture) else {
            return;
        };
        let rectangle = imagery.rectangle();

        if need_geographic
            && !geographic
            && rectangle.width() / f64::from(texture.width().max(1)) > precision
        {
            let command = ReprojectionCommand::new(handle, texture, rectangle);
            if self.reprojection.enqueue(command) {
                imagery.increment();
                debug!(
                    layer = %self.id,
                    x = imagery.key().x,
                    y = imagery.key().y,
                    level = imagery.key().level,
                    "Queued reprojection"
                );
            }
            return;
        }

        if need_geographic && imagery.texture.is_none() {
            imagery.texture = Some(texture);
        }
        if imagery.state() == ImageryState::TextureLoaded {
            imagery.transition(ImageryState::Ready);
        }
    }

    /// Hand queued reprojection commands to the host for the next frame.
    pub fn queue_reprojection_commands(&mut self) -> Vec<ReprojectionCommand> {
        self.reprojection.take_queued()
    }

    /// Apply the outcome of a reprojection command.
    ///
    /// `Completed` installs the geographic texture and makes the imagery
    /// `Ready`; `Cancelled` leaves it as it was so it is queued again later.
    /// Either way the command's reference is released. If that reference was
    /// the last one the imagery is simply evicted.
    pub fn complete_reprojection(
        &mut self,
        command: &ReprojectionCommand,
        outcome: ReprojectionOutcome,
    ) {
        let handle = command.handle();
        if !self.reprojection.finish(handle) {
            warn!(layer = %self.id, "Reprojection completed for unknown command");
            if let ReprojectionOutcome::Completed(texture) = outcome {
                self.textures.destroy(texture);
            }
            return;
        }

        match self.cache.get_mut(handle) {
            Some(imagery) if imagery.reference_count() > 1 => {
                if let ReprojectionOutcome::Completed(texture) = outcome {
                    if let Some(previous) = imagery.texture.replace(texture) {
                        if Some(previous) != imagery.texture_web_mercator {
                            self.textures.destroy(previous);
                        }
                    }
                    if imagery.state() == ImageryState::TextureLoaded {
                        imagery.transition(ImageryState::Ready);
                    }
                }
            }
            _ => {
                // Every other holder is gone.
                if let ReprojectionOutcome::Completed(texture) = outcome {
                    self.textures.destroy(texture);
                }
            }
        }
        self.release_imagery(handle);
    }

    /// Cancel every command not yet handed to the host.
    pub fn cancel_reprojections(&mut self) {
        for command in self.reprojection.take_queued() {
            self.complete_reprojection(&command, ReprojectionOutcome::Cancelled);
        }
    }

    /// Run queued reprojections with `reprojector` and apply the results.
    pub fn execute_reprojections(&mut self, reprojector: &dyn Reprojector) -> usize {
        let commands = self.queue_reprojection_commands();
        for command in &commands {
            let outcome = reprojector.reproject(command);
            self.complete_reprojection(command, outcome);
        }
        commands.len()
    }
}

fn imagery_transition(cache: &mut ImageryCache, handle: ImageryHandle, next: ImageryState) {
    if let Some(imagery) = cache.get_mut(handle) {
        imagery.transition(next);
    }
}

impl Drop for ImageryLayer {
    fn drop(&mut self) {
        self.pipeline.cancel_all();
        for (_, mut imagery) in self.cache.drain() {
            for texture in imagery.take_textures() {
                self.textures.destroy(texture);
            }
        }
        debug!(layer = %self.id, "Imagery layer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RetryPolicy;
    use crate::provider::{DecodedImage, DiscardMissingTileImagePolicy, SolidColorImageryProvider};
    use crate::terrain::EllipsoidTerrainProvider;
    use crate::texture::{InMemoryTextures, TextureMinificationFilter};
    use crate::tiling::{GeographicTilingScheme, WebMercatorTilingScheme};

    const COLOR: [u8; 4] = [30, 90, 160, 255];

    fn geographic_provider() -> Arc<SolidColorImageryProvider> {
        Arc::new(SolidColorImageryProvider::new(
            Box::new(GeographicTilingScheme::new()),
            COLOR,
        ))
    }

    fn layer_with(
        provider: Arc<SolidColorImageryProvider>,
        textures: Arc<InMemoryTextures>,
        options: ImageryLayerOptions,
    ) -> ImageryLayer {
        let mut layer = ImageryLayer::new(provider, textures, options).unwrap();
        layer.set_base_layer(true);
        layer
    }

    fn no_retry() -> ImageryLayerOptions {
        ImageryLayerOptions::default().with_request(RequestConfig {
            retry_policy: RetryPolicy::None,
            ..RequestConfig::default()
        })
    }

    fn state(layer: &ImageryLayer, handle: ImageryHandle) -> ImageryState {
        layer.imagery(handle).unwrap().state()
    }

    /// Drive one binding until it reports done.
    async fn load(layer: &mut ImageryLayer, tile: &mut TerrainTile) {
        let rectangle = tile.rectangle;
        for _ in 0..10 {
            if tile.imagery[0]
                .process_state_machine(&rectangle, layer, false)
                .unwrap()
            {
                return;
            }
            layer.next_completion().await;
        }
        panic!("binding never finished loading");
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn test_new_requires_runtime() {
        let result = ImageryLayer::new(
            geographic_provider(),
            Arc::new(InMemoryTextures::new()),
            ImageryLayerOptions::default(),
        );
        assert!(matches!(result, Err(ImageryError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let options = ImageryLayerOptions::default().with_terrain_levels(Some(5), Some(2));
        let result = ImageryLayer::new(
            geographic_provider(),
            Arc::new(InMemoryTextures::new()),
            options,
        );
        assert!(matches!(result, Err(ImageryError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_mipmapped_sampler_rejected() {
        let mut layer = layer_with(
            geographic_provider(),
            Arc::new(InMemoryTextures::new()),
            ImageryLayerOptions::default(),
        );
        let sampling = TextureSampling {
            minification_filter: TextureMinificationFilter::LinearMipmapLinear,
            ..TextureSampling::default()
        };

        assert!(layer.set_sampling(sampling).is_err());
        assert_eq!(
            layer.sampling().minification_filter,
            TextureMinificationFilter::Linear
        );
    }

    // =========================================================================
    // Skeletons
    // =========================================================================

    #[tokio::test]
    async fn test_skeleton_for_matching_tile() {
        let terrain = EllipsoidTerrainProvider::new();
        let mut layer = layer_with(
            geographic_provider(),
            Arc::new(InMemoryTextures::new()),
            ImageryLayerOptions::default(),
        );
        let mut tile = TerrainTile::from_provider(&terrain, 1, 0, 2);

        assert!(layer.create_skeletons(&mut tile, &terrain, None));
        assert_eq!(tile.imagery.len(), 1);

        let binding = &tile.imagery[0];
        assert!(binding
            .texture_coordinate_rectangle()
            .equals_epsilon(&TexCoordRect::UNIT, 1e-12));
        let handle = binding.loading_imagery().unwrap();
        assert_eq!(layer.imagery(handle).unwrap().key().level, 2);
        // Levels 2, 1 and 0.
        assert_eq!(layer.cache().len(), 3);
    }

    #[tokio::test]
    async fn test_terrain_level_range() {
        let terrain = EllipsoidTerrainProvider::new();
        let options = ImageryLayerOptions::default().with_terrain_levels(Some(2), Some(4));
        let mut layer = layer_with(
            geographic_provider(),
            Arc::new(InMemoryTextures::new()),
            options,
        );

        let mut shallow = TerrainTile::from_provider(&terrain, 0, 0, 1);
        let mut deep = TerrainTile::from_provider(&terrain, 0, 0, 5);
        assert!(!layer.create_skeletons(&mut shallow, &terrain, None));
        assert!(!layer.create_skeletons(&mut deep, &terrain, None));
        assert!(shallow.imagery.is_empty());
        assert!(deep.imagery.is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_while_provider_not_ready() {
        let terrain = EllipsoidTerrainProvider::new();
        let provider = geographic_provider();
        provider.set_ready(false);
        let mut layer = layer_with(
            provider,
            Arc::new(InMemoryTextures::new()),
            ImageryLayerOptions::default(),
        );
        let mut tile = TerrainTile::from_provider(&terrain, 0, 0, 0);

        assert!(layer.create_skeletons(&mut tile, &terrain, None));
        assert_eq!(tile.imagery.len(), 1);
        assert!(tile.imagery[0].is_placeholder(&layer));

        // A placeholder never finishes and never requests.
        let rectangle = tile.rectangle;
        assert!(!tile.imagery[0]
            .process_state_machine(&rectangle, &mut layer, false)
            .unwrap());
        assert_eq!(layer.stats().pipeline.issued, 0);
    }

    // =========================================================================
    // Loading
    // =========================================================================

    #[tokio::test]
    async fn test_loads_to_ready() {
        let terrain = EllipsoidTerrainProvider::new();
        let textures = Arc::new(InMemoryTextures::new());
        let mut layer = layer_with(
            geographic_provider(),
            textures.clone(),
            ImageryLayerOptions::default(),
        );
        let mut tile = TerrainTile::from_provider(&terrain, 0, 0, 0);
        layer.create_skeletons(&mut tile, &terrain, None);
        let handle = tile.imagery[0].loading_imagery().unwrap();

        let rectangle = tile.rectangle;
        assert!(!tile.imagery[0]
            .process_state_machine(&rectangle, &mut layer, false)
            .unwrap());
        assert_eq!(state(&layer, handle), ImageryState::Transitioning);

        load(&mut layer, &mut tile).await;

        let binding = &tile.imagery[0];
        assert_eq!(binding.ready_imagery(), Some(handle));
        assert!(binding.loading_imagery().is_none());
        assert_eq!(state(&layer, handle), ImageryState::Ready);
        assert!(layer.imagery(handle).unwrap().texture().is_some());
        assert_eq!(textures.live_count(), 1);

        let transform = binding.texture_transform().unwrap();
        assert!(transform.translate_x.abs() < 1e-12);
        assert!(transform.translate_y.abs() < 1e-12);
        assert!((transform.scale_x - 1.0).abs() < 1e-12);
        assert!((transform.scale_y - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_skip_loading_issues_no_request() {
        let terrain = EllipsoidTerrainProvider::new();
        let mut layer = layer_with(
            geographic_provider(),
            Arc::new(InMemoryTextures::new()),
            ImageryLayerOptions::default(),
        );
        let mut tile = TerrainTile::from_provider(&terrain, 0, 0, 0);
        layer.create_skeletons(&mut tile, &terrain, None);
        let handle = tile.imagery[0].loading_imagery().unwrap();

        let rectangle = tile.rectangle;
        tile.imagery[0]
            .process_state_machine(&rectangle, &mut layer, true)
            .unwrap();
        assert_eq!(state(&layer, handle), ImageryState::Unloaded);
        assert_eq!(layer.stats().pipeline.issued, 0);
    }

    #[tokio::test]
    async fn test_uses_ready_ancestor_while_loading() {
        let terrain = EllipsoidTerrainProvider::new();
        let provider = geographic_provider();
        let mut layer = layer_with(
            provider.clone(),
            Arc::new(InMemoryTextures::new()),
            ImageryLayerOptions::default(),
        );

        let mut root = TerrainTile::from_provider(&terrain, 0, 0, 0);
        layer.create_skeletons(&mut root, &terrain, None);
        load(&mut layer, &mut root).await;
        let root_imagery = root.imagery[0].ready_imagery().unwrap();

        provider.set_throttled(true);
        let mut child = TerrainTile::from_provider(&terrain, 0, 0, 1);
        layer.create_skeletons(&mut child, &terrain, None);
        let rectangle = child.rectangle;
        let done = child.imagery[0]
            .process_state_machine(&rectangle, &mut layer, false)
            .unwrap();

        assert!(!done);
        let binding = &child.imagery[0];
        assert_eq!(
            state(&layer, binding.loading_imagery().unwrap()),
            ImageryState::Unloaded
        );
        assert_eq!(binding.ready_imagery(), Some(root_imagery));

        // The child covers the north-west quarter of the root tile.
        let transform = binding.texture_transform().unwrap();
        assert!((transform.scale_x - 0.5).abs() < 1e-12);
        assert!((transform.scale_y - 0.5).abs() < 1e-12);
        assert!(transform.translate_x.abs() < 1e-12);
        assert!((transform.translate_y - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_throttled_request_returns_to_unloaded() {
        let provider = geographic_provider();
        provider.set_throttled(true);
        let mut layer = layer_with(
            provider.clone(),
            Arc::new(InMemoryTextures::new()),
            ImageryLayerOptions::default(),
        );
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        layer.process_imagery(handle, true, false).unwrap();
        assert_eq!(state(&layer, handle), ImageryState::Unloaded);
        assert_eq!(layer.stats().pipeline.throttled, 1);

        provider.set_throttled(false);
        layer.process_imagery(handle, true, false).unwrap();
        assert_eq!(state(&layer, handle), ImageryState::Transitioning);
    }

    #[tokio::test]
    async fn test_request_while_in_flight_is_ignored() {
        let provider = geographic_provider();
        let mut layer = layer_with(
            provider.clone(),
            Arc::new(InMemoryTextures::new()),
            ImageryLayerOptions::default(),
        );
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        assert!(layer.request_imagery(handle));
        assert!(!layer.request_imagery(handle));
        assert_eq!(state(&layer, handle), ImageryState::Transitioning);

        assert!(layer.next_completion().await);
        assert_eq!(state(&layer, handle), ImageryState::Received);
        assert_eq!(provider.request_count(), 1);

        let stats = layer.stats().pipeline;
        assert_eq!(stats.issued, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_in_flight_cap_throttles() {
        let options = ImageryLayerOptions::default().with_request(RequestConfig {
            max_in_flight: 1,
            ..RequestConfig::default()
        });
        let mut layer = layer_with(
            geographic_provider(),
            Arc::new(InMemoryTextures::new()),
            options,
        );
        let first = layer.get_imagery_from_cache(0, 0, 0);
        let second = layer.get_imagery_from_cache(1, 0, 0);

        layer.process_imagery(first, true, false).unwrap();
        layer.process_imagery(second, true, false).unwrap();

        assert_eq!(state(&layer, first), ImageryState::Transitioning);
        assert_eq!(state(&layer, second), ImageryState::Unloaded);
    }

    #[tokio::test]
    async fn test_cancelled_request_returns_to_unloaded() {
        let provider = Arc::new(
            SolidColorImageryProvider::new(Box::new(GeographicTilingScheme::new()), COLOR)
                .with_latency(Duration::from_secs(60)),
        );
        let mut layer = layer_with(
            provider,
            Arc::new(InMemoryTextures::new()),
            ImageryLayerOptions::default(),
        );
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        layer.process_imagery(handle, true, false).unwrap();
        assert!(layer.cancel_request(handle));
        assert!(layer.next_completion().await);
        assert_eq!(state(&layer, handle), ImageryState::Unloaded);
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[tokio::test]
    async fn test_failure_without_retry_is_terminal() {
        let provider = geographic_provider();
        provider.fail_next(1);
        let mut layer = layer_with(provider, Arc::new(InMemoryTextures::new()), no_retry());
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        layer.process_imagery(handle, true, false).unwrap();
        layer.next_completion().await;
        assert_eq!(state(&layer, handle), ImageryState::Failed);

        // Terminal until explicitly retried.
        layer.process_imagery(handle, true, false).unwrap();
        assert_eq!(state(&layer, handle), ImageryState::Failed);

        assert!(layer.retry_imagery(handle));
        layer.process_imagery(handle, true, false).unwrap();
        layer.next_completion().await;
        layer.process_imagery(handle, true, false).unwrap();
        assert_eq!(state(&layer, handle), ImageryState::Ready);
    }

    #[tokio::test]
    async fn test_retry_keeps_transitioning() {
        let provider = geographic_provider();
        provider.fail_next(1);
        let options = ImageryLayerOptions::default().with_request(RequestConfig {
            retry_policy: RetryPolicy::fixed(3, Duration::from_millis(1)),
            ..RequestConfig::default()
        });
        let mut layer = layer_with(provider.clone(), Arc::new(InMemoryTextures::new()), options);
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        layer.process_imagery(handle, true, false).unwrap();
        layer.next_completion().await;
        assert_eq!(state(&layer, handle), ImageryState::Transitioning);
        assert_eq!(layer.stats().pipeline.retried, 1);

        layer.next_completion().await;
        assert_eq!(state(&layer, handle), ImageryState::Received);
        assert_eq!(provider.request_count(), 2);
    }

    #[tokio::test]
    async fn test_throttled_retry_starts_afresh() {
        let provider = geographic_provider();
        provider.fail_next(1);
        let options = ImageryLayerOptions::default().with_request(RequestConfig {
            retry_policy: RetryPolicy::fixed(2, Duration::from_millis(1)),
            ..RequestConfig::default()
        });
        let mut layer = layer_with(provider.clone(), Arc::new(InMemoryTextures::new()), options);
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        layer.process_imagery(handle, true, false).unwrap();
        provider.set_throttled(true);
        layer.next_completion().await;

        assert_eq!(state(&layer, handle), ImageryState::Unloaded);
        assert_eq!(layer.pipeline.retries(handle), 0);
        assert_eq!(layer.stats().pipeline.retried, 0);

        // The next failure gets the full retry budget again.
        provider.set_throttled(false);
        provider.fail_next(1);
        layer.process_imagery(handle, true, false).unwrap();
        layer.next_completion().await;
        assert_eq!(state(&layer, handle), ImageryState::Transitioning);
        assert_eq!(layer.stats().pipeline.retried, 1);

        layer.next_completion().await;
        assert_eq!(state(&layer, handle), ImageryState::Received);
    }

    #[tokio::test]
    async fn test_failed_tile_with_no_loading_ancestor_is_done() {
        let terrain = EllipsoidTerrainProvider::new();
        let provider = geographic_provider();
        provider.fail_next(1);
        let mut layer = layer_with(provider, Arc::new(InMemoryTextures::new()), no_retry());
        let mut tile = TerrainTile::from_provider(&terrain, 0, 0, 0);
        layer.create_skeletons(&mut tile, &terrain, None);

        load(&mut layer, &mut tile).await;
        assert!(tile.imagery[0].ready_imagery().is_none());
    }

    #[tokio::test]
    async fn test_discarded_image_is_invalid() {
        let policy = DiscardMissingTileImagePolicy::new(vec![(0, 0), (10, 10)]);
        policy.set_missing_image(&DecodedImage::solid(16, 16, COLOR));
        let provider = Arc::new(
            SolidColorImageryProvider::new(Box::new(GeographicTilingScheme::new()), COLOR)
                .with_discard_policy(Box::new(policy)),
        );
        let textures = Arc::new(InMemoryTextures::new());
        let mut layer = layer_with(provider, textures.clone(), ImageryLayerOptions::default());
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        layer.process_imagery(handle, true, false).unwrap();
        layer.next_completion().await;
        layer.process_imagery(handle, true, false).unwrap();

        assert_eq!(state(&layer, handle), ImageryState::Invalid);
        assert_eq!(textures.live_count(), 0);
    }

    #[tokio::test]
    async fn test_discard_policy_not_ready_defers_texture() {
        let policy = DiscardMissingTileImagePolicy::new(vec![(0, 0)]);
        let provider = Arc::new(
            SolidColorImageryProvider::new(Box::new(GeographicTilingScheme::new()), COLOR)
                .with_discard_policy(Box::new(policy)),
        );
        let mut layer = layer_with(
            provider,
            Arc::new(InMemoryTextures::new()),
            ImageryLayerOptions::default(),
        );
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        layer.process_imagery(handle, true, false).unwrap();
        layer.next_completion().await;
        layer.process_imagery(handle, true, false).unwrap();

        assert_eq!(state(&layer, handle), ImageryState::Received);
        assert!(layer.imagery(handle).unwrap().image().is_some());
    }

    #[tokio::test]
    async fn test_upload_failure_fails_imagery() {
        let textures = Arc::new(InMemoryTextures::new());
        textures.set_fail_uploads(true);
        let mut layer = layer_with(geographic_provider(), textures, ImageryLayerOptions::default());
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        layer.process_imagery(handle, true, false).unwrap();
        layer.next_completion().await;
        layer.process_imagery(handle, true, false).unwrap();

        assert_eq!(state(&layer, handle), ImageryState::Failed);
    }

    // =========================================================================
    // Reprojection
    // =========================================================================

    fn web_mercator_layer(textures: Arc<InMemoryTextures>) -> ImageryLayer {
        let provider = Arc::new(SolidColorImageryProvider::new(
            Box::new(WebMercatorTilingScheme::new()),
            COLOR,
        ));
        layer_with(provider, textures, ImageryLayerOptions::default())
    }

    async fn load_to_texture(layer: &mut ImageryLayer, handle: ImageryHandle) {
        layer.process_imagery(handle, true, false).unwrap();
        layer.next_completion().await;
        layer.process_imagery(handle, true, false).unwrap();
    }

    #[tokio::test]
    async fn test_web_mercator_reprojection() {
        let textures = Arc::new(InMemoryTextures::new());
        let mut layer = web_mercator_layer(textures.clone());
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        load_to_texture(&mut layer, handle).await;
        assert_eq!(state(&layer, handle), ImageryState::TextureLoaded);
        assert_eq!(layer.stats().pending_reprojections, 1);
        // The pending command holds its own reference.
        assert_eq!(layer.imagery(handle).unwrap().reference_count(), 2);

        // Queued only once.
        layer.process_imagery(handle, true, false).unwrap();
        assert_eq!(layer.stats().pending_reprojections, 1);

        assert_eq!(layer.execute_reprojections(textures.as_ref()), 1);
        let imagery = layer.imagery(handle).unwrap();
        assert_eq!(imagery.state(), ImageryState::Ready);
        assert_eq!(imagery.reference_count(), 1);
        assert!(imagery.texture().is_some());
        assert_ne!(imagery.texture(), imagery.texture_web_mercator());
        assert_eq!(textures.live_count(), 2);

        layer.release_imagery(handle);
        assert_eq!(textures.live_count(), 0);
    }

    #[tokio::test]
    async fn test_web_mercator_without_geographic_need_is_ready() {
        let textures = Arc::new(InMemoryTextures::new());
        let mut layer = web_mercator_layer(textures);
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        layer.process_imagery(handle, false, false).unwrap();
        layer.next_completion().await;
        layer.process_imagery(handle, false, false).unwrap();

        let imagery = layer.imagery(handle).unwrap();
        assert_eq!(imagery.state(), ImageryState::Ready);
        assert!(imagery.texture().is_none());
        assert!(imagery.texture_web_mercator().is_some());
        assert_eq!(layer.stats().pending_reprojections, 0);
    }

    #[tokio::test]
    async fn test_cancelled_reprojection_is_queued_again() {
        let textures = Arc::new(InMemoryTextures::new());
        textures.set_cancel_reprojections(true);
        let mut layer = web_mercator_layer(textures.clone());
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        load_to_texture(&mut layer, handle).await;
        layer.execute_reprojections(textures.as_ref());

        assert_eq!(state(&layer, handle), ImageryState::TextureLoaded);
        assert_eq!(layer.stats().pending_reprojections, 0);
        assert_eq!(layer.imagery(handle).unwrap().reference_count(), 1);

        layer.process_imagery(handle, true, false).unwrap();
        assert_eq!(layer.stats().pending_reprojections, 1);
    }

    #[tokio::test]
    async fn test_orphaned_reprojection_releases_imagery() {
        let textures = Arc::new(InMemoryTextures::new());
        let mut layer = web_mercator_layer(textures.clone());
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        load_to_texture(&mut layer, handle).await;
        assert_eq!(layer.release_imagery(handle), 1);

        layer.execute_reprojections(textures.as_ref());
        assert!(layer.imagery(handle).is_none());
        assert!(layer.cache().is_empty());
        assert_eq!(textures.live_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_reprojections_releases_references() {
        let textures = Arc::new(InMemoryTextures::new());
        let mut layer = web_mercator_layer(textures.clone());
        let handle = layer.get_imagery_from_cache(0, 0, 0);

        load_to_texture(&mut layer, handle).await;
        layer.cancel_reprojections();

        assert_eq!(layer.stats().pending_reprojections, 0);
        assert_eq!(layer.imagery(handle).unwrap().reference_count(), 1);
        assert!(layer.queue_reprojection_commands().is_empty());
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    #[tokio::test]
    async fn test_free_resources_destroys_textures() {
        let terrain = EllipsoidTerrainProvider::new();
        let textures = Arc::new(InMemoryTextures::new());
        let mut layer = layer_with(
            geographic_provider(),
            textures.clone(),
            ImageryLayerOptions::default(),
        );
        let mut tile = TerrainTile::from_provider(&terrain, 1, 1, 1);
        layer.create_skeletons(&mut tile, &terrain, None);
        load(&mut layer, &mut tile).await;
        assert_eq!(textures.live_count(), 1);

        for mut binding in tile.imagery.drain(..) {
            binding.free_resources(&mut layer);
        }
        assert_eq!(textures.live_count(), 0);
        assert!(layer.cache().is_empty());
    }

    #[tokio::test]
    async fn test_drop_destroys_textures() {
        let textures = Arc::new(InMemoryTextures::new());
        let mut layer = layer_with(
            geographic_provider(),
            textures.clone(),
            ImageryLayerOptions::default(),
        );
        let handle = layer.get_imagery_from_cache(0, 0, 0);
        load_to_texture(&mut layer, handle).await;
        assert_eq!(textures.live_count(), 1);

        drop(layer);
        assert_eq!(textures.live_count(), 0);
    }
}
