//! GlobeLayer - imagery tiling and layer compositing for virtual globes
//!
//! Matches terrain tiles against the tile pyramids of one or more imagery
//! providers, fetches and caches the imagery asynchronously, turns it into
//! textures (reprojecting Web Mercator imagery when needed), and hands the
//! renderer per-tile texture transforms for blending the layers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use globelayer::{
//!     EllipsoidTerrainProvider, GeographicTilingScheme, ImageryLayer, ImageryLayerCollection,
//!     ImageryLayerOptions, InMemoryTextures, SolidColorImageryProvider, TerrainTile,
//! };
//!
//! # async fn run() -> globelayer::Result<()> {
//! let textures = Arc::new(InMemoryTextures::new());
//! let provider = Arc::new(SolidColorImageryProvider::new(
//!     Box::new(GeographicTilingScheme::new()),
//!     [0, 96, 160, 255],
//! ));
//!
//! let mut layers = ImageryLayerCollection::new();
//! layers.add(ImageryLayer::new(provider, textures.clone(), ImageryLayerOptions::default())?);
//!
//! let terrain = EllipsoidTerrainProvider::new();
//! let mut tile = TerrainTile::from_provider(&terrain, 0, 0, 1);
//! layers.create_skeletons(&mut tile, &terrain);
//!
//! while !layers.process_tile(&mut tile, &terrain, false)? {
//!     layers.update(textures.as_ref());
//!     tokio::task::yield_now().await;
//! }
//! layers.release_tile(&mut tile);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod geometry;
pub mod imagery;
pub mod layer;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod reprojection;
pub mod terrain;
pub mod texture;
pub mod tiling;

pub use error::{FailureKind, ImageryError, Result};
pub use geometry::{Cartographic, Ellipsoid, Rectangle, TexCoordRect, TextureTransform};
pub use imagery::{ImageryHandle, ImageryKey, ImageryState, LayerId, TileImagery};
pub use layer::{ImageryLayer, ImageryLayerCollection, ImageryLayerOptions, LayerStats};
pub use provider::{
    DecodedImage, ImageryProvider, ProviderError, SolidColorImageryProvider,
    UrlTemplateImageryProvider,
};
pub use reprojection::{ReprojectionCommand, ReprojectionOutcome};
pub use terrain::{EllipsoidTerrainProvider, TerrainProvider, TerrainTile};
pub use texture::{InMemoryTextures, Reprojector, TextureHandle, TextureUploader};
pub use tiling::{GeographicTilingScheme, TilingScheme, WebMercatorTilingScheme};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
