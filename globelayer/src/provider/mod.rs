//! Imagery providers.
//!
//! A provider knows its tiling scheme, level range and tile size, and turns
//! `(x, y, level)` requests into decoded images asynchronously.

pub mod discard;
mod http;
mod solid_color;
mod types;
mod url_template;

pub use discard::{DiscardMissingTileImagePolicy, DiscardPolicy, NeverDiscardPolicy};
pub use http::{AsyncHttpClient, AsyncReqwestClient};
pub use solid_color::SolidColorImageryProvider;
pub use types::{BoxFuture, Credit, DecodedImage, ImageFuture, ImageryProvider, ProviderError};
pub use url_template::UrlTemplateImageryProvider;
