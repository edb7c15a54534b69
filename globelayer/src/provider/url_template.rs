//! Imagery provider for `{z}/{x}/{y}` style tile servers.
//!
//! # URL Pattern
//!
//! The template may contain the placeholders:
//!
//! - `{x}`: tile column, west to east
//! - `{y}`: tile row, north to south
//! - `{reverseY}`: tile row, south to north (TMS)
//! - `{z}`: level
//!
//! For example `https://tile.openstreetmap.org/{z}/{x}/{y}.png`.

use super::discard::DiscardPolicy;
use super::http::AsyncHttpClient;
use super::types::{Credit, DecodedImage, ImageFuture, ImageryProvider, ProviderError};
use crate::geometry::Rectangle;
use crate::tiling::TilingScheme;

/// Default tile size in pixels.
const DEFAULT_TILE_SIZE: u32 = 256;

/// Default maximum level.
const DEFAULT_MAX_LEVEL: u32 = 18;

/// Provider that fetches tiles from a URL template.
///
/// # Example
///
/// ```ignore
/// use globelayer::provider::{AsyncReqwestClient, UrlTemplateImageryProvider};
/// use globelayer::tiling::WebMercatorTilingScheme;
///
/// let client = AsyncReqwestClient::new()?;
/// let provider = UrlTemplateImageryProvider::new(
///     "https://tile.openstreetmap.org/{z}/{x}/{y}.png",
///     Box::new(WebMercatorTilingScheme::new()),
///     client,
/// );
/// ```
pub struct UrlTemplateImageryProvider<C: AsyncHttpClient> {
    template: String,
    tiling_scheme: Box<dyn TilingScheme>,
    http_client: C,
    rectangle: Option<Rectangle>,
    minimum_level: u32,
    maximum_level: u32,
    tile_width: u32,
    tile_height: u32,
    discard_policy: Option<Box<dyn DiscardPolicy>>,
    credit: Option<Credit>,
}

impl<C: AsyncHttpClient> UrlTemplateImageryProvider<C> {
    pub fn new(
        template: impl Into<String>,
        tiling_scheme: Box<dyn TilingScheme>,
        http_client: C,
    ) -> Self {
        Self {
            template: template.into(),
            tiling_scheme,
            http_client,
            rectangle: None,
            minimum_level: 0,
            maximum_level: DEFAULT_MAX_LEVEL,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            discard_policy: None,
            credit: None,
        }
    }

    pub fn with_levels(mut self, minimum_level: u32, maximum_level: u32) -> Self {
        self.minimum_level = minimum_level;
        self.maximum_level = maximum_level.max(minimum_level);
        self
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    /// Restrict the provider to part of its tiling scheme.
    pub fn with_rectangle(mut self, rectangle: Rectangle) -> Self {
        self.rectangle = Some(rectangle);
        self
    }

    pub fn with_discard_policy(mut self, policy: Box<dyn DiscardPolicy>) -> Self {
        self.discard_policy = Some(policy);
        self
    }

    pub fn with_credit(mut self, credit: Credit) -> Self {
        self.credit = Some(credit);
        self
    }

    /// Builds the tile URL for the given coordinates.
    fn build_url(&self, x: u32, y: u32, level: u32) -> String {
        let rows = self.tiling_scheme.number_of_y_tiles_at_level(level);
        let reverse_y = rows.saturating_sub(1).saturating_sub(y);
        self.template
            .replace("{x}", &x.to_string())
            .replace("{reverseY}", &reverse_y.to_string())
            .replace("{y}", &y.to_string())
            .replace("{z}", &level.to_string())
    }
}

impl<C: AsyncHttpClient> ImageryProvider for UrlTemplateImageryProvider<C> {
    fn name(&self) -> &str {
        &self.template
    }

    fn minimum_level(&self) -> u32 {
        self.minimum_level
    }

    fn maximum_level(&self) -> u32 {
        self.maximum_level
    }

    fn tile_width(&self) -> u32 {
        self.tile_width
    }

    fn tile_height(&self) -> u32 {
        self.tile_height
    }

    fn rectangle(&self) -> Rectangle {
        self.rectangle.unwrap_or_else(|| self.tiling_scheme.rectangle())
    }

    fn tiling_scheme(&self) -> &dyn TilingScheme {
        self.tiling_scheme.as_ref()
    }

    fn request_image(&self, x: u32, y: u32, level: u32) -> Option<ImageFuture> {
        if level < self.minimum_level || level > self.maximum_level {
            return Some(Box::pin(async move {
                Err(ProviderError::UnsupportedLevel(level))
            }));
        }

        let fetch = self.http_client.get(&self.build_url(x, y, level));
        Some(Box::pin(async move {
            let bytes = fetch.await?;
            DecodedImage::decode(&bytes)
        }))
    }

    fn discard_policy(&self) -> Option<&dyn DiscardPolicy> {
        self.discard_policy.as_deref()
    }

    fn tile_credits(&self, _x: u32, _y: u32, _level: u32) -> Vec<Credit> {
        self.credit.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::http::tests::MockAsyncHttpClient;
    use crate::tiling::{GeographicTilingScheme, WebMercatorTilingScheme};

    fn png_bytes() -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([9, 8, 7, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn provider(
        template: &str,
        client: MockAsyncHttpClient,
    ) -> UrlTemplateImageryProvider<MockAsyncHttpClient> {
        UrlTemplateImageryProvider::new(template, Box::new(WebMercatorTilingScheme::new()), client)
    }

    #[test]
    fn test_url_construction() {
        let provider = provider(
            "https://tiles.test/{z}/{x}/{y}.png",
            MockAsyncHttpClient::new(Ok(vec![])),
        );
        assert_eq!(provider.build_url(3, 5, 4), "https://tiles.test/4/3/5.png");
    }

    #[test]
    fn test_url_construction_reverse_y() {
        let provider = provider(
            "https://tiles.test/{z}/{x}/{reverseY}",
            MockAsyncHttpClient::new(Ok(vec![])),
        );
        // 16 rows at level 4
        assert_eq!(provider.build_url(3, 5, 4), "https://tiles.test/4/3/10");
    }

    #[test]
    fn test_rectangle_defaults_to_scheme() {
        let provider = UrlTemplateImageryProvider::new(
            "{z}/{x}/{y}",
            Box::new(GeographicTilingScheme::new()),
            MockAsyncHttpClient::new(Ok(vec![])),
        );
        assert_eq!(provider.rectangle(), Rectangle::MAX_VALUE);
    }

    #[tokio::test]
    async fn test_request_decodes_image() {
        let provider = provider("{z}/{x}/{y}", MockAsyncHttpClient::new(Ok(png_bytes())));

        let image = provider.request_image(1, 2, 3).unwrap().await.unwrap();
        assert_eq!(image.width(), 2);
        assert_eq!(image.pixel(0, 0), Some([9, 8, 7, 255]));
    }

    #[tokio::test]
    async fn test_request_outside_levels_fails() {
        let provider = provider("{z}/{x}/{y}", MockAsyncHttpClient::new(Ok(png_bytes())))
            .with_levels(2, 5);

        let result = provider.request_image(0, 0, 9).unwrap().await;
        assert_eq!(result, Err(ProviderError::UnsupportedLevel(9)));
    }

    #[tokio::test]
    async fn test_request_propagates_http_error() {
        let provider = provider(
            "{z}/{x}/{y}",
            MockAsyncHttpClient::new(Err(ProviderError::HttpError("HTTP 503".to_string()))),
        );

        let result = provider.request_image(0, 0, 1).unwrap().await;
        assert!(matches!(result, Err(ProviderError::HttpError(_))));
    }

    #[test]
    fn test_credit() {
        let provider = provider("{z}/{x}/{y}", MockAsyncHttpClient::new(Ok(vec![])))
            .with_credit(Credit::new("© Test"));
        assert_eq!(provider.tile_credits(0, 0, 0), vec![Credit::new("© Test")]);
    }
}
