//! Synthetic in-memory provider.
//!
//! Produces single-colour tiles without any I/O. Readiness, throttling,
//! failures and latency can be controlled at runtime, which makes it the
//! provider of choice for the simulator and for lifecycle tests.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use super::discard::DiscardPolicy;
use super::types::{DecodedImage, ImageFuture, ImageryProvider, ProviderError};
use crate::tiling::TilingScheme;

/// Provider returning solid-colour tiles.
pub struct SolidColorImageryProvider {
    tiling_scheme: Box<dyn TilingScheme>,
    color: [u8; 4],
    tile_size: u32,
    minimum_level: u32,
    maximum_level: u32,
    latency: Option<Duration>,
    discard_policy: Option<Box<dyn DiscardPolicy>>,
    ready: AtomicBool,
    throttled: AtomicBool,
    failures_remaining: AtomicU32,
    requests: AtomicU64,
}

impl SolidColorImageryProvider {
    pub fn new(tiling_scheme: Box<dyn TilingScheme>, color: [u8; 4]) -> Self {
        Self {
            tiling_scheme,
            color,
            tile_size: 256,
            minimum_level: 0,
            maximum_level: 18,
            latency: None,
            discard_policy: None,
            ready: AtomicBool::new(true),
            throttled: AtomicBool::new(false),
            failures_remaining: AtomicU32::new(0),
            requests: AtomicU64::new(0),
        }
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_levels(mut self, minimum_level: u32, maximum_level: u32) -> Self {
        self.minimum_level = minimum_level;
        self.maximum_level = maximum_level.max(minimum_level);
        self
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_discard_policy(mut self, policy: Box<dyn DiscardPolicy>) -> Self {
        self.discard_policy = Some(policy);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// While throttled, `request_image` declines every request.
    pub fn set_throttled(&self, throttled: bool) {
        self.throttled.store(throttled, Ordering::Release);
    }

    /// Fail the next `count` requests with an HTTP error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::Release);
    }

    /// Number of requests accepted so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Acquire)
    }
}

impl ImageryProvider for SolidColorImageryProvider {
    fn name(&self) -> &str {
        "solid-color"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn minimum_level(&self) -> u32 {
        self.minimum_level
    }

    fn maximum_level(&self) -> u32 {
        self.maximum_level
    }

    fn tile_width(&self) -> u32 {
        self.tile_size
    }

    fn tile_height(&self) -> u32 {
        self.tile_size
    }

    fn tiling_scheme(&self) -> &dyn TilingScheme {
        self.tiling_scheme.as_ref()
    }

    fn request_image(&self, x: u32, y: u32, level: u32) -> Option<ImageFuture> {
        if self.throttled.load(Ordering::Acquire) {
            return None;
        }
        self.requests.fetch_add(1, Ordering::AcqRel);

        let fail = self
            .failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        let latency = self.latency;
        let size = self.tile_size;
        let color = self.color;

        Some(Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if fail {
                return Err(ProviderError::HttpError(format!(
                    "synthetic failure for tile {}/{}/{}",
                    level, x, y
                )));
            }
            Ok(DecodedImage::solid(size, size, color))
        }))
    }

    fn discard_policy(&self) -> Option<&dyn DiscardPolicy> {
        self.discard_policy.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::GeographicTilingScheme;

    fn provider() -> SolidColorImageryProvider {
        SolidColorImageryProvider::new(Box::new(GeographicTilingScheme::new()), [0, 128, 0, 255])
            .with_tile_size(4)
    }

    #[tokio::test]
    async fn test_returns_solid_tile() {
        let provider = provider();
        let image = provider.request_image(0, 0, 0).unwrap().await.unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(image.pixel(3, 3), Some([0, 128, 0, 255]));
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_next() {
        let provider = provider();
        provider.fail_next(1);

        assert!(provider.request_image(0, 0, 0).unwrap().await.is_err());
        assert!(provider.request_image(0, 0, 0).unwrap().await.is_ok());
    }

    #[test]
    fn test_throttled_declines() {
        let provider = provider();
        provider.set_throttled(true);
        assert!(provider.request_image(0, 0, 0).is_none());
        assert_eq!(provider.request_count(), 0);
    }

    #[test]
    fn test_ready_flag() {
        let provider = provider();
        assert!(provider.is_ready());
        provider.set_ready(false);
        assert!(!provider.is_ready());
    }
}
