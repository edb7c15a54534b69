//! Headless texture backend.
//!
//! Tracks texture handles in memory without a graphics device. Used by the
//! CLI simulator and by tests to verify that every texture is freed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{Reprojector, TextureError, TextureHandle, TextureSampling, TextureUploader};
use crate::provider::DecodedImage;
use crate::reprojection::{ReprojectionCommand, ReprojectionOutcome};

/// Texture backend that keeps only bookkeeping.
#[derive(Debug, Default)]
pub struct InMemoryTextures {
    next_id: AtomicU64,
    live: Mutex<HashSet<u64>>,
    fail_uploads: AtomicBool,
    cancel_reprojections: AtomicBool,
}

impl InMemoryTextures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upload fail.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::Relaxed);
    }

    /// Make every subsequent reprojection report cancellation.
    pub fn set_cancel_reprojections(&self, cancel: bool) {
        self.cancel_reprojections.store(cancel, Ordering::Relaxed);
    }

    /// Number of textures created and not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_live(&self, texture: &TextureHandle) -> bool {
        self.live.lock().contains(&texture.id())
    }

    fn allocate(&self, width: u32, height: u32) -> TextureHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.live.lock().insert(id);
        TextureHandle::new(id, width, height)
    }
}

impl TextureUploader for InMemoryTextures {
    fn upload(
        &self,
        image: &DecodedImage,
        _sampling: &TextureSampling,
    ) -> Result<TextureHandle, TextureError> {
        if self.fail_uploads.load(Ordering::Relaxed) {
            return Err(TextureError::UploadFailed(
                "uploads disabled on this backend".to_string(),
            ));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(TextureError::InvalidDimensions {
                width: image.width(),
                height: image.height(),
                reason: "texture must not be empty".to_string(),
            });
        }
        Ok(self.allocate(image.width(), image.height()))
    }

    fn destroy(&self, texture: TextureHandle) {
        self.live.lock().remove(&texture.id());
    }
}

impl Reprojector for InMemoryTextures {
    fn reproject(&self, command: &ReprojectionCommand) -> ReprojectionOutcome {
        if self.cancel_reprojections.load(Ordering::Relaxed) {
            return ReprojectionOutcome::Cancelled;
        }
        let source = command.source();
        ReprojectionOutcome::Completed(self.allocate(source.width(), source.height()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_and_destroy() {
        let textures = InMemoryTextures::new();
        let image = DecodedImage::solid(4, 4, [10, 20, 30, 255]);

        let texture = textures
            .upload(&image, &TextureSampling::default())
            .unwrap();
        assert_eq!(texture.width(), 4);
        assert_eq!(textures.live_count(), 1);
        assert!(textures.is_live(&texture));

        textures.destroy(texture);
        assert_eq!(textures.live_count(), 0);
    }

    #[test]
    fn test_upload_failure() {
        let textures = InMemoryTextures::new();
        textures.set_fail_uploads(true);
        let image = DecodedImage::solid(4, 4, [0, 0, 0, 255]);
        assert!(matches!(
            textures.upload(&image, &TextureSampling::default()),
            Err(TextureError::UploadFailed(_))
        ));
    }

    #[test]
    fn test_handles_are_unique() {
        let textures = InMemoryTextures::new();
        let image = DecodedImage::solid(2, 2, [0, 0, 0, 255]);
        let a = textures.upload(&image, &TextureSampling::default()).unwrap();
        let b = textures.upload(&image, &TextureSampling::default()).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
