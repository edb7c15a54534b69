//! Error types for texture upload operations.

use std::fmt;

/// Errors that can occur while creating a GPU texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureError {
    /// Image dimensions cannot be uploaded.
    InvalidDimensions {
        width: u32,
        height: u32,
        reason: String,
    },
    /// The backend rejected the upload.
    UploadFailed(String),
}

impl fmt::Display for TextureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureError::InvalidDimensions {
                width,
                height,
                reason,
            } => {
                write!(f, "Invalid dimensions {}×{}: {}", width, height, reason)
            }
            TextureError::UploadFailed(msg) => write!(f, "Upload failed: {}", msg),
        }
    }
}

impl std::error::Error for TextureError {}
