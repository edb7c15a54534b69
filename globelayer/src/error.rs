//! Error taxonomy for the imagery engine.

use std::fmt;

use thiserror::Error;

use crate::provider::ProviderError;
use crate::texture::TextureError;

/// Why an imagery tile did not reach `Ready`.
///
/// `DiscardedByPolicy` and `Cancelled` are outcomes, not errors: they are
/// never reported to an error reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NetworkFailure,
    DecodeFailure,
    DiscardedByPolicy,
    Cancelled,
    ConfigurationError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::NetworkFailure => "network failure",
            FailureKind::DecodeFailure => "decode failure",
            FailureKind::DiscardedByPolicy => "discarded by policy",
            FailureKind::Cancelled => "cancelled",
            FailureKind::ConfigurationError => "configuration error",
        };
        f.write_str(name)
    }
}

/// Errors returned synchronously by the engine API.
#[derive(Debug, Error)]
pub enum ImageryError {
    /// Invalid layer configuration. Not recoverable at runtime.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Texture error: {0}")]
    Texture(#[from] TextureError),

    /// Layers spawn their fetches on a tokio runtime.
    #[error("No tokio runtime available; create the layer inside a runtime or pass a handle")]
    NoRuntime,
}

impl ImageryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ImageryError::Configuration(_) | ImageryError::NoRuntime => {
                FailureKind::ConfigurationError
            }
            ImageryError::Provider(e) => e.kind(),
            ImageryError::Texture(_) => FailureKind::DecodeFailure,
        }
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, ImageryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = ImageryError::Configuration("mipmapped filter".to_string());
        assert_eq!(err.to_string(), "Configuration error: mipmapped filter");
        assert_eq!(err.kind(), FailureKind::ConfigurationError);
    }

    #[test]
    fn test_provider_error_conversion() {
        let err: ImageryError = ProviderError::DecodeError("truncated".to_string()).into();
        assert_eq!(err.kind(), FailureKind::DecodeFailure);
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::DiscardedByPolicy.to_string(), "discarded by policy");
    }
}
