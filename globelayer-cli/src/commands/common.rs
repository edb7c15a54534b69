//! Shared setup for CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globelayer::config::{LayerConfigFile, ProviderSection};
use globelayer::provider::AsyncReqwestClient;
use globelayer::tiling::{ProjectionKind, MAXIMUM_LEVEL};
use globelayer::{
    GeographicTilingScheme, ImageryProvider, SolidColorImageryProvider, TilingScheme,
    UrlTemplateImageryProvider, WebMercatorTilingScheme,
};

use crate::error::CliError;

/// Colour of tiles served by the synthetic provider.
const SYNTHETIC_COLOR: [u8; 4] = [64, 128, 192, 255];

/// `~/.globelayer/config.ini`, or `config.ini` without a home directory.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".globelayer").join("config.ini"))
        .unwrap_or_else(|| PathBuf::from("config.ini"))
}

/// `~/.globelayer/logs`, or `logs` without a home directory.
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".globelayer").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Load the config file, falling back to defaults when it does not exist.
pub fn load_config(path: Option<&Path>) -> Result<LayerConfigFile, CliError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    Ok(LayerConfigFile::load_from(&path)?)
}

/// Clap parser for tile levels the engine can address.
pub fn parse_level(value: &str) -> Result<u32, String> {
    let level: u32 = value
        .parse()
        .map_err(|_| format!("'{}' is not a tile level", value))?;
    if level > MAXIMUM_LEVEL {
        return Err(format!("level must not exceed {}", MAXIMUM_LEVEL));
    }
    Ok(level)
}

pub fn tiling_scheme(kind: ProjectionKind) -> Box<dyn TilingScheme> {
    match kind {
        ProjectionKind::Geographic => Box::new(GeographicTilingScheme::new()),
        ProjectionKind::WebMercator => Box::new(WebMercatorTilingScheme::new()),
    }
}

/// Synthetic provider shaped like the configured one.
pub fn synthetic_provider(section: &ProviderSection) -> SolidColorImageryProvider {
    SolidColorImageryProvider::new(tiling_scheme(section.scheme), SYNTHETIC_COLOR)
        .with_tile_size(section.tile_width)
        .with_levels(section.minimum_level, section.maximum_level)
}

/// Provider described by the config: a URL template when one is set,
/// otherwise the synthetic provider.
pub fn build_provider(section: &ProviderSection) -> Result<Arc<dyn ImageryProvider>, CliError> {
    let Some(url) = &section.url else {
        return Ok(Arc::new(synthetic_provider(section)));
    };

    let client = AsyncReqwestClient::new().map_err(|e| CliError::Layer(e.into()))?;
    let provider =
        UrlTemplateImageryProvider::new(url.clone(), tiling_scheme(section.scheme), client)
            .with_levels(section.minimum_level, section.maximum_level)
            .with_tile_size(section.tile_width, section.tile_height);
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("config.ini"))).unwrap();
        assert_eq!(config, LayerConfigFile::default());
    }

    #[test]
    fn test_load_config_invalid_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[provider]\nscheme = polar").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("12"), Ok(12));
        assert_eq!(parse_level("30"), Ok(MAXIMUM_LEVEL));
        assert!(parse_level("40").is_err());
        assert!(parse_level("-1").is_err());
    }

    #[test]
    fn test_synthetic_provider_follows_config() {
        let section = ProviderSection {
            scheme: ProjectionKind::WebMercator,
            maximum_level: 9,
            tile_width: 512,
            tile_height: 512,
            ..ProviderSection::default()
        };

        let provider = synthetic_provider(&section);
        assert_eq!(provider.maximum_level(), 9);
        assert_eq!(provider.tile_width(), 512);
        assert_eq!(provider.tiling_scheme().projection(), ProjectionKind::WebMercator);
    }

    #[test]
    fn test_build_provider_without_url_is_synthetic() {
        let provider = build_provider(&ProviderSection::default()).unwrap();
        assert!(provider.is_ready());
        assert_eq!(provider.maximum_level(), 18);
    }
}
