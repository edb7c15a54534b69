//! INI parsing: the single place where INI keys map to config fields.

use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::{ConfigFileError, LayerConfigFile};
use crate::geometry::Rectangle;
use crate::texture::{TextureMagnificationFilter, TextureMinificationFilter};
use crate::tiling::{ProjectionKind, MAXIMUM_LEVEL};

/// Parse an `Ini` object, overlaying its values on the defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<LayerConfigFile, ConfigFileError> {
    let mut config = LayerConfigFile::default();

    // [layer] section
    if let Some(section) = ini.section(Some("layer")) {
        if let Some(v) = section.get("rectangle") {
            config.layer.rectangle = parse_rectangle(v)?;
        }
        if let Some(v) = parse_value(
            section,
            "layer",
            "minimum_terrain_level",
            "must be a non-negative integer",
        )? {
            config.layer.minimum_terrain_level = Some(level("layer", "minimum_terrain_level", v)?);
        }
        if let Some(v) = parse_value(
            section,
            "layer",
            "maximum_terrain_level",
            "must be a non-negative integer",
        )? {
            config.layer.maximum_terrain_level = Some(level("layer", "maximum_terrain_level", v)?);
        }
        if let Some(v) = section.get("minification_filter") {
            let filter: TextureMinificationFilter = v
                .trim()
                .parse()
                .map_err(|reason: String| invalid("layer", "minification_filter", v, &reason))?;
            if !filter.is_valid_for_imagery() {
                return Err(invalid(
                    "layer",
                    "minification_filter",
                    v,
                    "must be 'nearest' or 'linear'",
                ));
            }
            config.layer.sampling.minification_filter = filter;
        }
        if let Some(v) = section.get("magnification_filter") {
            config.layer.sampling.magnification_filter = v
                .trim()
                .parse::<TextureMagnificationFilter>()
                .map_err(|reason| invalid("layer", "magnification_filter", v, &reason))?;
        }
        if let Some(v) = parse_value::<f64>(
            section,
            "layer",
            "alpha",
            "must be a number between 0 and 1",
        )? {
            if !(0.0..=1.0).contains(&v) {
                return Err(invalid("layer", "alpha", &v.to_string(), "must be between 0 and 1"));
            }
            config.layer.render.alpha = v;
        }
        if let Some(v) = parse_value(section, "layer", "show", "must be 'true' or 'false'")? {
            config.layer.render.show = v;
        }
    }

    // [provider] section
    if let Some(section) = ini.section(Some("provider")) {
        if let Some(v) = section.get("url") {
            let v = v.trim();
            if !v.is_empty() {
                config.provider.url = Some(v.to_string());
            }
        }
        if let Some(v) = section.get("scheme") {
            config.provider.scheme = match v.trim().to_lowercase().as_str() {
                "geographic" => ProjectionKind::Geographic,
                "webmercator" | "web_mercator" => ProjectionKind::WebMercator,
                _ => {
                    return Err(invalid(
                        "provider",
                        "scheme",
                        v,
                        "must be 'geographic' or 'webmercator'",
                    ));
                }
            };
        }
        if let Some(v) = parse_value(
            section,
            "provider",
            "minimum_level",
            "must be a non-negative integer",
        )? {
            config.provider.minimum_level = level("provider", "minimum_level", v)?;
        }
        if let Some(v) = parse_value(
            section,
            "provider",
            "maximum_level",
            "must be a non-negative integer",
        )? {
            config.provider.maximum_level = level("provider", "maximum_level", v)?;
        }
        if let Some(v) = parse_value(
            section,
            "provider",
            "tile_width",
            "must be a positive integer",
        )? {
            config.provider.tile_width = positive("provider", "tile_width", v)?;
        }
        if let Some(v) = parse_value(
            section,
            "provider",
            "tile_height",
            "must be a positive integer",
        )? {
            config.provider.tile_height = positive("provider", "tile_height", v)?;
        }
        if config.provider.minimum_level > config.provider.maximum_level {
            return Err(invalid(
                "provider",
                "minimum_level",
                &config.provider.minimum_level.to_string(),
                "must not exceed maximum_level",
            ));
        }
    }

    // [request] section
    if let Some(section) = ini.section(Some("request")) {
        if let Some(v) = parse_value::<usize>(
            section,
            "request",
            "max_in_flight",
            "must be a positive integer",
        )? {
            if v == 0 {
                return Err(invalid("request", "max_in_flight", "0", "must be at least 1"));
            }
            config.request.max_in_flight = v;
        }
        if let Some(v) = parse_value(
            section,
            "request",
            "max_attempts",
            "must be a positive integer",
        )? {
            config.request.max_attempts = positive("request", "max_attempts", v)?;
        }
        if let Some(v) = parse_value(
            section,
            "request",
            "initial_delay_ms",
            "must be a non-negative integer (milliseconds)",
        )? {
            config.request.initial_delay = Duration::from_millis(v);
        }
    }

    // [tolerances] section
    if let Some(section) = ini.section(Some("tolerances")) {
        if let Some(v) = parse_value::<f64>(
            section,
            "tolerances",
            "edge_snap_divisor",
            "must be a positive number",
        )? {
            if v <= 0.0 {
                return Err(invalid(
                    "tolerances",
                    "edge_snap_divisor",
                    &v.to_string(),
                    "must be positive",
                ));
            }
            config.tolerances.edge_snap_divisor = v;
        }
        if let Some(v) = parse_value::<f64>(
            section,
            "tolerances",
            "reprojection_precision",
            "must be a positive number",
        )? {
            if v <= 0.0 {
                return Err(invalid(
                    "tolerances",
                    "reprojection_precision",
                    &v.to_string(),
                    "must be positive",
                ));
            }
            config.tolerances.reprojection_precision = v;
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse `key` if present.
fn parse_value<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
    reason: &str,
) -> Result<Option<T>, ConfigFileError> {
    match section.get(key) {
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(section_name, key, v, reason)),
        None => Ok(None),
    }
}

fn positive(section: &str, key: &str, value: u32) -> Result<u32, ConfigFileError> {
    if value == 0 {
        return Err(invalid(section, key, "0", "must be at least 1"));
    }
    Ok(value)
}

fn level(section: &str, key: &str, value: u32) -> Result<u32, ConfigFileError> {
    if value > MAXIMUM_LEVEL {
        return Err(invalid(
            section,
            key,
            &value.to_string(),
            &format!("must not exceed {}", MAXIMUM_LEVEL),
        ));
    }
    Ok(value)
}

/// `west, south, east, north` in degrees.
fn parse_rectangle(value: &str) -> Result<Rectangle, ConfigFileError> {
    let reason = "expected 'west, south, east, north' in degrees";
    let degrees = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid("layer", "rectangle", value, reason))?;

    let &[west, south, east, north] = degrees.as_slice() else {
        return Err(invalid("layer", "rectangle", value, reason));
    };
    if !(-90.0..=90.0).contains(&south) || !(-90.0..=90.0).contains(&north) || south > north {
        return Err(invalid(
            "layer",
            "rectangle",
            value,
            "latitudes must lie in [-90, 90] with south <= north",
        ));
    }
    if !(-180.0..=180.0).contains(&west) || !(-180.0..=180.0).contains(&east) {
        return Err(invalid(
            "layer",
            "rectangle",
            value,
            "longitudes must lie in [-180, 180]",
        ));
    }
    Ok(Rectangle::from_degrees(west, south, east, north))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::TextureMinificationFilter;

    fn parse(text: &str) -> Result<LayerConfigFile, ConfigFileError> {
        LayerConfigFile::parse(text)
    }

    #[test]
    fn test_empty_is_default() {
        assert_eq!(parse("").unwrap(), LayerConfigFile::default());
    }

    #[test]
    fn test_layer_section() {
        let config = parse(
            "[layer]\n\
             rectangle = -10, 35, 30, 60\n\
             maximum_terrain_level = 14\n\
             minification_filter = Nearest\n\
             show = false\n",
        )
        .unwrap();

        let expected = Rectangle::from_degrees(-10.0, 35.0, 30.0, 60.0);
        assert!(config.layer.rectangle.equals_epsilon(&expected, 1e-12));
        assert_eq!(config.layer.maximum_terrain_level, Some(14));
        assert_eq!(
            config.layer.sampling.minification_filter,
            TextureMinificationFilter::Nearest
        );
        assert!(!config.layer.render.show);
    }

    #[test]
    fn test_mipmapped_filter_rejected() {
        let err = parse("[layer]\nminification_filter = linear_mipmap_linear\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref key, .. } if key == "minification_filter"
        ));
    }

    #[test]
    fn test_bad_rectangle() {
        assert!(parse("[layer]\nrectangle = 1, 2, 3\n").is_err());
        assert!(parse("[layer]\nrectangle = 0, 60, 10, 30\n").is_err());
        assert!(parse("[layer]\nrectangle = west, 0, 10, 10\n").is_err());
    }

    #[test]
    fn test_provider_section() {
        let config = parse(
            "[provider]\n\
             scheme = geographic\n\
             minimum_level = 2\n\
             maximum_level = 9\n\
             tile_width = 512\n",
        )
        .unwrap();
        assert_eq!(config.provider.scheme, ProjectionKind::Geographic);
        assert_eq!(config.provider.minimum_level, 2);
        assert_eq!(config.provider.maximum_level, 9);
        assert_eq!(config.provider.tile_width, 512);
        assert_eq!(config.provider.tile_height, 256);
        assert!(config.provider.url.is_none());
    }

    #[test]
    fn test_provider_level_order() {
        assert!(parse("[provider]\nminimum_level = 5\nmaximum_level = 3\n").is_err());
    }

    #[test]
    fn test_levels_beyond_maximum_rejected() {
        let err = parse("[provider]\nmaximum_level = 40\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref key, .. } if key == "maximum_level"
        ));
        assert!(parse("[layer]\nmaximum_terrain_level = 31\n").is_err());
        assert_eq!(
            parse("[provider]\nmaximum_level = 30\n").unwrap().provider.maximum_level,
            30
        );
    }

    #[test]
    fn test_unknown_scheme() {
        let err = parse("[provider]\nscheme = mercator\n").unwrap_err();
        assert!(err.to_string().contains("provider.scheme"));
    }

    #[test]
    fn test_request_and_tolerances() {
        let config = parse(
            "[request]\nmax_in_flight = 16\ninitial_delay_ms = 250\n\
             [tolerances]\nedge_snap_divisor = 256\n",
        )
        .unwrap();
        assert_eq!(config.request.max_in_flight, 16);
        assert_eq!(config.request.initial_delay, Duration::from_millis(250));
        assert_eq!(config.tolerances.edge_snap_divisor, 256.0);

        assert!(parse("[request]\nmax_in_flight = 0\n").is_err());
        assert!(parse("[tolerances]\nreprojection_precision = -1\n").is_err());
    }
}
