//! INI to `ConfigFile`.
//!
//! Every key name is mapped to its field here.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parses an `Ini` into a `ConfigFile`, overlaying values on the defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [cache]
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = non_empty(section, "directory") {
            config.cache.directory = expand_tilde(v);
        }
        if let Some(v) = section.get("max_derive_depth") {
            config.cache.max_derive_depth =
                parse(v, "cache", "max_derive_depth", "must be a non-negative integer")?;
        }
        if let Some(v) = section.get("propagate_to_parents") {
            config.cache.propagate_to_parents = parse_bool(v)
                .ok_or_else(|| invalid("cache", "propagate_to_parents", v, "must be true or false"))?;
        }
        if let Some(v) = section.get("min_level") {
            config.cache.min_level = parse(v, "cache", "min_level", "must be a non-negative integer")?;
        }
    }

    // [tiles]
    if let Some(section) = ini.section(Some("tiles")) {
        for (key, slot) in [
            ("tile_width", &mut config.tiles.tile_width),
            ("tile_height", &mut config.tiles.tile_height),
        ] {
            if let Some(v) = section.get(key) {
                let size: u32 = parse(v, "tiles", key, "must be a positive even integer")?;
                if size < 2 || size % 2 != 0 {
                    return Err(invalid("tiles", key, v, "must be a positive even integer"));
                }
                *slot = size;
            }
        }
    }

    // [index]
    if let Some(section) = ini.section(Some("index")) {
        if let Some(v) = section.get("node_limit") {
            let limit: usize = parse(v, "index", "node_limit", "must be a positive integer")?;
            if limit == 0 {
                return Err(invalid("index", "node_limit", v, "must be a positive integer"));
            }
            config.index.node_limit = limit;
        }
        if let Some(v) = section.get("max_depth") {
            config.index.max_depth = parse(v, "index", "max_depth", "must be a non-negative integer")?;
        }
    }

    // [mosaic]
    if let Some(section) = ini.section(Some("mosaic")) {
        if let Some(v) = non_empty(section, "catalog") {
            config.mosaic.catalog = Some(expand_tilde(v));
        }
        if let Some(v) = section.get("buffer_pixels") {
            let pixels: f64 = parse(v, "mosaic", "buffer_pixels", "must be a non-negative number")?;
            if !(pixels >= 0.0 && pixels.is_finite()) {
                return Err(invalid("mosaic", "buffer_pixels", v, "must be a non-negative number"));
            }
            config.mosaic.buffer_pixels = pixels;
        }
    }

    // [rpc]
    if let Some(section) = ini.section(Some("rpc")) {
        if let Some(v) = section.get("max_iterations") {
            let iterations: u32 = parse(v, "rpc", "max_iterations", "must be a positive integer")?;
            if iterations == 0 {
                return Err(invalid("rpc", "max_iterations", v, "must be a positive integer"));
            }
            config.rpc.max_iterations = iterations;
        }
        if let Some(v) = section.get("tolerance") {
            let tolerance: f64 = parse(v, "rpc", "tolerance", "must be a positive number")?;
            if !(tolerance > 0.0 && tolerance.is_finite()) {
                return Err(invalid("rpc", "tolerance", v, "must be a positive number"));
            }
            config.rpc.tolerance = tolerance;
        }
    }

    // [logging]
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section, "directory") {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "file") {
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn parse<T: FromStr>(
    value: &str,
    section: &str,
    key: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Expands a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(text: &str) -> Result<ConfigFile, ConfigFileError> {
        parse_ini(&Ini::load_from_str(text).unwrap())
    }

    fn invalid_key(result: Result<ConfigFile, ConfigFileError>) -> String {
        match result {
            Err(ConfigFileError::InvalidValue { section, key, .. }) => format!("{}.{}", section, key),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_ini_is_default() {
        assert_eq!(parse_str("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_partial_sections_overlay_defaults() {
        let config = parse_str(
            "[tiles]\ntile_width = 512\n\n[rpc]\ntolerance = 0.5\n\n[cache]\npropagate_to_parents = no\n",
        )
        .unwrap();
        let defaults = ConfigFile::default();

        assert_eq!(config.tiles.tile_width, 512);
        assert_eq!(config.tiles.tile_height, defaults.tiles.tile_height);
        assert_eq!(config.rpc.tolerance, 0.5);
        assert_eq!(config.rpc.max_iterations, defaults.rpc.max_iterations);
        assert!(!config.cache.propagate_to_parents);
        assert_eq!(config.index, defaults.index);
    }

    #[test]
    fn test_blank_paths_keep_defaults() {
        let config = parse_str("[mosaic]\ncatalog =\n\n[logging]\nfile =   \n").unwrap();
        assert_eq!(config.mosaic.catalog, None);
        assert_eq!(config.logging.file, ConfigFile::default().logging.file);
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        assert_eq!(invalid_key(parse_str("[tiles]\ntile_width = 255\n")), "tiles.tile_width");
        assert_eq!(invalid_key(parse_str("[tiles]\ntile_height = big\n")), "tiles.tile_height");
        assert_eq!(invalid_key(parse_str("[index]\nnode_limit = 0\n")), "index.node_limit");
        assert_eq!(invalid_key(parse_str("[rpc]\ntolerance = -1\n")), "rpc.tolerance");
        assert_eq!(invalid_key(parse_str("[rpc]\nmax_iterations = 0\n")), "rpc.max_iterations");
        assert_eq!(invalid_key(parse_str("[mosaic]\nbuffer_pixels = -2\n")), "mosaic.buffer_pixels");
        assert_eq!(
            invalid_key(parse_str("[cache]\npropagate_to_parents = maybe\n")),
            "cache.propagate_to_parents"
        );
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/var/tiles"), PathBuf::from("/var/tiles"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/tiles"), home.join("tiles"));
        }
    }
}
