//! `ConfigFile` to commented INI.

use std::path::Path;

use super::settings::ConfigFile;

/// Renders the configuration as the commented INI written to `config.ini`.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let catalog = config
        .mosaic
        .catalog
        .as_ref()
        .map(|p| path_to_string(p))
        .unwrap_or_default();

    format!(
        r#"[cache]
; Root directory for per-frame tile caches
directory = {}
; Levels of finer cached tiles combined to fill a missing tile before
; reading the source (0 always reads the source)
max_derive_depth = {}
; Fill coarser cached tiles from newly read ones
propagate_to_parents = {}
; Levels coarser than this are read without the cache
min_level = {}

[tiles]
; Nominal tile size in pixels (positive, even)
tile_width = {}
tile_height = {}

[index]
; Frames a quadtree node holds before splitting
node_limit = {}
; Deepest quadtree level
max_depth = {}

[mosaic]
; Default frame catalog (JSON)
catalog = {}
; Overlap kept around accepted frames, in view pixels
buffer_pixels = {}

[rpc]
; Iteration cap for image-to-ground solving
max_iterations = {}
; Convergence tolerance in image pixels
tolerance = {}

[logging]
directory = {}
file = {}
"#,
        path_to_string(&config.cache.directory),
        config.cache.max_derive_depth,
        config.cache.propagate_to_parents,
        config.cache.min_level,
        config.tiles.tile_width,
        config.tiles.tile_height,
        config.index.node_limit,
        config.index.max_depth,
        catalog,
        config.mosaic.buffer_pixels,
        config.rpc.max_iterations,
        config.rpc.tolerance,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

/// Shortens paths under the home directory to `~/...`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_section_written() {
        let text = to_config_string(&ConfigFile::default());
        for section in ["[cache]", "[tiles]", "[index]", "[mosaic]", "[rpc]", "[logging]"] {
            assert!(text.contains(section), "missing {}", section);
        }
        assert!(text.contains("catalog = \n"));
        assert!(text.contains("propagate_to_parents = true"));
    }
}
