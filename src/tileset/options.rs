//! Tileset behavior configuration

use std::sync::Arc;

use crate::core::error::LoadFailureDetails;
use crate::tileset::tile::Tile;

/// Fog density to apply at a given camera height
#[derive(Clone, Copy, Debug)]
pub struct FogDensityAtHeight {
    pub camera_height: f64,
    pub fog_density: f64,
}

/// User predicate that removes tiles from consideration entirely
pub trait TileExcluder: Send + Sync {
    fn should_exclude(&self, tile: &Tile) -> bool;
}

/// Callback invoked once per failing tileset-level request
pub type LoadErrorCallback = Arc<dyn Fn(&LoadFailureDetails) + Send + Sync>;

/// Options controlling selection, loading, and eviction
pub struct TilesetOptions {
    /// The maximum screen-space error a rendered tile may have, in pixels.
    /// Tiles above it are refined into their children.
    pub maximum_screen_space_error: f64,

    /// Screen-space error threshold for culled-but-visited tiles, used when
    /// `enforce_culled_screen_space_error` is set
    pub culled_screen_space_error: f64,

    /// Whether culled tiles still refine until they meet
    /// `culled_screen_space_error`
    pub enforce_culled_screen_space_error: bool,

    /// Byte budget for cached tile content; eviction runs each frame until
    /// the total is under this or only in-use tiles remain
    pub maximum_cached_bytes: usize,

    /// Cap on concurrent tile content loads
    pub maximum_simultaneous_tile_loads: u32,

    /// Cap on concurrent availability-subtree loads
    pub maximum_simultaneous_subtree_loads: u32,

    /// When a refining tile is waiting on more descendants than this, it
    /// loads itself instead of its descendants
    pub loading_descendant_limit: u32,

    /// Never refine a tile until all of its children are renderable
    pub forbid_holes: bool,

    /// Keep refined ancestors' content loaded for quick zoom-out
    pub preload_ancestors: bool,

    /// Load culled sibling tiles at low priority for quick rotation
    pub preload_siblings: bool,

    /// Treat tiles directly under the camera as visible even when outside
    /// every frustum
    pub render_tiles_under_camera: bool,

    /// Skip visiting tiles outside every frustum
    pub enable_frustum_culling: bool,

    /// Skip visiting tiles fully hidden by fog
    pub enable_fog_culling: bool,

    /// Fog density by camera height, sorted ascending by height
    pub fog_density_table: Vec<FogDensityAtHeight>,

    /// Request the water mask extension for terrain layers
    pub request_water_mask: bool,

    /// User predicates that exclude tiles from the traversal
    pub excluders: Vec<Arc<dyn TileExcluder>>,

    /// Invoked once per failing tileset-level request
    pub load_error_callback: Option<LoadErrorCallback>,
}

impl Default for TilesetOptions {
    fn default() -> Self {
        Self {
            maximum_screen_space_error: 16.0,
            culled_screen_space_error: 64.0,
            enforce_culled_screen_space_error: true,
            maximum_cached_bytes: 512 * 1024 * 1024,
            maximum_simultaneous_tile_loads: 20,
            maximum_simultaneous_subtree_loads: 20,
            loading_descendant_limit: 20,
            forbid_holes: false,
            preload_ancestors: true,
            preload_siblings: true,
            render_tiles_under_camera: true,
            enable_frustum_culling: true,
            enable_fog_culling: true,
            fog_density_table: default_fog_density_table(),
            request_water_mask: false,
            excluders: Vec::new(),
            load_error_callback: None,
        }
    }
}

/// Fog density falloff measured against a clear-day atmosphere
fn default_fog_density_table() -> Vec<FogDensityAtHeight> {
    [
        (359.4, 2.0e-5),
        (1275.7, 1.0e-4),
        (2151.1, 7.0e-5),
        (3141.8, 5.0e-5),
        (6281.2, 3.0e-5),
        (12364.3, 1.9e-5),
        (15900.8, 1.0e-5),
        (49889.1, 8.5e-6),
        (99260.7, 5.8e-6),
        (203849.3, 4.2e-6),
        (493552.1, 2.6e-6),
        (1000000.0, 0.0),
    ]
    .into_iter()
    .map(|(camera_height, fog_density)| FogDensityAtHeight {
        camera_height,
        fog_density,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = TilesetOptions::default();
        assert_eq!(options.maximum_screen_space_error, 16.0);
        assert!(options.enable_frustum_culling);
        assert!(!options.forbid_holes);
        assert!(options.excluders.is_empty());
    }

    #[test]
    fn test_fog_table_sorted_and_terminated() {
        let table = default_fog_density_table();
        assert!(table.windows(2).all(|w| w[0].camera_height < w[1].camera_height));
        assert_eq!(table.last().unwrap().fog_density, 0.0);
    }
}
