//! Tile trees, their selection, and their content lifecycle

pub mod tile;
pub mod selection;
pub mod options;
pub mod context;
pub mod json;
pub mod manager;
pub mod traversal;
pub mod tileset;

pub use options::{FogDensityAtHeight, TileExcluder, TilesetOptions};
pub use selection::{SelectionResult, TileSelectionState};
pub use tile::{
    ContextKey, OctreeTileId, QuadtreeTileId, RasterMapping, Tile, TileId, TileKey, TileLoadState,
    TileRefine,
};
pub use traversal::ViewUpdateResult;
pub use tileset::{Tileset, TilesetExternals};
