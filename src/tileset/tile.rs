//! The per-node tile data, its pool, and the LRU threading

use crate::content::TileContent;
use crate::core::types::DMat4;
use crate::math::volume::BoundingVolume;
use crate::overlay::OverlayTileKey;
use crate::tileset::selection::TileSelectionState;

/// Address of a quadtree cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QuadtreeTileId {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl QuadtreeTileId {
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }
}

/// Address of an octree cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OctreeTileId {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl OctreeTileId {
    pub fn new(level: u32, x: u32, y: u32, z: u32) -> Self {
        Self { level, x, y, z }
    }
}

/// Identity of a tile: where its content comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileId {
    /// A content URL, possibly relative to the context's base URL. Empty
    /// means the tile has no content of its own.
    Url(String),
    Quadtree(QuadtreeTileId),
    Octree(OctreeTileId),
    /// Geometry derived by subdividing the parent's mesh
    UpsampledFromParent,
}

impl TileId {
    pub fn none() -> Self {
        TileId::Url(String::new())
    }

    /// Whether this identity cannot produce a content URL
    pub fn is_empty_url(&self) -> bool {
        matches!(self, TileId::Url(url) if url.is_empty())
    }

    /// Human-readable form for log messages
    pub fn description(&self) -> String {
        match self {
            TileId::Url(url) => url.clone(),
            TileId::Quadtree(id) => format!("quadtree {}/{}/{}", id.level, id.x, id.y),
            TileId::Octree(id) => format!("octree {}/{}/{}/{}", id.level, id.x, id.y, id.z),
            TileId::UpsampledFromParent => "upsampled".to_string(),
        }
    }
}

/// How drawing children relates to drawing the parent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TileRefine {
    /// Children replace the parent
    #[default]
    Replace,
    /// Children are drawn in addition to the parent
    Add,
}

/// Content load state machine
///
/// `Unloaded -> ContentLoading -> ContentLoaded -> Done` on success.
/// Failures land in `Failed` (terminal) or `FailedTemporarily`
/// (retryable). Only the traversal starts loads; only workers parse; only
/// the main thread enters `Done`, `Failed`, or `Unloaded`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TileLoadState {
    #[default]
    Unloaded,
    ContentLoading,
    ContentLoaded,
    Done,
    Failed,
    FailedTemporarily,
    /// Transient during eviction
    Unloading,
}

/// Handle into the tile pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileKey(pub u32);

/// A raster overlay tile draped over this tile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterMapping {
    /// Index of the overlay provider within the tileset
    pub overlay: usize,
    pub tile: OverlayTileKey,
}

/// Handle into the context arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextKey(pub u32);

/// A node in the spatial index
#[derive(Debug)]
pub struct Tile {
    pub id: TileId,
    pub bounding_volume: BoundingVolume,
    pub content_bounding_volume: Option<BoundingVolume>,
    pub viewer_request_volume: Option<BoundingVolume>,
    /// World-space deviation of this tile's approximation, >= 0
    pub geometric_error: f64,
    pub refine: TileRefine,
    /// Accumulated transform: the parent's times the tile-local one
    pub transform: DMat4,
    pub parent: Option<TileKey>,
    pub children: Vec<TileKey>,
    pub context: ContextKey,
    pub content: Option<TileContent>,
    pub state: TileLoadState,
    /// HTTP status of the most recent content response
    pub http_status: u16,
    pub selection: TileSelectionState,
    /// Refine regardless of screen-space error (implicit tileset dummies)
    pub unconditionally_refine: bool,
    pub raster_mappings: Vec<RasterMapping>,
    /// Decoded payload size counted against the cache budget
    pub content_byte_size: usize,

    pub(crate) lru_prev: Option<TileKey>,
    pub(crate) lru_next: Option<TileKey>,
    pub(crate) in_lru: bool,
}

impl Tile {
    pub fn new(context: ContextKey, bounding_volume: BoundingVolume) -> Self {
        Self {
            id: TileId::none(),
            bounding_volume,
            content_bounding_volume: None,
            viewer_request_volume: None,
            geometric_error: 0.0,
            refine: TileRefine::default(),
            transform: DMat4::IDENTITY,
            parent: None,
            children: Vec::new(),
            context,
            content: None,
            state: TileLoadState::default(),
            http_status: 0,
            selection: TileSelectionState::default(),
            unconditionally_refine: false,
            raster_mappings: Vec::new(),
            content_byte_size: 0,
            lru_prev: None,
            lru_next: None,
            in_lru: false,
        }
    }

    /// Whether this tile points at another tileset instead of geometry
    pub fn is_external_tileset(&self) -> bool {
        matches!(self.content, Some(TileContent::External { .. }))
    }

    /// Whether the tile can go on screen right now
    ///
    /// External tilesets are never renderable themselves; they are
    /// logically refined into the external root.
    pub fn is_renderable(&self) -> bool {
        self.state == TileLoadState::Done && !self.is_external_tileset()
    }
}

/// Arena of tiles owned by a tileset
///
/// Keys index into the arena and stay valid for the life of the tileset;
/// tiles are never removed individually, eviction only drops content.
#[derive(Default)]
pub struct TilePool {
    tiles: Vec<Tile>,
}

impl TilePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, tile: Tile) -> TileKey {
        let key = TileKey(self.tiles.len() as u32);
        self.tiles.push(tile);
        key
    }

    pub fn get(&self, key: TileKey) -> &Tile {
        &self.tiles[key.0 as usize]
    }

    pub fn get_mut(&mut self, key: TileKey) -> &mut Tile {
        &mut self.tiles[key.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = TileKey> {
        (0..self.tiles.len() as u32).map(TileKey)
    }
}

/// Doubly-linked list threading tiles in last-visited order
///
/// The traversal appends visited tiles at the tail; eviction consumes from
/// the head, so the head end holds the tiles untouched the longest.
#[derive(Default)]
pub struct LruList {
    head: Option<TileKey>,
    tail: Option<TileKey>,
}

impl LruList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<TileKey> {
        self.head
    }

    pub fn next(&self, pool: &TilePool, key: TileKey) -> Option<TileKey> {
        pool.get(key).lru_next
    }

    pub fn contains(&self, pool: &TilePool, key: TileKey) -> bool {
        pool.get(key).in_lru
    }

    /// Move (or insert) a tile to the most-recently-visited end
    pub fn insert_at_tail(&mut self, pool: &mut TilePool, key: TileKey) {
        if pool.get(key).in_lru {
            if self.tail == Some(key) {
                return;
            }
            self.unlink(pool, key);
        }

        let tile = pool.get_mut(key);
        tile.in_lru = true;
        tile.lru_prev = self.tail;
        tile.lru_next = None;

        match self.tail {
            Some(tail) => pool.get_mut(tail).lru_next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
    }

    /// Remove a tile from the list
    pub fn remove(&mut self, pool: &mut TilePool, key: TileKey) {
        if !pool.get(key).in_lru {
            return;
        }
        self.unlink(pool, key);
        let tile = pool.get_mut(key);
        tile.in_lru = false;
        tile.lru_prev = None;
        tile.lru_next = None;
    }

    fn unlink(&mut self, pool: &mut TilePool, key: TileKey) {
        let (prev, next) = {
            let tile = pool.get(key);
            (tile.lru_prev, tile.lru_next)
        };

        match prev {
            Some(prev) => pool.get_mut(prev).lru_next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => pool.get_mut(next).lru_prev = prev,
            None => self.tail = prev,
        }
    }
}
