//! Tileset content manager: drives the per-tile load state machine
//!
//! Fetching and parsing happen on worker tasks; every state transition
//! above `ContentLoading` happens here, on the main thread, while draining
//! the completion queues.

use std::sync::Arc;

use crate::asset::accessor::AssetAccessor;
use crate::content::{Axis, ContentRegistry, LoadInput, TileContent};
use crate::core::error::Error;
use crate::core::types::Result;
use crate::overlay::RasterOverlayTileProvider;
use crate::scheduler::{Scheduler, TaskQueue};
use crate::subtree::SubtreeAvailability;
use crate::tileset::context::{ImplicitAvailability, TileContext};
use crate::tileset::json;
use crate::tileset::tile::{
    ContextKey, OctreeTileId, QuadtreeTileId, Tile, TileId, TileKey, TileLoadState, TilePool,
};

struct LoadOutcome {
    tile: TileKey,
    url: String,
    status: u16,
    result: Result<TileContent>,
}

struct SubtreeOutcome {
    context: ContextKey,
    address_key: (u32, u64),
    tile: TileKey,
    url: String,
    result: Result<SubtreeAvailability>,
}

/// Owns the load pipeline, the in-flight counters, and the byte counter
pub struct ContentManager {
    accessor: Arc<dyn AssetAccessor>,
    registry: Arc<ContentRegistry>,
    scheduler: Arc<Scheduler>,
    outcomes: TaskQueue<LoadOutcome>,
    subtree_outcomes: TaskQueue<SubtreeOutcome>,
    tiles_loading: u32,
    subtrees_loading: u32,
    tile_data_bytes: usize,
}

impl ContentManager {
    pub fn new(
        accessor: Arc<dyn AssetAccessor>,
        registry: Arc<ContentRegistry>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            accessor,
            registry,
            scheduler,
            outcomes: TaskQueue::new(),
            subtree_outcomes: TaskQueue::new(),
            tiles_loading: 0,
            subtrees_loading: 0,
            tile_data_bytes: 0,
        }
    }

    pub fn accessor(&self) -> &Arc<dyn AssetAccessor> {
        &self.accessor
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Number of tile content loads currently in flight or undrained
    pub fn tiles_loading_count(&self) -> u32 {
        self.tiles_loading
    }

    pub fn subtrees_loading_count(&self) -> u32 {
        self.subtrees_loading
    }

    /// Total decoded bytes across live tile content
    pub fn tile_data_bytes(&self) -> usize {
        self.tile_data_bytes
    }

    /// Start loading a tile's content
    ///
    /// Only acts on `Unloaded` tiles, so a second call during
    /// `ContentLoading` is a no-op.
    pub fn load_tile_content(
        &mut self,
        pool: &mut TilePool,
        contexts: &[TileContext],
        key: TileKey,
        up_axis: Axis,
    ) {
        let tile = pool.get(key);
        if tile.state != TileLoadState::Unloaded {
            return;
        }

        let context = &contexts[tile.context.0 as usize];
        let url = match context.resolved_content_url(&tile.id) {
            Some(url) => url,
            None => return,
        };
        let headers = context.request_headers.clone();

        pool.get_mut(key).state = TileLoadState::ContentLoading;
        self.tiles_loading += 1;

        let accessor = self.accessor.clone();
        let registry = self.registry.clone();
        let sender = self.outcomes.sender();
        self.scheduler.spawn_worker(move || {
            let (status, result) = match accessor.get(&url, &headers) {
                Err(e) => (0, Err(e)),
                Ok(response) => {
                    let status = response.status_code;
                    if !response.is_success() {
                        (
                            status,
                            Err(Error::Http {
                                status,
                                url: url.clone(),
                            }),
                        )
                    } else {
                        let input = LoadInput {
                            url: &url,
                            content_type: &response.content_type,
                            data: &response.data,
                            up_axis,
                        };
                        (status, registry.dispatch(&input))
                    }
                }
            };
            sender.send(LoadOutcome {
                tile: key,
                url,
                status,
                result,
            });
        });
    }

    /// Apply up to `max` completed content loads
    ///
    /// Returns the tiles that failed with HTTP 401 in a context that can
    /// refresh credentials, for the token-refresh controller.
    pub fn process_outcomes(
        &mut self,
        pool: &mut TilePool,
        contexts: &[TileContext],
        max: usize,
    ) -> Vec<TileKey> {
        let mut auth_failed = Vec::new();

        for outcome in self.outcomes.drain(max) {
            self.tiles_loading = self.tiles_loading.saturating_sub(1);
            let context_key = pool.get(outcome.tile).context;
            let refreshable = contexts[context_key.0 as usize].refresh_on_auth_failure;
            let tile = pool.get_mut(outcome.tile);
            tile.http_status = outcome.status;

            match outcome.result {
                Ok(content) => {
                    let bytes = content.byte_size();
                    tile.content_byte_size = bytes;
                    self.tile_data_bytes += bytes;
                    tile.content = Some(content);
                    tile.state = TileLoadState::ContentLoaded;
                }
                Err(e) if e.is_auth() && refreshable => {
                    log::warn!("Authorization failed for tile {}", outcome.url);
                    tile.state = TileLoadState::FailedTemporarily;
                    auth_failed.push(outcome.tile);
                }
                Err(e) if e.is_retryable() && !e.is_auth() => {
                    log::warn!("Temporarily failed to load tile {}: {}", outcome.url, e);
                    tile.state = TileLoadState::FailedTemporarily;
                }
                Err(e) => {
                    log::error!("Failed to load tile {}: {}", outcome.url, e);
                    tile.state = TileLoadState::Failed;
                }
            }
        }

        auth_failed
    }

    /// Drive a `ContentLoaded` tile's main-thread work and promote it to
    /// `Done`
    ///
    /// External tileset content grafts its root tile as a child; tiles in
    /// an implicit context materialize their children from availability.
    pub fn update_tile_content(
        &mut self,
        pool: &mut TilePool,
        contexts: &mut Vec<TileContext>,
        key: TileKey,
        request_water_mask: bool,
    ) {
        if pool.get(key).state != TileLoadState::ContentLoaded {
            return;
        }

        if pool.get(key).is_external_tileset() {
            self.graft_external_tileset(pool, contexts, key, request_water_mask);
        }

        pool.get_mut(key).state = TileLoadState::Done;

        let context_key = pool.get(key).context;
        if contexts[context_key.0 as usize].implicit.is_some() {
            populate_implicit_children(pool, contexts, key);
        }
    }

    fn graft_external_tileset(
        &mut self,
        pool: &mut TilePool,
        contexts: &mut Vec<TileContext>,
        key: TileKey,
        request_water_mask: bool,
    ) {
        if !pool.get(key).children.is_empty() {
            return;
        }

        let (root_url, tileset) = match &pool.get(key).content {
            Some(TileContent::External { root_url, tileset }) => {
                (root_url.clone(), tileset.clone())
            }
            _ => return,
        };

        let parent_context = pool.get(key).context;
        let mut new_context = contexts[parent_context.0 as usize].derive();
        new_context.base_url = root_url.clone();
        let new_key = ContextKey(contexts.len() as u32);
        contexts.push(new_context);

        match json::create_root_from_json(pool, contexts, new_key, &tileset, request_water_mask) {
            Ok(external_root) => {
                pool.get_mut(external_root).parent = Some(key);
                pool.get_mut(key).children.push(external_root);
            }
            Err(e) => {
                log::error!("Failed to create tiles for external tileset {}: {}", root_url, e);
            }
        }
    }

    /// Release a tile's content if nothing references it
    ///
    /// Returns false when the tile is mid-load or has a raster mapping in
    /// flight; the caller keeps it and moves on.
    pub fn unload_tile_content(
        &mut self,
        pool: &mut TilePool,
        overlays: &mut [RasterOverlayTileProvider],
        key: TileKey,
    ) -> bool {
        match pool.get(key).state {
            TileLoadState::ContentLoading => return false,
            TileLoadState::Unloaded => return true,
            _ => {}
        }

        let in_flight = pool.get(key).raster_mappings.iter().any(|mapping| {
            overlays
                .get(mapping.overlay)
                .and_then(|provider| provider.tile(mapping.tile))
                .is_some_and(|tile| tile.state == crate::overlay::OverlayTileState::Loading)
        });
        if in_flight {
            return false;
        }

        let tile = pool.get_mut(key);
        tile.state = TileLoadState::Unloading;

        let mappings = std::mem::take(&mut tile.raster_mappings);
        self.tile_data_bytes = self.tile_data_bytes.saturating_sub(tile.content_byte_size);
        tile.content_byte_size = 0;
        tile.content = None;
        tile.http_status = 0;
        tile.state = TileLoadState::Unloaded;

        for mapping in mappings {
            if let Some(provider) = overlays.get_mut(mapping.overlay) {
                provider.remove_tile(mapping.tile);
            }
        }

        true
    }

    /// Start loading the subtree block covering the given tile
    pub fn load_subtree(
        &mut self,
        pool: &TilePool,
        contexts: &mut [TileContext],
        key: TileKey,
    ) {
        let tile = pool.get(key);
        let context_key = tile.context;
        let context = &contexts[context_key.0 as usize];

        let implicit = match &context.implicit {
            Some(implicit) => implicit,
            None => return,
        };
        let address = match implicit.subtree_address_for(&tile.id) {
            Some(address) => address,
            None => return,
        };
        if !implicit.subtree_needs_load(&tile.id) {
            return;
        }
        let url = match context.resolved_subtree_url(&address) {
            Some(url) => url,
            None => return,
        };
        let headers = context.request_headers.clone();
        let scheme = implicit.scheme;
        let subtree_levels = implicit.subtree_levels;

        let implicit = contexts[context_key.0 as usize].implicit.as_mut().unwrap();
        if let ImplicitAvailability::Subtrees { loading, .. } = &mut implicit.availability {
            loading.insert(address.key());
        }

        self.subtrees_loading += 1;

        let accessor = self.accessor.clone();
        let sender = self.subtree_outcomes.sender();
        self.scheduler.spawn_worker(move || {
            let result = accessor
                .get(&url, &headers)
                .and_then(|response| {
                    if response.is_success() {
                        Ok(response)
                    } else {
                        Err(Error::Http {
                            status: response.status_code,
                            url: url.clone(),
                        })
                    }
                })
                .and_then(|response| {
                    SubtreeAvailability::decode(scheme, subtree_levels, &response.data)
                });
            sender.send(SubtreeOutcome {
                context: context_key,
                address_key: address.key(),
                tile: key,
                url,
                result,
            });
        });
    }

    /// Apply up to `max` completed subtree loads
    pub fn process_subtree_outcomes(
        &mut self,
        pool: &mut TilePool,
        contexts: &mut Vec<TileContext>,
        max: usize,
    ) {
        for outcome in self.subtree_outcomes.drain(max) {
            self.subtrees_loading = self.subtrees_loading.saturating_sub(1);

            let context = &mut contexts[outcome.context.0 as usize];
            let implicit = match context.implicit.as_mut() {
                Some(implicit) => implicit,
                None => continue,
            };
            if let ImplicitAvailability::Subtrees {
                loaded, loading, ..
            } = &mut implicit.availability
            {
                loading.remove(&outcome.address_key);
                match outcome.result {
                    Ok(subtree) => {
                        loaded.insert(outcome.address_key, subtree);
                    }
                    Err(e) => {
                        log::error!("Failed to load subtree {}: {}", outcome.url, e);
                        continue;
                    }
                }
            }

            // The subtree's root tile can now materialize its children
            if pool.get(outcome.tile).state == TileLoadState::Done {
                populate_implicit_children(pool, contexts, outcome.tile);
            }
        }
    }
}

/// Create the implicit children of a tile from its context's availability
///
/// Does nothing until the covering subtree block has loaded; a tile only
/// ever gains children once.
pub fn populate_implicit_children(
    pool: &mut TilePool,
    contexts: &[TileContext],
    key: TileKey,
) {
    if !pool.get(key).children.is_empty() {
        return;
    }

    let context_key = pool.get(key).context;
    let implicit = match &contexts[context_key.0 as usize].implicit {
        Some(implicit) => implicit,
        None => return,
    };

    let (level, x, y, z, is_octree) = match &pool.get(key).id {
        TileId::Quadtree(q) => (q.level, q.x, q.y, 0, false),
        TileId::Octree(o) => (o.level, o.x, o.y, o.z, true),
        _ => return,
    };

    let subtree = match &implicit.availability {
        ImplicitAvailability::Complete => {
            if level >= implicit.maximum_level {
                return;
            }
            None
        }
        ImplicitAvailability::Subtrees { loaded, .. } => {
            let id = &pool.get(key).id;
            let address = match implicit.subtree_address_for(id) {
                Some(address) => address,
                None => return,
            };
            match loaded.get(&address.key()) {
                Some(subtree) => Some((subtree, implicit.relative_in_subtree(id).unwrap())),
                // Not loaded yet; children appear when it is
                None => return,
            }
        }
    };

    let (parent_ge, parent_refine, parent_transform) = {
        let tile = pool.get(key);
        (tile.geometric_error, tile.refine, tile.transform)
    };

    let z_slots = if is_octree { 2 } else { 1 };
    let mut new_children = Vec::new();

    for dz in 0..z_slots {
        for dy in 0..2u32 {
            for dx in 0..2u32 {
                let child_level = level + 1;
                let (child_x, child_y, child_z) = ((x << 1) | dx, (y << 1) | dy, (z << 1) | dz);

                if let Some((subtree, (rel_level, rel_morton))) = &subtree {
                    let child_index = if is_octree {
                        crate::math::morton::encode_morton_3d(dx, dy, dz)
                    } else {
                        crate::math::morton::encode_morton_2d(dx, dy)
                    };
                    let child_bits = if is_octree { 3 } else { 2 };
                    let child_rel_level = rel_level + 1;
                    let child_rel_morton = (rel_morton << child_bits) | child_index;

                    let exists = if child_rel_level == subtree.subtree_levels() {
                        // Boundary: the child roots the next subtree block
                        subtree.is_subtree_available(child_rel_morton)
                    } else {
                        subtree.is_tile_available(child_rel_level, child_rel_morton)
                    };
                    if !exists {
                        continue;
                    }
                }

                let volume = implicit.volume_for(
                    child_level,
                    child_x,
                    child_y,
                    if is_octree { Some(child_z) } else { None },
                );

                let mut child = Tile::new(context_key, volume);
                child.id = if is_octree {
                    TileId::Octree(OctreeTileId::new(child_level, child_x, child_y, child_z))
                } else {
                    TileId::Quadtree(QuadtreeTileId::new(child_level, child_x, child_y))
                };
                child.geometric_error = parent_ge * 0.5;
                child.refine = parent_refine;
                child.transform = parent_transform;
                child.parent = Some(key);
                new_children.push(pool.allocate(child));
            }
        }
    }

    pool.get_mut(key).children.extend(new_children);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::accessor::{Response, StaticAccessor};
    use crate::content::b3dm::make_b3dm;
    use crate::content::gltf::make_glb;
    use crate::core::types::DVec3;
    use crate::math::globe::GlobeRectangle;
    use crate::math::volume::{BoundingRegion, BoundingSphere, BoundingVolume};
    use crate::subtree::{bitstream_with, make_subtree_binary, AvailabilityBitfield, SubdivisionScheme};
    use crate::tileset::context::{ImplicitAvailability, ImplicitContext};
    use std::collections::{HashMap, HashSet};

    fn make_manager(accessor: Arc<StaticAccessor>) -> ContentManager {
        ContentManager::new(
            accessor,
            Arc::new(ContentRegistry::with_defaults()),
            Arc::new(Scheduler::immediate()),
        )
    }

    fn make_setup() -> (TilePool, Vec<TileContext>, TileKey) {
        let mut pool = TilePool::new();
        let contexts = vec![TileContext::new("https://x.com/tileset.json".to_string())];
        let mut tile = Tile::new(
            ContextKey(0),
            BoundingVolume::Sphere(BoundingSphere::new(DVec3::ZERO, 10.0)),
        );
        tile.id = TileId::Url("a.b3dm".to_string());
        let key = pool.allocate(tile);
        (pool, contexts, key)
    }

    #[test]
    fn test_load_success_path() {
        let accessor = Arc::new(StaticAccessor::new());
        accessor.insert(
            "https://x.com/a.b3dm",
            Response::ok("application/octet-stream", make_b3dm(&make_glb(b"{}", &[1, 2]))),
        );
        let mut manager = make_manager(accessor);
        let (mut pool, contexts, key) = make_setup();

        manager.load_tile_content(&mut pool, &contexts, key, Axis::Y);
        assert_eq!(pool.get(key).state, TileLoadState::ContentLoading);
        assert_eq!(manager.tiles_loading_count(), 1);

        // Idempotent while loading
        manager.load_tile_content(&mut pool, &contexts, key, Axis::Y);
        assert_eq!(manager.tiles_loading_count(), 1);

        let auth_failed = manager.process_outcomes(&mut pool, &contexts, 100);
        assert!(auth_failed.is_empty());
        assert_eq!(pool.get(key).state, TileLoadState::ContentLoaded);
        assert_eq!(pool.get(key).http_status, 200);
        assert!(manager.tile_data_bytes() > 0);
        assert_eq!(manager.tiles_loading_count(), 0);
    }

    #[test]
    fn test_parse_failure_is_terminal() {
        let accessor = Arc::new(StaticAccessor::new());
        accessor.insert(
            "https://x.com/a.b3dm",
            Response::ok("application/octet-stream", b"b3dm".to_vec()),
        );
        let mut manager = make_manager(accessor);
        let (mut pool, contexts, key) = make_setup();

        manager.load_tile_content(&mut pool, &contexts, key, Axis::Y);
        manager.process_outcomes(&mut pool, &contexts, 100);
        assert_eq!(pool.get(key).state, TileLoadState::Failed);
    }

    #[test]
    fn test_network_failure_is_temporary() {
        let accessor = Arc::new(StaticAccessor::new());
        let mut manager = make_manager(accessor);
        let (mut pool, contexts, key) = make_setup();

        manager.load_tile_content(&mut pool, &contexts, key, Axis::Y);
        manager.process_outcomes(&mut pool, &contexts, 100);
        assert_eq!(pool.get(key).state, TileLoadState::FailedTemporarily);
    }

    #[test]
    fn test_auth_failure_reported_when_refreshable() {
        let accessor = Arc::new(StaticAccessor::new());
        accessor.insert("https://x.com/a.b3dm", Response::with_status(401));
        let mut manager = make_manager(accessor);
        let (mut pool, mut contexts, key) = make_setup();
        contexts[0].refresh_on_auth_failure = true;

        manager.load_tile_content(&mut pool, &contexts, key, Axis::Y);
        let auth_failed = manager.process_outcomes(&mut pool, &contexts, 100);
        assert_eq!(auth_failed, vec![key]);
        assert_eq!(pool.get(key).state, TileLoadState::FailedTemporarily);
        assert_eq!(pool.get(key).http_status, 401);
    }

    #[test]
    fn test_auth_failure_terminal_without_refresh() {
        let accessor = Arc::new(StaticAccessor::new());
        accessor.insert("https://x.com/a.b3dm", Response::with_status(401));
        let mut manager = make_manager(accessor);
        let (mut pool, contexts, key) = make_setup();

        manager.load_tile_content(&mut pool, &contexts, key, Axis::Y);
        let auth_failed = manager.process_outcomes(&mut pool, &contexts, 100);
        assert!(auth_failed.is_empty());
        assert_eq!(pool.get(key).state, TileLoadState::Failed);
    }

    #[test]
    fn test_unload_restores_bytes() {
        let accessor = Arc::new(StaticAccessor::new());
        accessor.insert(
            "https://x.com/a.b3dm",
            Response::ok("application/octet-stream", make_b3dm(&make_glb(b"{}", &[1, 2]))),
        );
        let mut manager = make_manager(accessor);
        let (mut pool, mut contexts, key) = make_setup();

        manager.load_tile_content(&mut pool, &contexts, key, Axis::Y);
        manager.process_outcomes(&mut pool, &contexts, 100);
        manager.update_tile_content(&mut pool, &mut contexts, key, false);
        assert_eq!(pool.get(key).state, TileLoadState::Done);
        assert!(manager.tile_data_bytes() > 0);

        let mut overlays: Vec<RasterOverlayTileProvider> = Vec::new();
        assert!(manager.unload_tile_content(&mut pool, &mut overlays, key));
        assert_eq!(pool.get(key).state, TileLoadState::Unloaded);
        assert_eq!(manager.tile_data_bytes(), 0);
        assert!(pool.get(key).content.is_none());
    }

    #[test]
    fn test_unload_refuses_loading_tile() {
        let accessor = Arc::new(StaticAccessor::new());
        let mut manager = ContentManager::new(
            accessor,
            Arc::new(ContentRegistry::with_defaults()),
            // Pool scheduler so the load stays in flight
            Arc::new(Scheduler::new()),
        );
        let (mut pool, contexts, key) = make_setup();

        manager.load_tile_content(&mut pool, &contexts, key, Axis::Y);
        assert_eq!(pool.get(key).state, TileLoadState::ContentLoading);

        let mut overlays: Vec<RasterOverlayTileProvider> = Vec::new();
        assert!(!manager.unload_tile_content(&mut pool, &mut overlays, key));
    }

    #[test]
    fn test_graft_external_tileset() {
        let accessor = Arc::new(StaticAccessor::new());
        let mut manager = make_manager(accessor);
        let (mut pool, mut contexts, key) = make_setup();

        let external: serde_json::Value = serde_json::from_str(
            r#"{
                "root": {
                    "boundingVolume": {"sphere": [0, 0, 0, 5]},
                    "geometricError": 10.0,
                    "content": {"uri": "inner.b3dm"}
                }
            }"#,
        )
        .unwrap();
        pool.get_mut(key).content = Some(TileContent::External {
            root_url: "https://y.com/sub/tileset.json".to_string(),
            tileset: external,
        });
        pool.get_mut(key).state = TileLoadState::ContentLoaded;

        manager.update_tile_content(&mut pool, &mut contexts, key, false);
        assert_eq!(pool.get(key).state, TileLoadState::Done);
        assert_eq!(pool.get(key).children.len(), 1);
        // The tile is logically refined, never renderable itself
        assert!(!pool.get(key).is_renderable());

        let external_root = pool.get(key).children[0];
        assert_eq!(pool.get(external_root).parent, Some(key));
        // The grafted subtree resolves URLs against the external base
        let external_context = &contexts[pool.get(external_root).context.0 as usize];
        assert_eq!(
            external_context.resolved_content_url(&pool.get(external_root).id),
            Some("https://y.com/sub/inner.b3dm".to_string())
        );
    }

    fn implicit_setup(
        subtree: Option<SubtreeAvailability>,
    ) -> (TilePool, Vec<TileContext>, TileKey) {
        let mut pool = TilePool::new();
        let mut context = TileContext::new("https://x.com/tileset.json".to_string());

        let mut loaded = HashMap::new();
        if let Some(subtree) = subtree {
            loaded.insert((0u32, 0u64), subtree);
        }
        context.implicit = Some(ImplicitContext {
            scheme: SubdivisionScheme::Quadtree,
            subtree_levels: 2,
            maximum_level: 4,
            content_templates: vec!["content/{level}/{x}/{y}.b3dm".to_string()],
            root_volume: BoundingVolume::Region(BoundingRegion::new(
                GlobeRectangle::from_degrees(-10.0, -10.0, 10.0, 10.0),
                0.0,
                100.0,
            )),
            root_tiles_x: 1,
            availability: ImplicitAvailability::Subtrees {
                subtree_template: "sub/{level}/{x}/{y}.subtree".to_string(),
                loaded,
                loading: HashSet::new(),
            },
        });

        let mut tile = Tile::new(
            ContextKey(0),
            BoundingVolume::Region(BoundingRegion::new(
                GlobeRectangle::from_degrees(-10.0, -10.0, 10.0, 10.0),
                0.0,
                100.0,
            )),
        );
        tile.id = TileId::Quadtree(QuadtreeTileId::new(0, 0, 0));
        tile.geometric_error = 1000.0;
        let key = pool.allocate(tile);
        (pool, vec![context], key)
    }

    #[test]
    fn test_populate_from_subtree_availability() {
        // Tiles (1,0,0) and (1,1,0) exist: level-1 bits start at index 1,
        // morton of (0,0) is 0 and of (1,0) is 1
        let subtree = SubtreeAvailability::new(
            SubdivisionScheme::Quadtree,
            2,
            bitstream_with(&[0, 1, 2]),
            vec![AvailabilityBitfield::Constant(true)],
            AvailabilityBitfield::Constant(false),
        );
        let (mut pool, contexts, key) = implicit_setup(Some(subtree));

        populate_implicit_children(&mut pool, &contexts, key);
        let children = &pool.get(key).children;
        assert_eq!(children.len(), 2);

        let first = pool.get(pool.get(key).children[0]);
        assert_eq!(first.id, TileId::Quadtree(QuadtreeTileId::new(1, 0, 0)));
        assert_eq!(first.geometric_error, 500.0);
        assert_eq!(first.parent, Some(key));

        let second = pool.get(pool.get(key).children[1]);
        assert_eq!(second.id, TileId::Quadtree(QuadtreeTileId::new(1, 1, 0)));
    }

    #[test]
    fn test_populate_without_subtree_is_deferred() {
        let (mut pool, contexts, key) = implicit_setup(None);
        populate_implicit_children(&mut pool, &contexts, key);
        assert!(pool.get(key).children.is_empty());
    }

    #[test]
    fn test_populate_runs_once() {
        let subtree = SubtreeAvailability::new(
            SubdivisionScheme::Quadtree,
            2,
            AvailabilityBitfield::Constant(true),
            vec![AvailabilityBitfield::Constant(true)],
            AvailabilityBitfield::Constant(false),
        );
        let (mut pool, contexts, key) = implicit_setup(Some(subtree));

        populate_implicit_children(&mut pool, &contexts, key);
        assert_eq!(pool.get(key).children.len(), 4);
        populate_implicit_children(&mut pool, &contexts, key);
        assert_eq!(pool.get(key).children.len(), 4);
    }

    #[test]
    fn test_subtree_load_and_apply() {
        let accessor = Arc::new(StaticAccessor::new());
        let blob = make_subtree_binary(
            &bitstream_with(&[0, 1]),
            &AvailabilityBitfield::Constant(true),
            &AvailabilityBitfield::Constant(false),
        );
        accessor.insert("https://x.com/sub/0/0/0.subtree", Response::ok("application/octet-stream", blob));

        let mut manager = make_manager(accessor.clone());
        let (mut pool, mut contexts, key) = implicit_setup(None);
        pool.get_mut(key).state = TileLoadState::Done;

        manager.load_subtree(&pool, &mut contexts, key);
        assert_eq!(manager.subtrees_loading_count(), 1);

        // A second request for the same block is suppressed
        manager.load_subtree(&pool, &mut contexts, key);
        assert_eq!(manager.subtrees_loading_count(), 1);
        assert_eq!(accessor.request_count("https://x.com/sub/0/0/0.subtree"), 1);

        manager.process_subtree_outcomes(&mut pool, &mut contexts, 100);
        assert_eq!(manager.subtrees_loading_count(), 0);
        // The Done root materialized its children right away
        assert_eq!(pool.get(key).children.len(), 1);
    }

    #[test]
    fn test_boundary_children_follow_child_subtree_bits() {
        // 1-level subtree: every child of the root sits on the block
        // boundary and exists only where childSubtreeAvailability says so
        let subtree = SubtreeAvailability::new(
            SubdivisionScheme::Quadtree,
            1,
            AvailabilityBitfield::Constant(true),
            vec![AvailabilityBitfield::Constant(true)],
            bitstream_with(&[1, 3]),
        );
        let (mut pool, mut contexts, key) = implicit_setup(Some(subtree));
        contexts[0].implicit.as_mut().unwrap().subtree_levels = 1;

        populate_implicit_children(&mut pool, &contexts, key);
        let children: Vec<_> = pool
            .get(key)
            .children
            .iter()
            .map(|&c| pool.get(c).id.clone())
            .collect();
        assert_eq!(
            children,
            vec![
                TileId::Quadtree(QuadtreeTileId::new(1, 1, 0)),
                TileId::Quadtree(QuadtreeTileId::new(1, 1, 1)),
            ]
        );
    }

    #[test]
    fn test_complete_availability_populates_until_max_level() {
        let (mut pool, mut contexts, key) = implicit_setup(None);
        {
            let implicit = contexts[0].implicit.as_mut().unwrap();
            implicit.availability = ImplicitAvailability::Complete;
            implicit.maximum_level = 1;
        }

        populate_implicit_children(&mut pool, &contexts, key);
        assert_eq!(pool.get(key).children.len(), 4);

        // Children at maximum_level have no further children
        let child = pool.get(key).children[0];
        populate_implicit_children(&mut pool, &contexts, child);
        assert!(pool.get(child).children.is_empty());
    }
}
