//! The per-frame tile selection algorithm
//!
//! One depth-first pass over the tree classifies every visited tile as
//! rendered, refined, culled, or kicked, and fills three priority-ordered
//! load queues plus the subtree queue as a side effect. Selection never
//! mutates content; it only advances `ContentLoaded` tiles to `Done`,
//! updates selection state, and enqueues loads.

use crate::math::view::ViewState;
use crate::math::volume::BoundingVolume;
use crate::overlay::OverlayTileState;
use crate::tileset::options::FogDensityAtHeight;
use crate::tileset::selection::{SelectionResult, TileSelectionState};
use crate::tileset::tile::{Tile, TileKey, TileLoadState, TileRefine};
use crate::tileset::tileset::Tileset;

/// What one `update_view` call decided
#[derive(Clone, Debug, Default)]
pub struct ViewUpdateResult {
    pub tiles_to_render: Vec<TileKey>,
    pub tiles_to_no_longer_render: Vec<TileKey>,
    pub tiles_visited: u32,
    pub culled_tiles_visited: u32,
    pub tiles_culled: u32,
    pub max_depth_visited: u32,
    pub tiles_loading_high_priority: u32,
    pub tiles_loading_medium_priority: u32,
    pub tiles_loading_low_priority: u32,
}

impl ViewUpdateResult {
    pub(crate) fn reset(&mut self) {
        self.tiles_to_render.clear();
        self.tiles_to_no_longer_render.clear();
        self.tiles_visited = 0;
        self.culled_tiles_visited = 0;
        self.tiles_culled = 0;
        self.max_depth_visited = 0;
        self.tiles_loading_high_priority = 0;
        self.tiles_loading_medium_priority = 0;
        self.tiles_loading_low_priority = 0;
    }
}

/// Everything fixed for the duration of one frame's traversal
pub(crate) struct FrameState {
    pub frustums: Vec<ViewState>,
    pub fog_densities: Vec<f64>,
    pub last_frame: u32,
    pub current_frame: u32,
}

/// Aggregate of what happened below a tile during traversal
#[derive(Clone, Copy, Debug)]
pub(crate) struct TraversalDetails {
    /// AND across visited descendants
    pub all_are_renderable: bool,
    /// OR across visited descendants
    pub any_were_rendered_last_frame: bool,
    /// SUM across visited descendants
    pub not_yet_renderable_count: u32,
}

impl Default for TraversalDetails {
    fn default() -> Self {
        Self {
            all_are_renderable: true,
            any_were_rendered_last_frame: false,
            not_yet_renderable_count: 0,
        }
    }
}

/// An entry in a load queue; lower priority values load first
#[derive(Clone, Copy, Debug)]
pub(crate) struct LoadRecord {
    pub key: TileKey,
    pub priority: f64,
}

/// Which of the three content load queues to target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoadQueueKind {
    High,
    Medium,
    Low,
}

/// Interpolate the fog density for a camera from the height table
pub(crate) fn compute_fog_density(table: &[FogDensityAtHeight], view: &ViewState) -> f64 {
    if table.is_empty() {
        return 0.0;
    }

    let height = view
        .position_cartographic()
        .map(|c| c.height)
        .unwrap_or(0.0);

    let next = table.partition_point(|entry| entry.camera_height < height);
    if next == table.len() {
        return table[table.len() - 1].fog_density;
    }
    if next == 0 {
        return table[0].fog_density;
    }

    let prev = &table[next - 1];
    let next = &table[next];
    let t = ((height - prev.camera_height) / (next.camera_height - prev.camera_height))
        .clamp(0.0, 1.0);
    prev.fog_density + (next.fog_density - prev.fog_density) * t
}

/// Whether a tile at the given distance survives the fog
fn is_visible_in_fog(distance: f64, fog_density: f64) -> bool {
    if fog_density <= 0.0 {
        return true;
    }
    let fog_scalar = distance * fog_density;
    (-(fog_scalar * fog_scalar)).exp() > 0.0
}

/// Whether a tile is visible: inside any frustum, or directly under the
/// camera when that mode is on
fn is_visible_from_camera(
    view: &ViewState,
    volume: &BoundingVolume,
    render_tiles_under_camera: bool,
) -> bool {
    if view.is_bounding_volume_visible(volume) {
        return true;
    }
    if !render_tiles_under_camera {
        return false;
    }

    match (view.position_cartographic(), volume.estimate_globe_rectangle()) {
        (Some(position), Some(rectangle)) => rectangle.contains(position),
        _ => false,
    }
}

/// We can render a tile if any of the following hold:
///  1. We rendered it (or kicked it) last frame.
///  2. It was culled last frame, or not visited at all.
///  3. It is loaded and ready right now.
/// Even when chosen here, it may still be kicked in favor of an ancestor.
fn should_render_this_tile(tile: &Tile, last_frame: u32) -> bool {
    match tile.selection.original_result(last_frame) {
        SelectionResult::Rendered | SelectionResult::Culled | SelectionResult::None => true,
        _ => tile.is_renderable(),
    }
}

impl Tileset {
    pub(crate) fn traverse(&mut self, frame: &FrameState) {
        if let Some(root) = self.root {
            self.visit_tile_if_needed(frame, 0, false, root);
        }
    }

    /// Visit a tile whose visibility is not yet known
    fn visit_tile_if_needed(
        &mut self,
        frame: &FrameState,
        depth: u32,
        ancestor_meets_sse: bool,
        key: TileKey,
    ) -> TraversalDetails {
        self.progress_tile_content(key);
        self.lru.insert_at_tail(&mut self.pool, key);

        let mut should_visit = true;
        let mut culled = false;

        {
            let tile = self.pool.get(key);
            for excluder in &self.options.excluders {
                if excluder.should_exclude(tile) {
                    culled = true;
                    should_visit = false;
                    break;
                }
            }
        }

        let bounding_volume = self.pool.get(key).bounding_volume.clone();
        if should_visit || !culled {
            let visible = frame.frustums.iter().any(|view| {
                is_visible_from_camera(
                    view,
                    &bounding_volume,
                    self.options.render_tiles_under_camera,
                )
            });
            if !visible {
                // Off-screen tiles are always culled, but only frustum
                // culling stops the visit
                culled = true;
                if self.options.enable_frustum_culling {
                    should_visit = false;
                }
            }
        }

        let distances: Vec<f64> = frame
            .frustums
            .iter()
            .map(|view| view.distance_squared_to(&bounding_volume).max(0.0).sqrt())
            .collect();

        if should_visit {
            let fog_culled = distances
                .iter()
                .zip(&frame.fog_densities)
                .all(|(&distance, &density)| !is_visible_in_fog(distance, density));
            if fog_culled {
                culled = true;
                if self.options.enable_fog_culling {
                    should_visit = false;
                }
            }
        }

        if !should_visit {
            self.mark_tile_and_children_non_rendered(frame.last_frame, key);
            self.pool.get_mut(key).selection =
                TileSelectionState::new(frame.current_frame, SelectionResult::Culled);

            // Preload this culled sibling if requested
            if self.options.preload_siblings {
                self.add_tile_to_load_queue(LoadQueueKind::Low, frame, key, &distances);
            }

            self.update_result.tiles_culled += 1;
            return TraversalDetails::default();
        }

        self.visit_tile(frame, depth, ancestor_meets_sse, key, &distances, culled)
    }

    /// Visit a tile already determined to be visible
    fn visit_tile(
        &mut self,
        frame: &FrameState,
        depth: u32,
        mut ancestor_meets_sse: bool,
        key: TileKey,
        distances: &[f64],
        culled: bool,
    ) -> TraversalDetails {
        self.update_result.tiles_visited += 1;
        self.update_result.max_depth_visited = self.update_result.max_depth_visited.max(depth);
        if culled {
            self.update_result.culled_tiles_visited += 1;
        }

        // A visible leaf always renders
        if self.pool.get(key).children.is_empty() {
            return self.render_leaf(frame, key, distances);
        }

        let unconditionally_refine = self.pool.get(key).unconditionally_refine;
        let meets_sse = self.meets_sse(frame, key, distances, culled);
        let waiting_for_children =
            self.queue_load_of_children_required_for_refinement(frame, key, distances);

        if !unconditionally_refine && (meets_sse || ancestor_meets_sse || waiting_for_children) {
            // This tile (or an ancestor) is the one we want this frame
            let render_this_tile =
                should_render_this_tile(self.pool.get(key), frame.last_frame);
            if render_this_tile {
                // Only load this tile if it, not just an ancestor, meets
                // the screen-space error
                if meets_sse && !ancestor_meets_sse {
                    self.add_tile_to_load_queue(LoadQueueKind::Medium, frame, key, distances);
                }
                return self.render_inner_tile(frame, key);
            }

            // We can't render this tile yet without making detail that was
            // visible last frame disappear, so keep rendering the
            // still-visible descendants and load this blocker at high
            // priority.
            ancestor_meets_sse = true;
            if meets_sse {
                self.add_tile_to_load_queue(LoadQueueKind::High, frame, key, distances);
            }
        }

        // Refine
        let mut queued_for_load =
            self.load_and_render_additive_refined_tile(frame, key, distances);

        let first_rendered_descendant_index = self.update_result.tiles_to_render.len();
        let load_index_low = self.load_queue_low.len();
        let load_index_medium = self.load_queue_medium.len();
        let load_index_high = self.load_queue_high.len();

        let mut details = self.visit_children(frame, depth, ancestor_meets_sse, key);

        let descendants_added =
            first_rendered_descendant_index != self.update_result.tiles_to_render.len();
        if !descendants_added {
            // Every descendant was culled even though this tile is visible
            return self.refine_to_nothing(frame, key, details.all_are_renderable);
        }

        if !details.all_are_renderable && !details.any_were_rendered_last_frame {
            // Some descendants aren't ready and none were on screen last
            // frame; kick them all and render this tile instead, while
            // their loads continue.
            queued_for_load = self.kick_descendants_and_render_tile(
                frame,
                key,
                &mut details,
                first_rendered_descendant_index,
                load_index_low,
                load_index_medium,
                load_index_high,
                queued_for_load,
                distances,
            );
        } else {
            if self.pool.get(key).refine != TileRefine::Add {
                self.mark_tile_non_rendered(frame.last_frame, key);
            }
            self.pool.get_mut(key).selection =
                TileSelectionState::new(frame.current_frame, SelectionResult::Refined);
        }

        if self.options.preload_ancestors && !queued_for_load {
            self.add_tile_to_load_queue(LoadQueueKind::Low, frame, key, distances);
        }

        details
    }

    fn render_leaf(
        &mut self,
        frame: &FrameState,
        key: TileKey,
        distances: &[f64],
    ) -> TraversalDetails {
        let last_selection = self.pool.get(key).selection;

        self.pool.get_mut(key).selection =
            TileSelectionState::new(frame.current_frame, SelectionResult::Rendered);
        self.update_result.tiles_to_render.push(key);

        self.add_tile_to_load_queue(LoadQueueKind::Medium, frame, key, distances);

        let renderable = self.pool.get(key).is_renderable();
        TraversalDetails {
            all_are_renderable: renderable,
            any_were_rendered_last_frame: last_selection.was_rendered(frame.last_frame),
            not_yet_renderable_count: u32::from(!renderable),
        }
    }

    fn render_inner_tile(&mut self, frame: &FrameState, key: TileKey) -> TraversalDetails {
        let last_selection = self.pool.get(key).selection;

        self.mark_children_non_rendered(frame.last_frame, key);
        self.pool.get_mut(key).selection =
            TileSelectionState::new(frame.current_frame, SelectionResult::Rendered);
        self.update_result.tiles_to_render.push(key);

        let renderable = self.pool.get(key).is_renderable();
        TraversalDetails {
            all_are_renderable: renderable,
            any_were_rendered_last_frame: last_selection.was_rendered(frame.last_frame),
            not_yet_renderable_count: u32::from(!renderable),
        }
    }

    fn refine_to_nothing(
        &mut self,
        frame: &FrameState,
        key: TileKey,
        are_children_renderable: bool,
    ) -> TraversalDetails {
        let last_selection = self.pool.get(key).selection;
        let mut details = TraversalDetails::default();

        if self.pool.get(key).refine == TileRefine::Add {
            details.all_are_renderable = self.pool.get(key).is_renderable();
            details.any_were_rendered_last_frame = last_selection.was_rendered(frame.last_frame);
            details.not_yet_renderable_count = u32::from(!are_children_renderable);
        } else {
            self.mark_tile_non_rendered(frame.last_frame, key);
        }

        self.pool.get_mut(key).selection =
            TileSelectionState::new(frame.current_frame, SelectionResult::Refined);
        details
    }

    /// An additively-refined tile renders alongside its children
    fn load_and_render_additive_refined_tile(
        &mut self,
        frame: &FrameState,
        key: TileKey,
        distances: &[f64],
    ) -> bool {
        if self.pool.get(key).refine != TileRefine::Add {
            return false;
        }
        self.update_result.tiles_to_render.push(key);
        self.add_tile_to_load_queue(LoadQueueKind::Medium, frame, key, distances);
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn kick_descendants_and_render_tile(
        &mut self,
        frame: &FrameState,
        key: TileKey,
        details: &mut TraversalDetails,
        first_rendered_descendant_index: usize,
        load_index_low: usize,
        load_index_medium: usize,
        load_index_high: usize,
        mut queued_for_load: bool,
        distances: &[f64],
    ) -> bool {
        let last_selection = self.pool.get(key).selection;

        // Mark the rendered descendants, and their ancestors up to this
        // tile, as kicked
        for i in first_rendered_descendant_index..self.update_result.tiles_to_render.len() {
            let mut work = Some(self.update_result.tiles_to_render[i]);
            while let Some(current) = work {
                if current == key
                    || self
                        .pool
                        .get(current)
                        .selection
                        .was_kicked(frame.current_frame)
                {
                    break;
                }
                self.pool.get_mut(current).selection.kick();
                work = self.pool.get(current).parent;
            }
        }

        // Remove the descendants from the render list and add this tile
        self.update_result
            .tiles_to_render
            .truncate(first_rendered_descendant_index);
        if self.pool.get(key).refine != TileRefine::Add {
            self.update_result.tiles_to_render.push(key);
        }
        self.pool.get_mut(key).selection =
            TileSelectionState::new(frame.current_frame, SelectionResult::Rendered);

        // If we're waiting on too many descendants, load this tile
        // INSTEAD of the descendants and report only this tile as missing,
        // until it can actually render.
        let was_rendered_last_frame = last_selection.was_rendered(frame.last_frame);
        let was_really_rendered_last_frame =
            was_rendered_last_frame && self.pool.get(key).is_renderable();

        let skip_descendant_loads = !was_really_rendered_last_frame
            && details.not_yet_renderable_count > self.options.loading_descendant_limit
            && !self.pool.get(key).is_external_tileset()
            && !self.pool.get(key).unconditionally_refine;

        if skip_descendant_loads {
            self.load_queue_low.truncate(load_index_low);
            self.load_queue_medium.truncate(load_index_medium);
            self.load_queue_high.truncate(load_index_high);

            if !queued_for_load {
                self.add_tile_to_load_queue(LoadQueueKind::Medium, frame, key, distances);
            }

            details.not_yet_renderable_count = u32::from(!self.pool.get(key).is_renderable());
            queued_for_load = true;
        }

        details.all_are_renderable = self.pool.get(key).is_renderable();
        details.any_were_rendered_last_frame = was_rendered_last_frame;

        queued_for_load
    }

    /// Visit children in declared order and fold their traversal details
    fn visit_children(
        &mut self,
        frame: &FrameState,
        depth: u32,
        ancestor_meets_sse: bool,
        key: TileKey,
    ) -> TraversalDetails {
        let children = self.pool.get(key).children.clone();
        let mut details = TraversalDetails::default();

        for child in children {
            let child_details =
                self.visit_tile_if_needed(frame, depth + 1, ancestor_meets_sse, child);
            details.all_are_renderable &= child_details.all_are_renderable;
            details.any_were_rendered_last_frame |= child_details.any_were_rendered_last_frame;
            details.not_yet_renderable_count += child_details.not_yet_renderable_count;
        }

        details
    }

    /// When holes are forbidden, refinement must wait until every child is
    /// renderable; meanwhile the children load at medium priority.
    fn queue_load_of_children_required_for_refinement(
        &mut self,
        frame: &FrameState,
        key: TileKey,
        distances: &[f64],
    ) -> bool {
        if !self.options.forbid_holes {
            return false;
        }

        let children = self.pool.get(key).children.clone();
        let mut waiting_for_children = false;
        for child in children {
            let child_tile = self.pool.get(child);
            if !child_tile.is_renderable() && !child_tile.is_external_tileset() {
                waiting_for_children = true;

                // Keep the waiting child's pipeline moving while the
                // parent renders in its place
                self.progress_tile_content(child);
                self.lru.insert_at_tail(&mut self.pool, child);

                // The parent's distances work for priority here; none of
                // the children can show until all of them load anyway
                self.add_tile_to_load_queue(LoadQueueKind::Medium, frame, child, distances);
            }
        }
        waiting_for_children
    }

    /// Largest screen-space error over the frustums, against the culled or
    /// regular threshold
    fn meets_sse(
        &self,
        frame: &FrameState,
        key: TileKey,
        distances: &[f64],
        culled: bool,
    ) -> bool {
        let geometric_error = self.pool.get(key).geometric_error;

        let mut largest_sse = 0.0f64;
        for (view, &distance) in frame.frustums.iter().zip(distances) {
            let sse = view.screen_space_error(geometric_error, distance);
            if sse > largest_sse {
                largest_sse = sse;
            }
        }

        if culled {
            !self.options.enforce_culled_screen_space_error
                || largest_sse < self.options.culled_screen_space_error
        } else {
            largest_sse < self.options.maximum_screen_space_error
        }
    }

    /// Promote freshly-parsed content and retry transient failures
    fn progress_tile_content(&mut self, key: TileKey) {
        match self.pool.get(key).state {
            TileLoadState::ContentLoaded => {
                self.manager.update_tile_content(
                    &mut self.pool,
                    &mut self.contexts,
                    key,
                    self.options.request_water_mask,
                );
                self.map_raster_overlays(key);
            }
            TileLoadState::FailedTemporarily => {
                // Auth failures wait for the token refresh sweep; other
                // transient failures retry the next time we come by
                if self.pool.get(key).http_status != 401 {
                    self.manager
                        .unload_tile_content(&mut self.pool, &mut self.overlays, key);
                }
            }
            _ => {}
        }
    }

    /// Enqueue a tile's missing content, and the subtree block that would
    /// tell us whether it has any
    ///
    /// Tiles already loading (or loaded, with rasters settled) never
    /// enqueue; queue rewinds therefore cannot orphan a load. Returns the
    /// computed priority.
    pub(crate) fn add_tile_to_load_queue(
        &mut self,
        kind: LoadQueueKind,
        frame: &FrameState,
        key: TileKey,
        distances: &[f64],
    ) -> f64 {
        let mut priority = f64::MAX;

        let (state, center) = {
            let tile = self.pool.get(key);
            (tile.state, tile.bounding_volume.center())
        };
        let rasters_need_loading = self.rasters_need_loading(key);

        if state != TileLoadState::Unloaded && !rasters_need_loading {
            return priority;
        }

        for (view, &distance) in frame.frustums.iter().zip(distances) {
            let mut tile_direction = center - view.position();
            let magnitude = tile_direction.length();
            if magnitude >= 1e-5 {
                tile_direction /= magnitude;
                let load_priority =
                    (1.0 - tile_direction.dot(view.direction())) * distance;
                if load_priority < priority {
                    priority = load_priority;
                }
            }
        }

        if rasters_need_loading {
            self.retry_raster_loads(key);
        }

        if state != TileLoadState::Unloaded {
            return priority;
        }

        // Does the tile have content at all?
        let mut should_load = false;
        let mut has_no_content = false;
        let mut subtree_needed = false;
        {
            let tile = self.pool.get(key);
            let context = &self.contexts[tile.context.0 as usize];
            match &context.implicit {
                Some(implicit) if !matches!(tile.id, crate::tileset::tile::TileId::Url(_)) => {
                    use crate::tileset::context::ContentAvailability;
                    match implicit.content_availability(&tile.id) {
                        ContentAvailability::Available => should_load = true,
                        ContentAvailability::Unavailable => has_no_content = true,
                        // Not knowing yet is fine; the subtree load will say
                        ContentAvailability::Unknown => {}
                    }
                    subtree_needed = implicit.subtree_needs_load(&tile.id);
                }
                _ => {
                    if tile.id.is_empty_url()
                        || matches!(tile.id, crate::tileset::tile::TileId::UpsampledFromParent)
                    {
                        has_no_content = true;
                    } else {
                        should_load = true;
                    }
                }
            }
        }

        if subtree_needed {
            self.subtree_queue.push(LoadRecord { key, priority });
        }

        if has_no_content {
            // Nothing to fetch; move straight to loaded-empty
            let tile = self.pool.get_mut(key);
            tile.content = Some(crate::content::TileContent::Empty);
            tile.state = TileLoadState::ContentLoaded;
        } else if should_load {
            let record = LoadRecord { key, priority };
            match kind {
                LoadQueueKind::High => self.load_queue_high.push(record),
                LoadQueueKind::Medium => self.load_queue_medium.push(record),
                LoadQueueKind::Low => self.load_queue_low.push(record),
            }
        }

        priority
    }

    fn rasters_need_loading(&self, key: TileKey) -> bool {
        self.pool.get(key).raster_mappings.iter().any(|mapping| {
            self.overlays
                .get(mapping.overlay)
                .and_then(|provider| provider.tile(mapping.tile))
                .is_some_and(|tile| tile.state == OverlayTileState::Unloaded && !tile.is_placeholder)
        })
    }

    fn retry_raster_loads(&mut self, key: TileKey) {
        let mappings = self.pool.get(key).raster_mappings.clone();
        for mapping in mappings {
            if let Some(provider) = self.overlays.get_mut(mapping.overlay) {
                provider.load_tile_throttled(mapping.tile);
            }
        }
    }

    pub(crate) fn mark_tile_non_rendered(&mut self, last_frame: u32, key: TileKey) {
        if self.pool.get(key).selection.was_rendered(last_frame) {
            self.update_result.tiles_to_no_longer_render.push(key);
        }
    }

    pub(crate) fn mark_children_non_rendered(&mut self, last_frame: u32, key: TileKey) {
        if self.pool.get(key).selection.original_result(last_frame) == SelectionResult::Refined {
            for child in self.pool.get(key).children.clone() {
                self.mark_tile_non_rendered(last_frame, child);
                self.mark_children_non_rendered(last_frame, child);
            }
        }
    }

    pub(crate) fn mark_tile_and_children_non_rendered(&mut self, last_frame: u32, key: TileKey) {
        self.mark_tile_non_rendered(last_frame, key);
        self.mark_children_non_rendered(last_frame, key);
    }
}
