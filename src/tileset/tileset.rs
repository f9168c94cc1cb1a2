//! The tileset: owns the tile tree and drives the per-frame update

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::asset::accessor::AssetAccessor;
use crate::asset::endpoint::{self, AssetKind, Endpoint, EndpointCache};
use crate::content::{Axis, ContentRegistry};
use crate::core::error::{Error, LoadErrorOrigin, LoadFailureDetails};
use crate::core::types::Result;
use crate::math::view::ViewState;
use crate::overlay::RasterOverlayTileProvider;
use crate::scheduler::{Scheduler, TaskQueue};
use crate::tileset::context::TileContext;
use crate::tileset::json;
use crate::tileset::manager::ContentManager;
use crate::tileset::options::TilesetOptions;
use crate::tileset::tile::{ContextKey, LruList, Tile, TileKey, TileLoadState, TilePool};
use crate::tileset::traversal::{
    compute_fog_density, FrameState, LoadQueueKind, LoadRecord, ViewUpdateResult,
};

/// Main-thread completions applied per frame, before the traversal
const MAIN_THREAD_RESULT_BUDGET: usize = 256;

/// Iteration cap for `update_view_offline`; a tileset that cannot converge
/// (missing assets failing over and over) stops here instead of spinning
const OFFLINE_ITERATION_LIMIT: u32 = 1000;

/// External collaborators a tileset is constructed against
#[derive(Clone)]
pub struct TilesetExternals {
    pub accessor: Arc<dyn AssetAccessor>,
    pub scheduler: Arc<Scheduler>,
    pub registry: Arc<ContentRegistry>,
    pub endpoint_cache: Arc<EndpointCache>,
}

impl TilesetExternals {
    pub fn new(accessor: Arc<dyn AssetAccessor>) -> Self {
        Self {
            accessor,
            scheduler: Arc::new(Scheduler::new()),
            registry: Arc::new(ContentRegistry::with_defaults()),
            endpoint_cache: Arc::new(EndpointCache::new()),
        }
    }
}

struct RootOutcome {
    base_url: String,
    request_headers: Vec<(String, String)>,
    refresh_on_auth_failure: bool,
    /// Endpoint to publish into the cache (URL it was fetched from)
    endpoint: Option<(String, Endpoint)>,
    error_origin: LoadErrorOrigin,
    request_url: String,
    status: u16,
    result: Result<Value>,
}

struct TokenRefreshOutcome {
    endpoint_url: String,
    status: u16,
    result: Result<Endpoint>,
}

/// A streamed hierarchical tile dataset
///
/// Construction starts the root load; `update_view` drives everything
/// else, one frame at a time.
pub struct Tileset {
    pub(crate) options: TilesetOptions,
    pub(crate) pool: TilePool,
    pub(crate) contexts: Vec<TileContext>,
    pub(crate) root: Option<TileKey>,
    pub(crate) manager: ContentManager,
    pub(crate) lru: LruList,
    pub(crate) overlays: Vec<RasterOverlayTileProvider>,
    pub(crate) update_result: ViewUpdateResult,

    pub(crate) load_queue_high: Vec<LoadRecord>,
    pub(crate) load_queue_medium: Vec<LoadRecord>,
    pub(crate) load_queue_low: Vec<LoadRecord>,
    pub(crate) subtree_queue: Vec<LoadRecord>,

    pub(crate) previous_frame: u32,
    pub(crate) up_axis: Axis,

    root_outcomes: TaskQueue<RootOutcome>,
    refresh_outcomes: TaskQueue<TokenRefreshOutcome>,
    root_loading: bool,
    refreshing_token: bool,
    endpoint_cache: Arc<EndpointCache>,
    endpoint_request_url: Option<String>,
}

impl Tileset {
    fn empty(externals: TilesetExternals, options: TilesetOptions) -> Self {
        Self {
            options,
            pool: TilePool::new(),
            contexts: Vec::new(),
            root: None,
            manager: ContentManager::new(
                externals.accessor,
                externals.registry,
                externals.scheduler,
            ),
            lru: LruList::new(),
            overlays: Vec::new(),
            update_result: ViewUpdateResult::default(),
            load_queue_high: Vec::new(),
            load_queue_medium: Vec::new(),
            load_queue_low: Vec::new(),
            subtree_queue: Vec::new(),
            previous_frame: 0,
            up_axis: Axis::Y,
            root_outcomes: TaskQueue::new(),
            refresh_outcomes: TaskQueue::new(),
            root_loading: false,
            refreshing_token: false,
            endpoint_cache: externals.endpoint_cache,
            endpoint_request_url: None,
        }
    }

    /// Create a tileset from a tileset JSON (or terrain layer) URL
    pub fn new(externals: TilesetExternals, url: &str, options: TilesetOptions) -> Self {
        let mut tileset = Self::empty(externals, options);
        tileset.root_loading = true;

        let accessor = tileset.manager.accessor().clone();
        let sender = tileset.root_outcomes.sender();
        let url = url.to_string();
        tileset.manager.scheduler().spawn_worker(move || {
            let (status, result) = fetch_json(accessor.as_ref(), &url, &[]);
            sender.send(RootOutcome {
                base_url: url.clone(),
                request_headers: Vec::new(),
                refresh_on_auth_failure: false,
                endpoint: None,
                error_origin: LoadErrorOrigin::TilesetJson,
                request_url: url,
                status,
                result,
            });
        });

        tileset
    }

    /// Create a tileset from an asset-service asset
    ///
    /// Fetches the endpoint descriptor (unless cached), then the dataset
    /// it points at. Tiles of the resulting context refresh their token on
    /// HTTP 401.
    pub fn from_asset(
        externals: TilesetExternals,
        api_base: &str,
        asset_id: u64,
        access_token: Option<&str>,
        options: TilesetOptions,
    ) -> Self {
        let mut tileset = Self::empty(externals, options);
        tileset.root_loading = true;

        let endpoint_url = endpoint::endpoint_url(api_base, asset_id, access_token);
        tileset.endpoint_request_url = Some(endpoint_url.clone());

        let cached = tileset.endpoint_cache.get(&endpoint_url);
        let accessor = tileset.manager.accessor().clone();
        let sender = tileset.root_outcomes.sender();
        tileset.manager.scheduler().spawn_worker(move || {
            let (endpoint, fetched, status) = match cached {
                Some(endpoint) => (Ok(endpoint), None, 0u16),
                None => match fetch_endpoint(accessor.as_ref(), &endpoint_url) {
                    Ok((endpoint, status)) => (Ok(endpoint.clone()), Some(endpoint), status),
                    Err((e, status)) => (Err(e), None, status),
                },
            };

            let endpoint = match endpoint {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    sender.send(RootOutcome {
                        base_url: String::new(),
                        request_headers: Vec::new(),
                        refresh_on_auth_failure: true,
                        endpoint: None,
                        error_origin: LoadErrorOrigin::AssetEndpoint,
                        request_url: endpoint_url,
                        status,
                        result: Err(e),
                    });
                    return;
                }
            };

            let headers = vec![endpoint.authorization_header()];
            let (status, result) = fetch_json(accessor.as_ref(), &endpoint.url, &headers);
            sender.send(RootOutcome {
                base_url: endpoint.url.clone(),
                request_headers: headers,
                refresh_on_auth_failure: true,
                endpoint: fetched.map(|e| (endpoint_url.clone(), e)),
                error_origin: LoadErrorOrigin::TilesetJson,
                request_url: endpoint.url.clone(),
                status,
                result,
            });
        });

        tileset
    }

    /// Attach a raster overlay provider
    ///
    /// The tileset's load-error callback, if any, receives the provider's
    /// failures with the `RasterOverlay` origin.
    pub fn add_overlay(&mut self, mut provider: RasterOverlayTileProvider) {
        if let Some(callback) = &self.options.load_error_callback {
            provider.set_load_error_callback(callback.clone());
        }
        self.overlays.push(provider);
    }

    pub fn root(&self) -> Option<TileKey> {
        self.root
    }

    pub fn tile(&self, key: TileKey) -> &Tile {
        self.pool.get(key)
    }

    pub fn options(&self) -> &TilesetOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut TilesetOptions {
        &mut self.options
    }

    /// Total decoded bytes held by tiles and overlay tiles
    pub fn total_data_bytes(&self) -> usize {
        self.manager.tile_data_bytes()
            + self
                .overlays
                .iter()
                .map(RasterOverlayTileProvider::tile_data_bytes)
                .sum::<usize>()
    }

    pub fn tiles_loading_count(&self) -> u32 {
        self.manager.tiles_loading_count()
    }

    /// Walk every tile currently threaded on the loaded-tiles list
    pub fn for_each_loaded_tile(&self, mut callback: impl FnMut(&Tile)) {
        let mut current = self.lru.head();
        while let Some(key) = current {
            callback(self.pool.get(key));
            current = self.lru.next(&self.pool, key);
        }
    }

    /// Whether any load work is still pending anywhere
    pub fn loads_in_progress(&self) -> bool {
        self.root_loading
            || self.refreshing_token
            || self.manager.tiles_loading_count() > 0
            || self.manager.subtrees_loading_count() > 0
            || self
                .overlays
                .iter()
                .any(|overlay| overlay.tiles_loading_count() > 0)
    }

    /// Run one frame: select tiles for the given view frustums
    pub fn update_view(&mut self, frustums: &[ViewState]) -> &ViewUpdateResult {
        self.manager.accessor().tick();

        // Apply queued main-thread completions, a bounded batch per frame
        self.process_root_outcomes();
        self.process_refresh_outcomes();
        let auth_failed =
            self.manager
                .process_outcomes(&mut self.pool, &self.contexts, MAIN_THREAD_RESULT_BUDGET);
        self.handle_auth_failures(auth_failed);
        self.manager.process_subtree_outcomes(
            &mut self.pool,
            &mut self.contexts,
            MAIN_THREAD_RESULT_BUDGET,
        );
        for overlay in &mut self.overlays {
            overlay.update();
        }

        let last_frame = self.previous_frame;
        let current_frame = last_frame + 1;

        self.update_result.reset();
        self.load_queue_high.clear();
        self.load_queue_medium.clear();
        self.load_queue_low.clear();
        self.subtree_queue.clear();

        if self.root.is_some() && !frustums.is_empty() {
            let frame = FrameState {
                fog_densities: frustums
                    .iter()
                    .map(|view| compute_fog_density(&self.options.fog_density_table, view))
                    .collect(),
                frustums: frustums.to_vec(),
                last_frame,
                current_frame,
            };
            self.traverse(&frame);
        }

        self.update_result.tiles_loading_high_priority = self.load_queue_high.len() as u32;
        self.update_result.tiles_loading_medium_priority = self.load_queue_medium.len() as u32;
        self.update_result.tiles_loading_low_priority = self.load_queue_low.len() as u32;

        self.unload_cached_tiles();
        self.process_load_queues();

        self.previous_frame = current_frame;
        &self.update_result
    }

    /// Run `update_view` repeatedly until all loads settle
    ///
    /// The returned result's `tiles_to_no_longer_render` is computed
    /// against the render set from before the first call.
    pub fn update_view_offline(&mut self, frustums: &[ViewState]) -> &ViewUpdateResult {
        let rendered_before: Vec<TileKey> = self.update_result.tiles_to_render.clone();

        self.update_view(frustums);
        let mut iterations = 0;
        while self.loads_in_progress() {
            iterations += 1;
            if iterations > OFFLINE_ITERATION_LIMIT {
                log::warn!("Offline view update did not settle; giving up");
                break;
            }
            self.manager.accessor().tick();
            self.update_view(frustums);
        }

        let rendered_now: HashSet<TileKey> =
            self.update_result.tiles_to_render.iter().copied().collect();
        self.update_result.tiles_to_no_longer_render = rendered_before
            .into_iter()
            .filter(|tile| !rendered_now.contains(tile))
            .collect();

        &self.update_result
    }

    /// Map newly-ready tiles onto the attached raster overlays
    pub(crate) fn map_raster_overlays(&mut self, key: TileKey) {
        if self.overlays.is_empty() {
            return;
        }
        {
            let tile = self.pool.get(key);
            if tile.state != TileLoadState::Done || !tile.raster_mappings.is_empty() {
                return;
            }
        }

        let rectangle = match self.pool.get(key).bounding_volume.estimate_globe_rectangle() {
            Some(rect) => rect,
            None => return,
        };
        let projected = crate::overlay::ProjectedRectangle::new(
            crate::core::types::DVec2::new(rectangle.west.to_degrees(), rectangle.south.to_degrees()),
            crate::core::types::DVec2::new(rectangle.east.to_degrees(), rectangle.north.to_degrees()),
        );
        let target_pixels = crate::core::types::DVec2::new(256.0, 256.0);

        let mut mappings = Vec::new();
        for (index, provider) in self.overlays.iter_mut().enumerate() {
            if let Some(overlay_tile) = provider.get_tile(projected, target_pixels) {
                let placeholder = provider
                    .tile(overlay_tile)
                    .is_some_and(|tile| tile.is_placeholder);
                if !placeholder {
                    provider.load_tile_throttled(overlay_tile);
                }
                mappings.push(crate::tileset::tile::RasterMapping {
                    overlay: index,
                    tile: overlay_tile,
                });
            }
        }
        self.pool.get_mut(key).raster_mappings.extend(mappings);
    }

    /// Evict stale tile content until the byte budget is met
    ///
    /// Walks the loaded-tiles list from its least-recently-visited end and
    /// stops at the root, which marks the start of the tiles the current
    /// frame used.
    fn unload_cached_tiles(&mut self) {
        let maximum_bytes = self.options.maximum_cached_bytes;

        let mut current = self.lru.head();
        while self.total_data_bytes() > maximum_bytes {
            let key = match current {
                Some(key) => key,
                None => break,
            };
            if Some(key) == self.root {
                break;
            }

            let next = self.lru.next(&self.pool, key);
            let removed =
                self.manager
                    .unload_tile_content(&mut self.pool, &mut self.overlays, key);
            if removed {
                self.lru.remove(&mut self.pool, key);
            }
            current = next;
        }
    }

    /// Dispatch queued loads in priority order, within the in-flight caps
    fn process_load_queues(&mut self) {
        self.process_queue(LoadQueueKind::High);
        self.process_queue(LoadQueueKind::Medium);
        self.process_queue(LoadQueueKind::Low);
        self.process_subtree_queue();
    }

    fn process_queue(&mut self, kind: LoadQueueKind) {
        if self.manager.tiles_loading_count() >= self.options.maximum_simultaneous_tile_loads {
            return;
        }

        let mut queue = match kind {
            LoadQueueKind::High => std::mem::take(&mut self.load_queue_high),
            LoadQueueKind::Medium => std::mem::take(&mut self.load_queue_medium),
            LoadQueueKind::Low => std::mem::take(&mut self.load_queue_low),
        };
        queue.sort_by(|a, b| {
            a.priority
                .partial_cmp(&b.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for record in &queue {
            self.manager
                .load_tile_content(&mut self.pool, &self.contexts, record.key, self.up_axis);
            if self.manager.tiles_loading_count() >= self.options.maximum_simultaneous_tile_loads {
                break;
            }
        }

        // Undispatched entries keep their order for the next pass
        match kind {
            LoadQueueKind::High => self.load_queue_high = queue,
            LoadQueueKind::Medium => self.load_queue_medium = queue,
            LoadQueueKind::Low => self.load_queue_low = queue,
        }
    }

    fn process_subtree_queue(&mut self) {
        if self.manager.subtrees_loading_count() >= self.options.maximum_simultaneous_subtree_loads
        {
            return;
        }

        let mut queue = std::mem::take(&mut self.subtree_queue);
        queue.sort_by(|a, b| {
            a.priority
                .partial_cmp(&b.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for record in &queue {
            self.manager
                .load_subtree(&self.pool, &mut self.contexts, record.key);
            if self.manager.subtrees_loading_count()
                >= self.options.maximum_simultaneous_subtree_loads
            {
                break;
            }
        }

        self.subtree_queue = queue;
    }

    fn process_root_outcomes(&mut self) {
        for outcome in self.root_outcomes.drain(MAIN_THREAD_RESULT_BUDGET) {
            self.root_loading = false;

            if let Some((url, endpoint)) = outcome.endpoint {
                self.endpoint_cache.insert(&url, endpoint);
            }

            match outcome.result {
                Ok(tileset_json) => {
                    self.up_axis = json::obtain_gltf_up_axis(&tileset_json);

                    let mut context = TileContext::new(outcome.base_url);
                    context.request_headers = outcome.request_headers;
                    context.refresh_on_auth_failure = outcome.refresh_on_auth_failure;
                    let context_key = ContextKey(self.contexts.len() as u32);
                    self.contexts.push(context);

                    match json::create_root_from_json(
                        &mut self.pool,
                        &mut self.contexts,
                        context_key,
                        &tileset_json,
                        self.options.request_water_mask,
                    ) {
                        Ok(root) => self.root = Some(root),
                        Err(e) => {
                            log::error!(
                                "Failed to create tiles for tileset {}: {}",
                                outcome.request_url,
                                e
                            );
                            self.report_load_error(
                                LoadErrorOrigin::TilesetJson,
                                &outcome.request_url,
                                outcome.status,
                                &e,
                            );
                        }
                    }
                }
                Err(e) => {
                    log::error!("Failed to load tileset {}: {}", outcome.request_url, e);
                    self.report_load_error(
                        outcome.error_origin,
                        &outcome.request_url,
                        outcome.status,
                        &e,
                    );
                }
            }
        }
    }

    /// Token refresh controller: one refresh in flight at a time
    ///
    /// Requests already on the wire with the old token are left alone;
    /// they either complete or come back through this same path.
    fn handle_auth_failures(&mut self, auth_failed: Vec<TileKey>) {
        if auth_failed.is_empty() || self.refreshing_token {
            return;
        }
        let endpoint_url = match &self.endpoint_request_url {
            Some(url) => url.clone(),
            None => return,
        };

        self.refreshing_token = true;

        let accessor = self.manager.accessor().clone();
        let sender = self.refresh_outcomes.sender();
        self.manager.scheduler().spawn_worker(move || {
            let (status, result) = match accessor.get(&endpoint_url, &[]) {
                Err(e) => (0, Err(e)),
                Ok(response) => {
                    let status = response.status_code;
                    if !response.is_success() {
                        (
                            status,
                            Err(Error::Http {
                                status,
                                url: endpoint_url.clone(),
                            }),
                        )
                    } else {
                        (status, Endpoint::parse(&response.data))
                    }
                }
            };
            sender.send(TokenRefreshOutcome {
                endpoint_url,
                status,
                result,
            });
        });
    }

    fn process_refresh_outcomes(&mut self) {
        for outcome in self.refresh_outcomes.drain(MAIN_THREAD_RESULT_BUDGET) {
            self.refreshing_token = false;

            let succeeded = match outcome.result {
                Ok(endpoint) => {
                    self.endpoint_cache
                        .insert(&outcome.endpoint_url, endpoint.clone());
                    let (name, value) = endpoint.authorization_header();
                    for context in &mut self.contexts {
                        if !context.refresh_on_auth_failure {
                            continue;
                        }
                        match context
                            .request_headers
                            .iter_mut()
                            .find(|(header, _)| header == &name)
                        {
                            Some(entry) => entry.1 = value.clone(),
                            None => context.request_headers.push((name.clone(), value.clone())),
                        }
                    }
                    true
                }
                Err(e) => {
                    log::error!("Failed to refresh access token: {}", e);
                    self.report_load_error(
                        LoadErrorOrigin::AssetEndpoint,
                        &outcome.endpoint_url,
                        outcome.status,
                        &e,
                    );
                    false
                }
            };

            // Sweep every auth-failed tile of refreshable contexts: back to
            // Unloaded on success, permanently failed otherwise
            for key in self.pool.keys() {
                let tile = self.pool.get(key);
                if tile.state != TileLoadState::FailedTemporarily || tile.http_status != 401 {
                    continue;
                }
                if !self.contexts[tile.context.0 as usize].refresh_on_auth_failure {
                    continue;
                }
                if succeeded {
                    self.manager
                        .unload_tile_content(&mut self.pool, &mut self.overlays, key);
                } else {
                    self.pool.get_mut(key).state = TileLoadState::Failed;
                }
            }
        }
    }

    fn report_load_error(
        &self,
        origin: LoadErrorOrigin,
        url: &str,
        status: u16,
        error: &Error,
    ) {
        if let Some(callback) = &self.options.load_error_callback {
            callback(&LoadFailureDetails {
                origin,
                url: url.to_string(),
                status_code: status,
                message: error.to_string(),
            });
        }
    }
}

/// Fetch a URL and parse the body as JSON; worker-side helper
fn fetch_json(
    accessor: &dyn AssetAccessor,
    url: &str,
    headers: &[(String, String)],
) -> (u16, Result<Value>) {
    match accessor.get(url, headers) {
        Err(e) => (0, Err(e)),
        Ok(response) => {
            let status = response.status_code;
            if !response.is_success() {
                return (
                    status,
                    Err(Error::Http {
                        status,
                        url: url.to_string(),
                    }),
                );
            }
            let parsed = serde_json::from_slice(&response.data)
                .map_err(|e| Error::Parse(format!("tileset JSON {}: {}", url, e)));
            (status, parsed)
        }
    }
}

/// Fetch and parse an endpoint descriptor; worker-side helper
fn fetch_endpoint(
    accessor: &dyn AssetAccessor,
    url: &str,
) -> std::result::Result<(Endpoint, u16), (Error, u16)> {
    match accessor.get(url, &[]) {
        Err(e) => Err((e, 0)),
        Ok(response) => {
            let status = response.status_code;
            if !response.is_success() {
                return Err((
                    Error::Http {
                        status,
                        url: url.to_string(),
                    },
                    status,
                ));
            }
            match Endpoint::parse(&response.data) {
                Ok(endpoint) => {
                    if endpoint.kind == AssetKind::Imagery {
                        return Err((
                            Error::Unsupported(
                                "imagery assets cannot back a tileset".to_string(),
                            ),
                            status,
                        ));
                    }
                    Ok((endpoint, status))
                }
                Err(e) => Err((e, status)),
            }
        }
    }
}
