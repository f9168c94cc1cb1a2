//! Raster overlay tiles: network-backed images draped over terrain

use std::collections::HashMap;
use std::sync::Arc;

use crate::asset::accessor::AssetAccessor;
use crate::asset::url;
use crate::core::error::{Error, LoadErrorOrigin, LoadFailureDetails};
use crate::core::types::{DVec2, Result};
use crate::scheduler::{Scheduler, TaskQueue};

/// Callback invoked once per failing raster tile request
pub type OverlayErrorCallback = Arc<dyn Fn(&LoadFailureDetails) + Send + Sync>;

/// A rectangle in projected map coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProjectedRectangle {
    pub min: DVec2,
    pub max: DVec2,
}

impl ProjectedRectangle {
    pub fn new(min: DVec2, max: DVec2) -> Self {
        Self { min, max }
    }

    pub fn overlaps(&self, other: &ProjectedRectangle) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }
}

/// A decoded raster image ready for renderer upload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub bytes_per_channel: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// External collaborator that turns encoded image bytes into pixels
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<DecodedImage>;
}

/// Load state of one overlay tile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverlayTileState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// Handle to an overlay tile within its provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OverlayTileKey(u64);

/// One raster tile of an overlay
#[derive(Debug, Default)]
pub struct RasterOverlayTile {
    pub rectangle: ProjectedRectangle,
    pub target_screen_pixels: DVec2,
    pub state: OverlayTileState,
    pub image: Option<DecodedImage>,
    /// Sentinel returned while the provider bootstraps; never reclaimed
    pub is_placeholder: bool,
}

struct LoadCompletion {
    key: OverlayTileKey,
    url: String,
    throttled: bool,
    result: Result<DecodedImage>,
}

/// Maps projected rectangles to raster images, with its own throttling
///
/// The decode path is fetch, validate status, decode pixels on a worker
/// task, then a main-thread publish in `update`. Two counters track load
/// pressure: total in-flight, and throttled in-flight against
/// `maximum_simultaneous_tile_loads`.
pub struct RasterOverlayTileProvider {
    accessor: Arc<dyn AssetAccessor>,
    decoder: Arc<dyn ImageDecoder>,
    scheduler: Arc<Scheduler>,
    /// Template with {west} {south} {east} {north} {width} {height}
    url_template: String,
    headers: Vec<(String, String)>,
    coverage: ProjectedRectangle,
    maximum_simultaneous_tile_loads: u32,

    tiles: HashMap<OverlayTileKey, RasterOverlayTile>,
    next_key: u64,
    placeholder: OverlayTileKey,
    ready: bool,

    total_loading: u32,
    throttled_loading: u32,
    tile_data_bytes: usize,
    completions: TaskQueue<LoadCompletion>,
    load_error_callback: Option<OverlayErrorCallback>,
}

impl RasterOverlayTileProvider {
    pub fn new(
        accessor: Arc<dyn AssetAccessor>,
        decoder: Arc<dyn ImageDecoder>,
        scheduler: Arc<Scheduler>,
        url_template: String,
        coverage: ProjectedRectangle,
        maximum_simultaneous_tile_loads: u32,
    ) -> Self {
        let mut tiles = HashMap::new();
        let placeholder = OverlayTileKey(0);
        tiles.insert(
            placeholder,
            RasterOverlayTile {
                is_placeholder: true,
                ..Default::default()
            },
        );

        Self {
            accessor,
            decoder,
            scheduler,
            url_template,
            headers: Vec::new(),
            coverage,
            maximum_simultaneous_tile_loads,
            tiles,
            next_key: 1,
            placeholder,
            ready: false,
            total_loading: 0,
            throttled_loading: 0,
            tile_data_bytes: 0,
            completions: TaskQueue::new(),
            load_error_callback: None,
        }
    }

    /// Report failing raster requests to the given callback
    pub fn set_load_error_callback(&mut self, callback: OverlayErrorCallback) {
        self.load_error_callback = Some(callback);
    }

    /// Mark the provider's bootstrap complete, retiring the placeholder
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn tile(&self, key: OverlayTileKey) -> Option<&RasterOverlayTile> {
        self.tiles.get(&key)
    }

    /// Request a tile for a projected rectangle at a target resolution
    ///
    /// Returns the placeholder while the provider is bootstrapping and
    /// `None` for rectangles outside the provider's coverage.
    pub fn get_tile(
        &mut self,
        rectangle: ProjectedRectangle,
        target_screen_pixels: DVec2,
    ) -> Option<OverlayTileKey> {
        if !self.ready {
            return Some(self.placeholder);
        }

        if !rectangle.overlaps(&self.coverage) {
            return None;
        }

        let key = OverlayTileKey(self.next_key);
        self.next_key += 1;
        self.tiles.insert(
            key,
            RasterOverlayTile {
                rectangle,
                target_screen_pixels,
                ..Default::default()
            },
        );
        Some(key)
    }

    /// Begin loading a tile, ignoring the throttle
    pub fn load_tile(&mut self, key: OverlayTileKey) {
        if self.tiles.get(&key).is_some_and(|t| t.is_placeholder) {
            // Placeholders never load
            return;
        }
        self.begin_load(key, false);
    }

    /// Begin loading a tile if throttle capacity allows
    ///
    /// Returns false when the load was refused and should be retried on a
    /// later frame.
    pub fn load_tile_throttled(&mut self, key: OverlayTileKey) -> bool {
        let state = match self.tiles.get(&key) {
            Some(tile) if !tile.is_placeholder => tile.state,
            _ => return true,
        };
        if state != OverlayTileState::Unloaded {
            return true;
        }
        if self.throttled_loading >= self.maximum_simultaneous_tile_loads {
            return false;
        }

        self.begin_load(key, true);
        true
    }

    fn begin_load(&mut self, key: OverlayTileKey, throttled: bool) {
        let tile = match self.tiles.get_mut(&key) {
            Some(tile) if tile.state == OverlayTileState::Unloaded => tile,
            _ => return,
        };
        tile.state = OverlayTileState::Loading;

        let rect = tile.rectangle;
        let pixels = tile.target_screen_pixels;
        let tile_url = url::substitute_template_parameters(&self.url_template, |name| match name {
            "west" => Some(rect.min.x.to_string()),
            "south" => Some(rect.min.y.to_string()),
            "east" => Some(rect.max.x.to_string()),
            "north" => Some(rect.max.y.to_string()),
            "width" => Some((pixels.x.round() as i64).to_string()),
            "height" => Some((pixels.y.round() as i64).to_string()),
            _ => None,
        });

        self.total_loading += 1;
        if throttled {
            self.throttled_loading += 1;
        }

        let accessor = self.accessor.clone();
        let decoder = self.decoder.clone();
        let headers = self.headers.clone();
        let sender = self.completions.sender();
        self.scheduler.spawn_worker(move || {
            let result = accessor
                .get(&tile_url, &headers)
                .and_then(|response| {
                    if response.is_success() {
                        Ok(response)
                    } else {
                        Err(Error::Http {
                            status: response.status_code,
                            url: tile_url.clone(),
                        })
                    }
                })
                .and_then(|response| decoder.decode(&response.data));
            sender.send(LoadCompletion {
                key,
                url: tile_url,
                throttled,
                result,
            });
        });
    }

    /// Publish completed loads. Main thread, once per frame.
    pub fn update(&mut self) {
        for completion in self.completions.drain(usize::MAX) {
            self.total_loading = self.total_loading.saturating_sub(1);
            if completion.throttled {
                self.throttled_loading = self.throttled_loading.saturating_sub(1);
            }

            let tile = match self.tiles.get_mut(&completion.key) {
                Some(tile) => tile,
                None => continue,
            };

            match completion.result {
                Ok(image) => {
                    self.tile_data_bytes += image.byte_size();
                    tile.image = Some(image);
                    tile.state = OverlayTileState::Loaded;
                }
                Err(e) => {
                    log::error!("Failed to load raster tile {}: {}", completion.url, e);
                    tile.state = OverlayTileState::Failed;
                    if let Some(callback) = &self.load_error_callback {
                        callback(&LoadFailureDetails {
                            origin: LoadErrorOrigin::RasterOverlay,
                            url: completion.url.clone(),
                            status_code: e.http_status().unwrap_or(0),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Release a tile's pixels and forget it
    pub fn remove_tile(&mut self, key: OverlayTileKey) {
        if let Some(tile) = self.tiles.get(&key) {
            if tile.is_placeholder {
                return;
            }
        }
        if let Some(tile) = self.tiles.remove(&key) {
            if let Some(image) = tile.image {
                self.tile_data_bytes = self.tile_data_bytes.saturating_sub(image.byte_size());
            }
        }
    }

    pub fn tiles_loading_count(&self) -> u32 {
        self.total_loading
    }

    pub fn throttled_loading_count(&self) -> u32 {
        self.throttled_loading
    }

    pub fn tile_data_bytes(&self) -> usize {
        self.tile_data_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::accessor::{Response, StaticAccessor};

    /// Decoder that fabricates a 1-channel image from the byte count
    struct CountingDecoder;

    impl ImageDecoder for CountingDecoder {
        fn decode(&self, data: &[u8]) -> Result<DecodedImage> {
            if data.is_empty() {
                return Err(Error::Decode("empty image".to_string()));
            }
            Ok(DecodedImage {
                width: data.len() as u32,
                height: 1,
                channels: 1,
                bytes_per_channel: 1,
                pixels: data.to_vec(),
            })
        }
    }

    fn make_provider(accessor: Arc<StaticAccessor>, max_loads: u32) -> RasterOverlayTileProvider {
        RasterOverlayTileProvider::new(
            accessor,
            Arc::new(CountingDecoder),
            Arc::new(Scheduler::immediate()),
            "https://imagery.example.com/{west}/{south}/{east}/{north}.png".to_string(),
            ProjectedRectangle::new(DVec2::new(-180.0, -90.0), DVec2::new(180.0, 90.0)),
            max_loads,
        )
    }

    fn rect(west: f64, south: f64) -> ProjectedRectangle {
        ProjectedRectangle::new(DVec2::new(west, south), DVec2::new(west + 1.0, south + 1.0))
    }

    #[test]
    fn test_placeholder_until_ready() {
        let accessor = Arc::new(StaticAccessor::new());
        let mut provider = make_provider(accessor, 4);

        let key = provider.get_tile(rect(0.0, 0.0), DVec2::new(256.0, 256.0)).unwrap();
        assert!(provider.tile(key).unwrap().is_placeholder);

        // Placeholders refuse to load
        provider.load_tile(key);
        assert_eq!(provider.tiles_loading_count(), 0);

        provider.mark_ready();
        let key = provider.get_tile(rect(0.0, 0.0), DVec2::new(256.0, 256.0)).unwrap();
        assert!(!provider.tile(key).unwrap().is_placeholder);
    }

    #[test]
    fn test_outside_coverage() {
        let accessor = Arc::new(StaticAccessor::new());
        let mut provider = make_provider(accessor, 4);
        provider.mark_ready();

        let far = ProjectedRectangle::new(DVec2::new(500.0, 500.0), DVec2::new(501.0, 501.0));
        assert!(provider.get_tile(far, DVec2::new(256.0, 256.0)).is_none());
    }

    #[test]
    fn test_load_decode_publish() {
        let accessor = Arc::new(StaticAccessor::new());
        accessor.insert(
            "https://imagery.example.com/0/0/1/1.png",
            Response::ok("image/png", vec![5u8; 64]),
        );
        let mut provider = make_provider(accessor, 4);
        provider.mark_ready();

        let key = provider.get_tile(rect(0.0, 0.0), DVec2::new(256.0, 256.0)).unwrap();
        assert!(provider.load_tile_throttled(key));
        provider.update();

        let tile = provider.tile(key).unwrap();
        assert_eq!(tile.state, OverlayTileState::Loaded);
        assert_eq!(tile.image.as_ref().unwrap().width, 64);
        assert_eq!(provider.tile_data_bytes(), 64);
        assert_eq!(provider.tiles_loading_count(), 0);
        assert_eq!(provider.throttled_loading_count(), 0);
    }

    #[test]
    fn test_failed_load_marks_failed() {
        let accessor = Arc::new(StaticAccessor::new());
        accessor.insert(
            "https://imagery.example.com/0/0/1/1.png",
            Response::with_status(404),
        );
        let mut provider = make_provider(accessor, 4);
        provider.mark_ready();

        let key = provider.get_tile(rect(0.0, 0.0), DVec2::new(256.0, 256.0)).unwrap();
        provider.load_tile(key);
        provider.update();

        assert_eq!(provider.tile(key).unwrap().state, OverlayTileState::Failed);
        assert_eq!(provider.tile_data_bytes(), 0);
    }

    #[test]
    fn test_throttle_refuses_over_limit() {
        // No update() between loads, so in-flight counters stay up with the
        // immediate scheduler too
        let accessor = Arc::new(StaticAccessor::new());
        accessor.insert(
            "https://imagery.example.com/0/0/1/1.png",
            Response::ok("image/png", vec![1u8; 8]),
        );
        accessor.insert(
            "https://imagery.example.com/1/0/2/1.png",
            Response::ok("image/png", vec![1u8; 8]),
        );
        accessor.insert(
            "https://imagery.example.com/2/0/3/1.png",
            Response::ok("image/png", vec![1u8; 8]),
        );
        let mut provider = make_provider(accessor, 2);
        provider.mark_ready();

        let a = provider.get_tile(rect(0.0, 0.0), DVec2::new(256.0, 256.0)).unwrap();
        let b = provider.get_tile(rect(1.0, 0.0), DVec2::new(256.0, 256.0)).unwrap();
        let c = provider.get_tile(rect(2.0, 0.0), DVec2::new(256.0, 256.0)).unwrap();

        assert!(provider.load_tile_throttled(a));
        assert!(provider.load_tile_throttled(b));
        // Third is refused until completions are published
        assert!(!provider.load_tile_throttled(c));

        provider.update();
        assert!(provider.load_tile_throttled(c));
    }

    #[test]
    fn test_remove_tile_releases_bytes() {
        let accessor = Arc::new(StaticAccessor::new());
        accessor.insert(
            "https://imagery.example.com/0/0/1/1.png",
            Response::ok("image/png", vec![5u8; 32]),
        );
        let mut provider = make_provider(accessor, 4);
        provider.mark_ready();

        let key = provider.get_tile(rect(0.0, 0.0), DVec2::new(256.0, 256.0)).unwrap();
        provider.load_tile(key);
        provider.update();
        assert_eq!(provider.tile_data_bytes(), 32);

        provider.remove_tile(key);
        assert_eq!(provider.tile_data_bytes(), 0);
        assert!(provider.tile(key).is_none());
    }
}
