//! Tileset sub-tree metadata: base URL, headers, implicit tiling

use std::collections::{HashMap, HashSet};

use crate::asset::url;
use crate::math::globe::GlobeRectangle;
use crate::math::morton::{encode_morton_2d, encode_morton_3d};
use crate::math::volume::{BoundingRegion, BoundingVolume};
use crate::subtree::{SubdivisionScheme, SubtreeAvailability};
use crate::tileset::tile::TileId;

/// Address of a subtree block's root cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubtreeAddress {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
    /// Morton code of (x, y[, z]) within the root's level
    pub morton: u64,
}

impl SubtreeAddress {
    pub fn key(&self) -> (u32, u64) {
        (self.level, self.morton)
    }
}

/// How an implicit context answers availability queries
pub enum ImplicitAvailability {
    /// Availability streamed in fixed-depth subtree blocks
    Subtrees {
        subtree_template: String,
        loaded: HashMap<(u32, u64), SubtreeAvailability>,
        loading: HashSet<(u32, u64)>,
    },
    /// Every tile up to `maximum_level` exists and has content (legacy
    /// terrain layers)
    Complete,
}

/// Answer to "does this implicit tile have content"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentAvailability {
    Available,
    Unavailable,
    /// The covering subtree has not loaded; the answer is not known yet
    Unknown,
}

/// Implicit tiling parameters of a context
pub struct ImplicitContext {
    pub scheme: SubdivisionScheme,
    pub subtree_levels: u32,
    pub maximum_level: u32,
    /// Content URL templates; the first is used for fetches
    pub content_templates: Vec<String>,
    /// The volume subdivided by the implicit scheme
    pub root_volume: BoundingVolume,
    /// Root cells along x at level 0 (2 for geographic terrain, else 1)
    pub root_tiles_x: u32,
    pub availability: ImplicitAvailability,
}

impl ImplicitContext {
    /// The tile's coordinates if its ID matches this context's scheme
    fn coordinates(&self, id: &TileId) -> Option<(u32, u32, u32, u32)> {
        match (self.scheme, id) {
            (SubdivisionScheme::Quadtree, TileId::Quadtree(q)) => Some((q.level, q.x, q.y, 0)),
            (SubdivisionScheme::Octree, TileId::Octree(o)) => Some((o.level, o.x, o.y, o.z)),
            _ => None,
        }
    }

    fn morton(&self, x: u32, y: u32, z: u32) -> u64 {
        match self.scheme {
            SubdivisionScheme::Quadtree => encode_morton_2d(x, y),
            SubdivisionScheme::Octree => encode_morton_3d(x, y, z),
        }
    }

    /// Root address of the subtree block containing the tile
    pub fn subtree_address_for(&self, id: &TileId) -> Option<SubtreeAddress> {
        let (level, x, y, z) = self.coordinates(id)?;
        let root_level = (level / self.subtree_levels) * self.subtree_levels;
        let shift = level - root_level;
        let (ax, ay, az) = (x >> shift, y >> shift, z >> shift);
        Some(SubtreeAddress {
            level: root_level,
            x: ax,
            y: ay,
            z: az,
            morton: self.morton(ax, ay, az),
        })
    }

    /// The tile's (level, morton) relative to its subtree block's root
    pub fn relative_in_subtree(&self, id: &TileId) -> Option<(u32, u64)> {
        let (level, x, y, z) = self.coordinates(id)?;
        let address = self.subtree_address_for(id)?;
        let shift = level - address.level;
        let rel = self.morton(
            x - (address.x << shift),
            y - (address.y << shift),
            z - (address.z << shift),
        );
        Some((shift, rel))
    }

    /// Whether the tile is known to carry content
    pub fn content_availability(&self, id: &TileId) -> ContentAvailability {
        let (level, ..) = match self.coordinates(id) {
            Some(c) => c,
            None => return ContentAvailability::Unavailable,
        };

        match &self.availability {
            ImplicitAvailability::Complete => {
                if level <= self.maximum_level {
                    ContentAvailability::Available
                } else {
                    ContentAvailability::Unavailable
                }
            }
            ImplicitAvailability::Subtrees { loaded, .. } => {
                let address = match self.subtree_address_for(id) {
                    Some(a) => a,
                    None => return ContentAvailability::Unavailable,
                };
                let (rel_level, rel_morton) = self.relative_in_subtree(id).unwrap();
                match loaded.get(&address.key()) {
                    Some(subtree) => {
                        if subtree.is_content_available(rel_level, rel_morton, 0) {
                            ContentAvailability::Available
                        } else {
                            ContentAvailability::Unavailable
                        }
                    }
                    None => ContentAvailability::Unknown,
                }
            }
        }
    }

    /// Whether the subtree block covering this tile still needs loading
    pub fn subtree_needs_load(&self, id: &TileId) -> bool {
        match &self.availability {
            ImplicitAvailability::Complete => false,
            ImplicitAvailability::Subtrees {
                loaded, loading, ..
            } => match self.subtree_address_for(id) {
                Some(address) => {
                    !loaded.contains_key(&address.key()) && !loading.contains(&address.key())
                }
                None => false,
            },
        }
    }

    /// Bounding volume of the implicit cell `(level, x, y[, z])`
    ///
    /// Regions honor `root_tiles_x`; boxes subdivide along their half
    /// axes; other volumes pass through unchanged.
    pub fn volume_for(&self, level: u32, x: u32, y: u32, z: Option<u32>) -> BoundingVolume {
        match &self.root_volume {
            BoundingVolume::Region(region) => {
                let rect = &region.rectangle;
                let x_cells = f64::from(self.root_tiles_x) * f64::from(1u32 << level);
                let y_cells = f64::from(1u32 << level);
                let lon_size = rect.width() / x_cells;
                let lat_size = rect.height() / y_cells;

                let west = rect.west + lon_size * f64::from(x);
                let south = rect.south + lat_size * f64::from(y);
                let child_rect = GlobeRectangle::new(west, south, west + lon_size, south + lat_size);

                let (min_height, max_height) = match z {
                    Some(z) => {
                        let size = (region.maximum_height - region.minimum_height) / y_cells;
                        let min = region.minimum_height + size * f64::from(z);
                        (min, min + size)
                    }
                    None => (region.minimum_height, region.maximum_height),
                };

                let child = if region.loose {
                    BoundingRegion::with_loose_heights(child_rect, min_height, max_height)
                } else {
                    BoundingRegion::new(child_rect, min_height, max_height)
                };
                BoundingVolume::Region(child)
            }
            volume @ BoundingVolume::Box(_) if self.root_tiles_x == 1 => {
                volume.implicit_child(level, x, y, z)
            }
            other => other.clone(),
        }
    }
}

/// Metadata shared by all tiles of one tileset sub-tree
///
/// A tileset has one context per tileset JSON it loaded: the root, each
/// external tileset, and each implicit extension get their own.
pub struct TileContext {
    pub base_url: String,
    pub request_headers: Vec<(String, String)>,
    pub version: Option<String>,
    pub implicit: Option<ImplicitContext>,
    /// HTTP 401 on tiles of this context triggers a token refresh
    pub refresh_on_auth_failure: bool,
}

impl TileContext {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            request_headers: Vec::new(),
            version: None,
            implicit: None,
            refresh_on_auth_failure: false,
        }
    }

    /// Clone base fields for a derived context (external or implicit)
    pub fn derive(&self) -> TileContext {
        TileContext {
            base_url: self.base_url.clone(),
            request_headers: self.request_headers.clone(),
            version: self.version.clone(),
            implicit: None,
            refresh_on_auth_failure: self.refresh_on_auth_failure,
        }
    }

    /// Resolve the content URL of a tile in this context
    pub fn resolved_content_url(&self, id: &TileId) -> Option<String> {
        let relative = match id {
            TileId::Url(u) if u.is_empty() => return None,
            TileId::Url(u) => u.clone(),
            TileId::Quadtree(q) => {
                let template = self.implicit.as_ref()?.content_templates.first()?;
                url::substitute_template_parameters(template, |name| match name {
                    "level" | "z" => Some(q.level.to_string()),
                    "x" => Some(q.x.to_string()),
                    "y" => Some(q.y.to_string()),
                    "version" => Some(self.version.clone().unwrap_or_default()),
                    _ => None,
                })
            }
            TileId::Octree(o) => {
                let template = self.implicit.as_ref()?.content_templates.first()?;
                url::substitute_template_parameters(template, |name| match name {
                    "level" => Some(o.level.to_string()),
                    "x" => Some(o.x.to_string()),
                    "y" => Some(o.y.to_string()),
                    "z" => Some(o.z.to_string()),
                    "version" => Some(self.version.clone().unwrap_or_default()),
                    _ => None,
                })
            }
            TileId::UpsampledFromParent => return None,
        };

        Some(url::resolve(&self.base_url, &relative))
    }

    /// Resolve the URL of a subtree block
    pub fn resolved_subtree_url(&self, address: &SubtreeAddress) -> Option<String> {
        let implicit = self.implicit.as_ref()?;
        let template = match &implicit.availability {
            ImplicitAvailability::Subtrees {
                subtree_template, ..
            } => subtree_template,
            ImplicitAvailability::Complete => return None,
        };

        let is_octree = implicit.scheme == SubdivisionScheme::Octree;
        let relative = url::substitute_template_parameters(template, |name| match name {
            "level" => Some(address.level.to_string()),
            "z" if !is_octree => Some(address.level.to_string()),
            "x" => Some(address.x.to_string()),
            "y" => Some(address.y.to_string()),
            "z" => Some(address.z.to_string()),
            "version" => Some(self.version.clone().unwrap_or_default()),
            _ => None,
        });

        Some(url::resolve(&self.base_url, &relative))
    }
}
