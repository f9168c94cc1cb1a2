//! Parsing tileset JSON and terrain layer descriptors into tile trees

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::asset::url;
use crate::content::{Axis, TileContent};
use crate::core::error::Error;
use crate::core::types::{DMat3, DMat4, DVec3, Result};
use crate::math::globe::{Ellipsoid, GlobeRectangle};
use crate::math::volume::{
    max_scale_component, BoundingRegion, BoundingSphere, BoundingVolume, OrientedBox, S2CellVolume,
};
use crate::subtree::SubdivisionScheme;
use crate::tileset::context::{ImplicitAvailability, ImplicitContext, TileContext};
use crate::tileset::tile::{
    ContextKey, OctreeTileId, QuadtreeTileId, Tile, TileId, TileKey, TilePool, TileRefine,
    TileLoadState,
};

pub fn get_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub fn get_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

pub fn get_u32(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

/// An array of `count` numbers, or `None` if anything is off
pub fn get_doubles(value: &Value, key: &str, count: usize) -> Option<Vec<f64>> {
    let array = value.get(key)?.as_array()?;
    if array.len() < count {
        return None;
    }
    array[..count]
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<f64>>>()
}

/// The up-axis for glTF content of the tileset
///
/// `asset.gltfUpAxis` is not part of the format specification, so carrying
/// it draws a warning; Y is the default.
pub fn obtain_gltf_up_axis(tileset: &Value) -> Axis {
    let axis_value = match tileset.get("asset").and_then(|a| a.get("gltfUpAxis")) {
        Some(value) => value,
        None => return Axis::Y,
    };

    log::warn!(
        "The tileset contains a gltfUpAxis property. This property is not part \
         of the specification. All glTF content should use the Y-axis as the up-axis."
    );

    match axis_value.as_str().and_then(Axis::parse) {
        Some(axis) => axis,
        None => {
            log::warn!("Unknown gltfUpAxis: {}, using default (Y)", axis_value);
            Axis::Y
        }
    }
}

/// Build the tile tree described by a tileset JSON or terrain layer JSON
///
/// Returns the root tile key. The context must already carry the base URL
/// and request headers of the response this JSON came from.
pub fn create_root_from_json(
    pool: &mut TilePool,
    contexts: &mut Vec<TileContext>,
    context: ContextKey,
    tileset: &Value,
    request_water_mask: bool,
) -> Result<TileKey> {
    if let Some(root_json) = tileset.get("root") {
        return create_tile(
            pool,
            contexts,
            context,
            root_json,
            DMat4::IDENTITY,
            TileRefine::Replace,
            None,
        )
        .ok_or_else(|| Error::Parse("tileset root tile is malformed".to_string()));
    }

    if get_str(tileset, "format") == Some("quantized-mesh-1.0") {
        return create_terrain_root(pool, contexts, context, tileset, request_water_mask);
    }

    Err(Error::Parse(
        "tileset JSON has neither a root tile nor a terrain layer format".to_string(),
    ))
}

/// Recursively build one tile and its children
///
/// Returns `None` (and logs) when a required property is missing; the
/// malformed subtree is simply dropped.
pub fn create_tile(
    pool: &mut TilePool,
    contexts: &mut Vec<TileContext>,
    context: ContextKey,
    tile_json: &Value,
    parent_transform: DMat4,
    parent_refine: TileRefine,
    parent: Option<TileKey>,
) -> Option<TileKey> {
    if !tile_json.is_object() {
        return None;
    }

    let transform = parent_transform * parse_transform(tile_json).unwrap_or(DMat4::IDENTITY);

    let bounding_volume = match parse_bounding_volume_property(tile_json, "boundingVolume") {
        Some(volume) => volume.transformed(&transform),
        None => {
            log::error!("Tile did not contain a boundingVolume");
            return None;
        }
    };

    let geometric_error = match get_f64(tile_json, "geometricError") {
        Some(ge) => ge,
        None => {
            log::error!("Tile did not contain a geometricError");
            return None;
        }
    };

    let content_json = tile_json.get("content").filter(|c| c.is_object());
    let content_uri = content_json
        .and_then(|c| get_str(c, "uri").or_else(|| get_str(c, "url")))
        .map(str::to_string);

    let refine = match get_str(tile_json, "refine") {
        Some("REPLACE") => TileRefine::Replace,
        Some("ADD") => TileRefine::Add,
        Some(other) => {
            log::error!("Tile contained an unknown refine value: {}", other);
            parent_refine
        }
        None => parent_refine,
    };

    let mut tile = Tile::new(context, bounding_volume);
    tile.id = match &content_uri {
        Some(uri) => TileId::Url(uri.clone()),
        None => TileId::none(),
    };
    tile.geometric_error = geometric_error * max_scale_component(&transform);
    tile.refine = refine;
    tile.transform = transform;
    tile.parent = parent;
    tile.content_bounding_volume = content_json
        .and_then(|c| parse_bounding_volume_property(c, "boundingVolume"))
        .map(|v| v.transformed(&transform));
    tile.viewer_request_volume = parse_bounding_volume_property(tile_json, "viewerRequestVolume")
        .map(|v| v.transformed(&transform));

    let key = pool.allocate(tile);

    match tile_json.get("children").and_then(Value::as_array) {
        Some(children_json) => {
            for child_json in children_json {
                if let Some(child) =
                    create_tile(pool, contexts, context, child_json, transform, refine, Some(key))
                {
                    pool.get_mut(key).children.push(child);
                }
            }
        }
        None => {
            if content_uri.is_some() {
                parse_implicit_extension(pool, contexts, key, tile_json);
            }
        }
    }

    Some(key)
}

/// Parse a bounding volume object: S2 extension, box, region, or sphere
pub fn parse_bounding_volume_property(json: &Value, key: &str) -> Option<BoundingVolume> {
    let bv = json.get(key)?;
    if !bv.is_object() {
        return None;
    }

    if let Some(s2) = bv
        .get("extensions")
        .and_then(|e| e.get("3DTILES_bounding_volume_S2"))
        .filter(|v| v.is_object())
    {
        return Some(BoundingVolume::S2(S2CellVolume {
            token: get_str(s2, "token").unwrap_or("1").to_string(),
            minimum_height: get_f64(s2, "minimumHeight").unwrap_or(0.0),
            maximum_height: get_f64(s2, "maximumHeight").unwrap_or(0.0),
        }));
    }

    if let Some(a) = get_doubles(bv, "box", 12) {
        return Some(BoundingVolume::Box(OrientedBox::new(
            DVec3::new(a[0], a[1], a[2]),
            DMat3::from_cols(
                DVec3::new(a[3], a[4], a[5]),
                DVec3::new(a[6], a[7], a[8]),
                DVec3::new(a[9], a[10], a[11]),
            ),
        )));
    }

    if let Some(a) = get_doubles(bv, "region", 6) {
        return Some(BoundingVolume::Region(BoundingRegion::new(
            GlobeRectangle::new(a[0], a[1], a[2], a[3]),
            a[4],
            a[5],
        )));
    }

    if let Some(a) = get_doubles(bv, "sphere", 4) {
        return Some(BoundingVolume::Sphere(BoundingSphere::new(
            DVec3::new(a[0], a[1], a[2]),
            a[3],
        )));
    }

    None
}

/// Parse a column-major 4x4 `transform` property
pub fn parse_transform(tile_json: &Value) -> Option<DMat4> {
    let a = get_doubles(tile_json, "transform", 16)?;
    let mut cols = [0.0; 16];
    cols.copy_from_slice(&a);
    Some(DMat4::from_cols_array(&cols))
}

/// Turn a content-bearing leaf with `3DTILES_implicit_tiling` into the
/// root of an implicit tileset
///
/// The tile becomes a dummy that refines unconditionally; its single child
/// carries the implicit root coordinates and the actual content.
fn parse_implicit_extension(
    pool: &mut TilePool,
    contexts: &mut Vec<TileContext>,
    key: TileKey,
    tile_json: &Value,
) {
    let implicit_json = match tile_json
        .get("extensions")
        .and_then(|e| e.get("3DTILES_implicit_tiling"))
        .filter(|v| v.is_object())
    {
        Some(v) => v,
        None => return,
    };

    let scheme = match get_str(implicit_json, "subdivisionScheme") {
        Some("QUADTREE") => SubdivisionScheme::Quadtree,
        Some("OCTREE") => SubdivisionScheme::Octree,
        _ => return,
    };
    let subtree_levels = match get_u32(implicit_json, "subtreeLevels") {
        Some(v) if v > 0 => v,
        _ => return,
    };
    let maximum_level = match get_u32(implicit_json, "maximumLevel") {
        Some(v) => v,
        None => return,
    };
    let subtree_template = match implicit_json
        .get("subtrees")
        .and_then(|s| get_str(s, "uri"))
    {
        Some(v) => v.to_string(),
        None => return,
    };

    let root_volume = pool.get(key).bounding_volume.clone();
    if !matches!(
        root_volume,
        BoundingVolume::Region(_) | BoundingVolume::Box(_) | BoundingVolume::S2(_)
    ) {
        return;
    }

    let content_template = match &pool.get(key).id {
        TileId::Url(uri) if !uri.is_empty() => uri.clone(),
        _ => return,
    };

    let old_context = pool.get(key).context;
    let mut new_context = contexts[old_context.0 as usize].derive();
    new_context.implicit = Some(ImplicitContext {
        scheme,
        subtree_levels,
        maximum_level,
        content_templates: vec![content_template],
        root_volume,
        root_tiles_x: 1,
        availability: ImplicitAvailability::Subtrees {
            subtree_template,
            loaded: HashMap::new(),
            loading: HashSet::new(),
        },
    });
    let new_key = ContextKey(contexts.len() as u32);
    contexts.push(new_context);

    // The child is the real root of the implicit tileset
    let (tile_volume, tile_ge, tile_refine, tile_transform) = {
        let tile = pool.get(key);
        (
            tile.bounding_volume.clone(),
            tile.geometric_error,
            tile.refine,
            tile.transform,
        )
    };

    let mut child = Tile::new(new_key, tile_volume);
    child.id = match scheme {
        SubdivisionScheme::Quadtree => TileId::Quadtree(QuadtreeTileId::new(0, 0, 0)),
        SubdivisionScheme::Octree => TileId::Octree(OctreeTileId::new(0, 0, 0, 0)),
    };
    child.geometric_error = tile_ge;
    child.refine = tile_refine;
    child.transform = tile_transform;
    child.parent = Some(key);
    let child_key = pool.allocate(child);

    // The extension tile itself becomes a contentless dummy
    let tile = pool.get_mut(key);
    tile.context = new_key;
    tile.id = TileId::none();
    tile.content = Some(TileContent::Empty);
    tile.state = TileLoadState::ContentLoaded;
    tile.unconditionally_refine = true;
    tile.children.push(child_key);
}

/// Largest geometric error a level-zero terrain quadtree cell can have
fn quadtree_max_geometric_error(equatorial_radius: f64) -> f64 {
    equatorial_radius * 2.0 * std::f64::consts::PI * 0.25 / (65.0 * 2.0)
}

/// Build the root tiles of a `quantized-mesh-1.0` terrain layer
fn create_terrain_root(
    pool: &mut TilePool,
    contexts: &mut Vec<TileContext>,
    context: ContextKey,
    layer: &Value,
    request_water_mask: bool,
) -> Result<TileKey> {
    let ctx = &mut contexts[context.0 as usize];
    ctx.request_headers.push((
        "Accept".to_string(),
        "application/vnd.quantized-mesh,application/octet-stream;q=0.9,*/*;q=0.01".to_string(),
    ));
    ctx.version = get_str(layer, "version").map(str::to_string);

    let bounds = get_doubles(layer, "bounds", 4);
    let projection = get_str(layer, "projection").unwrap_or("EPSG:4326");
    let (rectangle, x_tiles) = match projection {
        "EPSG:4326" => {
            let rect = bounds
                .map(|b| GlobeRectangle::from_degrees(b[0], b[1], b[2], b[3]))
                .unwrap_or(GlobeRectangle::MAXIMUM);
            (rect, 2u32)
        }
        "EPSG:3857" => {
            let rect = bounds
                .map(|b| GlobeRectangle::from_degrees(b[0], b[1], b[2], b[3]))
                .unwrap_or(GlobeRectangle::from_degrees(
                    -180.0,
                    -85.05112878,
                    180.0,
                    85.05112878,
                ));
            (rect, 1u32)
        }
        other => {
            log::error!("Tileset contained an unknown projection value: {}", other);
            return Err(Error::Unsupported(format!("terrain projection {}", other)));
        }
    };

    let mut templates: Vec<String> = layer
        .get("tiles")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if templates.is_empty() {
        return Err(Error::Parse("terrain layer has no tile templates".to_string()));
    }

    let max_zoom = get_u32(layer, "maxzoom").unwrap_or(30);

    // Request the extensions the layer offers and we understand
    let offered: Vec<&str> = layer
        .get("extensions")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let mut known = vec!["octvertexnormals", "metadata"];
    if request_water_mask {
        known.push("watermask");
    }
    let to_request: Vec<&str> = known
        .iter()
        .copied()
        .filter(|k| offered.contains(k))
        .collect();
    if !to_request.is_empty() {
        let joined = to_request.join("-");
        for template in &mut templates {
            *template = url::add_query(template, "extensions", &joined);
        }
    }

    let root_volume =
        BoundingVolume::Region(BoundingRegion::with_loose_heights(rectangle, -1000.0, 9000.0));

    let implicit = ImplicitContext {
        scheme: SubdivisionScheme::Quadtree,
        subtree_levels: 1,
        maximum_level: max_zoom,
        content_templates: templates,
        root_volume: root_volume.clone(),
        root_tiles_x: x_tiles,
        availability: ImplicitAvailability::Complete,
    };

    let mut root = Tile::new(context, root_volume);
    root.geometric_error = 999_999_999.0;
    let root_key = pool.allocate(root);

    let level_zero_error = 8.0
        * quadtree_max_geometric_error(Ellipsoid::WGS84.radii.x)
        * (rectangle.width() / f64::from(x_tiles));

    for i in 0..x_tiles {
        let volume = implicit.volume_for(0, i, 0, None);
        let mut child = Tile::new(context, volume);
        child.id = TileId::Quadtree(QuadtreeTileId::new(0, i, 0));
        child.geometric_error = level_zero_error;
        child.parent = Some(root_key);
        let child_key = pool.allocate(child);
        pool.get_mut(root_key).children.push(child_key);
    }

    contexts[context.0 as usize].implicit = Some(implicit);

    Ok(root_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tileset::context::ContentAvailability;

    fn setup() -> (TilePool, Vec<TileContext>, ContextKey) {
        let pool = TilePool::new();
        let contexts = vec![TileContext::new("https://x.com/tileset.json".to_string())];
        (pool, contexts, ContextKey(0))
    }

    #[test]
    fn test_single_tile_tileset() {
        let (mut pool, mut contexts, ctx) = setup();
        let tileset: Value = serde_json::from_str(
            r#"{
                "asset": {"version": "1.0"},
                "root": {
                    "boundingVolume": {"region": [-0.01, -0.01, 0.01, 0.01, 0.0, 10.0]},
                    "geometricError": 100.0,
                    "refine": "REPLACE",
                    "content": {"uri": "a.b3dm"}
                }
            }"#,
        )
        .unwrap();

        let root = create_root_from_json(&mut pool, &mut contexts, ctx, &tileset, false).unwrap();
        let tile = pool.get(root);
        assert_eq!(tile.id, TileId::Url("a.b3dm".to_string()));
        assert_eq!(tile.geometric_error, 100.0);
        assert_eq!(tile.refine, TileRefine::Replace);
        assert!(tile.children.is_empty());
        assert!(matches!(tile.bounding_volume, BoundingVolume::Region(_)));
    }

    #[test]
    fn test_children_inherit_refine_and_accumulate_transform() {
        let (mut pool, mut contexts, ctx) = setup();
        let tileset: Value = serde_json::from_str(
            r#"{
                "root": {
                    "boundingVolume": {"sphere": [0, 0, 0, 100]},
                    "geometricError": 500.0,
                    "refine": "ADD",
                    "transform": [2,0,0,0, 0,2,0,0, 0,0,2,0, 0,0,0,1],
                    "children": [
                        {
                            "boundingVolume": {"sphere": [0, 0, 0, 50]},
                            "geometricError": 100.0,
                            "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 10,0,0,1]
                        }
                    ]
                }
            }"#,
        )
        .unwrap();

        let root = create_root_from_json(&mut pool, &mut contexts, ctx, &tileset, false).unwrap();
        let root_tile = pool.get(root);
        // Geometric error scales by the max scale component (2)
        assert_eq!(root_tile.geometric_error, 1000.0);
        assert_eq!(root_tile.children.len(), 1);

        let child = pool.get(root_tile.children[0]);
        assert_eq!(child.refine, TileRefine::Add);
        assert_eq!(child.parent, Some(root));
        assert_eq!(child.geometric_error, 200.0);
        // Child translation runs through the parent's scale
        let origin = child.transform.transform_point3(DVec3::ZERO);
        assert!((origin - DVec3::new(20.0, 0.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn test_malformed_child_is_dropped() {
        let (mut pool, mut contexts, ctx) = setup();
        let tileset: Value = serde_json::from_str(
            r#"{
                "root": {
                    "boundingVolume": {"sphere": [0, 0, 0, 100]},
                    "geometricError": 500.0,
                    "children": [
                        {"boundingVolume": {"sphere": [0, 0, 0, 50]}},
                        {"boundingVolume": {"sphere": [0, 0, 0, 50]}, "geometricError": 10.0}
                    ]
                }
            }"#,
        )
        .unwrap();

        let root = create_root_from_json(&mut pool, &mut contexts, ctx, &tileset, false).unwrap();
        // The child missing geometricError vanished
        assert_eq!(pool.get(root).children.len(), 1);
    }

    #[test]
    fn test_bounding_volume_variants() {
        let box_json: Value =
            serde_json::from_str(r#"{"bv": {"box": [1,2,3, 10,0,0, 0,20,0, 0,0,30]}}"#).unwrap();
        match parse_bounding_volume_property(&box_json, "bv").unwrap() {
            BoundingVolume::Box(b) => {
                assert_eq!(b.center, DVec3::new(1.0, 2.0, 3.0));
                assert_eq!(b.half_axes.col(1), DVec3::new(0.0, 20.0, 0.0));
            }
            other => panic!("expected box, got {:?}", other),
        }

        let sphere_json: Value = serde_json::from_str(r#"{"bv": {"sphere": [1,2,3,4]}}"#).unwrap();
        assert!(matches!(
            parse_bounding_volume_property(&sphere_json, "bv").unwrap(),
            BoundingVolume::Sphere(_)
        ));

        let s2_json: Value = serde_json::from_str(
            r#"{"bv": {"extensions": {"3DTILES_bounding_volume_S2":
                {"token": "89c6c7", "minimumHeight": 0, "maximumHeight": 1000}}}}"#,
        )
        .unwrap();
        match parse_bounding_volume_property(&s2_json, "bv").unwrap() {
            BoundingVolume::S2(s2) => {
                assert_eq!(s2.token, "89c6c7");
                assert_eq!(s2.maximum_height, 1000.0);
            }
            other => panic!("expected S2, got {:?}", other),
        }

        let bad_json: Value = serde_json::from_str(r#"{"bv": {"box": [1,2,3]}}"#).unwrap();
        assert!(parse_bounding_volume_property(&bad_json, "bv").is_none());
    }

    #[test]
    fn test_implicit_extension_creates_dummy_and_root() {
        let (mut pool, mut contexts, ctx) = setup();
        let tileset: Value = serde_json::from_str(
            r#"{
                "root": {
                    "boundingVolume": {"region": [-1.0, -1.0, 1.0, 1.0, 0.0, 100.0]},
                    "geometricError": 5000.0,
                    "refine": "REPLACE",
                    "content": {"uri": "content/{level}/{x}/{y}.b3dm"},
                    "extensions": {
                        "3DTILES_implicit_tiling": {
                            "subdivisionScheme": "QUADTREE",
                            "subtreeLevels": 2,
                            "maximumLevel": 4,
                            "subtrees": {"uri": "subtrees/{level}/{x}/{y}.subtree"}
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        let root = create_root_from_json(&mut pool, &mut contexts, ctx, &tileset, false).unwrap();
        let dummy = pool.get(root);
        assert!(dummy.unconditionally_refine);
        assert!(dummy.id.is_empty_url());
        assert_eq!(dummy.state, TileLoadState::ContentLoaded);
        assert_eq!(dummy.children.len(), 1);

        let implicit_root = pool.get(dummy.children[0]);
        assert_eq!(
            implicit_root.id,
            TileId::Quadtree(QuadtreeTileId::new(0, 0, 0))
        );
        assert_eq!(implicit_root.geometric_error, 5000.0);

        // A second context carrying the implicit parameters appeared
        assert_eq!(contexts.len(), 2);
        let implicit = contexts[1].implicit.as_ref().unwrap();
        assert_eq!(implicit.subtree_levels, 2);
        assert_eq!(implicit.maximum_level, 4);
        assert_eq!(
            implicit.content_availability(&implicit_root.id),
            ContentAvailability::Unknown
        );
    }

    #[test]
    fn test_terrain_layer() {
        let (mut pool, mut contexts, ctx) = setup();
        let layer: Value = serde_json::from_str(
            r#"{
                "format": "quantized-mesh-1.0",
                "version": "1.2.0",
                "tiles": ["{z}/{x}/{y}.terrain?v={version}"],
                "projection": "EPSG:4326",
                "bounds": [-180, -90, 180, 90],
                "maxzoom": 14,
                "extensions": ["octvertexnormals", "watermask"]
            }"#,
        )
        .unwrap();

        let root = create_root_from_json(&mut pool, &mut contexts, ctx, &layer, false).unwrap();
        let root_tile = pool.get(root);
        // Geographic projection has two level-zero tiles
        assert_eq!(root_tile.children.len(), 2);
        assert_eq!(root_tile.geometric_error, 999_999_999.0);

        let implicit = contexts[0].implicit.as_ref().unwrap();
        assert_eq!(implicit.maximum_level, 14);
        assert_eq!(implicit.root_tiles_x, 2);
        // Water mask not requested, so only octvertexnormals is appended
        assert!(implicit.content_templates[0].contains("extensions=octvertexnormals"));
        assert!(!implicit.content_templates[0].contains("watermask"));

        assert_eq!(contexts[0].version.as_deref(), Some("1.2.0"));
        assert!(contexts[0]
            .request_headers
            .iter()
            .any(|(name, value)| name == "Accept" && value.contains("quantized-mesh")));

        let west_child = pool.get(root_tile.children[0]);
        assert_eq!(west_child.id, TileId::Quadtree(QuadtreeTileId::new(0, 0, 0)));
        assert!(west_child.geometric_error > 0.0);
        match &west_child.bounding_volume {
            BoundingVolume::Region(region) => assert!(region.loose),
            other => panic!("expected region, got {:?}", other),
        }
    }

    #[test]
    fn test_terrain_unknown_projection() {
        let (mut pool, mut contexts, ctx) = setup();
        let layer: Value = serde_json::from_str(
            r#"{
                "format": "quantized-mesh-1.0",
                "tiles": ["{z}/{x}/{y}.terrain"],
                "projection": "EPSG:9999"
            }"#,
        )
        .unwrap();

        assert!(matches!(
            create_root_from_json(&mut pool, &mut contexts, ctx, &layer, false),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_up_axis() {
        let with_axis: Value =
            serde_json::from_str(r#"{"asset": {"gltfUpAxis": "Z"}}"#).unwrap();
        assert_eq!(obtain_gltf_up_axis(&with_axis), Axis::Z);

        let without: Value = serde_json::from_str(r#"{"asset": {}}"#).unwrap();
        assert_eq!(obtain_gltf_up_axis(&without), Axis::Y);

        let bad: Value = serde_json::from_str(r#"{"asset": {"gltfUpAxis": "W"}}"#).unwrap();
        assert_eq!(obtain_gltf_up_axis(&bad), Axis::Y);
    }

    #[test]
    fn test_no_root_no_format() {
        let (mut pool, mut contexts, ctx) = setup();
        let tileset: Value = serde_json::from_str(r#"{"asset": {"version": "1.0"}}"#).unwrap();
        assert!(matches!(
            create_root_from_json(&mut pool, &mut contexts, ctx, &tileset, false),
            Err(Error::Parse(_))
        ));
    }
}
