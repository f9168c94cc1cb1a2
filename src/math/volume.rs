//! Bounding volumes for tiles: regions, oriented boxes, spheres, S2 cells

use crate::core::types::{DMat3, DMat4, DVec3};
use crate::math::globe::{Ellipsoid, GlobeRectangle};

/// A geodetic bounding region: a globe rectangle plus a height interval
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingRegion {
    pub rectangle: GlobeRectangle,
    pub minimum_height: f64,
    pub maximum_height: f64,
    /// Heights are loose estimates rather than tight bounds. Terrain layers
    /// use this for roots whose real heights are unknown until tiles load.
    pub loose: bool,
}

impl BoundingRegion {
    pub fn new(rectangle: GlobeRectangle, minimum_height: f64, maximum_height: f64) -> Self {
        Self {
            rectangle,
            minimum_height,
            maximum_height,
            loose: false,
        }
    }

    pub fn with_loose_heights(
        rectangle: GlobeRectangle,
        minimum_height: f64,
        maximum_height: f64,
    ) -> Self {
        Self {
            rectangle,
            minimum_height,
            maximum_height,
            loose: true,
        }
    }

    /// Approximate the region with an oriented box in the local east-north-up
    /// frame at the region's center
    pub fn to_oriented_box(&self) -> OrientedBox {
        let rect = &self.rectangle;
        let mid_height = (self.minimum_height + self.maximum_height) * 0.5;
        let mut center_carto = rect.center();
        center_carto.height = mid_height;
        let center = Ellipsoid::WGS84.cartographic_to_cartesian(&center_carto);

        let (sin_lon, cos_lon) = center_carto.longitude.sin_cos();
        let (sin_lat, cos_lat) = center_carto.latitude.sin_cos();
        let east = DVec3::new(-sin_lon, cos_lon, 0.0);
        let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
        let up = DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);

        let equatorial = Ellipsoid::WGS84.radii.x;
        let half_east = equatorial * cos_lat.max(0.1) * rect.width() * 0.5;
        let half_north = equatorial * rect.height() * 0.5;
        let half_up = (self.maximum_height - self.minimum_height) * 0.5;

        OrientedBox {
            center,
            half_axes: DMat3::from_cols(east * half_east, north * half_north, up * half_up),
        }
    }
}

/// A box with arbitrary orientation: center plus three half-axis vectors
/// (the columns of `half_axes`)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrientedBox {
    pub center: DVec3,
    pub half_axes: DMat3,
}

impl OrientedBox {
    pub fn new(center: DVec3, half_axes: DMat3) -> Self {
        Self { center, half_axes }
    }

    /// Squared distance from a point to the closest point on the box
    pub fn distance_squared_to(&self, point: DVec3) -> f64 {
        let offset = point - self.center;
        let det = self.half_axes.determinant();
        if det.abs() < 1e-30 {
            // Degenerate box, fall back to center distance
            return offset.length_squared();
        }

        let local = self.half_axes.inverse() * offset;
        let clamped = local.clamp(DVec3::splat(-1.0), DVec3::splat(1.0));
        let closest = self.center + self.half_axes * clamped;
        (point - closest).length_squared()
    }

    /// Radius of the box projected onto a unit direction
    pub fn projected_radius(&self, direction: DVec3) -> f64 {
        self.half_axes.col(0).dot(direction).abs()
            + self.half_axes.col(1).dot(direction).abs()
            + self.half_axes.col(2).dot(direction).abs()
    }
}

/// A bounding sphere
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl BoundingSphere {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }
}

/// An S2 cell bounding volume: cell token plus a height interval
///
/// The cell's footprint is treated as the full globe, which is conservative
/// for visibility and refinement.
// TODO: decode the S2 token into a tight rectangle.
#[derive(Clone, Debug, PartialEq)]
pub struct S2CellVolume {
    pub token: String,
    pub minimum_height: f64,
    pub maximum_height: f64,
}

/// The bounding volume of a tile
#[derive(Clone, Debug, PartialEq)]
pub enum BoundingVolume {
    Region(BoundingRegion),
    Box(OrientedBox),
    Sphere(BoundingSphere),
    S2(S2CellVolume),
}

impl BoundingVolume {
    /// Center of the volume in earth-centered cartesian coordinates
    pub fn center(&self) -> DVec3 {
        match self {
            BoundingVolume::Region(region) => region.to_oriented_box().center,
            BoundingVolume::Box(obb) => obb.center,
            BoundingVolume::Sphere(sphere) => sphere.center,
            BoundingVolume::S2(s2) => {
                let region = BoundingRegion::new(
                    GlobeRectangle::MAXIMUM,
                    s2.minimum_height,
                    s2.maximum_height,
                );
                region.to_oriented_box().center
            }
        }
    }

    /// Squared distance from a point to the volume; zero inside
    pub fn distance_squared_to(&self, point: DVec3) -> f64 {
        match self {
            BoundingVolume::Region(region) => region.to_oriented_box().distance_squared_to(point),
            BoundingVolume::Box(obb) => obb.distance_squared_to(point),
            BoundingVolume::Sphere(sphere) => {
                let d = (point - sphere.center).length() - sphere.radius;
                if d <= 0.0 {
                    0.0
                } else {
                    d * d
                }
            }
            BoundingVolume::S2(_) => 0.0,
        }
    }

    /// Radius of the volume projected onto a unit direction, for plane tests
    pub fn projected_radius(&self, direction: DVec3) -> f64 {
        match self {
            BoundingVolume::Region(region) => region.to_oriented_box().projected_radius(direction),
            BoundingVolume::Box(obb) => obb.projected_radius(direction),
            BoundingVolume::Sphere(sphere) => sphere.radius,
            BoundingVolume::S2(_) => f64::INFINITY,
        }
    }

    /// Apply a transform. Regions and S2 cells are fixed to the globe and
    /// pass through unchanged; boxes and spheres follow the matrix.
    pub fn transformed(&self, transform: &DMat4) -> BoundingVolume {
        match self {
            BoundingVolume::Box(obb) => {
                let rotation_scale = DMat3::from_mat4(*transform);
                BoundingVolume::Box(OrientedBox {
                    center: transform.transform_point3(obb.center),
                    half_axes: rotation_scale * obb.half_axes,
                })
            }
            BoundingVolume::Sphere(sphere) => {
                let scale = max_scale_component(transform);
                BoundingVolume::Sphere(BoundingSphere {
                    center: transform.transform_point3(sphere.center),
                    radius: sphere.radius * scale,
                })
            }
            BoundingVolume::Region(_) | BoundingVolume::S2(_) => self.clone(),
        }
    }

    /// Estimate the globe rectangle covered by the volume
    pub fn estimate_globe_rectangle(&self) -> Option<GlobeRectangle> {
        match self {
            BoundingVolume::Region(region) => Some(region.rectangle),
            BoundingVolume::S2(_) => Some(GlobeRectangle::MAXIMUM),
            BoundingVolume::Box(obb) => {
                let radius = obb.projected_radius(DVec3::X)
                    .max(obb.projected_radius(DVec3::Y))
                    .max(obb.projected_radius(DVec3::Z));
                estimate_rectangle_around(obb.center, radius)
            }
            BoundingVolume::Sphere(sphere) => {
                estimate_rectangle_around(sphere.center, sphere.radius)
            }
        }
    }

    /// Bounding volume of an implicit child cell
    ///
    /// `level`, `x`, `y` (and `z` for octrees) address the child relative to
    /// this volume as the root of the implicit subdivision. Regions divide
    /// longitude and latitude (and height for octrees); boxes divide along
    /// their half axes. Spheres and S2 cells do not subdivide and pass
    /// through unchanged.
    pub fn implicit_child(&self, level: u32, x: u32, y: u32, z: Option<u32>) -> BoundingVolume {
        let denominator = f64::from(1u32 << level);
        match self {
            BoundingVolume::Region(region) => {
                let rect = &region.rectangle;
                let lon_size = rect.width() / denominator;
                let lat_size = rect.height() / denominator;

                let child_west = rect.west + lon_size * f64::from(x);
                let child_south = rect.south + lat_size * f64::from(y);
                let child_rect = GlobeRectangle::new(
                    child_west,
                    child_south,
                    child_west + lon_size,
                    child_south + lat_size,
                );

                let (min_height, max_height) = match z {
                    Some(z) => {
                        let height_size =
                            (region.maximum_height - region.minimum_height) / denominator;
                        let child_min = region.minimum_height + height_size * f64::from(z);
                        (child_min, child_min + height_size)
                    }
                    None => (region.minimum_height, region.maximum_height),
                };

                BoundingVolume::Region(BoundingRegion::new(child_rect, min_height, max_height))
            }
            BoundingVolume::Box(obb) => {
                let min = obb.center
                    - obb.half_axes.col(0)
                    - obb.half_axes.col(1)
                    - obb.half_axes.col(2);
                let x_dim = obb.half_axes.col(0) * 2.0 / denominator;
                let y_dim = obb.half_axes.col(1) * 2.0 / denominator;
                let (z_dim, z_index) = match z {
                    Some(z) => (obb.half_axes.col(2) * 2.0 / denominator, f64::from(z)),
                    None => (obb.half_axes.col(2) * 2.0, 0.0),
                };

                let child_min =
                    min + x_dim * f64::from(x) + y_dim * f64::from(y) + z_dim * z_index;
                let child_max = child_min + x_dim + y_dim + z_dim;

                BoundingVolume::Box(OrientedBox {
                    center: (child_min + child_max) * 0.5,
                    half_axes: DMat3::from_cols(x_dim * 0.5, y_dim * 0.5, z_dim * 0.5),
                })
            }
            BoundingVolume::Sphere(_) | BoundingVolume::S2(_) => self.clone(),
        }
    }
}

/// Largest scale factor of a transform, used to scale geometric error
pub fn max_scale_component(transform: &DMat4) -> f64 {
    let x = transform.col(0).truncate().length();
    let y = transform.col(1).truncate().length();
    let z = transform.col(2).truncate().length();
    x.max(y).max(z)
}

fn estimate_rectangle_around(center: DVec3, radius: f64) -> Option<GlobeRectangle> {
    let carto = Ellipsoid::WGS84.cartesian_to_cartographic(center)?;
    let meters_per_radian = Ellipsoid::WGS84.radii.x;
    let d_lat = radius / meters_per_radian;
    let d_lon = radius / (meters_per_radian * carto.latitude.cos().abs().max(0.1));
    Some(GlobeRectangle::new(
        carto.longitude - d_lon,
        carto.latitude - d_lat,
        carto.longitude + d_lon,
        carto.latitude + d_lat,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> OrientedBox {
        OrientedBox::new(DVec3::ZERO, DMat3::IDENTITY)
    }

    #[test]
    fn test_box_distance_outside() {
        let obb = unit_box();
        // Point at (3, 0, 0) is 2 away from the +x face
        let d2 = obb.distance_squared_to(DVec3::new(3.0, 0.0, 0.0));
        assert!((d2 - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_box_distance_inside() {
        let obb = unit_box();
        assert_eq!(obb.distance_squared_to(DVec3::new(0.5, 0.5, 0.5)), 0.0);
    }

    #[test]
    fn test_sphere_distance() {
        let bv = BoundingVolume::Sphere(BoundingSphere::new(DVec3::ZERO, 2.0));
        assert_eq!(bv.distance_squared_to(DVec3::new(1.0, 0.0, 0.0)), 0.0);
        let d2 = bv.distance_squared_to(DVec3::new(5.0, 0.0, 0.0));
        assert!((d2 - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_box_projected_radius() {
        let obb = unit_box();
        assert!((obb.projected_radius(DVec3::X) - 1.0).abs() < 1e-9);
        let diag = DVec3::ONE.normalize();
        assert!((obb.projected_radius(diag) - 3.0 / 3f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_transform_scales_sphere() {
        let bv = BoundingVolume::Sphere(BoundingSphere::new(DVec3::ZERO, 1.0));
        let m = DMat4::from_scale(DVec3::new(2.0, 3.0, 1.0));
        match bv.transformed(&m) {
            BoundingVolume::Sphere(s) => assert!((s.radius - 3.0).abs() < 1e-9),
            _ => panic!("expected a sphere"),
        }
    }

    #[test]
    fn test_region_unchanged_by_transform() {
        let region = BoundingRegion::new(GlobeRectangle::from_degrees(0.0, 0.0, 1.0, 1.0), 0.0, 100.0);
        let bv = BoundingVolume::Region(region.clone());
        let m = DMat4::from_translation(DVec3::new(1000.0, 0.0, 0.0));
        assert_eq!(bv.transformed(&m), BoundingVolume::Region(region));
    }

    #[test]
    fn test_max_scale_component() {
        let m = DMat4::from_scale(DVec3::new(2.0, 5.0, 3.0));
        assert!((max_scale_component(&m) - 5.0).abs() < 1e-9);
        assert!((max_scale_component(&DMat4::IDENTITY) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_quad_children_tile_the_region() {
        let parent = BoundingVolume::Region(BoundingRegion::new(
            GlobeRectangle::from_degrees(-10.0, -10.0, 10.0, 10.0),
            0.0,
            500.0,
        ));

        let mut union: Option<GlobeRectangle> = None;
        for y in 0..2 {
            for x in 0..2 {
                match parent.implicit_child(1, x, y, None) {
                    BoundingVolume::Region(child) => {
                        // Quadtree children keep the parent's height interval
                        assert_eq!(child.minimum_height, 0.0);
                        assert_eq!(child.maximum_height, 500.0);
                        union = Some(match union {
                            Some(u) => u.union(&child.rectangle),
                            None => child.rectangle,
                        });
                    }
                    _ => panic!("expected a region"),
                }
            }
        }

        let union = union.unwrap();
        let expected = GlobeRectangle::from_degrees(-10.0, -10.0, 10.0, 10.0);
        assert!((union.west - expected.west).abs() < 1e-12);
        assert!((union.south - expected.south).abs() < 1e-12);
        assert!((union.east - expected.east).abs() < 1e-12);
        assert!((union.north - expected.north).abs() < 1e-12);
    }

    #[test]
    fn test_oct_children_divide_height() {
        let parent = BoundingVolume::Region(BoundingRegion::new(
            GlobeRectangle::from_degrees(0.0, 0.0, 8.0, 8.0),
            0.0,
            800.0,
        ));

        match parent.implicit_child(1, 0, 0, Some(1)) {
            BoundingVolume::Region(child) => {
                assert!((child.minimum_height - 400.0).abs() < 1e-9);
                assert!((child.maximum_height - 800.0).abs() < 1e-9);
            }
            _ => panic!("expected a region"),
        }
    }

    #[test]
    fn test_box_children_tile_the_box() {
        let parent = BoundingVolume::Box(OrientedBox::new(
            DVec3::new(10.0, 20.0, 30.0),
            DMat3::from_diagonal(DVec3::new(4.0, 4.0, 4.0)),
        ));

        // Octree child (1, 1, 1, 1) occupies the +x +y +z octant
        match parent.implicit_child(1, 1, 1, Some(1)) {
            BoundingVolume::Box(child) => {
                assert!((child.center - DVec3::new(12.0, 22.0, 32.0)).length() < 1e-9);
                assert!((child.half_axes.col(0).length() - 2.0).abs() < 1e-9);
            }
            _ => panic!("expected a box"),
        }

        // Quadtree child keeps the full z extent
        match parent.implicit_child(1, 0, 0, None) {
            BoundingVolume::Box(child) => {
                assert!((child.half_axes.col(2).length() - 4.0).abs() < 1e-9);
                assert!((child.half_axes.col(0).length() - 2.0).abs() < 1e-9);
            }
            _ => panic!("expected a box"),
        }
    }

    #[test]
    fn test_region_distance_far_point() {
        let region = BoundingRegion::new(GlobeRectangle::from_degrees(0.0, 0.0, 1.0, 1.0), 0.0, 100.0);
        let bv = BoundingVolume::Region(region);
        // A point far outside the earth is far from any surface region
        let d2 = bv.distance_squared_to(DVec3::new(1.0e7, 1.0e7, 1.0e7));
        assert!(d2 > 1.0e12);
    }
}
