//! Camera view state: frustum culling and screen-space error

use crate::core::types::{DMat4, DVec2, DVec3, DVec4};
use crate::math::globe::{Cartographic, Ellipsoid};
use crate::math::volume::BoundingVolume;

/// A plane defined by unit normal and distance from origin
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane {
    pub fn new(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

/// The per-frustum view description handed to `update_view`
///
/// Carries everything the traversal needs: the frustum planes for culling,
/// the camera ray for load prioritization, the projection parameters for
/// screen-space error, and the geodetic camera position for fog and
/// under-camera tests.
#[derive(Clone, Debug)]
pub struct ViewState {
    position: DVec3,
    direction: DVec3,
    viewport: DVec2,
    sse_denominator: f64,
    position_cartographic: Option<Cartographic>,
    planes: [Plane; 6],
}

impl ViewState {
    /// Build a view state from camera parameters
    ///
    /// `viewport` is in pixels; `vertical_fov` in radians.
    pub fn create(
        position: DVec3,
        direction: DVec3,
        up: DVec3,
        viewport: DVec2,
        vertical_fov: f64,
    ) -> Self {
        let aspect = viewport.x / viewport.y;
        let projection = DMat4::perspective_rh(vertical_fov, aspect, 1.0, 1.0e9);
        let view = DMat4::look_at_rh(position, position + direction, up);
        let planes = extract_frustum_planes(&(projection * view));

        Self {
            position,
            direction: direction.normalize(),
            viewport,
            sse_denominator: 2.0 * (vertical_fov * 0.5).tan(),
            position_cartographic: Ellipsoid::WGS84.cartesian_to_cartographic(position),
            planes,
        }
    }

    pub fn position(&self) -> DVec3 {
        self.position
    }

    pub fn direction(&self) -> DVec3 {
        self.direction
    }

    /// Geodetic camera position, if the camera is not at the earth's center
    pub fn position_cartographic(&self) -> Option<&Cartographic> {
        self.position_cartographic.as_ref()
    }

    /// Whether any part of the bounding volume is inside the frustum
    pub fn is_bounding_volume_visible(&self, volume: &BoundingVolume) -> bool {
        let center = volume.center();
        for plane in &self.planes {
            let radius = volume.projected_radius(plane.normal);
            if plane.distance_to_point(center) < -radius {
                return false;
            }
        }
        true
    }

    /// Squared distance from the camera to the bounding volume
    pub fn distance_squared_to(&self, volume: &BoundingVolume) -> f64 {
        volume.distance_squared_to(self.position)
    }

    /// Screen-space error in pixels of a tile with the given geometric
    /// error at the given distance
    pub fn screen_space_error(&self, geometric_error: f64, distance: f64) -> f64 {
        if distance <= 0.0 {
            return f64::MAX;
        }
        (geometric_error * self.viewport.y) / (distance * self.sse_denominator)
    }
}

/// Extract the six frustum planes from a view-projection matrix
fn extract_frustum_planes(vp: &DMat4) -> [Plane; 6] {
    let m = vp.to_cols_array_2d();

    // Left: row3 + row0
    let left = normalize_plane(DVec4::new(
        m[0][3] + m[0][0],
        m[1][3] + m[1][0],
        m[2][3] + m[2][0],
        m[3][3] + m[3][0],
    ));

    // Right: row3 - row0
    let right = normalize_plane(DVec4::new(
        m[0][3] - m[0][0],
        m[1][3] - m[1][0],
        m[2][3] - m[2][0],
        m[3][3] - m[3][0],
    ));

    // Bottom: row3 + row1
    let bottom = normalize_plane(DVec4::new(
        m[0][3] + m[0][1],
        m[1][3] + m[1][1],
        m[2][3] + m[2][1],
        m[3][3] + m[3][1],
    ));

    // Top: row3 - row1
    let top = normalize_plane(DVec4::new(
        m[0][3] - m[0][1],
        m[1][3] - m[1][1],
        m[2][3] - m[2][1],
        m[3][3] - m[3][1],
    ));

    // Near: row3 + row2
    let near = normalize_plane(DVec4::new(
        m[0][3] + m[0][2],
        m[1][3] + m[1][2],
        m[2][3] + m[2][2],
        m[3][3] + m[3][2],
    ));

    // Far: row3 - row2
    let far = normalize_plane(DVec4::new(
        m[0][3] - m[0][2],
        m[1][3] - m[1][2],
        m[2][3] - m[2][2],
        m[3][3] - m[3][2],
    ));

    [near, far, left, right, top, bottom]
}

fn normalize_plane(plane: DVec4) -> Plane {
    let normal = DVec3::new(plane.x, plane.y, plane.z);
    let len = normal.length();
    Plane {
        normal: normal / len,
        distance: plane.w / len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::volume::BoundingSphere;

    fn looking_down_x() -> ViewState {
        ViewState::create(
            DVec3::ZERO,
            DVec3::X,
            DVec3::Z,
            DVec2::new(1024.0, 768.0),
            60f64.to_radians(),
        )
    }

    #[test]
    fn test_sphere_ahead_is_visible() {
        let view = looking_down_x();
        let bv = BoundingVolume::Sphere(BoundingSphere::new(DVec3::new(100.0, 0.0, 0.0), 10.0));
        assert!(view.is_bounding_volume_visible(&bv));
    }

    #[test]
    fn test_sphere_behind_is_culled() {
        let view = looking_down_x();
        let bv = BoundingVolume::Sphere(BoundingSphere::new(DVec3::new(-100.0, 0.0, 0.0), 10.0));
        assert!(!view.is_bounding_volume_visible(&bv));
    }

    #[test]
    fn test_sphere_straddling_plane_is_visible() {
        let view = looking_down_x();
        // Off to the side but big enough to poke into the frustum
        let bv = BoundingVolume::Sphere(BoundingSphere::new(DVec3::new(10.0, 100.0, 0.0), 95.0));
        assert!(view.is_bounding_volume_visible(&bv));
    }

    #[test]
    fn test_screen_space_error_shrinks_with_distance() {
        let view = looking_down_x();
        let near = view.screen_space_error(16.0, 100.0);
        let far = view.screen_space_error(16.0, 1000.0);
        assert!(near > far);
        assert!((near / far - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_screen_space_error_formula() {
        let view = looking_down_x();
        // sse = ge * viewportHeight / (distance * 2 tan(fov/2))
        let expected = (16.0 * 768.0) / (100.0 * 2.0 * (30f64.to_radians()).tan());
        assert!((view.screen_space_error(16.0, 100.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_distance_is_infinite_error() {
        let view = looking_down_x();
        assert_eq!(view.screen_space_error(16.0, 0.0), f64::MAX);
    }

    #[test]
    fn test_distance_squared() {
        let view = looking_down_x();
        let bv = BoundingVolume::Sphere(BoundingSphere::new(DVec3::new(100.0, 0.0, 0.0), 10.0));
        assert!((view.distance_squared_to(&bv) - 8100.0).abs() < 1e-6);
    }
}
