//! Globe geometry: ellipsoid conversions and geodetic rectangles

use crate::core::types::DVec3;

/// A geodetic position: longitude and latitude in radians, height in meters
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Cartographic {
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    pub fn from_degrees(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude: longitude.to_radians(),
            latitude: latitude.to_radians(),
            height,
        }
    }
}

/// Reference ellipsoid for geodetic conversions
#[derive(Clone, Copy, Debug)]
pub struct Ellipsoid {
    pub radii: DVec3,
}

impl Ellipsoid {
    /// WGS84 reference ellipsoid
    pub const WGS84: Ellipsoid = Ellipsoid {
        radii: DVec3::new(6378137.0, 6378137.0, 6356752.314245),
    };

    /// Convert a geodetic position to earth-centered earth-fixed cartesian
    pub fn cartographic_to_cartesian(&self, c: &Cartographic) -> DVec3 {
        let cos_lat = c.latitude.cos();
        let normal = DVec3::new(
            cos_lat * c.longitude.cos(),
            cos_lat * c.longitude.sin(),
            c.latitude.sin(),
        );
        let radii_squared = self.radii * self.radii;
        let k = radii_squared * normal;
        let gamma = normal.dot(k).sqrt();
        let surface = k / gamma;
        surface + normal * c.height
    }

    /// Convert a cartesian position to geodetic, iterating the latitude
    ///
    /// Returns `None` for points at (or extremely near) the earth's center
    /// where the geodetic latitude is undefined.
    pub fn cartesian_to_cartographic(&self, p: DVec3) -> Option<Cartographic> {
        let len = p.length();
        if len < 1.0 {
            return None;
        }

        let longitude = p.y.atan2(p.x);

        // Bowring's method. Centimeter accuracy at any height that
        // matters for streaming decisions.
        let a = self.radii.x;
        let b = self.radii.z;
        let e2 = 1.0 - (b * b) / (a * a);
        let ep2 = (a * a) / (b * b) - 1.0;
        let rho = (p.x * p.x + p.y * p.y).sqrt();

        let beta = (p.z * a).atan2(rho * b);
        let (sin_b, cos_b) = beta.sin_cos();
        let latitude = (p.z + ep2 * b * sin_b * sin_b * sin_b)
            .atan2(rho - e2 * a * cos_b * cos_b * cos_b);

        let sin_lat = latitude.sin();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let height = if rho > 1.0 {
            rho / latitude.cos() - n
        } else {
            p.z.abs() - b
        };

        Some(Cartographic::new(longitude, latitude, height))
    }
}

/// A rectangle on the globe in geodetic radians
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GlobeRectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GlobeRectangle {
    /// The whole globe
    pub const MAXIMUM: GlobeRectangle = GlobeRectangle {
        west: -std::f64::consts::PI,
        south: -std::f64::consts::FRAC_PI_2,
        east: std::f64::consts::PI,
        north: std::f64::consts::FRAC_PI_2,
    };

    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn from_degrees(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west: west.to_radians(),
            south: south.to_radians(),
            east: east.to_radians(),
            north: north.to_radians(),
        }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn center(&self) -> Cartographic {
        Cartographic::new(
            (self.west + self.east) * 0.5,
            (self.south + self.north) * 0.5,
            0.0,
        )
    }

    /// Whether a geodetic position lies within the rectangle
    pub fn contains(&self, c: &Cartographic) -> bool {
        c.longitude >= self.west
            && c.longitude <= self.east
            && c.latitude >= self.south
            && c.latitude <= self.north
    }

    /// The smallest rectangle covering both inputs
    pub fn union(&self, other: &GlobeRectangle) -> GlobeRectangle {
        GlobeRectangle {
            west: self.west.min(other.west),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            north: self.north.max(other.north),
        }
    }
}
