//! Mathematical utilities and data structures

pub mod morton;
pub mod globe;
pub mod volume;
pub mod view;

pub use globe::{Cartographic, Ellipsoid, GlobeRectangle};
pub use volume::{BoundingRegion, BoundingSphere, BoundingVolume, OrientedBox, S2CellVolume};
pub use view::{Plane, ViewState};
