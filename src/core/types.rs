//! Core type aliases and re-exports
//!
//! The geometry pipeline is double precision throughout; tile datasets are
//! planetary-scale and single precision loses whole meters near the surface.

pub use glam::{DMat3, DMat4, DVec2, DVec3, DVec4};

/// Standard Result type for the crate
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;
