//! Mathematical utilities and data structures

pub mod aabb;
pub mod frustum;

pub use aabb::{Aabb, BoundingSphere};
pub use frustum::{Containment, Frustum, Plane};
