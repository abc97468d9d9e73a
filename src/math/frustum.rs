//! View frustum for node culling

use crate::core::types::{Vec3, Vec4, Mat4};
use super::aabb::Aabb;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Plane from `(a, b, c, d)` coefficients, normalized
    fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = coefficients.truncate();
        let len = normal.length();
        Self::new(normal / len, coefficients.w / len)
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Result of testing a volume against the frustum
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Containment {
    Outside,
    Intersecting,
    Inside,
}

/// View frustum bounded by six inward-facing planes
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract the planes of a view-projection matrix
    ///
    /// Planes are taken against a `[-w, w]` clip depth range. For projections
    /// with a `[0, w]` depth range the near plane ends up closer to the
    /// camera than the real one, which only makes culling more conservative.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let w = vp.row(3);
        let (x, y, z) = (vp.row(0), vp.row(1), vp.row(2));
        let planes = [w + z, w - z, w + x, w - x, w - y, w + y]
            .map(Plane::from_coefficients);
        Self { planes }
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Classify an AABB against all six planes
    ///
    /// The corner furthest along a plane's normal decides rejection, the
    /// opposite corner decides full containment.
    pub fn classify_aabb(&self, aabb: &Aabb) -> Containment {
        let mut result = Containment::Inside;
        for plane in &self.planes {
            let positive = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            let negative = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.min, aabb.max);

            if plane.distance_to_point(positive) < 0.0 {
                return Containment::Outside;
            }
            if plane.distance_to_point(negative) < 0.0 {
                result = Containment::Intersecting;
            }
        }
        result
    }
}
