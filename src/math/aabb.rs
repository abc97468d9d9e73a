//! Axis-aligned bounding box and bounding sphere

use crate::core::types::Vec3;
use glam::BVec3;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box enclosing all points, `None` for an empty iterator
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut aabb = Aabb::new(first, first);
        for p in points {
            aabb.expand(p);
        }
        Some(aabb)
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Check if `other` lies entirely inside this box
    pub fn contains(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    /// Expand AABB to include point
    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Return merged AABB containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Clamp this box into `bounds`
    ///
    /// The result is always contained in `bounds`. A disjoint box collapses
    /// onto the nearest face of `bounds` rather than turning inside out.
    pub fn clamped_to(&self, bounds: &Aabb) -> Aabb {
        let min = self.min.clamp(bounds.min, bounds.max);
        let max = self.max.clamp(bounds.min, bounds.max);
        Aabb { min, max: max.max(min) }
    }

    /// Get child octant AABB for octree subdivision
    ///
    /// Follows the Potree octant numbering: bit 2 = x, bit 1 = y, bit 0 = z,
    /// a set bit selecting the upper half along that axis.
    pub fn child_octant(&self, index: u8) -> Aabb {
        let half = self.size() * 0.5;
        let upper = BVec3::new(index & 4 != 0, index & 2 != 0, index & 1 != 0);
        let min = Vec3::select(upper, self.min + half, self.min);
        Aabb::new(min, min + half)
    }

    /// Sphere through the corners of this box
    pub fn bounding_sphere(&self) -> BoundingSphere {
        let center = self.center();
        BoundingSphere {
            center,
            radius: center.distance(self.min),
        }
    }
}

/// Bounding sphere used for distance and screen-size estimates
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    /// True if `point` lies strictly inside the sphere
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.center.distance(point) < self.radius
    }
}
