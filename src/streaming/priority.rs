//! Priority queue for node traversal based on projected screen size

use crate::core::types::Vec3;
use crate::math::BoundingSphere;
use crate::octree::NodeId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Weight given to nodes that must be visited first: the root, and any
/// node whose bounding sphere contains the camera
pub const MAX_WEIGHT: f32 = f32::MAX;

/// Queued node with its importance
#[derive(Clone, Copy, Debug)]
pub struct NodePriority {
    pub node: NodeId,
    pub weight: f32, // Higher = more important
    seq: u64,        // Insertion order, breaks ties
}

// Implement Ord/PartialOrd for BinaryHeap (max-heap by default)
impl Eq for NodePriority {}

impl PartialEq for NodePriority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for NodePriority {
    fn cmp(&self, other: &Self) -> Ordering {
        // Heavier first, then earlier insertion first
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for NodePriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-priority queue of nodes to visit
#[derive(Default)]
pub struct NodePriorityQueue {
    heap: BinaryHeap<NodePriority>,
    next_seq: u64,
}

impl NodePriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all queued nodes
    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_seq = 0;
    }

    pub fn push(&mut self, node: NodeId, weight: f32) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(NodePriority { node, weight, seq });
    }

    /// Get the most important node; equal weights pop in insertion order
    pub fn pop(&mut self) -> Option<NodePriority> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Projected size of a bounding sphere
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Importance {
    /// Queue weight: the projected angular radius, or [`MAX_WEIGHT`]
    pub weight: f32,
    /// Estimated on-screen radius in pixels
    pub pixel_radius: f32,
    /// The camera is inside the sphere
    pub contains_camera: bool,
}

/// Estimate how large a sphere appears from `camera`
///
/// Uses `projection_factor * r / sqrt(d^2 - r^2)`, the tangent of the
/// sphere's angular radius scaled by `1 / tan(fov)`, times the viewport
/// height for pixels.
///
/// # Arguments
/// * `sphere` - Node bounding sphere
/// * `camera` - Camera position
/// * `projection_factor` - `1 / tan(fov)`
/// * `viewport_height` - Viewport height in pixels
pub fn screen_importance(
    sphere: &BoundingSphere,
    camera: Vec3,
    projection_factor: f32,
    viewport_height: f32,
) -> Importance {
    let distance = sphere.center.distance(camera);
    let radius = sphere.radius;
    if distance <= radius {
        return Importance {
            weight: MAX_WEIGHT,
            pixel_radius: f32::INFINITY,
            contains_camera: true,
        };
    }
    let projected = projection_factor * radius / (distance * distance - radius * radius).sqrt();
    Importance {
        weight: projected,
        pixel_radius: projected * viewport_height,
        contains_camera: false,
    }
}

/// True if the whole sphere lies behind the plane through `camera`
/// facing `forward`
pub fn is_behind_camera(sphere: &BoundingSphere, camera: Vec3, forward: Vec3) -> bool {
    (sphere.center - camera).dot(forward) < -sphere.radius
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(center: Vec3, radius: f32) -> BoundingSphere {
        BoundingSphere { center, radius }
    }

    #[test]
    fn test_queue_pops_heaviest_first() {
        let mut queue = NodePriorityQueue::new();
        assert!(queue.is_empty());

        queue.push(NodeId(1), 0.5);
        queue.push(NodeId(2), 2.0);
        queue.push(NodeId(3), 1.0);
        assert_eq!(queue.len(), 3);

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop()).map(|p| p.node.0).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_equal_weights_pop_in_insertion_order() {
        let mut queue = NodePriorityQueue::new();
        for id in [7, 3, 9, 1] {
            queue.push(NodeId(id), 1.0);
        }
        queue.push(NodeId(0), MAX_WEIGHT);

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop()).map(|p| p.node.0).collect();
        assert_eq!(order, vec![0, 7, 3, 9, 1]);
    }

    #[test]
    fn test_queue_clear() {
        let mut queue = NodePriorityQueue::new();
        queue.push(NodeId(1), 1.0);
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_importance_formula() {
        let s = sphere(Vec3::ZERO, 3.0);
        let camera = Vec3::new(0.0, 0.0, 5.0);
        let importance = screen_importance(&s, camera, 2.0, 1000.0);

        // 2 * 3 / sqrt(25 - 9)
        assert!((importance.weight - 1.5).abs() < 1e-6);
        assert!((importance.pixel_radius - 1500.0).abs() < 1e-3);
        assert!(!importance.contains_camera);
    }

    #[test]
    fn test_closer_is_more_important() {
        let s = sphere(Vec3::ZERO, 1.0);
        let near = screen_importance(&s, Vec3::new(0.0, 0.0, 4.0), 1.0, 1080.0);
        let far = screen_importance(&s, Vec3::new(0.0, 0.0, 40.0), 1.0, 1080.0);
        assert!(near.weight > far.weight);
        assert!(near.pixel_radius > far.pixel_radius);
    }

    #[test]
    fn test_camera_inside_gets_max_weight() {
        let s = sphere(Vec3::ZERO, 10.0);
        let importance = screen_importance(&s, Vec3::new(1.0, 2.0, 3.0), 1.0, 1080.0);
        assert_eq!(importance.weight, MAX_WEIGHT);
        assert!(importance.contains_camera);
        assert!(importance.pixel_radius.is_infinite());

        // on the surface counts as inside
        let surface = screen_importance(&s, Vec3::new(10.0, 0.0, 0.0), 1.0, 1080.0);
        assert_eq!(surface.weight, MAX_WEIGHT);
    }

    #[test]
    fn test_behind_camera() {
        let camera = Vec3::ZERO;
        let forward = Vec3::NEG_Z;

        assert!(!is_behind_camera(&sphere(Vec3::new(0.0, 0.0, -10.0), 1.0), camera, forward));
        assert!(is_behind_camera(&sphere(Vec3::new(0.0, 0.0, 10.0), 1.0), camera, forward));
        // straddling the camera plane is not behind
        assert!(!is_behind_camera(&sphere(Vec3::new(0.0, 0.0, 0.5), 1.0), camera, forward));
    }
}
