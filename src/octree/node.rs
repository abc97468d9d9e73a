//! Octree node and its load lifecycle

use crate::math::{Aabb, BoundingSphere};
use crate::octree::hierarchy::HierarchyFragment;
use crate::octree::key::NodeKey;
use crate::octree::point_data::PointBuffers;
use serde::Serialize;

/// Index of a node in its [`Octree`](crate::octree::Octree) arena
///
/// Ids are only meaningful for the tree that produced them and are
/// invalidated when that tree is unloaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Payload lifecycle of a node
///
/// ```text
/// Absent -> Queued -> Loading -> Loaded <-> Dirty -> Refreshing -> Loaded
/// ```
///
/// `stale` marks a plain load that was overtaken by a dirty mark; it
/// completes into `Dirty` instead of `Loaded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LoadState {
    /// No payload resident
    Absent,
    /// Load request accepted by the loader queue
    Queued { stale: bool },
    /// A worker is reading the node
    Loading { stale: bool },
    /// Payload resident and current
    Loaded,
    /// Payload resident but the files on disk have changed
    Dirty,
    /// Payload resident while a replacement loads into the shadow
    Refreshing,
}

impl LoadState {
    /// True while a request for this node's payload is outstanding
    pub fn is_busy(self) -> bool {
        matches!(self, LoadState::Queued { .. } | LoadState::Loading { .. } | LoadState::Refreshing)
    }

    /// True if the payload buffers hold decoded points
    ///
    /// A refreshing node keeps showing its old payload; only the shadow is
    /// being written.
    pub fn is_resident(self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Dirty | LoadState::Refreshing)
    }
}

/// Whether a node's descendants have been decoded from its fragment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum HierarchyState {
    Unloaded,
    /// A loader request carries this node's fragment
    Pending,
    Loaded,
    /// The fragment could not be read; not retried until forced
    Unavailable,
}

/// Staging area for reloading a dirty node
#[derive(Debug)]
pub struct UpdateShadow {
    pub state: ShadowState,
    pub payload: PointBuffers,
    pub hierarchy: Option<HierarchyFragment>,
    /// The node was marked dirty again after this refresh was issued
    pub stale: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowState {
    Queued,
    Loading,
    Loaded,
}

impl UpdateShadow {
    pub fn new() -> Self {
        Self {
            state: ShadowState::Queued,
            payload: PointBuffers::default(),
            hierarchy: None,
            stale: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ShadowState::Loaded
    }
}

impl Default for UpdateShadow {
    fn default() -> Self {
        Self::new()
    }
}

/// One cell of the point cloud octree
#[derive(Debug)]
pub struct OctreeNode {
    pub(crate) key: NodeKey,
    pub(crate) bounding_box: Aabb,
    pub(crate) tight_bounding_box: Aabb,
    pub(crate) sphere: BoundingSphere,
    pub(crate) num_points: u32,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: [Option<NodeId>; 8],
    pub(crate) has_children: bool,
    pub(crate) hierarchy: HierarchyState,
    pub(crate) state: LoadState,
    pub(crate) payload: PointBuffers,
    pub(crate) shadow: Option<Box<UpdateShadow>>,
}

impl OctreeNode {
    pub(crate) fn new(key: NodeKey, bounding_box: Aabb, tight_bounding_box: Aabb, parent: Option<NodeId>) -> Self {
        let tight_bounding_box = tight_bounding_box.clamped_to(&bounding_box);
        Self {
            key,
            bounding_box,
            tight_bounding_box,
            sphere: tight_bounding_box.bounding_sphere(),
            num_points: 0,
            parent,
            children: [None; 8],
            has_children: false,
            hierarchy: HierarchyState::Unloaded,
            state: LoadState::Absent,
            payload: PointBuffers::default(),
            shadow: None,
        }
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn level(&self) -> u32 {
        self.key.level()
    }

    pub fn bounding_box(&self) -> &Aabb {
        &self.bounding_box
    }

    pub fn tight_bounding_box(&self) -> &Aabb {
        &self.tight_bounding_box
    }

    pub fn bounding_sphere(&self) -> &BoundingSphere {
        &self.sphere
    }

    /// Point count from the hierarchy, or from the payload once refreshed
    pub fn num_points(&self) -> u32 {
        self.num_points
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn child(&self, octant: u8) -> Option<NodeId> {
        self.children[octant as usize]
    }

    /// Instantiated children with their octants
    pub fn children(&self) -> impl Iterator<Item = (u8, NodeId)> + '_ {
        self.children.iter()
            .enumerate()
            .filter_map(|(octant, child)| child.map(|id| (octant as u8, id)))
    }

    /// Bit `i` set for every instantiated child in octant `i`
    pub fn child_mask(&self) -> u8 {
        self.children().fold(0, |mask, (octant, _)| mask | (1 << octant))
    }

    /// True if the hierarchy says children exist, instantiated or not
    pub fn has_children(&self) -> bool {
        self.has_children
    }

    pub fn hierarchy_state(&self) -> HierarchyState {
        self.hierarchy
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.state, LoadState::Dirty | LoadState::Refreshing)
            || matches!(self.state, LoadState::Queued { stale: true } | LoadState::Loading { stale: true })
    }

    /// Payload buffers, `None` unless the node is resident
    pub fn payload(&self) -> Option<&PointBuffers> {
        self.state.is_resident().then_some(&self.payload)
    }

    pub fn shadow(&self) -> Option<&UpdateShadow> {
        self.shadow.as_deref()
    }

    /// True if this node's own fragment file describes its subtree
    pub fn can_load_hierarchy(&self, step: u32) -> bool {
        self.key.is_hierarchy_root(step)
    }

    /// True if the hierarchy must still be read before descendants are known
    pub fn needs_hierarchy(&self, step: u32) -> bool {
        self.can_load_hierarchy(step) && self.hierarchy == HierarchyState::Unloaded
    }

    /// Install a decoded payload
    ///
    /// The tight box shrinks to the decoded extent and the sphere follows.
    /// Returns the resulting state: `Loaded`, `Dirty` for a stale load, or
    /// `Absent` if nothing was decoded.
    pub(crate) fn install_payload(&mut self, payload: PointBuffers, stale: bool) -> LoadState {
        if payload.is_empty() {
            self.payload.clear();
            self.state = LoadState::Absent;
            return self.state;
        }
        self.set_tight_bounds(payload.bounds());
        self.payload = payload;
        self.state = if stale { LoadState::Dirty } else { LoadState::Loaded };
        self.state
    }

    /// Drop the payload; the caller has checked the node is not busy
    pub(crate) fn release_payload(&mut self) -> usize {
        debug_assert!(!self.state.is_busy(), "releasing payload of busy node {}", self.key);
        let freed = self.payload.byte_size();
        self.payload.clear();
        self.state = LoadState::Absent;
        freed
    }

    pub(crate) fn set_tight_bounds(&mut self, tight: Option<Aabb>) {
        if let Some(tight) = tight {
            self.tight_bounding_box = tight.clamped_to(&self.bounding_box);
            self.sphere = self.tight_bounding_box.bounding_sphere();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    fn node() -> OctreeNode {
        OctreeNode::new(
            NodeKey::root(),
            Aabb::new(Vec3::ZERO, Vec3::splat(8.0)),
            Aabb::new(Vec3::splat(-1.0), Vec3::splat(4.0)),
            None,
        )
    }

    fn payload(points: &[[f32; 3]]) -> PointBuffers {
        PointBuffers {
            positions: points.iter().flatten().copied().collect(),
            colors: vec![0; points.len() * 3],
        }
    }

    #[test]
    fn test_new_node_clamps_tight_box() {
        let node = node();
        assert!(node.bounding_box().contains(node.tight_bounding_box()));
        assert_eq!(node.tight_bounding_box().min, Vec3::ZERO);
        assert_eq!(node.state(), LoadState::Absent);
        assert!(node.payload().is_none());
        assert_eq!(node.child_mask(), 0);
    }

    #[test]
    fn test_install_payload_updates_bounds() {
        let mut node = node();
        let state = node.install_payload(payload(&[[1.0, 1.0, 1.0], [3.0, 2.0, 5.0]]), false);
        assert_eq!(state, LoadState::Loaded);
        assert_eq!(node.tight_bounding_box().max, Vec3::new(3.0, 2.0, 5.0));
        assert_eq!(node.bounding_sphere().center, Vec3::new(2.0, 1.5, 3.0));
        assert_eq!(node.payload().map(|p| p.len()), Some(2));
    }

    #[test]
    fn test_install_empty_payload_stays_absent() {
        let mut node = node();
        assert_eq!(node.install_payload(PointBuffers::default(), false), LoadState::Absent);
        assert!(node.payload().is_none());
    }

    #[test]
    fn test_stale_load_completes_dirty() {
        let mut node = node();
        assert_eq!(node.install_payload(payload(&[[1.0, 1.0, 1.0]]), true), LoadState::Dirty);
        assert!(node.is_dirty());
        assert!(node.payload().is_some());
    }

    #[test]
    fn test_release_payload() {
        let mut node = node();
        node.install_payload(payload(&[[1.0, 1.0, 1.0]]), false);
        let freed = node.release_payload();
        assert_eq!(freed, 3 * 4 + 3);
        assert_eq!(node.state(), LoadState::Absent);
        assert!(node.payload.is_empty());
    }

    #[test]
    fn test_busy_states() {
        assert!(LoadState::Queued { stale: false }.is_busy());
        assert!(LoadState::Loading { stale: true }.is_busy());
        assert!(LoadState::Refreshing.is_busy());
        assert!(!LoadState::Loaded.is_busy());
        assert!(!LoadState::Dirty.is_busy());
        assert!(LoadState::Refreshing.is_resident());
        assert!(!LoadState::Loading { stale: false }.is_resident());
    }

    #[test]
    fn test_hierarchy_roots() {
        let mut node = node();
        assert!(node.can_load_hierarchy(5));
        assert!(node.needs_hierarchy(5));
        node.hierarchy = HierarchyState::Loaded;
        assert!(!node.needs_hierarchy(5));
    }
}
