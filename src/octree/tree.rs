//! Arena-backed point cloud octree
//!
//! Nodes live in a `Vec` and refer to each other by [`NodeId`]. A parent
//! owns its children through its child slots; the parent link and the
//! cache index are plain ids. Nodes are only ever appended: eviction clears
//! payloads, and a full unload replaces the whole tree.

use crate::core::error::Error;
use crate::core::types::Result;
use crate::octree::hierarchy::{decode_hierarchy, HierarchyFragment, HierarchyRecord};
use crate::octree::info::GlobalInfo;
use crate::octree::key::NodeKey;
use crate::octree::node::{HierarchyState, LoadState, NodeId, OctreeNode, UpdateShadow};
use crate::octree::point_data::decode_points;
use crate::streaming::cache::NodeCache;
use crate::streaming::disk_io;
use std::collections::HashMap;
use std::sync::Arc;

/// How a fragment is merged into existing topology
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeMode {
    /// Reuse existing nodes and create every missing one
    Merge,
    /// Create missing children of the fragment root, and the subtrees under
    /// them; subtrees of children that already exist are left untouched
    AddMissing,
}

/// Point cloud octree
pub struct Octree {
    info: Arc<GlobalInfo>,
    nodes: Vec<OctreeNode>,
    index: HashMap<NodeKey, NodeId>,
    /// Incremented every time the tree is rebuilt; tags loader requests
    epoch: u64,
}

impl Octree {
    /// Create a tree holding only the root, bounded by the cloud's boxes
    pub fn new(info: Arc<GlobalInfo>, epoch: u64) -> Self {
        let root = OctreeNode::new(
            NodeKey::root(),
            info.bounding_box,
            info.tight_bounding_box,
            None,
        );
        let mut index = HashMap::new();
        index.insert(NodeKey::root(), NodeId(0));
        Self {
            info,
            nodes: vec![root],
            index,
            epoch,
        }
    }

    pub fn info(&self) -> &Arc<GlobalInfo> {
        &self.info
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of instantiated nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&OctreeNode> {
        self.nodes.get(id.index())
    }

    /// Node by id
    ///
    /// # Panics
    /// If `id` was not issued by this tree.
    pub fn node(&self, id: NodeId) -> &OctreeNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut OctreeNode {
        &mut self.nodes[id.index()]
    }

    pub fn find(&self, key: &NodeKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &OctreeNode)> {
        self.nodes.iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }

    /// Nodes whose payload is resident, with their total point count
    pub fn resident(&self) -> (usize, u64) {
        self.nodes.iter()
            .filter_map(|n| n.payload())
            .fold((0, 0), |(nodes, points), p| (nodes + 1, points + p.len() as u64))
    }

    fn add_child(&mut self, parent: NodeId, octant: u8, record: &HierarchyRecord) -> NodeId {
        let step = self.info.hierarchy_step_size;
        let p = self.node(parent);
        let mut node = OctreeNode::new(
            record.key.clone(),
            p.bounding_box.child_octant(octant),
            p.tight_bounding_box.child_octant(octant),
            Some(parent),
        );
        node.num_points = record.num_points;
        node.has_children = record.has_children();
        if !node.can_load_hierarchy(step) {
            // described by the fragment that created it
            node.hierarchy = HierarchyState::Loaded;
        }

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        self.index.insert(record.key.clone(), id);

        let p = self.node_mut(parent);
        p.children[octant as usize] = Some(id);
        p.has_children = true;
        id
    }

    /// Link a decoded fragment below `id`
    ///
    /// Children already present in the parent's slot, or registered in the
    /// cache, are reused. New nodes are fully built before they are linked.
    ///
    /// # Returns
    /// Ids of the nodes created, in breadth-first order
    pub fn apply_fragment(
        &mut self,
        id: NodeId,
        fragment: &HierarchyFragment,
        cache: &NodeCache,
        mode: MergeMode,
    ) -> Vec<NodeId> {
        debug_assert_eq!(self.node(id).key, fragment.root.key);
        {
            let node = self.node_mut(id);
            if mode == MergeMode::Merge {
                node.num_points = fragment.root.num_points;
            }
            node.has_children |= fragment.root.has_children();
            node.hierarchy = HierarchyState::Loaded;
        }

        // key -> (id, created by this call)
        let mut resolved: HashMap<&NodeKey, (NodeId, bool)> = HashMap::new();
        resolved.insert(&fragment.root.key, (id, true));
        let mut created = Vec::new();

        for record in &fragment.descendants {
            let (Some(parent_key), Some(octant)) = (record.key.parent(), record.key.octant()) else {
                continue;
            };
            let Some(&(parent, parent_created)) = resolved.get(&parent_key) else {
                continue;
            };
            if mode == MergeMode::AddMissing && !parent_created {
                continue;
            }

            let existing = self.node(parent).child(octant)
                .or_else(|| cache.peek(&record.key));
            match existing {
                Some(child) => {
                    let p = self.node_mut(parent);
                    if p.children[octant as usize].is_none() {
                        p.children[octant as usize] = Some(child);
                        p.has_children = true;
                    }
                    resolved.insert(&record.key, (child, false));
                }
                None => {
                    let child = self.add_child(parent, octant, record);
                    created.push(child);
                    resolved.insert(&record.key, (child, true));
                }
            }
        }

        created
    }

    /// Read and apply the hierarchy fragment of `id`, recursing into every
    /// new child that starts a fragment of its own
    ///
    /// A no-op for nodes that do not start a fragment, and for nodes whose
    /// fragment was already applied unless `force` is set. Failures below
    /// `id` are logged and leave those subtrees unexpanded.
    ///
    /// # Returns
    /// Number of nodes created
    ///
    /// # Errors
    /// Read or decode failure of `id`'s own fragment. The node is marked
    /// [`HierarchyState::Unavailable`] and keeps no children from it.
    pub fn load_hierarchy(&mut self, id: NodeId, cache: &NodeCache, force: bool) -> Result<usize> {
        let step = self.info.hierarchy_step_size;
        let node = self.node(id);
        if !node.can_load_hierarchy(step) {
            return Ok(0);
        }
        if node.hierarchy == HierarchyState::Loaded && !force {
            return Ok(0);
        }

        let key = node.key.clone();
        let fragment = match self.read_fragment(&key) {
            Ok(fragment) => fragment,
            Err(e) => {
                self.node_mut(id).hierarchy = HierarchyState::Unavailable;
                return Err(e);
            }
        };

        let created = self.apply_fragment(id, &fragment, cache, MergeMode::Merge);
        let mut total = created.len();
        for child in created {
            if !self.node(child).can_load_hierarchy(step) {
                continue;
            }
            match self.load_hierarchy(child, cache, false) {
                Ok(n) => total += n,
                Err(e) => log::warn!("Hierarchy of {} unavailable: {e}", self.node(child).key),
            }
        }
        Ok(total)
    }

    fn read_fragment(&self, key: &NodeKey) -> Result<HierarchyFragment> {
        let bytes = disk_io::read_node_file(&self.info.hierarchy_file(key))?;
        let fragment = decode_hierarchy(key, &bytes)?;
        if fragment.is_truncated() {
            log::warn!("Hierarchy of {key} ends in {} stray bytes", fragment.trailing_bytes);
        }
        Ok(fragment)
    }

    /// Read and install the point data of `id` on the calling thread
    ///
    /// A no-op for nodes that are resident or have a load in flight.
    ///
    /// # Returns
    /// Number of points decoded
    pub fn load_data(&mut self, id: NodeId) -> Result<usize> {
        let node = self.node(id);
        if node.state.is_resident() || node.state.is_busy() {
            return Ok(0);
        }
        let bytes = disk_io::read_node_file(&self.info.data_file(&node.key))?;
        let payload = decode_points(
            &bytes,
            &self.info.layout,
            self.info.scale,
            node.bounding_box.min,
        );
        let count = payload.len();
        self.node_mut(id).install_payload(payload, false);
        Ok(count)
    }

    /// Release the payload of an idle node
    ///
    /// # Errors
    /// [`Error::NodeBusy`] while a load or refresh is in flight.
    pub fn release_payload(&mut self, id: NodeId) -> Result<usize> {
        let node = self.node_mut(id);
        if node.state.is_busy() {
            return Err(Error::NodeBusy(node.key.to_string()));
        }
        Ok(node.release_payload())
    }

    /// Flag a node's content as changed on disk
    ///
    /// # Returns
    /// False if the node has no payload and nothing in flight, so there is
    /// nothing to refresh
    pub fn mark_dirty(&mut self, id: NodeId) -> bool {
        let node = self.node_mut(id);
        node.state = match node.state {
            LoadState::Absent => return false,
            LoadState::Queued { .. } => LoadState::Queued { stale: true },
            LoadState::Loading { .. } => LoadState::Loading { stale: true },
            LoadState::Loaded | LoadState::Dirty => LoadState::Dirty,
            LoadState::Refreshing => {
                if let Some(shadow) = node.shadow.as_mut() {
                    shadow.stale = true;
                }
                LoadState::Refreshing
            }
        };
        true
    }

    /// Start refreshing a dirty node into a fresh shadow
    ///
    /// # Returns
    /// False unless the node was `Dirty`
    pub(crate) fn begin_refresh(&mut self, id: NodeId) -> bool {
        let node = self.node_mut(id);
        if node.state != LoadState::Dirty {
            return false;
        }
        node.shadow = Some(Box::new(UpdateShadow::new()));
        node.state = LoadState::Refreshing;
        true
    }

    /// Abandon a refresh, keeping the live payload and the dirty flag
    pub(crate) fn cancel_refresh(&mut self, id: NodeId) {
        let node = self.node_mut(id);
        node.shadow = None;
        if node.state == LoadState::Refreshing {
            node.state = LoadState::Dirty;
        }
    }

    /// Replace a refreshing node's payload with its completed shadow
    ///
    /// Children discovered by the shadow's fragment are added where the
    /// live node has none; existing subtrees are kept as they are.
    ///
    /// # Returns
    /// False, leaving the node untouched, unless the shadow has finished
    pub fn swap_shadow(&mut self, id: NodeId, cache: &NodeCache) -> bool {
        let node = self.node_mut(id);
        if node.state != LoadState::Refreshing || !node.shadow.as_ref().is_some_and(|s| s.is_ready()) {
            return false;
        }
        let Some(shadow) = node.shadow.take() else {
            return false;
        };
        let UpdateShadow { payload, hierarchy, stale, .. } = *shadow;

        node.num_points = payload.len() as u32;
        node.payload.clear();
        node.install_payload(payload, stale);

        if let Some(fragment) = hierarchy {
            let created = self.apply_fragment(id, &fragment, cache, MergeMode::AddMissing);
            if !created.is_empty() {
                log::debug!("Refresh of {} added {} nodes", self.node(id).key, created.len());
            }
        }
        true
    }
}
