//! Point cloud octree: node identity, on-disk formats and the node arena

pub mod key;
pub mod info;
pub mod hierarchy;
pub mod point_data;
pub mod node;
pub mod tree;

#[cfg(test)]
pub(crate) mod fixtures;

pub use key::NodeKey;
pub use info::{AttributeKind, CloudInfo, GlobalInfo, PointAttribute, PointLayout};
pub use hierarchy::{decode_hierarchy, HierarchyFragment, HierarchyRecord, HIERARCHY_RECORD_SIZE};
pub use point_data::{decode_points, dequantize, PointBuffers};
pub use node::{HierarchyState, LoadState, NodeId, OctreeNode, ShadowState, UpdateShadow};
pub use tree::{MergeMode, Octree};
