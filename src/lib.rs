//! Pointstream - out-of-core streaming of Potree point cloud octrees

pub mod core;
pub mod math;
pub mod octree;
pub mod streaming;
pub mod point_cloud;

pub use crate::core::{Error, Result, StreamingConfig};
pub use octree::{LoadState, NodeId, NodeKey, Octree, OctreeNode, PointBuffers};
pub use point_cloud::{NodeInfo, PointCloud, StreamingStatus};
pub use streaming::{CycleReport, DirtyMark, ViewState};
