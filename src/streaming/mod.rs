//! View-dependent loading, caching and refresh of octree nodes

pub mod disk_io;
pub mod priority;
pub mod budget;
pub mod cache;
pub mod loader;
pub mod scheduler;
pub mod update;

pub use disk_io::{read_node_file, read_node_file_async, write_node_file};
pub use priority::{is_behind_camera, screen_importance, Importance, NodePriority, NodePriorityQueue, MAX_WEIGHT};
pub use budget::CycleBudget;
pub use cache::{Evicted, NodeCache, TrimReport};
pub use loader::{LoadKind, LoadRequest, LoadResult, LoadSink, LoaderEvent, LoaderPool, SubmitError};
pub use scheduler::{CycleReport, ViewState, VisibilityScheduler};
pub use update::{apply_events, apply_ready_swaps, mark_dirty, ApplyReport, DirtyMark};
