//! Streaming point cloud: the octree, its cache and loaders behind one handle
//!
//! Call [`PointCloud::update_visibility`] once per frame with the current
//! camera, then draw [`PointCloud::display`].

use crate::core::config::StreamingConfig;
use crate::core::error::Error;
use crate::core::time::{Clock, SystemClock};
use crate::core::types::Result;
use crate::octree::info::GlobalInfo;
use crate::octree::key::NodeKey;
use crate::octree::node::{HierarchyState, LoadState, NodeId, OctreeNode};
use crate::octree::point_data::PointBuffers;
use crate::octree::tree::Octree;
use crate::streaming::cache::{Evicted, NodeCache};
use crate::streaming::loader::LoaderPool;
use crate::streaming::priority::NodePriorityQueue;
use crate::streaming::scheduler::{CycleReport, ViewState, VisibilityScheduler};
use crate::streaming::update::{self, DirtyMark};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of the streaming state
#[derive(Clone, Debug, Serialize)]
pub struct StreamingStatus {
    pub visible_nodes: usize,
    pub visible_points: u64,
    pub display_len: usize,
    pub cached_nodes: usize,
    pub cache_capacity: usize,
    pub outstanding_loads: usize,
    pub queued_requests: usize,
    pub loader_paused: bool,
    pub tree_nodes: usize,
    pub resident_nodes: usize,
    pub resident_points: u64,
    pub epoch: u64,
    pub last_cycle: CycleReport,
}

impl fmt::Display for StreamingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "visible: {} nodes, {} points", self.visible_nodes, self.visible_points)?;
        writeln!(f, "display list: {} nodes", self.display_len)?;
        writeln!(f, "cache: {}/{} nodes", self.cached_nodes, self.cache_capacity)?;
        writeln!(
            f,
            "loader: {} outstanding, {} queued{}",
            self.outstanding_loads,
            self.queued_requests,
            if self.loader_paused { " (paused)" } else { "" }
        )?;
        write!(
            f,
            "tree: {} nodes, {} resident holding {} points (epoch {})",
            self.tree_nodes, self.resident_nodes, self.resident_points, self.epoch
        )
    }
}

/// Description of a single node
#[derive(Clone, Debug, Serialize)]
pub struct NodeInfo {
    pub key: String,
    pub level: u32,
    pub num_points: u32,
    pub loaded_points: usize,
    pub state: LoadState,
    pub hierarchy: HierarchyState,
    pub child_mask: u8,
    pub has_children: bool,
    pub cached: bool,
    pub tight_min: [f32; 3],
    pub tight_max: [f32; 3],
}

/// An opened point cloud dataset
pub struct PointCloud {
    data_dir: PathBuf,
    config: StreamingConfig,
    tree: Octree,
    cache: NodeCache,
    loader: LoaderPool,
    scheduler: VisibilityScheduler,
    clock: Box<dyn Clock>,
    last_report: CycleReport,
}

impl PointCloud {
    /// Open the dataset in `data_dir`
    ///
    /// Reads `cloud.js`, decodes the root hierarchy, loads the root points,
    /// starts the loader pool and preloads up to `config.preload_to_level`.
    ///
    /// # Errors
    /// Invalid configuration or cloud description, or an unreadable root
    /// hierarchy. A missing root point file is only logged.
    pub fn open(data_dir: impl AsRef<Path>, config: StreamingConfig) -> Result<Self> {
        Self::with_clock(data_dir, config, SystemClock::new())
    }

    /// Open with a custom time source for the cycle time budget
    pub fn with_clock(
        data_dir: impl AsRef<Path>,
        config: StreamingConfig,
        clock: impl Clock + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let data_dir = data_dir.as_ref().to_path_buf();
        let mut cache = NodeCache::new(config.max_nodes_in_memory);
        let tree = Self::build_tree(&data_dir, &config, &mut cache, 0)?;
        let loader = LoaderPool::new(&config)?;

        let mut cloud = Self {
            data_dir,
            config,
            tree,
            cache,
            loader,
            scheduler: VisibilityScheduler::new(),
            clock: Box::new(clock),
            last_report: CycleReport::default(),
        };
        cloud.preload(cloud.config.preload_to_level);
        Ok(cloud)
    }

    fn build_tree(data_dir: &Path, config: &StreamingConfig, cache: &mut NodeCache, epoch: u64) -> Result<Octree> {
        let info = Arc::new(GlobalInfo::load(data_dir, config.clone())?);
        let mut tree = Octree::new(info, epoch);
        let root = tree.root();
        let created = tree.load_hierarchy(root, cache, false)?;
        if let Err(e) = tree.load_data(root) {
            log::warn!("Root points unavailable: {e}");
        }
        cache.insert(NodeKey::root(), root);
        log::info!("Opened {} with {} nodes known", data_dir.display(), created + 1);
        Ok(tree)
    }

    /// Synchronously load every node up to `level`, most shallow first,
    /// while the loaded points stay below the visible point target
    ///
    /// # Returns
    /// Number of nodes visited
    pub fn preload(&mut self, level: u32) -> usize {
        let target = self.config.visible_point_target;
        let mut queue = NodePriorityQueue::new();
        queue.push(self.tree.root(), 1.0);
        let mut loaded_points = 0u64;
        let mut visited = 0;

        while let Some(entry) = queue.pop() {
            let id = entry.node;
            let num_points = self.tree.node(id).num_points() as u64;
            if loaded_points + num_points >= target {
                continue;
            }

            if let Err(e) = self.tree.load_hierarchy(id, &self.cache, false) {
                log::warn!("Hierarchy of {} unavailable: {e}", self.tree.node(id).key());
            }
            if let Err(e) = self.tree.load_data(id) {
                log::warn!("Points of {} unavailable: {e}", self.tree.node(id).key());
            }
            loaded_points += num_points;
            visited += 1;

            let node = self.tree.node(id);
            self.cache.insert(node.key().clone(), id);
            if node.level() >= level {
                continue;
            }
            for (_, child) in node.children() {
                queue.push(child, 1.0 / self.tree.node(child).level() as f32);
            }
        }

        log::info!("Preloaded {visited} nodes ({loaded_points} points) to level {level}");
        visited
    }

    /// Apply finished loads, swap refreshed nodes and run one visibility
    /// cycle for `view`
    pub fn update_visibility(&mut self, view: &ViewState) -> CycleReport {
        let events = self.loader.poll_events();
        if !events.is_empty() {
            let applied = update::apply_events(&mut self.tree, &self.cache, events);
            log::debug!("Applied loader events: {applied:?}");
        }
        let swapped = update::apply_ready_swaps(&mut self.tree, &self.cache);

        let mut report = self.scheduler.run_cycle(
            &mut self.tree,
            &mut self.cache,
            &mut self.loader,
            view,
            self.clock.as_ref(),
        );
        report.swapped = swapped;
        self.last_report = report.clone();
        report
    }

    /// Resident nodes admitted by the last cycle, most important first
    pub fn display_list(&self) -> &[NodeId] {
        self.scheduler.display_list()
    }

    /// Nodes and payloads to draw
    pub fn display(&self) -> impl Iterator<Item = (&OctreeNode, &PointBuffers)> + '_ {
        self.display_list()
            .iter()
            .map(|&id| self.tree.node(id))
            .filter_map(|node| node.payload().map(|payload| (node, payload)))
    }

    pub fn tree(&self) -> &Octree {
        &self.tree
    }

    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    pub fn info(&self) -> &Arc<GlobalInfo> {
        self.tree.info()
    }

    pub fn last_report(&self) -> &CycleReport {
        &self.last_report
    }

    /// Record that the files of node `name` changed on disk
    pub fn mark_dirty(&mut self, name: &str) -> Result<DirtyMark> {
        let key = NodeKey::parse(name)?;
        update::mark_dirty(&mut self.tree, &mut self.cache, &mut self.loader, &key)
    }

    /// Release the payload of a cached node
    pub fn evict(&mut self, name: &str) -> Result<Evicted> {
        let key = NodeKey::parse(name)?;
        self.cache.evict(&key, &mut self.tree)
    }

    /// Drop every node but a bare root
    ///
    /// Loads still in flight complete into the old tree's epoch and are
    /// discarded. The next cycle starts streaming from the root again.
    pub fn unload(&mut self) {
        log::info!("Unloading {}", self.data_dir.display());
        self.cache.clear();
        self.scheduler.clear();
        let epoch = self.tree.epoch() + 1;
        self.tree = Octree::new(self.tree.info().clone(), epoch);
    }

    /// Re-read the dataset from disk and preload it again
    ///
    /// # Errors
    /// [`Error::LoadsInFlight`] while loader results are outstanding, or
    /// any error [`open`](PointCloud::open) can return. On error the current
    /// tree is kept.
    pub fn reload(&mut self) -> Result<()> {
        let outstanding = self.loader.outstanding();
        if outstanding > 0 {
            return Err(Error::LoadsInFlight(outstanding));
        }

        let mut cache = NodeCache::new(self.config.max_nodes_in_memory);
        let tree = Self::build_tree(&self.data_dir, &self.config, &mut cache, self.tree.epoch() + 1)?;
        self.tree = tree;
        self.cache = cache;
        self.scheduler.clear();
        log::info!("Reloaded {}", self.data_dir.display());
        self.preload(self.config.preload_to_level);
        Ok(())
    }

    /// Wait for every outstanding load and apply its result
    ///
    /// # Returns
    /// False if `timeout` passed first
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.loader.outstanding() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let Some(event) = self.loader.wait_event(remaining) else {
                return false;
            };
            update::apply_events(&mut self.tree, &self.cache, [event]);
        }
        true
    }

    pub fn status(&self) -> StreamingStatus {
        let (resident_nodes, resident_points) = self.tree.resident();
        StreamingStatus {
            visible_nodes: self.last_report.visible_nodes,
            visible_points: self.last_report.visible_points,
            display_len: self.display_list().len(),
            cached_nodes: self.cache.len(),
            cache_capacity: self.cache.capacity(),
            outstanding_loads: self.loader.outstanding(),
            queued_requests: self.loader.queue_len(),
            loader_paused: self.loader.is_paused(),
            tree_nodes: self.tree.len(),
            resident_nodes,
            resident_points,
            epoch: self.tree.epoch(),
            last_cycle: self.last_report.clone(),
        }
    }

    /// Describe node `name`
    ///
    /// # Errors
    /// [`Error::InvalidKey`], or [`Error::UnknownNode`] if the node has not
    /// been discovered yet
    pub fn node_info(&self, name: &str) -> Result<NodeInfo> {
        let key = NodeKey::parse(name)?;
        let id = self.tree.find(&key).ok_or_else(|| Error::UnknownNode(name.to_string()))?;
        let node = self.tree.node(id);
        let tight = node.tight_bounding_box();
        Ok(NodeInfo {
            key: key.to_string(),
            level: node.level(),
            num_points: node.num_points(),
            loaded_points: node.payload().map_or(0, |p| p.len()),
            state: node.state(),
            hierarchy: node.hierarchy_state(),
            child_mask: node.child_mask(),
            has_children: node.has_children(),
            cached: self.cache.contains(&key),
            tight_min: tight.min.to_array(),
            tight_max: tight.max.to_array(),
        })
    }

    /// Stop loader workers from taking new requests
    pub fn pause(&self) {
        self.loader.pause();
    }

    pub fn resume(&self) {
        self.loader.resume();
    }

    /// Drain the load queue, stop the workers and apply what they finished
    pub fn shutdown(&mut self) {
        self.loader.shutdown();
        let events = self.loader.poll_events();
        update::apply_events(&mut self.tree, &self.cache, events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::SteppingClock;
    use crate::core::types::Vec3;
    use crate::octree::fixtures::{all_resident, Fixture, FixtureNode, EXTENT};

    const WAIT: Duration = Duration::from_secs(10);

    fn view_from(eye: Vec3) -> ViewState {
        ViewState::look_at(eye, Vec3::splat(EXTENT / 2.0), 60f32.to_radians(), 1.0, 1080.0)
    }

    fn two_level() -> Fixture {
        Fixture::with_step(5, &[FixtureNode::new("r", 100), FixtureNode::new("r3", 50)])
    }

    fn key(name: &str) -> NodeKey {
        NodeKey::parse(name).unwrap()
    }

    fn id_of(cloud: &PointCloud, name: &str) -> NodeId {
        cloud.tree().find(&key(name)).unwrap()
    }

    #[test]
    fn test_open_preloads_levels() {
        let fixture = Fixture::full(2, 10);
        let cloud = PointCloud::open(fixture.path(), StreamingConfig::default()).unwrap();

        assert_eq!(cloud.tree().len(), 73);
        assert!(all_resident(cloud.tree()));
        assert_eq!(cloud.cache().len(), 73);
        assert_eq!(cloud.info().total_points, 730);
    }

    #[test]
    fn test_preload_respects_level_and_budget() {
        let fixture = Fixture::full(2, 10);
        let config = StreamingConfig { preload_to_level: 1, ..StreamingConfig::default() };
        let cloud = PointCloud::open(fixture.path(), config).unwrap();
        let (resident, _) = cloud.tree().resident();
        assert_eq!(resident, 9);

        let config = StreamingConfig {
            preload_to_level: 2,
            visible_point_target: 45,
            ..StreamingConfig::default()
        };
        let cloud = PointCloud::open(fixture.path(), config).unwrap();
        let (resident, points) = cloud.tree().resident();
        assert_eq!(resident, 4);
        assert!(points < 45);
    }

    #[test]
    fn test_open_without_root_hierarchy_fails() {
        let fixture = Fixture::full(1, 10);
        std::fs::remove_file(fixture.info().hierarchy_file(&NodeKey::root())).unwrap();
        let result = PointCloud::open(fixture.path(), StreamingConfig::default());
        assert!(matches!(result, Err(Error::MissingFile(_))));
    }

    #[test]
    fn test_open_without_root_points_succeeds() {
        let fixture = Fixture::full(1, 10);
        std::fs::remove_file(fixture.info().data_file(&NodeKey::root())).unwrap();
        let cloud = PointCloud::open(fixture.path(), StreamingConfig::default()).unwrap();
        let root = cloud.tree().node(cloud.tree().root());
        assert_eq!(root.state(), LoadState::Absent);
        assert_eq!(root.child_mask(), 0xff);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let fixture = Fixture::full(1, 10);
        let config = StreamingConfig { loader_threads: 0, ..StreamingConfig::default() };
        assert!(matches!(PointCloud::open(fixture.path(), config), Err(Error::Config(_))));
    }

    #[test]
    fn test_far_and_near_views() {
        let fixture = two_level();
        let mut cloud = PointCloud::open(fixture.path(), StreamingConfig::default()).unwrap();
        let root = cloud.tree().root();
        let r3 = id_of(&cloud, "r3");

        let far = cloud.update_visibility(&view_from(Vec3::new(8.0, 8.0, 1000.0)));
        assert_eq!(far.visible_nodes, 1);
        assert_eq!(cloud.display_list(), &[root]);

        let near = cloud.update_visibility(&view_from(Vec3::new(4.0, 12.0, 40.0)));
        assert_eq!(near.visible_nodes, 2);
        assert_eq!(near.visible_points, 150);
        assert_eq!(cloud.display_list(), &[root, r3]);
        let drawn: Vec<usize> = cloud.display().map(|(_, p)| p.len()).collect();
        assert_eq!(drawn, vec![100, 50]);
    }

    #[test]
    fn test_streams_nodes_in_background() {
        crate::core::logging::init_test();
        let fixture = Fixture::full(1, 10);
        let config = StreamingConfig { preload_to_level: 0, ..StreamingConfig::default() };
        let mut cloud = PointCloud::open(fixture.path(), config).unwrap();
        assert_eq!(cloud.tree().resident().0, 1);

        let view = view_from(Vec3::new(8.0, 8.0, 20.0));
        let first = cloud.update_visibility(&view);
        assert_eq!(first.requested_loads, 8);
        assert!(cloud.settle(WAIT));

        let second = cloud.update_visibility(&view);
        assert_eq!(second.requested_loads, 0);
        assert_eq!(second.displayed, 9);
        assert!(all_resident(cloud.tree()));
    }

    #[test]
    fn test_dirty_node_is_refreshed() {
        crate::core::logging::init_test();
        let mut fixture = two_level();
        let mut cloud = PointCloud::open(fixture.path(), StreamingConfig::default()).unwrap();
        let r3 = id_of(&cloud, "r3");
        let view = view_from(Vec3::new(4.0, 12.0, 40.0));
        cloud.update_visibility(&view);

        fixture.set_points("r3", 25);
        assert_eq!(cloud.mark_dirty("r3").unwrap(), DirtyMark::Flagged(r3));
        assert!(cloud.tree().node(r3).is_dirty());

        // The refresh is issued and completes into the shadow
        let report = cloud.update_visibility(&view);
        assert_eq!(report.requested_loads, 1);
        assert!(cloud.settle(WAIT));
        let node = cloud.tree().node(r3);
        assert_eq!(node.state(), LoadState::Refreshing);
        assert_eq!(node.num_points(), 50);
        assert_eq!(node.payload().map(|p| p.len()), Some(50));

        // One more cycle swaps it in
        let report = cloud.update_visibility(&view);
        assert_eq!(report.swapped, 1);
        let node = cloud.tree().node(r3);
        assert_eq!(node.num_points(), 25);
        assert_eq!(node.payload().map(|p| p.len()), Some(25));
        assert!(!node.is_dirty());
        assert_eq!(node.state(), LoadState::Loaded);
    }

    #[test]
    fn test_queue_overflow_loses_nothing() {
        let fixture = Fixture::full(1, 10);
        let config = StreamingConfig {
            preload_to_level: 0,
            load_queue_capacity: 2,
            start_loader_paused: true,
            ..StreamingConfig::default()
        };
        let mut cloud = PointCloud::open(fixture.path(), config).unwrap();
        let view = view_from(Vec3::new(8.0, 8.0, 20.0));

        let report = cloud.update_visibility(&view);
        assert_eq!(report.requested_loads, 2);
        assert_eq!(report.rejected_loads, 6);
        assert_eq!(cloud.status().queued_requests, 2);

        cloud.resume();
        for _ in 0..10 {
            if all_resident(cloud.tree()) {
                break;
            }
            assert!(cloud.settle(WAIT));
            cloud.update_visibility(&view);
        }
        assert!(all_resident(cloud.tree()));
    }

    #[test]
    fn test_unknown_node_reloads_ancestor_hierarchy() {
        let mut fixture = Fixture::with_step(
            5,
            &[FixtureNode::new("r", 20), FixtureNode::new("r3", 10), FixtureNode::new("r35", 5)],
        );
        let config = StreamingConfig { preload_to_level: 0, ..StreamingConfig::default() };
        let mut cloud = PointCloud::open(fixture.path(), config).unwrap();

        fixture.add_node("r36", 7);
        let mark = cloud.mark_dirty("r36").unwrap();
        assert_eq!(mark, DirtyMark::HierarchyReload { ancestor: cloud.tree().root() });
        assert!(cloud.settle(WAIT));

        let info = cloud.node_info("r36").unwrap();
        assert_eq!(info.num_points, 7);
        assert_eq!(info.state, LoadState::Absent);
    }

    #[test]
    fn test_mark_dirty_errors() {
        let fixture = Fixture::full(1, 10);
        let mut cloud = PointCloud::open(fixture.path(), StreamingConfig::default()).unwrap();
        assert!(matches!(cloud.mark_dirty("x12"), Err(Error::InvalidKey(_))));

        cloud.unload();
        assert!(matches!(cloud.mark_dirty("r12"), Err(Error::NoHierarchyAncestor(_))));
    }

    #[test]
    fn test_busy_nodes_cannot_be_evicted() {
        let fixture = Fixture::full(1, 10);
        let config = StreamingConfig {
            preload_to_level: 0,
            start_loader_paused: true,
            ..StreamingConfig::default()
        };
        let mut cloud = PointCloud::open(fixture.path(), config).unwrap();
        cloud.update_visibility(&view_from(Vec3::new(8.0, 8.0, 20.0)));

        assert!(matches!(cloud.evict("r5"), Err(Error::NodeBusy(_))));
        assert!(matches!(cloud.evict("r9"), Err(Error::InvalidKey(_))));
        let evicted = cloud.evict("r").unwrap();
        assert!(evicted.freed_bytes > 0);
        assert!(matches!(cloud.evict("r"), Err(Error::UnknownNode(_))));
    }

    #[test]
    fn test_eviction_stress_keeps_busy_payloads() {
        let fixture = Fixture::full(2, 10);
        let config = StreamingConfig {
            preload_to_level: 0,
            max_nodes_in_memory: 4,
            min_node_pixel_size: 0.0,
            ..StreamingConfig::default()
        };
        let mut cloud = PointCloud::open(fixture.path(), config).unwrap();
        let eyes = [
            Vec3::new(8.0, 8.0, 20.0),
            Vec3::new(2.0, 2.0, -6.0),
            Vec3::new(30.0, 8.0, 8.0),
            Vec3::new(8.0, 30.0, 9.0),
        ];

        for round in 0..24 {
            cloud.update_visibility(&view_from(eyes[round % eyes.len()]));
            if round % 3 == 0 {
                cloud.mark_dirty("r").ok();
            }
            cloud.settle(Duration::from_millis(2));

            let keys: Vec<NodeKey> = cloud.cache().keys_by_recency().cloned().collect();
            for key in keys {
                let id = cloud.tree().find(&key).unwrap();
                let busy = cloud.tree().node(id).state().is_busy();
                let had_payload = cloud.tree().node(id).payload().is_some();
                match cloud.evict(key.as_str()) {
                    Err(Error::NodeBusy(_)) => {
                        assert!(busy);
                        assert_eq!(cloud.tree().node(id).payload().is_some(), had_payload);
                    }
                    Ok(_) => assert!(!busy),
                    Err(e) => panic!("unexpected eviction error for {key}: {e}"),
                }
            }

            for (_, node) in cloud.tree().iter() {
                if let Some(payload) = node.payload() {
                    assert_eq!(payload.positions.len(), 3 * payload.len());
                    assert_eq!(payload.colors.len(), 3 * payload.len());
                }
                if node.state().is_busy() && node.state() != LoadState::Refreshing {
                    assert!(node.payload().is_none());
                }
            }
        }
        cloud.shutdown();
    }

    #[test]
    fn test_unload_discards_in_flight_results() {
        let fixture = Fixture::full(1, 10);
        let config = StreamingConfig {
            preload_to_level: 0,
            start_loader_paused: true,
            ..StreamingConfig::default()
        };
        let mut cloud = PointCloud::open(fixture.path(), config).unwrap();
        let view = view_from(Vec3::new(8.0, 8.0, 20.0));
        cloud.update_visibility(&view);

        cloud.unload();
        assert_eq!(cloud.tree().len(), 1);
        assert!(cloud.cache().is_empty());
        cloud.resume();
        assert!(cloud.settle(WAIT));
        assert_eq!(cloud.tree().len(), 1);

        // Streaming restarts from a bare root
        let report = cloud.update_visibility(&view);
        assert_eq!(report.requested_loads, 1);
        assert!(cloud.settle(WAIT));
        cloud.update_visibility(&view);
        assert_eq!(cloud.tree().len(), 9);
        assert_eq!(cloud.status().epoch, 1);
    }

    #[test]
    fn test_reload_waits_for_loads() {
        let mut fixture = Fixture::full(1, 10);
        let config = StreamingConfig {
            preload_to_level: 0,
            start_loader_paused: true,
            ..StreamingConfig::default()
        };
        let mut cloud = PointCloud::open(fixture.path(), config).unwrap();
        cloud.update_visibility(&view_from(Vec3::new(8.0, 8.0, 20.0)));

        assert!(matches!(cloud.reload(), Err(Error::LoadsInFlight(8))));

        cloud.resume();
        assert!(cloud.settle(WAIT));
        fixture.add_node("r00", 3);
        cloud.reload().unwrap();
        assert_eq!(cloud.tree().len(), 10);
        assert_eq!(cloud.tree().epoch(), 1);
        assert!(cloud.display_list().is_empty());
    }

    #[test]
    fn test_time_budget_with_custom_clock() {
        let fixture = Fixture::full(1, 10);
        let clock = SteppingClock::new(Duration::from_millis(100));
        let mut cloud = PointCloud::with_clock(fixture.path(), StreamingConfig::default(), clock).unwrap();

        let report = cloud.update_visibility(&view_from(Vec3::new(8.0, 8.0, 20.0)));
        assert!(report.aborted);
        assert_eq!(report.visible_nodes, 2);
    }

    #[test]
    fn test_status_and_node_info() {
        let fixture = two_level();
        let mut cloud = PointCloud::open(fixture.path(), StreamingConfig::default()).unwrap();
        cloud.update_visibility(&view_from(Vec3::new(4.0, 12.0, 40.0)));

        let status = cloud.status();
        assert_eq!(status.visible_nodes, 2);
        assert_eq!(status.visible_points, 150);
        assert_eq!(status.resident_nodes, 2);
        assert_eq!(status.resident_points, 150);
        assert_eq!(status.tree_nodes, 2);
        assert!(status.to_string().contains("visible: 2 nodes, 150 points"));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["cached_nodes"], 2);

        let info = cloud.node_info("r3").unwrap();
        assert_eq!(info.level, 1);
        assert_eq!(info.num_points, 50);
        assert_eq!(info.loaded_points, 50);
        assert_eq!(info.state, LoadState::Loaded);
        assert!(info.cached);
        assert!(matches!(cloud.node_info("r4"), Err(Error::UnknownNode(_))));
    }
}
