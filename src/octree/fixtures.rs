//! Synthetic datasets on disk for tests

use crate::core::config::StreamingConfig;
use crate::core::types::Vec3;
use crate::math::Aabb;
use crate::octree::hierarchy::{encode_records, HierarchyRecord};
use crate::octree::info::{AttributeSpec, CloudInfo, GlobalInfo, CLOUD_FILE};
use crate::octree::key::NodeKey;
use crate::octree::point_data::encode_points;
use crate::octree::tree::Octree;
use crate::streaming::disk_io::write_node_file;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const EXTENT: f32 = 16.0;
pub const SCALE: f64 = 0.001;
const DEFAULT_STEP: u32 = 5;

pub struct FixtureNode {
    pub key: NodeKey,
    pub num_points: u32,
}

impl FixtureNode {
    pub fn new(name: &str, num_points: u32) -> Self {
        Self { key: NodeKey::parse(name).unwrap(), num_points }
    }
}

/// Dataset directory with `cloud.js`, hierarchy and point files
pub struct Fixture {
    dir: TempDir,
    step: u32,
    nodes: BTreeMap<NodeKey, u32>,
    info: Arc<GlobalInfo>,
}

impl Fixture {
    /// Complete octree of `depth` levels below the root
    pub fn full(depth: u32, points_per_node: u32) -> Self {
        let mut keys = vec![NodeKey::root()];
        let mut frontier = vec![NodeKey::root()];
        for _ in 0..depth {
            frontier = frontier.iter()
                .flat_map(|k| (0..8).map(move |o| k.child(o)))
                .collect();
            keys.extend(frontier.iter().cloned());
        }
        let nodes: Vec<FixtureNode> = keys.into_iter()
            .map(|key| FixtureNode { key, num_points: points_per_node })
            .collect();
        Self::with_config(DEFAULT_STEP, &nodes, StreamingConfig::default())
    }

    pub fn with_step(step: u32, nodes: &[FixtureNode]) -> Self {
        Self::with_config(step, nodes, StreamingConfig::default())
    }

    pub fn with_config(step: u32, nodes: &[FixtureNode], config: StreamingConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let nodes: BTreeMap<NodeKey, u32> = nodes.iter()
            .map(|n| (n.key.clone(), n.num_points))
            .collect();
        assert!(nodes.contains_key(&NodeKey::root()));

        let cloud = CloudInfo {
            version: "1.7".into(),
            octree_dir: "data".into(),
            points: nodes.values().map(|&n| n as u64).sum(),
            bounding_box: Aabb::new(Vec3::ZERO, Vec3::splat(EXTENT)).into(),
            tight_bounding_box: None,
            point_attributes: vec![
                AttributeSpec::Named("POSITION_CARTESIAN".into()),
                AttributeSpec::Named("COLOR_PACKED".into()),
            ],
            spacing: 1.0,
            scale: SCALE,
            hierarchy_step_size: step,
        };
        std::fs::write(
            dir.path().join(CLOUD_FILE),
            serde_json::to_string_pretty(&cloud).unwrap(),
        ).unwrap();

        let info = Arc::new(GlobalInfo::load(dir.path(), config).unwrap());
        let fixture = Self { dir, step, nodes, info };
        fixture.write_all();
        fixture
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn info(&self) -> &Arc<GlobalInfo> {
        &self.info
    }

    /// Fresh tree holding only the root
    pub fn tree(&self) -> Octree {
        Octree::new(self.info.clone(), 0)
    }

    /// Change a node's point count and rewrite the affected files
    pub fn set_points(&mut self, name: &str, num_points: u32) {
        let key = NodeKey::parse(name).unwrap();
        self.nodes.insert(key, num_points);
        self.write_all();
    }

    /// Add a node (its ancestors must exist) and rewrite the files
    pub fn add_node(&mut self, name: &str, num_points: u32) {
        let key = NodeKey::parse(name).unwrap();
        assert!(key.parent().is_some_and(|p| self.nodes.contains_key(&p)));
        self.nodes.insert(key, num_points);
        self.write_all();
    }

    /// Loose bounding box of `key`
    pub fn bounds(&self, key: &NodeKey) -> Aabb {
        let mut aabb = self.info.bounding_box;
        for c in key.as_str().bytes().skip(1) {
            aabb = aabb.child_octant(c - b'0');
        }
        aabb
    }

    fn child_mask(&self, key: &NodeKey) -> u8 {
        (0..8u8)
            .filter(|&o| self.nodes.contains_key(&key.child(o)))
            .fold(0, |mask, o| mask | (1 << o))
    }

    fn write_all(&self) {
        for (key, &count) in &self.nodes {
            let bounds = self.bounds(key);
            let points: Vec<(Vec3, [u8; 3])> = (0..count)
                .map(|i| sample_point(&bounds, i, count))
                .collect();
            let bytes = encode_points(&points, &self.info.layout, SCALE, bounds.min);
            write_node_file(&self.info.data_file(key), &bytes).unwrap();

            if key.is_hierarchy_root(self.step) {
                write_node_file(&self.info.hierarchy_file(key), &self.fragment_bytes(key)).unwrap();
            }
        }
    }

    fn fragment_bytes(&self, root: &NodeKey) -> Vec<u8> {
        let bottom = root.level() + self.step;
        let mut records = Vec::new();
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(key) = queue.pop_front() {
            let child_mask = self.child_mask(&key);
            records.push(HierarchyRecord {
                key: key.clone(),
                child_mask,
                num_points: self.nodes[&key],
            });
            if key.level() < bottom {
                for o in 0..8u8 {
                    if child_mask & (1 << o) != 0 {
                        queue.push_back(key.child(o));
                    }
                }
            }
        }
        encode_records(&records).unwrap()
    }
}

/// Deterministic point well inside `bounds`
fn sample_point(bounds: &Aabb, i: u32, count: u32) -> (Vec3, [u8; 3]) {
    let t = (i as f32 + 0.5) / count as f32;
    let spread = |k: f32| 0.2 + 0.6 * (t * k).fract();
    let offset = Vec3::new(spread(1.0), spread(3.0), spread(7.0));
    let position = bounds.min + bounds.size() * offset;
    let color = [(i % 256) as u8, 128, 255 - (i % 256) as u8];
    (position, color)
}

/// True if every node of the tree has its payload resident
pub fn all_resident(tree: &Octree) -> bool {
    tree.iter().all(|(_, node)| node.payload().is_some())
}
