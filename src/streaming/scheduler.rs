//! Per-frame visibility traversal
//!
//! Walks the instantiated tree from the root in order of screen-space
//! importance, admits nodes that are inside the view frustum and fit the
//! point budget, requests loads for admitted nodes that are not resident,
//! and stops early once the cycle's time budget is spent.

use crate::core::time::Clock;
use crate::core::types::{Mat4, Vec3};
use crate::math::{Containment, Frustum};
use crate::octree::node::{HierarchyState, LoadState, NodeId};
use crate::octree::tree::Octree;
use crate::streaming::budget::CycleBudget;
use crate::streaming::cache::NodeCache;
use crate::streaming::loader::{LoadKind, LoadRequest, LoadSink};
use crate::streaming::priority::{is_behind_camera, screen_importance, NodePriorityQueue, MAX_WEIGHT};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;

const NEAR_PLANE: f32 = 0.01;
const FAR_PLANE: f32 = 100_000.0;

/// Camera state supplied for one update cycle
#[derive(Clone, Copy, Debug)]
pub struct ViewState {
    pub view_projection: Mat4,
    /// Camera position in world space
    pub position: Vec3,
    /// Unit view direction
    pub forward: Vec3,
    /// Viewport height in pixels
    pub viewport_height: f32,
}

impl ViewState {
    /// Derive position and direction from a right-handed view matrix
    pub fn new(view: Mat4, projection: Mat4, viewport_height: f32) -> Self {
        let camera = view.inverse();
        Self {
            view_projection: projection * view,
            position: camera.w_axis.truncate(),
            forward: camera.transform_vector3(Vec3::NEG_Z).normalize_or_zero(),
            viewport_height,
        }
    }

    /// Perspective camera at `eye` looking at `target`, Y up
    pub fn look_at(eye: Vec3, target: Vec3, fov_y: f32, aspect: f32, viewport_height: f32) -> Self {
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let projection = Mat4::perspective_rh(fov_y, aspect, NEAR_PLANE, FAR_PLANE);
        Self::new(view, projection, viewport_height)
    }
}

/// Outcome of one update cycle
#[derive(Clone, Debug, Default, Serialize)]
pub struct CycleReport {
    /// Nodes admitted this cycle
    pub visible_nodes: usize,
    /// Points of the admitted nodes
    pub visible_points: u64,
    /// Admitted nodes with a readable payload
    pub displayed: usize,
    /// Load requests accepted by the loader
    pub requested_loads: usize,
    /// Load requests refused by a full queue, retried next cycle
    pub rejected_loads: usize,
    /// Children skipped as too small or behind the camera
    pub pruned: usize,
    /// Refreshed payloads swapped in before the traversal
    pub swapped: usize,
    /// Payloads released to bring the cache back to capacity
    pub evicted: usize,
    /// The time budget ran out before the queue was empty
    pub aborted: bool,
    pub elapsed: Duration,
}

/// Priority-ordered traversal state reused across cycles
#[derive(Default)]
pub struct VisibilityScheduler {
    queue: NodePriorityQueue,
    /// Resident admitted nodes, in admission order
    display: Vec<NodeId>,
    /// Every node admitted this cycle
    admitted: HashSet<NodeId>,
}

impl VisibilityScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resident nodes admitted by the last cycle, most important first
    pub fn display_list(&self) -> &[NodeId] {
        &self.display
    }

    /// Forget the last cycle, e.g. after the tree was replaced
    pub fn clear(&mut self) {
        self.queue.clear();
        self.display.clear();
        self.admitted.clear();
    }

    /// Run one visibility update
    ///
    /// Never fails: budget exhaustion and rejected loads leave a shorter
    /// but valid display list.
    pub fn run_cycle(
        &mut self,
        tree: &mut Octree,
        cache: &mut NodeCache,
        sink: &mut dyn LoadSink,
        view: &ViewState,
        clock: &dyn Clock,
    ) -> CycleReport {
        self.clear();
        let config = tree.info().config.clone();
        let mut budget = CycleBudget::start(
            config.visible_point_target,
            config.update_time_budget(),
            clock,
        );
        let frustum = Frustum::from_view_projection(&view.view_projection);
        let projection_factor = config.projection_factor();
        let mut report = CycleReport::default();

        self.queue.push(tree.root(), MAX_WEIGHT);
        while let Some(entry) = self.queue.pop() {
            let id = entry.node;
            let node = tree.node(id);
            let num_points = node.num_points() as u64;
            if frustum.classify_aabb(node.bounding_box()) == Containment::Outside
                || !budget.can_admit(num_points)
            {
                continue;
            }

            budget.admit(num_points);
            self.admitted.insert(id);
            log::trace!("Admitted {} ({num_points} points, weight {})", node.key(), entry.weight);

            self.request_load(tree, id, sink, &mut report);

            let node = tree.node(id);
            if node.payload().is_some() {
                self.display.push(id);
            }
            cache.insert(node.key().clone(), id);

            if budget.time_exceeded(clock) {
                report.aborted = true;
                break;
            }

            // children inherit the estimate of the node that contains them
            let sphere = node.bounding_sphere();
            let behind = config.cull_behind_camera && is_behind_camera(sphere, view.position, view.forward);
            let importance = screen_importance(
                sphere,
                view.position,
                projection_factor,
                view.viewport_height,
            );
            let too_small = !importance.contains_camera && importance.pixel_radius < config.min_node_pixel_size;
            if behind || too_small {
                report.pruned += node.children().count();
                continue;
            }
            for (_, child) in node.children() {
                self.queue.push(child, importance.weight);
            }
        }

        let trimmed = cache.trim(tree, &self.admitted);
        report.evicted = trimmed.evicted.len();
        report.visible_nodes = budget.visible_nodes();
        report.visible_points = budget.visible_points();
        report.displayed = self.display.len();
        report.elapsed = budget.elapsed(clock);

        log::debug!(
            "Visibility cycle: {} nodes, {} points, {} loads requested, {} rejected{}",
            report.visible_nodes,
            report.visible_points,
            report.requested_loads,
            report.rejected_loads,
            if report.aborted { ", aborted" } else { "" }
        );
        report
    }

    /// Submit whatever load an admitted node still needs
    fn request_load(
        &mut self,
        tree: &mut Octree,
        id: NodeId,
        sink: &mut dyn LoadSink,
        report: &mut CycleReport,
    ) {
        let step = tree.info().hierarchy_step_size;
        let node = tree.node(id);
        let needs_hierarchy = node.needs_hierarchy(step);

        let request = match node.state() {
            LoadState::Absent => LoadRequest::for_node(tree, id, LoadKind::Data, needs_hierarchy),
            LoadState::Dirty => {
                // refresh the fragment too, if this node has one
                let with_hierarchy = node.can_load_hierarchy(step);
                tree.begin_refresh(id);
                LoadRequest::for_node(tree, id, LoadKind::Refresh, with_hierarchy)
            }
            LoadState::Loaded if needs_hierarchy => {
                LoadRequest::for_node(tree, id, LoadKind::Hierarchy, true)
            }
            _ => return,
        };
        let kind = request.kind;
        let with_hierarchy = request.with_hierarchy;

        match sink.try_submit(request) {
            Ok(()) => {
                report.requested_loads += 1;
                let node = tree.node_mut(id);
                log::trace!("Requested {:?} load of {}", kind, node.key);
                if kind == LoadKind::Data {
                    node.state = LoadState::Queued { stale: false };
                }
                if with_hierarchy && kind != LoadKind::Refresh {
                    node.hierarchy = HierarchyState::Pending;
                }
            }
            Err(e) => {
                report.rejected_loads += 1;
                log::trace!("Load of {} not queued: {e}", tree.node(id).key());
                if kind == LoadKind::Refresh {
                    tree.cancel_refresh(id);
                }
            }
        }
    }
}
