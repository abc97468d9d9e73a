//! Applying loader results and refreshing changed nodes
//!
//! Everything here runs on the thread that owns the tree. Loader events
//! are matched back to their nodes by id and epoch; results for a tree that
//! has since been unloaded are dropped.

use crate::core::error::Error;
use crate::core::types::Result;
use crate::octree::key::NodeKey;
use crate::octree::node::{HierarchyState, LoadState, NodeId, ShadowState};
use crate::octree::tree::{MergeMode, Octree};
use crate::streaming::cache::NodeCache;
use crate::streaming::loader::{LoadKind, LoadRequest, LoadResult, LoadSink, LoaderEvent};

/// How a change notification was recorded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirtyMark {
    /// The node is resident or loading and will be refreshed when visible
    Flagged(NodeId),
    /// The node is not resident; the fragment of this ancestor is re-read
    HierarchyReload { ancestor: NodeId },
}

/// Counters from applying a batch of events
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub completed: usize,
    /// Completions whose hierarchy or point file could not be read
    pub failed: usize,
    /// Events for another epoch or a node no longer waiting for them
    pub discarded: usize,
    /// Nodes linked from decoded fragments
    pub created_nodes: usize,
}

/// Record that the files of `key` changed on disk
///
/// A cached node with content is flagged dirty. Otherwise the nearest
/// cached ancestor that owns a hierarchy fragment gets a forced hierarchy
/// reload.
///
/// # Errors
/// * [`Error::NoHierarchyAncestor`] if no cached ancestor can reload its
///   fragment
/// * [`Error::QueueFull`] or [`Error::LoaderClosed`] if the reload could
///   not be queued
pub fn mark_dirty(
    tree: &mut Octree,
    cache: &mut NodeCache,
    sink: &mut dyn LoadSink,
    key: &NodeKey,
) -> Result<DirtyMark> {
    if let Some(id) = cache.try_get(key) {
        if tree.mark_dirty(id) {
            log::debug!("Marked {key} dirty");
            return Ok(DirtyMark::Flagged(id));
        }
    }

    let step = tree.info().hierarchy_step_size;
    let (ancestor_key, ancestor) = key.ancestors()
        .filter_map(|k| cache.peek(&k).map(|id| (k, id)))
        .find(|&(_, id)| tree.node(id).can_load_hierarchy(step))
        .ok_or_else(|| Error::NoHierarchyAncestor(key.to_string()))?;
    // only the reloaded ancestor counts as used
    cache.try_get(&ancestor_key);

    let request = LoadRequest::for_node(tree, ancestor, LoadKind::Hierarchy, true);
    sink.try_submit(request)?;
    tree.node_mut(ancestor).hierarchy = HierarchyState::Pending;
    log::debug!("Reloading hierarchy of {} for {key}", tree.node(ancestor).key());
    Ok(DirtyMark::HierarchyReload { ancestor })
}

/// Swap in every refresh whose shadow has finished loading
///
/// # Returns
/// Number of nodes swapped
pub fn apply_ready_swaps(tree: &mut Octree, cache: &NodeCache) -> usize {
    let ready: Vec<NodeId> = tree.iter()
        .filter(|(_, node)| node.state() == LoadState::Refreshing)
        .filter(|(_, node)| node.shadow().is_some_and(|s| s.is_ready()))
        .map(|(id, _)| id)
        .collect();
    ready.into_iter()
        .filter(|&id| tree.swap_shadow(id, cache))
        .count()
}

/// Apply loader events in arrival order
pub fn apply_events(
    tree: &mut Octree,
    cache: &NodeCache,
    events: impl IntoIterator<Item = LoaderEvent>,
) -> ApplyReport {
    let mut report = ApplyReport::default();
    for event in events {
        match event {
            LoaderEvent::Started { epoch, node, kind } => {
                if epoch == tree.epoch() && tree.get(node).is_some() {
                    mark_started(tree, node, kind);
                }
            }
            LoaderEvent::Completed(result) => apply_result(tree, cache, result, &mut report),
        }
    }
    report
}

fn mark_started(tree: &mut Octree, id: NodeId, kind: LoadKind) {
    let node = tree.node_mut(id);
    match (kind, node.state) {
        (LoadKind::Data, LoadState::Queued { stale }) => node.state = LoadState::Loading { stale },
        (LoadKind::Refresh, LoadState::Refreshing) => {
            if let Some(shadow) = node.shadow.as_mut() {
                shadow.state = ShadowState::Loading;
            }
        }
        _ => {}
    }
}

fn apply_result(tree: &mut Octree, cache: &NodeCache, result: LoadResult, report: &mut ApplyReport) {
    let id = result.node;
    let current = result.epoch == tree.epoch()
        && tree.get(id).is_some_and(|n| n.key() == &result.key);
    if !current {
        log::debug!("Discarding result for {} from epoch {}", result.key, result.epoch);
        report.discarded += 1;
        return;
    }

    match result.kind {
        LoadKind::Data => apply_data(tree, cache, result, report),
        LoadKind::Refresh => apply_refresh(tree, result, report),
        LoadKind::Hierarchy => {
            match result.hierarchy {
                Some(Ok(fragment)) => {
                    report.created_nodes += tree.apply_fragment(id, &fragment, cache, MergeMode::Merge).len();
                    report.completed += 1;
                }
                Some(Err(e)) => {
                    log::warn!("Hierarchy of {} unavailable: {e}", result.key);
                    tree.node_mut(id).hierarchy = HierarchyState::Unavailable;
                    report.failed += 1;
                }
                None => report.discarded += 1,
            }
        }
    }
}

fn apply_data(tree: &mut Octree, cache: &NodeCache, result: LoadResult, report: &mut ApplyReport) {
    let id = result.node;
    let stale = match tree.node(id).state() {
        LoadState::Queued { stale } | LoadState::Loading { stale } => stale,
        _ => {
            report.discarded += 1;
            return;
        }
    };

    let mut failed = false;
    match result.hierarchy {
        Some(Ok(fragment)) => {
            if fragment.is_truncated() {
                log::warn!("Hierarchy of {} ends in {} stray bytes", result.key, fragment.trailing_bytes);
            }
            report.created_nodes += tree.apply_fragment(id, &fragment, cache, MergeMode::Merge).len();
        }
        Some(Err(e)) => {
            log::warn!("Hierarchy of {} unavailable: {e}", result.key);
            tree.node_mut(id).hierarchy = HierarchyState::Unavailable;
            failed = true;
        }
        None => {}
    }

    let node = tree.node_mut(id);
    match result.points {
        Some(Ok(points)) => {
            let count = points.len();
            let state = node.install_payload(points, stale);
            log::trace!("Loaded {} ({count} points) -> {state:?}", result.key);
        }
        Some(Err(e)) => {
            log::warn!("Points of {} unavailable: {e}", result.key);
            node.state = LoadState::Absent;
            failed = true;
        }
        None => node.state = LoadState::Absent,
    }

    if failed {
        report.failed += 1;
    } else {
        report.completed += 1;
    }
}

fn apply_refresh(tree: &mut Octree, result: LoadResult, report: &mut ApplyReport) {
    let id = result.node;
    if tree.node(id).state() != LoadState::Refreshing {
        report.discarded += 1;
        return;
    }

    let hierarchy = match result.hierarchy {
        Some(Ok(fragment)) => Some(fragment),
        Some(Err(e)) => {
            log::warn!("Refreshed hierarchy of {} unavailable: {e}", result.key);
            None
        }
        None => None,
    };
    let points = match result.points {
        Some(Ok(points)) if !points.is_empty() => points,
        Some(Ok(_)) => {
            log::warn!("Refresh of {} decoded no points, keeping old payload", result.key);
            tree.cancel_refresh(id);
            report.failed += 1;
            return;
        }
        Some(Err(e)) => {
            log::warn!("Refresh of {} failed: {e}", result.key);
            tree.cancel_refresh(id);
            report.failed += 1;
            return;
        }
        None => {
            tree.cancel_refresh(id);
            report.discarded += 1;
            return;
        }
    };

    if let Some(shadow) = tree.node_mut(id).shadow.as_mut() {
        shadow.payload = points;
        shadow.hierarchy = hierarchy;
        shadow.state = ShadowState::Loaded;
        report.completed += 1;
    }
}
