//! LRU cache of resident nodes
//!
//! The cache is an index over the octree: it maps node keys to arena ids
//! and remembers how recently each node was used. Nodes themselves stay in
//! the tree; evicting one releases its payload and drops it from the index.
//!
//! Capacity is advisory. Inserting never evicts; the scheduler calls
//! [`NodeCache::trim`] once per cycle, after the display list is known.

use crate::core::error::Error;
use crate::core::types::Result;
use crate::octree::{NodeId, NodeKey, Octree};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    node: NodeId,
    last_access: u64,
}

/// A node removed from the cache
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evicted {
    pub key: NodeKey,
    pub node: NodeId,
    /// Payload bytes released
    pub freed_bytes: usize,
}

/// Outcome of trimming the cache to capacity
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub evicted: Vec<Evicted>,
    /// Over-capacity entries kept because they were busy or displayed
    pub retained: usize,
}

/// LRU index of resident nodes
pub struct NodeCache {
    /// Map of node keys to entries
    entries: HashMap<NodeKey, CacheEntry>,
    /// Access order: oldest tick first
    recency: BTreeMap<u64, NodeKey>,
    /// Monotonic access counter
    tick: u64,
    /// Target number of entries
    capacity: usize,
}

impl NodeCache {
    /// Create a new node cache
    ///
    /// # Arguments
    /// * `capacity` - Number of nodes [`trim`](Self::trim) keeps
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            capacity,
        }
    }

    /// Register a node or refresh its recency
    ///
    /// # Returns
    /// True if the key was not cached before
    pub fn insert(&mut self, key: NodeKey, node: NodeId) -> bool {
        let tick = self.next_tick();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                self.recency.remove(&entry.last_access);
                entry.node = node;
                entry.last_access = tick;
                self.recency.insert(tick, key);
                false
            }
            None => {
                self.entries.insert(key.clone(), CacheEntry { node, last_access: tick });
                self.recency.insert(tick, key);
                true
            }
        }
    }

    /// Look up a node, marking it as recently used
    pub fn try_get(&mut self, key: &NodeKey) -> Option<NodeId> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.last_access);
        entry.last_access = tick;
        self.recency.insert(tick, key.clone());
        Some(entry.node)
    }

    /// Look up a node without touching its recency
    pub fn peek(&self, key: &NodeKey) -> Option<NodeId> {
        self.entries.get(key).map(|e| e.node)
    }

    /// Check for a node without touching its recency
    pub fn contains(&self, key: &NodeKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop a key from the index without touching the node
    pub fn remove(&mut self, key: &NodeKey) -> Option<NodeId> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.last_access);
        Some(entry.node)
    }

    /// Drop every entry
    ///
    /// Payloads are not released; callers clearing the cache are discarding
    /// the tree as well.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// Number of cached nodes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from least to most recently used
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &NodeKey> {
        self.recency.values()
    }

    /// Evict one node, releasing its payload
    ///
    /// # Errors
    /// * [`Error::UnknownNode`] if the key is not cached
    /// * [`Error::NodeBusy`] if a load or refresh for the node is in flight;
    ///   the entry is left in place
    pub fn evict(&mut self, key: &NodeKey, tree: &mut Octree) -> Result<Evicted> {
        let node = self.peek(key).ok_or_else(|| Error::UnknownNode(key.to_string()))?;
        let freed_bytes = tree.release_payload(node)?;
        self.remove(key);
        Ok(Evicted { key: key.clone(), node, freed_bytes })
    }

    /// Evict the least recently used node that is neither busy nor protected
    pub fn evict_lru(&mut self, tree: &mut Octree, protected: &HashSet<NodeId>) -> Option<Evicted> {
        let view: &Octree = tree;
        let key = self.recency.values()
            .find(|key| self.is_evictable(key, view, protected))
            .cloned()?;
        self.evict(&key, tree).ok()
    }

    /// Evict least recently used nodes until the cache is within capacity
    ///
    /// Busy nodes and nodes in `protected` are skipped, so the cache may
    /// stay above capacity; the shortfall is reported as `retained`.
    pub fn trim(&mut self, tree: &mut Octree, protected: &HashSet<NodeId>) -> TrimReport {
        let excess = self.len().saturating_sub(self.capacity);
        if excess == 0 {
            return TrimReport::default();
        }

        let view: &Octree = tree;
        let victims: Vec<NodeKey> = self.recency.values()
            .filter(|key| self.is_evictable(key, view, protected))
            .take(excess)
            .cloned()
            .collect();

        let mut report = TrimReport::default();
        for key in victims {
            match self.evict(&key, tree) {
                Ok(evicted) => report.evicted.push(evicted),
                Err(e) => log::warn!("Skipping eviction of {key}: {e}"),
            }
        }
        report.retained = excess - report.evicted.len();

        if !report.evicted.is_empty() {
            log::debug!(
                "Evicted {} nodes ({} bytes), {} cached",
                report.evicted.len(),
                report.evicted.iter().map(|e| e.freed_bytes).sum::<usize>(),
                self.len(),
            );
        }
        report
    }

    fn is_evictable(&self, key: &NodeKey, tree: &Octree, protected: &HashSet<NodeId>) -> bool {
        let Some(node) = self.peek(key) else {
            return false;
        };
        !protected.contains(&node) && tree.get(node).is_some_and(|n| !n.state().is_busy())
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
