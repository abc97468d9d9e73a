//! Hierarchy fragment decoding
//!
//! A `.hrc` file describes the topology of a bounded-depth subtree as a
//! breadth-first sequence of 5-byte records:
//!
//! ```text
//! [child_mask: u8][point_count: u32 little-endian]
//! ```
//!
//! The first record belongs to the fragment's own node. Each set bit `i`
//! of a record's mask claims the next unread record as the child in octant
//! `i`. Nodes on the fragment's bottom level keep their mask bits, but
//! their children live in the next fragment, so decoding simply stops once
//! every byte has been consumed.

use crate::core::error::Error;
use crate::core::types::Result;
use crate::octree::key::NodeKey;
use binrw::{binrw, BinReaderExt, BinWrite};
use std::collections::VecDeque;
use std::io::Cursor;

/// Size of one hierarchy record in bytes
pub const HIERARCHY_RECORD_SIZE: usize = 5;

/// One record as stored on disk
#[binrw]
#[brw(little)]
#[derive(Clone, Copy, Debug)]
struct HrcEntry {
    child_mask: u8,
    num_points: u32,
}

/// Decoded record for one node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HierarchyRecord {
    pub key: NodeKey,
    pub child_mask: u8,
    pub num_points: u32,
}

impl HierarchyRecord {
    pub fn has_children(&self) -> bool {
        self.child_mask != 0
    }

    pub fn has_child(&self, octant: u8) -> bool {
        self.child_mask & (1 << octant) != 0
    }
}

/// Topology of one subtree as read from a `.hrc` file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HierarchyFragment {
    /// Record of the fragment's own node
    pub root: HierarchyRecord,
    /// Descendant records in breadth-first order
    pub descendants: Vec<HierarchyRecord>,
    /// Bytes left unread after the last decoded record
    pub trailing_bytes: usize,
}

impl HierarchyFragment {
    pub fn is_truncated(&self) -> bool {
        self.trailing_bytes > 0
    }

    /// All records, root first
    pub fn records(&self) -> impl Iterator<Item = &HierarchyRecord> {
        std::iter::once(&self.root).chain(self.descendants.iter())
    }

    /// Total point count over all records
    pub fn total_points(&self) -> u64 {
        self.records().map(|r| r.num_points as u64).sum()
    }

    /// Encode back into the `.hrc` byte format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_records(self.records())
    }
}

/// Encode records in the given order
pub fn encode_records<'a>(records: impl IntoIterator<Item = &'a HierarchyRecord>) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    for record in records {
        HrcEntry { child_mask: record.child_mask, num_points: record.num_points }
            .write(&mut cursor)?;
    }
    Ok(cursor.into_inner())
}

/// Next complete record, `None` once fewer than a record's bytes remain
fn next_entry(cursor: &mut Cursor<&[u8]>) -> Option<HrcEntry> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if remaining < HIERARCHY_RECORD_SIZE as u64 {
        return None;
    }
    cursor.read_le().ok()
}

/// Decode the fragment rooted at `root_key`
///
/// A trailing partial record ends decoding early; everything parsed up to
/// that point is kept and the leftover byte count is reported in
/// [`HierarchyFragment::trailing_bytes`].
///
/// # Errors
/// [`Error::EmptyHierarchy`] if the buffer does not even hold the root record.
pub fn decode_hierarchy(root_key: &NodeKey, bytes: &[u8]) -> Result<HierarchyFragment> {
    let mut cursor = Cursor::new(bytes);
    let entry = next_entry(&mut cursor)
        .ok_or_else(|| Error::EmptyHierarchy(root_key.to_string()))?;

    let root = HierarchyRecord {
        key: root_key.clone(),
        child_mask: entry.child_mask,
        num_points: entry.num_points,
    };

    let mut descendants = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back((root_key.clone(), entry.child_mask));

    'walk: while let Some((key, mask)) = queue.pop_front() {
        for octant in (0..8u8).filter(|o| mask & (1 << o) != 0) {
            let Some(entry) = next_entry(&mut cursor) else {
                break 'walk;
            };
            let child_key = key.child(octant);
            queue.push_back((child_key.clone(), entry.child_mask));
            descendants.push(HierarchyRecord {
                key: child_key,
                child_mask: entry.child_mask,
                num_points: entry.num_points,
            });
        }
    }

    let trailing_bytes = bytes.len() - cursor.position() as usize;

    Ok(HierarchyFragment { root, descendants, trailing_bytes })
}
