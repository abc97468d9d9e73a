//! Node identity strings
//!
//! A node is named by its path from the root: `r` followed by one octant
//! digit (0-7) per level, so `r` is the root and `r03` is the fourth child
//! of the root's first child. The name doubles as the on-disk file stem.

use crate::core::error::Error;
use crate::core::types::Result;
use std::fmt;
use std::path::PathBuf;

/// Identity of an octree node
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(String);

impl NodeKey {
    pub const ROOT_MARKER: char = 'r';

    /// The root node `r`
    pub fn root() -> Self {
        Self(Self::ROOT_MARKER.to_string())
    }

    /// Parse and validate a node name
    pub fn parse(name: &str) -> Result<Self> {
        let mut chars = name.chars();
        if chars.next() != Some(Self::ROOT_MARKER) {
            return Err(Error::InvalidKey(name.to_string()));
        }
        if !chars.all(|c| ('0'..='7').contains(&c)) {
            return Err(Error::InvalidKey(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    /// Key of the child in `octant` (0-7)
    pub fn child(&self, octant: u8) -> Self {
        debug_assert!(octant < 8, "octant out of range: {octant}");
        let mut name = String::with_capacity(self.0.len() + 1);
        name.push_str(&self.0);
        name.push(char::from(b'0' + (octant & 7)));
        Self(name)
    }

    /// Key of the parent, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_string()))
        }
    }

    /// Depth in the tree; the root is level 0
    pub fn level(&self) -> u32 {
        (self.0.len() - 1) as u32
    }

    /// Octant of this node within its parent, `None` for the root
    pub fn octant(&self) -> Option<u8> {
        if self.is_root() {
            return None;
        }
        self.0.as_bytes().last().map(|b| b - b'0')
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// Iterate over ancestors from the direct parent up to the root
    pub fn ancestors(&self) -> impl Iterator<Item = NodeKey> + '_ {
        (1..self.0.len()).rev().map(|len| Self(self.0[..len].to_string()))
    }

    /// True if this node starts a hierarchy fragment of `step` levels
    pub fn is_hierarchy_root(&self, step: u32) -> bool {
        step > 0 && self.level() % step == 0
    }

    /// Directory holding this node's files, relative to the octree directory
    ///
    /// Nodes are grouped into `r/` followed by one segment of `step` digits
    /// per completed fragment window, e.g. `r/01234/` for `r0123456` with a
    /// step of 5.
    pub fn hierarchy_dir(&self, step: u32) -> PathBuf {
        let mut dir = PathBuf::from(Self::ROOT_MARKER.to_string());
        if step == 0 {
            return dir;
        }
        let step = step as usize;
        let windows = self.level() as usize / step;
        for i in 0..windows {
            let start = 1 + i * step;
            dir.push(&self.0[start..start + step]);
        }
        dir
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for NodeKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
