//! Extent: the currently-open node at one tree level

use super::leaf::LeafNode;
use super::page::ChildRef;
use super::superblock::SuperBlock;
use crate::store::BlockStore;
use crate::types::{AppendOutcome, LogicAddr, SeriesId};
use crate::Result;

/// The open (rightmost, not yet committed) node of one level, plus the
/// back-link to the most recently committed sibling.
///
/// An extent only absorbs or overflows; the commit bubble between levels is
/// driven by [`ExtentsList`](super::ExtentsList).
pub enum Extent {
    /// Level 0: an open leaf buffer
    Leaf {
        series_id: SeriesId,
        leaf: LeafNode,
        last: LogicAddr,
    },
    /// Level >= 1: an open child-reference array
    Node {
        series_id: SeriesId,
        node: SuperBlock,
        last: LogicAddr,
    },
}

impl Extent {
    /// Create a level-0 extent whose open leaf back-links to `prev`
    pub fn new_leaf(series_id: SeriesId, prev: LogicAddr) -> Self {
        Extent::Leaf {
            series_id,
            leaf: LeafNode::new(series_id, prev),
            last: prev,
        }
    }

    /// Create a level >= 1 extent whose open node back-links to `prev`
    pub fn new_node(series_id: SeriesId, level: u8, prev: LogicAddr) -> Self {
        Extent::Node {
            series_id,
            node: SuperBlock::new(series_id, level, prev),
            last: prev,
        }
    }

    /// Series the extent belongs to
    pub fn series_id(&self) -> SeriesId {
        match self {
            Extent::Leaf { series_id, .. } => *series_id,
            Extent::Node { series_id, .. } => *series_id,
        }
    }

    /// Tree level of this extent
    pub fn level(&self) -> u8 {
        match self {
            Extent::Leaf { .. } => 0,
            Extent::Node { node, .. } => node.level(),
        }
    }

    /// Address of the most recently committed node at this level
    pub fn last_committed(&self) -> LogicAddr {
        match self {
            Extent::Leaf { last, .. } => *last,
            Extent::Node { last, .. } => *last,
        }
    }

    /// Check if the open node holds nothing
    pub fn is_open_empty(&self) -> bool {
        match self {
            Extent::Leaf { leaf, .. } => leaf.is_empty(),
            Extent::Node { node, .. } => node.is_empty(),
        }
    }

    /// Stage a pair into the open leaf. Panics if called on a superblock
    /// extent; the extents list routes values to level 0 only.
    pub fn try_append(&mut self, ts: u64, value: f64) -> AppendOutcome {
        match self {
            Extent::Leaf { leaf, .. } => leaf.append(ts, value),
            Extent::Node { .. } => unreachable!("value append routed to a superblock extent"),
        }
    }

    /// Stage a child reference into the open superblock. Panics if called
    /// on the leaf extent.
    pub fn try_append_child(&mut self, child: ChildRef) -> AppendOutcome {
        match self {
            Extent::Node { node, .. } => node.append_child(child),
            Extent::Leaf { .. } => unreachable!("child reference routed to the leaf extent"),
        }
    }

    /// Commit the open node, then re-enter the open state with the new
    /// address as back-link. Returns the address and the reference the
    /// level above stores.
    pub fn commit_and_reset(
        &mut self,
        store: &dyn BlockStore,
        flags: u16,
    ) -> Result<(LogicAddr, ChildRef)> {
        match self {
            Extent::Leaf {
                series_id,
                leaf,
                last,
            } => {
                let open = std::mem::replace(leaf, LeafNode::new(*series_id, *last));
                let (addr, child) = open.commit(store)?;
                *leaf = LeafNode::new(*series_id, addr);
                *last = addr;
                Ok((addr, child))
            }
            Extent::Node {
                series_id,
                node,
                last,
            } => {
                let level = node.level();
                let open = std::mem::replace(node, SuperBlock::new(*series_id, level, *last));
                let (addr, child) = open.commit(store, flags)?;
                *node = SuperBlock::new(*series_id, level, addr);
                *last = addr;
                Ok((addr, child))
            }
        }
    }

    /// Child references currently staged in the open node (empty for the
    /// leaf extent)
    pub fn open_children(&self) -> &[ChildRef] {
        match self {
            Extent::Leaf { .. } => &[],
            Extent::Node { node, .. } => node.children(),
        }
    }

    /// Decode the pending leaf into the destination vectors (no-op for
    /// superblock extents)
    pub fn read_pending(&self, timestamps: &mut Vec<u64>, values: &mut Vec<f64>) -> Result<()> {
        match self {
            Extent::Leaf { leaf, .. } => leaf.read_all(timestamps, values, 0),
            Extent::Node { .. } => Ok(()),
        }
    }
}
