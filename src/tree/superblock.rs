//! Superblock: a page of child references aggregating a subtree

use super::page::{ChildRef, PageHeader};
use crate::config::{FANOUT, PAGE_SIZE};
use crate::store::BlockStore;
use crate::types::{AppendOutcome, LogicAddr, SeriesId};
use crate::{Error, Result};
use bytes::BytesMut;
use tracing::debug;

/// NBTree superblock (level >= 1)
///
/// An open superblock accumulates child references until K are present; a
/// committed superblock is an immutable page whose header aggregates its
/// children.
pub struct SuperBlock {
    series_id: SeriesId,
    level: u8,
    prev: LogicAddr,
    children: Vec<ChildRef>,
}

impl SuperBlock {
    /// Create an empty open superblock at `level` with a back-link to the
    /// previous committed node of the same level (or `EMPTY_ADDR`)
    pub fn new(series_id: SeriesId, level: u8, prev: LogicAddr) -> Self {
        debug_assert!(level >= 1);
        Self {
            series_id,
            level,
            prev,
            children: Vec::with_capacity(FANOUT),
        }
    }

    /// Load a committed superblock from the block store
    pub fn load(store: &dyn BlockStore, addr: LogicAddr, series_id: SeriesId) -> Result<Self> {
        let page = store.read(addr)?;
        let header = PageHeader::read_from(&page)?;
        header.expect(series_id, None)?;
        if header.level == 0 {
            return Err(Error::BadData(format!(
                "page at {} is a leaf, expected a superblock",
                addr
            )));
        }

        let mut children = Vec::with_capacity(header.count as usize);
        let body = &page[PageHeader::SIZE..];
        for i in 0..header.count as usize {
            let child = ChildRef::read_from(&body[i * ChildRef::SIZE..])?;
            if child.level != header.level - 1 {
                return Err(Error::BadData(format!(
                    "child {} of node at {} has level {}, expected {}",
                    i,
                    addr,
                    child.level,
                    header.level - 1
                )));
            }
            children.push(child);
        }

        Ok(Self {
            series_id,
            level: header.level,
            prev: header.prev_addr,
            children,
        })
    }

    /// Append a child reference; `Overflow` means K children are already
    /// present and the node must be committed first
    pub fn append_child(&mut self, child: ChildRef) -> AppendOutcome {
        debug_assert_eq!(child.level, self.level - 1);
        if self.children.len() >= FANOUT {
            return AppendOutcome::Overflow;
        }
        self.children.push(child);
        AppendOutcome::Ok
    }

    /// Child references in stored order
    pub fn children(&self) -> &[ChildRef] {
        &self.children
    }

    /// Number of child references
    pub fn nchildren(&self) -> usize {
        self.children.len()
    }

    /// Check if the node has no children
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Node level (>= 1)
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Address of the previous node of this level
    pub fn prev_addr(&self) -> LogicAddr {
        self.prev
    }

    /// Total leaf elements across the subtree
    pub fn subtree_count(&self) -> u32 {
        self.children.iter().map(|c| c.count).sum()
    }

    /// Timestamp range covered by the subtree
    pub fn timestamps(&self) -> (u64, u64) {
        let min = self.children.first().map(|c| c.min_ts).unwrap_or(0);
        let max = self.children.last().map(|c| c.max_ts).unwrap_or(0);
        (min, max)
    }

    /// Write the page and hand it to the block store.
    ///
    /// The header aggregates the children: min/max over their ranges, sum
    /// of sums, total element count. `flags` carries the closed-tree
    /// sentinel when the tree is being closed.
    pub fn commit(self, store: &dyn BlockStore, flags: u16) -> Result<(LogicAddr, ChildRef)> {
        if self.children.is_empty() {
            return Err(Error::BadArg("cannot commit an empty superblock".into()));
        }

        let subtree_count = self.subtree_count();
        let header = PageHeader {
            level: self.level,
            fanout: FANOUT as u8,
            flags,
            series_id: self.series_id,
            count: self.children.len() as u32,
            min_ts: self.children.first().map(|c| c.min_ts).unwrap_or(0),
            max_ts: self.children.last().map(|c| c.max_ts).unwrap_or(0),
            min_value: self
                .children
                .iter()
                .map(|c| c.min_value)
                .fold(f64::INFINITY, f64::min),
            max_value: self
                .children
                .iter()
                .map(|c| c.max_value)
                .fold(f64::NEG_INFINITY, f64::max),
            sum: self.children.iter().map(|c| c.sum).sum(),
            prev_addr: self.prev,
        };

        let mut page = BytesMut::with_capacity(PAGE_SIZE);
        header.write_to(&mut page);
        for child in &self.children {
            child.write_to(&mut page);
        }
        page.resize(PAGE_SIZE, 0);

        let addr = store.commit(&page)?;
        debug!(
            "Committed level {} superblock {} for series {} ({} children)",
            self.level, addr, self.series_id, header.count
        );

        let child = ChildRef::from_header(addr, &header, subtree_count);
        Ok((addr, child))
    }
}
