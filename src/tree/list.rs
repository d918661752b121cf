//! ExtentsList: the per-series stack of open extents

use super::extent::Extent;
use super::page::{ChildRef, PageHeader, FLAG_CLOSED_TREE};
use super::scan::{ScanIterator, Segment};
use super::superblock::SuperBlock;
use crate::store::BlockStore;
use crate::types::{AppendOutcome, LogicAddr, RepairStatus, SeriesId, EMPTY_ADDR};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-series stack of extents.
///
/// Routes appends into the level-0 extent, propagates commit events upward,
/// and executes the recovery algorithm when reopened from a roots vector.
/// Single-writer: the caller serialises mutation.
pub struct ExtentsList {
    series_id: SeriesId,
    store: Arc<dyn BlockStore>,
    extents: Vec<Extent>,
    initial_roots: Vec<LogicAddr>,
    initialized: bool,
    closed: bool,
    last_ts: Option<u64>,
}

impl ExtentsList {
    /// Create a list for `series_id` backed by `store`.
    ///
    /// `roots` is the vector returned by a previous [`close`](Self::close)
    /// or [`get_roots`](Self::get_roots); empty for a fresh series.
    pub fn new(series_id: SeriesId, roots: Vec<LogicAddr>, store: Arc<dyn BlockStore>) -> Self {
        Self {
            series_id,
            store,
            extents: Vec::new(),
            initial_roots: roots,
            initialized: false,
            closed: false,
            last_ts: None,
        }
    }

    /// Series this list belongs to
    pub fn series_id(&self) -> SeriesId {
        self.series_id
    }

    /// Classify a roots vector.
    ///
    /// The top extent can only commit during `close()` (a mid-stream commit
    /// at the top level immediately opens a fresh extent above it), so a
    /// vector whose last tip is missing was captured mid-stream and needs
    /// repair.
    pub fn repair_status(roots: &[LogicAddr]) -> RepairStatus {
        match roots.last() {
            None => RepairStatus::Ok,
            Some(&addr) if addr == EMPTY_ADDR => RepairStatus::Repair,
            Some(_) => RepairStatus::Ok,
        }
    }

    /// Materialise the extents from the stored back-links. Idempotent.
    pub fn force_init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.init()
    }

    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        if self.initial_roots.is_empty() {
            return Ok(());
        }

        let roots = self.initial_roots.clone();
        for (level, &addr) in roots.iter().enumerate() {
            let extent = if level == 0 {
                Extent::new_leaf(self.series_id, addr)
            } else {
                Extent::new_node(self.series_id, level as u8, addr)
            };
            self.extents.push(extent);
        }

        // Appends must stay monotonic across the reopen boundary
        if roots[0] != EMPTY_ADDR {
            let (tip, _) = self.load_node_info(roots[0])?;
            self.last_ts = Some(tip.max_ts);
        }

        match Self::repair_status(&roots) {
            RepairStatus::Ok => {
                // Closed tree: the top node covers every level below it.
                // Its reference becomes the first child of a fresh extent
                // one level up, and appends continue from there.
                let top = *roots.last().expect("roots are not empty");
                let (child, _) = self.load_node_info(top)?;
                self.push_ref(roots.len(), child)?;
                info!(
                    "Reopened closed tree for series {} ({} levels)",
                    self.series_id,
                    roots.len()
                );
            }
            RepairStatus::Repair => {
                warn!(
                    "Roots of series {} were captured mid-stream, repairing",
                    self.series_id
                );
                self.repair(&roots)?;
            }
        }
        Ok(())
    }

    /// Stitch unreferenced committed nodes back into their parent extents.
    ///
    /// For each level with a tip, the nodes committed after the last one
    /// referenced by the level above are exactly the tip's back-link chain
    /// down to the last child of the upper tip. Re-appending their
    /// references oldest-first rebuilds the pre-crash in-memory state.
    fn repair(&mut self, roots: &[LogicAddr]) -> Result<()> {
        for level in (0..roots.len()).rev() {
            if roots[level] == EMPTY_ADDR {
                continue;
            }
            let stop = match roots.get(level + 1) {
                Some(&upper) if upper != EMPTY_ADDR => self.last_child_addr(upper)?,
                _ => EMPTY_ADDR,
            };

            let mut chain = Vec::new();
            let mut addr = roots[level];
            while addr != stop && addr != EMPTY_ADDR {
                let (child, prev) = self.load_node_info(addr)?;
                if child.level as usize != level {
                    return Err(Error::BadData(format!(
                        "node at {} has level {}, expected {}",
                        addr, child.level, level
                    )));
                }
                chain.push(child);
                addr = prev;
            }

            debug!(
                "Re-linking {} unreferenced nodes at level {} of series {}",
                chain.len(),
                level,
                self.series_id
            );
            for child in chain.into_iter().rev() {
                self.push_ref(level + 1, child)?;
            }
        }
        Ok(())
    }

    /// Append a pair. Returns true if at least one commit occurred, i.e.
    /// the roots vector changed and should be persisted by the caller.
    pub fn append(&mut self, ts: u64, value: f64) -> Result<bool> {
        if self.closed {
            return Err(Error::BadArg("appending to a closed tree".into()));
        }
        if !self.initialized {
            self.init()?;
        }
        if let Some(last) = self.last_ts {
            if ts < last {
                return Err(Error::BadArg(format!(
                    "out-of-order timestamp {} after {}",
                    ts, last
                )));
            }
        }
        if self.extents.is_empty() {
            self.extents.push(Extent::new_leaf(self.series_id, EMPTY_ADDR));
        }

        let committed = match self.extents[0].try_append(ts, value) {
            AppendOutcome::Ok => false,
            AppendOutcome::Overflow => {
                let store = self.store.clone();
                let (_, child) = self.extents[0].commit_and_reset(store.as_ref(), 0)?;
                self.push_ref(1, child)?;
                match self.extents[0].try_append(ts, value) {
                    AppendOutcome::Ok => true,
                    AppendOutcome::Overflow => {
                        unreachable!("fresh leaf rejected a single pair")
                    }
                }
            }
        };
        self.last_ts = Some(ts);
        Ok(committed)
    }

    /// Propagate a committed node's reference into the extent at `level`,
    /// committing and recursing upward while nodes are full
    fn push_ref(&mut self, level: usize, child: ChildRef) -> Result<()> {
        if self.extents.len() <= level {
            debug_assert_eq!(self.extents.len(), level);
            self.extents
                .push(Extent::new_node(self.series_id, level as u8, EMPTY_ADDR));
        }
        match self.extents[level].try_append_child(child) {
            AppendOutcome::Ok => Ok(()),
            AppendOutcome::Overflow => {
                let store = self.store.clone();
                let (_, parent) = self.extents[level].commit_and_reset(store.as_ref(), 0)?;
                self.push_ref(level + 1, parent)?;
                match self.extents[level].try_append_child(child) {
                    AppendOutcome::Ok => Ok(()),
                    AppendOutcome::Overflow => {
                        unreachable!("fresh superblock rejected a child")
                    }
                }
            }
        }
    }

    /// Current back-link tip per level: the address of the most recently
    /// committed node, or `EMPTY_ADDR` where the level has none
    pub fn get_roots(&self) -> Vec<LogicAddr> {
        if !self.initialized && self.extents.is_empty() {
            return self.initial_roots.clone();
        }
        self.extents.iter().map(|e| e.last_committed()).collect()
    }

    /// Force-commit every open extent bottom-up and return the final roots.
    ///
    /// The leaf's reference is pushed into level 1 (creating it if the tree
    /// never grew past a single leaf), each superblock's into the level
    /// above, and the final top node is committed with the closed-tree
    /// sentinel. Idempotent after the first call.
    pub fn close(&mut self) -> Result<Vec<LogicAddr>> {
        if self.closed {
            return Ok(self.get_roots());
        }
        if !self.initialized {
            self.init()?;
        }

        let store = self.store.clone();
        let mut level = 0;
        while level < self.extents.len() {
            if self.extents[level].is_open_empty() {
                level += 1;
                continue;
            }
            let is_top = level > 0 && level + 1 == self.extents.len();
            if is_top {
                self.extents[level].commit_and_reset(store.as_ref(), FLAG_CLOSED_TREE)?;
            } else {
                let (_, child) = self.extents[level].commit_and_reset(store.as_ref(), 0)?;
                self.push_ref(level + 1, child)?;
            }
            level += 1;
        }

        self.closed = true;
        let roots = self.get_roots();
        info!(
            "Closed tree for series {} ({} levels)",
            self.series_id,
            roots.len()
        );
        Ok(roots)
    }

    /// Search the interval between `begin` and `end`.
    ///
    /// Forward when `begin < end` (yields timestamps in `[begin, end)`),
    /// backward when `begin > end` (yields `(end, begin]` in descending
    /// order). Pending data in the open leaf is included via a snapshot,
    /// so the iterator may outlive the next append.
    pub fn search(&self, begin: u64, end: u64) -> Result<ScanIterator> {
        if !self.initialized && !self.initial_roots.is_empty() {
            return Err(Error::BadArg(
                "extents list is not initialised; call force_init".into(),
            ));
        }

        let mut segments = Vec::new();
        if self.closed {
            // After close the open extents are empty; everything lives
            // under the top node.
            if let Some(top) = self.extents.last() {
                if top.last_committed() != EMPTY_ADDR {
                    let (child, _) = self.load_node_info(top.last_committed())?;
                    segments.push(Segment::Children(vec![child]));
                }
            }
        } else {
            // Oldest data first: the highest extent's children cover the
            // oldest committed subtrees, the pending leaf is newest.
            for extent in self.extents.iter().rev() {
                match extent {
                    Extent::Node { .. } => {
                        segments.push(Segment::Children(extent.open_children().to_vec()));
                    }
                    Extent::Leaf { .. } => {
                        let mut ts = Vec::new();
                        let mut xs = Vec::new();
                        extent.read_pending(&mut ts, &mut xs)?;
                        segments.push(Segment::Pending { ts, xs });
                    }
                }
            }
        }

        Ok(ScanIterator::new(
            self.store.clone(),
            self.series_id,
            begin,
            end,
            segments,
        ))
    }

    /// Debug/test hook: the extents by level
    pub fn get_extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Verify the invariants of the subtree rooted at `extent`'s level:
    /// stored levels match, child aggregates are consistent with their
    /// nodes, child ranges are monotone, and the back-link chain
    /// terminates at `EMPTY_ADDR`.
    pub fn check_extent(extent: &Extent, store: &dyn BlockStore, level: usize) -> Result<()> {
        if extent.level() as usize != level {
            return Err(Error::BadData(format!(
                "extent has level {}, expected {}",
                extent.level(),
                level
            )));
        }
        let series_id = extent.series_id();

        // Open children and their subtrees
        let children = extent.open_children();
        for pair in children.windows(2) {
            if pair[0].max_ts > pair[1].min_ts {
                return Err(Error::BadData(format!(
                    "child ranges overlap: [{}, {}] then [{}, {}]",
                    pair[0].min_ts, pair[0].max_ts, pair[1].min_ts, pair[1].max_ts
                )));
            }
        }
        for child in children {
            check_subtree(store, series_id, child)?;
        }

        // Back-link chain
        let mut addr = extent.last_committed();
        while addr != EMPTY_ADDR {
            let page = store.read(addr)?;
            let header = PageHeader::read_from(&page)?;
            header.expect(series_id, Some(level as u8))?;
            addr = header.prev_addr;
        }
        Ok(())
    }

    /// Read a node's header and build the reference its parent would store
    /// (subtree element total included), plus the node's back-link
    fn load_node_info(&self, addr: LogicAddr) -> Result<(ChildRef, LogicAddr)> {
        load_node_info(self.store.as_ref(), self.series_id, addr)
    }

    /// Address of the last (rightmost) child of the superblock at `addr`
    fn last_child_addr(&self, addr: LogicAddr) -> Result<LogicAddr> {
        let node = SuperBlock::load(self.store.as_ref(), addr, self.series_id)?;
        Ok(node
            .children()
            .last()
            .map(|c| c.addr)
            .unwrap_or(EMPTY_ADDR))
    }
}

fn load_node_info(
    store: &dyn BlockStore,
    series_id: SeriesId,
    addr: LogicAddr,
) -> Result<(ChildRef, LogicAddr)> {
    let page = store.read(addr)?;
    let header = PageHeader::read_from(&page)?;
    header.expect(series_id, None)?;

    let subtree_count = if header.level == 0 {
        header.count
    } else {
        let body = &page[PageHeader::SIZE..];
        let mut total = 0u32;
        for i in 0..header.count as usize {
            total += ChildRef::read_from(&body[i * ChildRef::SIZE..])?.count;
        }
        total
    };

    Ok((
        ChildRef::from_header(addr, &header, subtree_count),
        header.prev_addr,
    ))
}

/// Verify that the node behind `child` matches its reference and that its
/// own children do so recursively
fn check_subtree(store: &dyn BlockStore, series_id: SeriesId, child: &ChildRef) -> Result<()> {
    let (actual, _) = load_node_info(store, series_id, child.addr)?;
    if actual.level != child.level {
        return Err(Error::BadData(format!(
            "node at {} has level {}, reference says {}",
            child.addr, actual.level, child.level
        )));
    }
    if actual.count != child.count
        || actual.min_ts != child.min_ts
        || actual.max_ts != child.max_ts
        || actual.min_value != child.min_value
        || actual.max_value != child.max_value
        || actual.sum != child.sum
    {
        return Err(Error::BadData(format!(
            "aggregates of node at {} do not match its reference",
            child.addr
        )));
    }

    if child.level > 0 {
        let node = SuperBlock::load(store, child.addr, series_id)?;
        let mut total = 0u32;
        for pair in node.children().windows(2) {
            if pair[0].max_ts > pair[1].min_ts {
                return Err(Error::BadData(format!(
                    "children of node at {} are not in timestamp order",
                    child.addr
                )));
            }
        }
        for grandchild in node.children() {
            total += grandchild.count;
            check_subtree(store, series_id, grandchild)?;
        }
        if total != child.count {
            return Err(Error::BadData(format!(
                "node at {} claims {} elements, children sum to {}",
                child.addr, child.count, total
            )));
        }
    }
    Ok(())
}
