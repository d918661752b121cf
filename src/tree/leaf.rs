//! Leaf node: a page of compressed (timestamp, value) pairs

use super::page::{ChildRef, PageHeader};
use crate::codec::{DataBlockReader, DataBlockWriter};
use crate::config::{FANOUT, LEAF_CAPACITY, PAGE_SIZE};
use crate::store::BlockStore;
use crate::types::{AppendOutcome, LogicAddr, SeriesId};
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// How much of a stored leaf page to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Header and body
    Full,
    /// Header only; `read_all` is unavailable
    HeaderOnly,
}

enum LeafState {
    /// Accumulating appends in memory
    Open { writer: DataBlockWriter },
    /// Loaded from the block store; immutable
    Stored { body: Option<Bytes> },
}

/// NBTree leaf node
///
/// An open leaf accumulates appends through the codec writer until the
/// writer signals overflow, then commits as an immutable page. A stored
/// leaf is read back by address.
pub struct LeafNode {
    series_id: SeriesId,
    prev: LogicAddr,
    count: u32,
    min_ts: u64,
    max_ts: u64,
    state: LeafState,
}

impl LeafNode {
    /// Create an empty open leaf with a back-link to the previous committed
    /// leaf of the same series (or `EMPTY_ADDR`)
    pub fn new(series_id: SeriesId, prev: LogicAddr) -> Self {
        let budget = PAGE_SIZE - PageHeader::SIZE;
        Self {
            series_id,
            prev,
            count: 0,
            min_ts: 0,
            max_ts: 0,
            state: LeafState::Open {
                writer: DataBlockWriter::new(budget, LEAF_CAPACITY),
            },
        }
    }

    /// Load a committed leaf from the block store
    pub fn load(
        store: &dyn BlockStore,
        addr: LogicAddr,
        series_id: SeriesId,
        mode: LoadMode,
    ) -> Result<Self> {
        let page = store.read(addr)?;
        let header = PageHeader::read_from(&page)?;
        header.expect(series_id, Some(0))?;

        let body = match mode {
            LoadMode::Full => Some(page.slice(PageHeader::SIZE..)),
            LoadMode::HeaderOnly => None,
        };

        Ok(Self {
            series_id,
            prev: header.prev_addr,
            count: header.count,
            min_ts: header.min_ts,
            max_ts: header.max_ts,
            state: LeafState::Stored { body },
        })
    }

    /// Append a pair; `Overflow` means the leaf is full and must be
    /// committed before the pair is retried
    pub fn append(&mut self, ts: u64, value: f64) -> AppendOutcome {
        let writer = match &mut self.state {
            LeafState::Open { writer } => writer,
            LeafState::Stored { .. } => return AppendOutcome::Overflow,
        };
        match writer.append(ts, value) {
            AppendOutcome::Ok => {
                if self.count == 0 {
                    self.min_ts = ts;
                }
                self.max_ts = ts;
                self.count += 1;
                AppendOutcome::Ok
            }
            AppendOutcome::Overflow => AppendOutcome::Overflow,
        }
    }

    /// Number of elements
    pub fn nelements(&self) -> u32 {
        self.count
    }

    /// Check if the leaf has no elements
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Timestamps of the first and last element
    pub fn timestamps(&self) -> (u64, u64) {
        (self.min_ts, self.max_ts)
    }

    /// Address of the previous leaf of this series
    pub fn prev_addr(&self) -> LogicAddr {
        self.prev
    }

    /// Read elements into the destination vectors.
    ///
    /// `size_override` admits reading the first N pairs of an open
    /// (uncommitted) leaf during a mid-stream scan; zero disables the
    /// override and reads everything the leaf holds.
    pub fn read_all(
        &self,
        timestamps: &mut Vec<u64>,
        values: &mut Vec<f64>,
        size_override: usize,
    ) -> Result<()> {
        let count = if size_override > 0 {
            (size_override as u32).min(self.count)
        } else {
            self.count
        };
        if count == 0 {
            return Ok(());
        }

        match &self.state {
            LeafState::Open { writer } => {
                let raw = writer.payload_snapshot();
                DataBlockReader::from_raw(&raw, count).read_all(timestamps, values)
            }
            LeafState::Stored { body: Some(body) } => {
                DataBlockReader::from_framed(body, count)?.read_all(timestamps, values)
            }
            LeafState::Stored { body: None } => Err(Error::BadArg(
                "leaf was loaded header-only; body is unavailable".into(),
            )),
        }
    }

    /// Finalise the codec, write the page, and hand it to the block store.
    ///
    /// Returns the new address and the child reference the parent level
    /// stores for this leaf. The leaf must not be empty.
    pub fn commit(self, store: &dyn BlockStore) -> Result<(LogicAddr, ChildRef)> {
        let writer = match self.state {
            LeafState::Open { writer } => writer,
            LeafState::Stored { .. } => {
                return Err(Error::BadArg("cannot commit a stored leaf".into()))
            }
        };
        if self.count == 0 {
            return Err(Error::BadArg("cannot commit an empty leaf".into()));
        }

        let block = writer.finish();
        let header = PageHeader {
            level: 0,
            fanout: FANOUT as u8,
            flags: 0,
            series_id: self.series_id,
            count: block.count,
            min_ts: block.min_ts,
            max_ts: block.max_ts,
            min_value: block.min_value,
            max_value: block.max_value,
            sum: block.sum,
            prev_addr: self.prev,
        };

        let mut page = BytesMut::with_capacity(PAGE_SIZE);
        header.write_to(&mut page);
        page.put_slice(&block.payload);
        page.resize(PAGE_SIZE, 0);

        let addr = store.commit(&page)?;
        debug!(
            "Committed leaf {} for series {} ({} elements)",
            addr, self.series_id, block.count
        );

        let child = ChildRef::from_header(addr, &header, header.count);
        Ok((addr, child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::types::EMPTY_ADDR;

    #[test]
    fn test_append_and_read_pending() {
        let mut leaf = LeafNode::new(42, EMPTY_ADDR);
        for i in 0..100u64 {
            assert_eq!(leaf.append(i, i as f64), AppendOutcome::Ok);
        }
        assert_eq!(leaf.nelements(), 100);
        assert_eq!(leaf.timestamps(), (0, 99));

        let mut ts = Vec::new();
        let mut xs = Vec::new();
        leaf.read_all(&mut ts, &mut xs, 0).unwrap();
        assert_eq!(ts, (0..100).collect::<Vec<u64>>());

        // Partial read of the pending leaf
        ts.clear();
        xs.clear();
        leaf.read_all(&mut ts, &mut xs, 40).unwrap();
        assert_eq!(ts.len(), 40);
        assert_eq!(ts[39], 39);
    }

    #[test]
    fn test_element_cap() {
        let mut leaf = LeafNode::new(1, EMPTY_ADDR);
        for i in 0..LEAF_CAPACITY as u64 {
            assert_eq!(leaf.append(i, 0.0), AppendOutcome::Ok);
        }
        assert_eq!(
            leaf.append(LEAF_CAPACITY as u64, 0.0),
            AppendOutcome::Overflow
        );
        assert_eq!(leaf.nelements(), LEAF_CAPACITY as u32);
    }

    #[test]
    fn test_commit_load_roundtrip() {
        let store = MemStore::new();
        let mut leaf = LeafNode::new(42, EMPTY_ADDR);
        for i in 0..500u64 {
            leaf.append(i, (i * 2) as f64);
        }

        let (addr, child) = leaf.commit(store.as_ref()).unwrap();
        assert_eq!(child.level, 0);
        assert_eq!(child.count, 500);
        assert_eq!(child.min_ts, 0);
        assert_eq!(child.max_ts, 499);
        assert_eq!(child.sum, (0..500).map(|i| (i * 2) as f64).sum::<f64>());

        let loaded = LeafNode::load(store.as_ref(), addr, 42, LoadMode::Full).unwrap();
        assert_eq!(loaded.nelements(), 500);
        assert_eq!(loaded.prev_addr(), EMPTY_ADDR);

        let mut ts = Vec::new();
        let mut xs = Vec::new();
        loaded.read_all(&mut ts, &mut xs, 0).unwrap();
        assert_eq!(ts.len(), 500);
        assert_eq!(xs[499], 998.0);
    }

    #[test]
    fn test_header_only_load() {
        let store = MemStore::new();
        let mut leaf = LeafNode::new(7, EMPTY_ADDR);
        leaf.append(10, 1.0);
        leaf.append(20, 2.0);
        let (addr, _) = leaf.commit(store.as_ref()).unwrap();

        let loaded = LeafNode::load(store.as_ref(), addr, 7, LoadMode::HeaderOnly).unwrap();
        assert_eq!(loaded.nelements(), 2);
        assert_eq!(loaded.timestamps(), (10, 20));

        let mut ts = Vec::new();
        let mut xs = Vec::new();
        assert!(loaded.read_all(&mut ts, &mut xs, 0).is_err());
    }

    #[test]
    fn test_wrong_series_rejected() {
        let store = MemStore::new();
        let mut leaf = LeafNode::new(7, EMPTY_ADDR);
        leaf.append(1, 1.0);
        let (addr, _) = leaf.commit(store.as_ref()).unwrap();

        assert!(LeafNode::load(store.as_ref(), addr, 8, LoadMode::Full).is_err());
    }

    #[test]
    fn test_empty_commit_rejected() {
        let store = MemStore::new();
        let leaf = LeafNode::new(7, EMPTY_ADDR);
        assert!(leaf.commit(store.as_ref()).is_err());
    }

    #[test]
    fn test_back_link_carried() {
        let store = MemStore::new();
        let mut first = LeafNode::new(9, EMPTY_ADDR);
        first.append(1, 1.0);
        let (a0, _) = first.commit(store.as_ref()).unwrap();

        let mut second = LeafNode::new(9, a0);
        second.append(2, 2.0);
        let (a1, _) = second.commit(store.as_ref()).unwrap();

        let loaded = LeafNode::load(store.as_ref(), a1, 9, LoadMode::HeaderOnly).unwrap();
        assert_eq!(loaded.prev_addr(), a0);
    }
}
