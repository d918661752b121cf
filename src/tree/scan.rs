//! Bidirectional range scan over the extent tree

use super::leaf::{LeafNode, LoadMode};
use super::page::ChildRef;
use super::superblock::SuperBlock;
use crate::store::BlockStore;
use crate::types::{ScanStatus, SeriesId};
use crate::{Error, Result};
use std::sync::Arc;

/// One per-extent slice of the snapshot, ordered oldest-first by the
/// extents list when the iterator is built
pub(crate) enum Segment {
    /// Committed subtrees staged in an open superblock
    Children(Vec<ChildRef>),
    /// Decoded contents of the pending (uncommitted) leaf
    Pending { ts: Vec<u64>, xs: Vec<f64> },
}

/// A descent position inside one superblock
struct Frame {
    children: Vec<ChildRef>,
    /// Children consumed so far (direction-aware)
    taken: usize,
}

impl Frame {
    fn next(&mut self, forward: bool) -> Option<ChildRef> {
        if self.taken >= self.children.len() {
            return None;
        }
        let idx = if forward {
            self.taken
        } else {
            self.children.len() - 1 - self.taken
        };
        self.taken += 1;
        Some(self.children[idx])
    }
}

/// Bidirectional range-restricted cursor.
///
/// Holds a snapshot of the extents (child references plus decoded pending
/// leaf) and a shared store handle, so it stays valid while the owning
/// list keeps appending. Descends through superblocks whose ranges
/// intersect the query interval and streams one leaf at a time.
pub struct ScanIterator {
    store: Arc<dyn BlockStore>,
    series_id: SeriesId,
    forward: bool,
    /// Inclusive filter bounds, normalised from (begin, end)
    lo: u64,
    hi: u64,
    /// Oldest-first extent snapshot; consumed front-first when scanning
    /// forward, back-first when scanning backward
    segments: Vec<Segment>,
    consumed_segments: usize,
    frames: Vec<Frame>,
    buf_ts: Vec<u64>,
    buf_xs: Vec<f64>,
    buf_pos: usize,
    empty_interval: bool,
}

impl ScanIterator {
    pub(crate) fn new(
        store: Arc<dyn BlockStore>,
        series_id: SeriesId,
        begin: u64,
        end: u64,
        segments: Vec<Segment>,
    ) -> Self {
        let forward = begin < end;
        // Forward [begin, end) and backward (end, begin] both normalise to
        // an inclusive [lo, hi] filter
        let (lo, hi) = if forward {
            (begin, end - 1)
        } else if begin > end {
            (end + 1, begin)
        } else {
            (begin, end)
        };

        Self {
            store,
            series_id,
            forward,
            lo,
            hi,
            segments,
            consumed_segments: 0,
            frames: Vec::new(),
            buf_ts: Vec::new(),
            buf_xs: Vec::new(),
            buf_pos: 0,
            empty_interval: begin == end,
        }
    }

    /// Fill the output slices with up to `min(ts_out.len(), v_out.len())`
    /// pairs.
    ///
    /// Returns `Ok` when the buffer was filled and more data may follow,
    /// `NoData` with the residual count when the iterator is exhausted.
    pub fn read(&mut self, ts_out: &mut [u64], v_out: &mut [f64]) -> Result<(ScanStatus, usize)> {
        let max = ts_out.len().min(v_out.len());
        if max == 0 {
            return Err(Error::BadArg("empty output buffers".into()));
        }
        if self.empty_interval {
            return Ok((ScanStatus::NoData, 0));
        }

        let mut filled = 0;
        while filled < max {
            if self.buf_pos >= self.buf_ts.len() {
                if !self.refill()? {
                    break;
                }
            }
            let available = self.buf_ts.len() - self.buf_pos;
            let take = available.min(max - filled);
            ts_out[filled..filled + take]
                .copy_from_slice(&self.buf_ts[self.buf_pos..self.buf_pos + take]);
            v_out[filled..filled + take]
                .copy_from_slice(&self.buf_xs[self.buf_pos..self.buf_pos + take]);
            self.buf_pos += take;
            filled += take;
        }

        let status = if filled == max {
            ScanStatus::Ok
        } else {
            ScanStatus::NoData
        };
        Ok((status, filled))
    }

    /// Advance the descent until a non-empty leaf lands in the staging
    /// buffer; false when every segment is exhausted
    fn refill(&mut self) -> Result<bool> {
        self.buf_ts.clear();
        self.buf_xs.clear();
        self.buf_pos = 0;

        loop {
            // Descend through the open frames first
            while let Some(frame) = self.frames.last_mut() {
                let child = match frame.next(self.forward) {
                    Some(child) => child,
                    None => {
                        self.frames.pop();
                        continue;
                    }
                };
                if !child.intersects(self.lo, self.hi) {
                    continue;
                }
                if child.level == 0 {
                    self.load_leaf(&child)?;
                    if !self.buf_ts.is_empty() {
                        return Ok(true);
                    }
                } else {
                    let node = SuperBlock::load(self.store.as_ref(), child.addr, self.series_id)?;
                    if node.level() != child.level {
                        return Err(Error::BadData(format!(
                            "node at {} has level {}, reference says {}",
                            child.addr,
                            node.level(),
                            child.level
                        )));
                    }
                    self.frames.push(Frame {
                        children: node.children().to_vec(),
                        taken: 0,
                    });
                }
            }

            // Frames exhausted: open the next extent segment
            if self.consumed_segments >= self.segments.len() {
                return Ok(false);
            }
            let idx = if self.forward {
                self.consumed_segments
            } else {
                self.segments.len() - 1 - self.consumed_segments
            };
            self.consumed_segments += 1;

            let segment =
                std::mem::replace(&mut self.segments[idx], Segment::Children(Vec::new()));
            match segment {
                Segment::Children(children) => {
                    self.frames.push(Frame { children, taken: 0 });
                }
                Segment::Pending { ts, xs } => {
                    self.stage_filtered(&ts, &xs);
                    if !self.buf_ts.is_empty() {
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Decode one committed leaf and stage its in-range elements
    fn load_leaf(&mut self, child: &ChildRef) -> Result<()> {
        let leaf = LeafNode::load(self.store.as_ref(), child.addr, self.series_id, LoadMode::Full)?;
        let mut ts = Vec::new();
        let mut xs = Vec::new();
        leaf.read_all(&mut ts, &mut xs, 0)?;
        self.stage_filtered(&ts, &xs);
        Ok(())
    }

    /// Filter decoded pairs into the staging buffer, reversing for
    /// backward scans
    fn stage_filtered(&mut self, ts: &[u64], xs: &[f64]) {
        for (&t, &x) in ts.iter().zip(xs.iter()) {
            if t >= self.lo && t <= self.hi {
                self.buf_ts.push(t);
                self.buf_xs.push(x);
            }
        }
        if !self.forward {
            self.buf_ts.reverse();
            self.buf_xs.reverse();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::tree::ExtentsList;

    fn build(n: u64) -> ExtentsList {
        let store = MemStore::new();
        let mut list = ExtentsList::new(42, Vec::new(), store);
        for i in 0..n {
            list.append(i, i as f64).unwrap();
        }
        list
    }

    #[test]
    fn test_forward_within_pending_leaf() {
        let list = build(100);
        let mut it = list.search(10, 20).unwrap();

        let mut ts = [0u64; 64];
        let mut xs = [0f64; 64];
        let (status, n) = it.read(&mut ts, &mut xs).unwrap();
        assert_eq!(status, ScanStatus::NoData);
        assert_eq!(n, 10);
        assert_eq!(&ts[..10], &[10, 11, 12, 13, 14, 15, 16, 17, 18, 19]);
        assert_eq!(xs[9], 19.0);
    }

    #[test]
    fn test_backward_within_pending_leaf() {
        let list = build(100);
        let mut it = list.search(20, 10).unwrap();

        let mut ts = [0u64; 64];
        let mut xs = [0f64; 64];
        let (status, n) = it.read(&mut ts, &mut xs).unwrap();
        assert_eq!(status, ScanStatus::NoData);
        assert_eq!(n, 10);
        assert_eq!(&ts[..10], &[20, 19, 18, 17, 16, 15, 14, 13, 12, 11]);
    }

    #[test]
    fn test_empty_interval() {
        let list = build(100);
        let mut it = list.search(50, 50).unwrap();

        let mut ts = [0u64; 8];
        let mut xs = [0f64; 8];
        let (status, n) = it.read(&mut ts, &mut xs).unwrap();
        assert_eq!(status, ScanStatus::NoData);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_interval_outside_data() {
        let list = build(100);
        let mut it = list.search(1000, 2000).unwrap();

        let mut ts = [0u64; 8];
        let mut xs = [0f64; 8];
        let (status, n) = it.read(&mut ts, &mut xs).unwrap();
        assert_eq!(status, ScanStatus::NoData);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_empty_output_buffer_is_bad_arg() {
        let list = build(10);
        let mut it = list.search(0, 10).unwrap();
        let mut ts = [0u64; 0];
        let mut xs = [0f64; 0];
        assert!(it.read(&mut ts, &mut xs).is_err());
    }

    #[test]
    fn test_iterator_survives_later_appends() {
        let store = MemStore::new();
        let mut list = ExtentsList::new(42, Vec::new(), store);
        for i in 0..50u64 {
            list.append(i, i as f64).unwrap();
        }

        let mut it = list.search(0, 50).unwrap();
        for i in 50..2000u64 {
            list.append(i, i as f64).unwrap();
        }

        let mut ts = vec![0u64; 64];
        let mut xs = vec![0f64; 64];
        let mut seen = 0u64;
        loop {
            let (status, n) = it.read(&mut ts, &mut xs).unwrap();
            for i in 0..n {
                assert_eq!(ts[i], seen);
                seen += 1;
            }
            if status == ScanStatus::NoData {
                break;
            }
        }
        assert_eq!(seen, 50);
    }
}
