//! In-memory block store for tests

use super::{BlockStore, CommitCallback};
use crate::config::PAGE_SIZE;
use crate::types::LogicAddr;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// In-memory block store
///
/// Addresses are indices into the page vector. An optional commit callback
/// lets tests observe the last committed address.
pub struct MemStore {
    pages: Mutex<Vec<Bytes>>,
    on_commit: Option<CommitCallback>,
}

impl MemStore {
    /// Create an empty in-memory store
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(Vec::new()),
            on_commit: None,
        })
    }

    /// Create an empty store that reports each committed address
    pub fn with_callback(cb: CommitCallback) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(Vec::new()),
            on_commit: Some(cb),
        })
    }

    /// Number of committed pages
    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    /// Check if no page was committed yet
    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }
}

impl BlockStore for MemStore {
    fn commit(&self, page: &[u8]) -> Result<LogicAddr> {
        if page.len() != PAGE_SIZE {
            return Err(Error::BadArg(format!(
                "page must be {} bytes, got {}",
                PAGE_SIZE,
                page.len()
            )));
        }
        let addr = {
            let mut pages = self.pages.lock();
            pages.push(Bytes::copy_from_slice(page));
            (pages.len() - 1) as LogicAddr
        };
        if let Some(cb) = &self.on_commit {
            cb(addr);
        }
        Ok(addr)
    }

    fn read(&self, addr: LogicAddr) -> Result<Bytes> {
        let pages = self.pages.lock();
        pages
            .get(addr as usize)
            .cloned()
            .ok_or(Error::UnknownAddr(addr))
    }
}
