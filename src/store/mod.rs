//! Block store - immutable page repository
//!
//! The tree never mutates a committed page: `commit` persists one page and
//! returns its logical address, `read` fetches a page by address. Two
//! backends are provided: [`MemStore`] for tests and [`FileStore`] for
//! production.

mod filestore;
mod memstore;

pub use filestore::FileStore;
pub use memstore::MemStore;

use crate::types::LogicAddr;
use crate::Result;
use bytes::Bytes;

/// Callback invoked with the address of each committed page
pub type CommitCallback = Box<dyn Fn(LogicAddr) + Send + Sync>;

/// Address-indexed repository of immutable fixed-size pages
pub trait BlockStore: Send + Sync {
    /// Persist one page and return its address.
    ///
    /// A read of the returned address always succeeds for the lifetime of
    /// the process.
    fn commit(&self, page: &[u8]) -> Result<LogicAddr>;

    /// Fetch the page previously committed at `addr`
    fn read(&self, addr: LogicAddr) -> Result<Bytes>;
}
