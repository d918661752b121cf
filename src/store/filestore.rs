//! File-backed block store

use super::BlockStore;
use crate::config::PAGE_SIZE;
use crate::types::LogicAddr;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// File-backed block store
///
/// Pages are appended to a single file; the logical address is the page
/// index. Reopening recovers the next address from the file length.
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<FileStoreInner>,
}

struct FileStoreInner {
    file: File,
    next_addr: LogicAddr,
}

impl FileStore {
    /// Create or open a store file
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(Error::BadData(format!(
                "store file {} is not page aligned: {} bytes",
                path.display(),
                len
            )));
        }
        let next_addr = len / PAGE_SIZE as u64;

        info!("Opened file store {:?} with {} pages", path, next_addr);

        Ok(Arc::new(Self {
            path,
            inner: Mutex::new(FileStoreInner { file, next_addr }),
        }))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of committed pages
    pub fn len(&self) -> usize {
        self.inner.lock().next_addr as usize
    }

    /// Check if no page was committed yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush buffered pages to durable storage
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_data()?;
        Ok(())
    }
}

impl BlockStore for FileStore {
    fn commit(&self, page: &[u8]) -> Result<LogicAddr> {
        if page.len() != PAGE_SIZE {
            return Err(Error::BadArg(format!(
                "page must be {} bytes, got {}",
                PAGE_SIZE,
                page.len()
            )));
        }
        let mut inner = self.inner.lock();
        let addr = inner.next_addr;
        inner
            .file
            .seek(SeekFrom::Start(addr * PAGE_SIZE as u64))?;
        inner.file.write_all(page)?;
        inner.next_addr += 1;
        Ok(addr)
    }

    fn read(&self, addr: LogicAddr) -> Result<Bytes> {
        let mut inner = self.inner.lock();
        if addr >= inner.next_addr {
            return Err(Error::UnknownAddr(addr));
        }
        let mut page = vec![0u8; PAGE_SIZE];
        inner
            .file
            .seek(SeekFrom::Start(addr * PAGE_SIZE as u64))?;
        inner.file.read_exact(&mut page)?;
        Ok(Bytes::from(page))
    }
}
