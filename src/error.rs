//! Error types for Necklace

use crate::types::LogicAddr;
use thiserror::Error;

/// Result type alias for Necklace operations
pub type Result<T> = std::result::Result<T, Error>;

/// Necklace error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Page failed header validation
    #[error("Bad data: {0}")]
    BadData(String),

    /// Checksum mismatch in a leaf body
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Block store has no page at this address
    #[error("Unknown address: {0}")]
    UnknownAddr(LogicAddr),

    /// Invalid argument
    #[error("Bad argument: {0}")]
    BadArg(String),
}

impl Error {
    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::BadData(_) | Error::ChecksumMismatch { .. }
        )
    }
}
