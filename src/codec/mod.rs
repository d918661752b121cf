//! Gorilla compression for leaf bodies
//!
//! Implements the compression algorithm from Facebook's paper:
//! "Gorilla: A Fast, Scalable, In-Memory Time Series Database",
//! adapted to a fixed byte budget: the writer stages each (timestamp, value)
//! pair and rolls the bit stream back when the pair does not fit, signalling
//! overflow to the caller instead of growing the buffer.

mod bitstream;
mod reader;
mod writer;

pub use bitstream::{BitReader, BitWriter};
pub use reader::DataBlockReader;
pub use writer::DataBlockWriter;

/// Framed, compressed run of (timestamp, value) pairs plus the aggregates
/// the writer tracked while encoding.
#[derive(Debug, Clone)]
pub struct DataBlock {
    /// CRC-framed compressed payload
    pub payload: Vec<u8>,
    /// Number of encoded pairs
    pub count: u32,
    /// Smallest timestamp (first element)
    pub min_ts: u64,
    /// Largest timestamp (last element)
    pub max_ts: u64,
    /// Smallest value
    pub min_value: f64,
    /// Largest value
    pub max_value: f64,
    /// Arithmetic sum of values
    pub sum: f64,
}
