//! Gorilla encoder with fixed-budget capacity signalling

use super::bitstream::BitWriter;
use super::DataBlock;
use crate::types::AppendOutcome;
use bytes::BufMut;

/// Size of the frame prepended to the compressed payload (length + CRC32)
pub const FRAME_SIZE: usize = 8;

/// Gorilla encoder writing into a fixed byte budget
///
/// Every append is staged: if the encoded pair would push the stream past
/// the budget (or the element cap), the bit stream and the delta state are
/// rolled back and `Overflow` is returned with nothing written. The caller
/// re-appends the same pair to a fresh writer after rotating the leaf.
pub struct DataBlockWriter {
    writer: BitWriter,
    byte_budget: usize,
    element_cap: usize,
    count: u32,

    // Timestamp state
    first_timestamp: u64,
    prev_timestamp: u64,
    prev_timestamp_delta: i64,

    // Value state
    prev_value_bits: u64,
    prev_leading_zeros: u32,
    prev_trailing_zeros: u32,

    // Aggregates
    min_value: f64,
    max_value: f64,
    sum: f64,
}

impl DataBlockWriter {
    /// Create a writer whose framed output fits in `byte_budget` bytes and
    /// holds at most `element_cap` pairs
    pub fn new(byte_budget: usize, element_cap: usize) -> Self {
        Self {
            writer: BitWriter::with_capacity(byte_budget.saturating_sub(FRAME_SIZE)),
            byte_budget: byte_budget.saturating_sub(FRAME_SIZE),
            element_cap,
            count: 0,
            first_timestamp: 0,
            prev_timestamp: 0,
            prev_timestamp_delta: 0,
            prev_value_bits: 0,
            prev_leading_zeros: 0,
            prev_trailing_zeros: 0,
            min_value: f64::INFINITY,
            max_value: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }

    /// Encode a timestamp-value pair, or signal that the block is full
    pub fn append(&mut self, timestamp: u64, value: f64) -> AppendOutcome {
        if self.count as usize >= self.element_cap {
            return AppendOutcome::Overflow;
        }

        let pos = self.writer.position();
        let saved = (
            self.prev_timestamp,
            self.prev_timestamp_delta,
            self.prev_value_bits,
            self.prev_leading_zeros,
            self.prev_trailing_zeros,
        );

        if self.count == 0 {
            self.encode_first(timestamp, value);
        } else {
            self.encode_timestamp(timestamp);
            self.encode_value(value);
        }

        if self.writer.len() > self.byte_budget {
            self.writer.rollback(pos);
            (
                self.prev_timestamp,
                self.prev_timestamp_delta,
                self.prev_value_bits,
                self.prev_leading_zeros,
                self.prev_trailing_zeros,
            ) = saved;
            return AppendOutcome::Overflow;
        }

        self.count += 1;
        self.min_value = self.min_value.min(value);
        self.max_value = self.max_value.max(value);
        self.sum += value;
        AppendOutcome::Ok
    }

    /// Number of pairs absorbed so far
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Check if nothing was absorbed yet
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Timestamps of the first and last absorbed pair
    pub fn timestamps(&self) -> (u64, u64) {
        (self.first_timestamp, self.prev_timestamp)
    }

    /// Copy of the raw (unframed) bit stream written so far.
    ///
    /// Trailing bits of a partially-filled byte are included; a reader
    /// bounded by the element count never looks past them. Used to scan the
    /// pending leaf before commit.
    pub fn payload_snapshot(&self) -> Vec<u8> {
        self.writer.snapshot()
    }

    /// Finish encoding and return the framed block with its aggregates
    pub fn finish(self) -> DataBlock {
        let (min_ts, max_ts) = (self.first_timestamp, self.prev_timestamp);
        let bits = self.writer.finish();
        let checksum = crc32fast::hash(&bits);

        let mut payload = Vec::with_capacity(FRAME_SIZE + bits.len());
        payload.put_u32_le(bits.len() as u32);
        payload.put_u32_le(checksum);
        payload.extend_from_slice(&bits);

        DataBlock {
            payload,
            count: self.count,
            min_ts,
            max_ts,
            min_value: self.min_value,
            max_value: self.max_value,
            sum: self.sum,
        }
    }

    fn encode_first(&mut self, timestamp: u64, value: f64) {
        self.first_timestamp = timestamp;
        self.prev_timestamp = timestamp;

        self.writer.write_bits(timestamp, 64);

        let value_bits = value.to_bits();
        self.writer.write_bits(value_bits, 64);
        self.prev_value_bits = value_bits;
    }

    fn encode_timestamp(&mut self, timestamp: u64) {
        let delta = timestamp.wrapping_sub(self.prev_timestamp) as i64;
        let delta_of_delta = delta - self.prev_timestamp_delta;

        // Most consecutive timestamps have the same delta, so the
        // delta-of-delta is usually 0 and costs a single bit
        if delta_of_delta == 0 {
            self.writer.write_bit(false);
        } else if (-63..=64).contains(&delta_of_delta) {
            // '10' + 7 bits
            self.writer.write_bits(0b10, 2);
            self.writer.write_bits((delta_of_delta + 63) as u64, 7);
        } else if (-255..=256).contains(&delta_of_delta) {
            // '110' + 9 bits
            self.writer.write_bits(0b110, 3);
            self.writer.write_bits((delta_of_delta + 255) as u64, 9);
        } else if (-2047..=2048).contains(&delta_of_delta) {
            // '1110' + 12 bits
            self.writer.write_bits(0b1110, 4);
            self.writer.write_bits((delta_of_delta + 2047) as u64, 12);
        } else {
            // '1111' + full 64 bits
            self.writer.write_bits(0b1111, 4);
            self.writer.write_bits(delta_of_delta as u64, 64);
        }

        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;
    }

    fn encode_value(&mut self, value: f64) {
        let value_bits = value.to_bits();
        let xor = value_bits ^ self.prev_value_bits;

        if xor == 0 {
            self.writer.write_bit(false);
        } else {
            self.writer.write_bit(true);

            // The window header stores leading zeros in 5 bits, so clamp
            // before any window arithmetic
            let leading_zeros = xor.leading_zeros().min(31);
            let trailing_zeros = xor.trailing_zeros();

            if leading_zeros >= self.prev_leading_zeros
                && trailing_zeros >= self.prev_trailing_zeros
            {
                // Meaningful bits fit the previous window
                self.writer.write_bit(false);
                let meaningful_bits = 64 - self.prev_leading_zeros - self.prev_trailing_zeros;
                let shifted = xor >> self.prev_trailing_zeros;
                self.writer.write_bits(shifted, meaningful_bits as usize);
            } else {
                // New window
                self.writer.write_bit(true);
                self.writer.write_bits(leading_zeros as u64, 5);

                // 64 meaningful bits wrap to 0 in the 6-bit field; the
                // decoder maps 0 back (a zero-length window cannot occur
                // since xor != 0)
                let meaningful_bits = 64 - leading_zeros - trailing_zeros;
                self.writer.write_bits((meaningful_bits & 63) as u64, 6);

                let shifted = xor >> trailing_zeros;
                self.writer.write_bits(shifted, meaningful_bits as usize);

                self.prev_leading_zeros = leading_zeros;
                self.prev_trailing_zeros = trailing_zeros;
            }
        }

        self.prev_value_bits = value_bits;
    }
}
