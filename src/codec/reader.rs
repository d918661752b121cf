//! Gorilla decoder for leaf bodies

use super::bitstream::BitReader;
use super::writer::FRAME_SIZE;
use crate::{Error, Result};
use bytes::Buf;

/// Gorilla decoder over a framed or raw compressed stream
#[derive(Debug)]
pub struct DataBlockReader<'a> {
    reader: BitReader<'a>,
    count: u32,
    decoded: u32,

    // Timestamp state
    prev_timestamp: u64,
    prev_timestamp_delta: i64,

    // Value state
    prev_value_bits: u64,
    prev_leading_zeros: u32,
    prev_trailing_zeros: u32,
}

impl<'a> DataBlockReader<'a> {
    /// Open a framed block body (length + CRC32 prefix), verifying the
    /// checksum before any decoding
    pub fn from_framed(body: &'a [u8], count: u32) -> Result<Self> {
        if body.len() < FRAME_SIZE {
            return Err(Error::BadData("block body shorter than frame".into()));
        }
        let mut cursor = std::io::Cursor::new(body);
        let len = cursor.get_u32_le() as usize;
        let expected = cursor.get_u32_le();

        if FRAME_SIZE + len > body.len() {
            return Err(Error::BadData(format!(
                "framed payload length {} exceeds body size {}",
                len,
                body.len()
            )));
        }
        let payload = &body[FRAME_SIZE..FRAME_SIZE + len];
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        Ok(Self::from_raw(payload, count))
    }

    /// Open a raw (unframed) stream, as snapshotted from a pending writer
    pub fn from_raw(data: &'a [u8], count: u32) -> Self {
        Self {
            reader: BitReader::new(data),
            count,
            decoded: 0,
            prev_timestamp: 0,
            prev_timestamp_delta: 0,
            prev_value_bits: 0,
            prev_leading_zeros: 0,
            prev_trailing_zeros: 0,
        }
    }

    /// Decode every remaining pair into the destination vectors
    pub fn read_all(mut self, timestamps: &mut Vec<u64>, values: &mut Vec<f64>) -> Result<()> {
        timestamps.reserve(self.count as usize);
        values.reserve(self.count as usize);
        while let Some((ts, val)) = self.decode_next()? {
            timestamps.push(ts);
            values.push(val);
        }
        Ok(())
    }

    /// Decode the next timestamp-value pair
    pub fn decode_next(&mut self) -> Result<Option<(u64, f64)>> {
        if self.decoded >= self.count {
            return Ok(None);
        }

        if self.decoded == 0 {
            return self.decode_first();
        }

        let timestamp = self.decode_timestamp()?;
        let value = self.decode_value()?;
        self.decoded += 1;

        Ok(Some((timestamp, value)))
    }

    fn eof() -> Error {
        Error::BadData("unexpected end of compressed stream".into())
    }

    fn decode_first(&mut self) -> Result<Option<(u64, f64)>> {
        let timestamp = self.reader.read_bits(64).ok_or_else(Self::eof)?;
        let value_bits = self.reader.read_bits(64).ok_or_else(Self::eof)?;

        self.prev_timestamp = timestamp;
        self.prev_value_bits = value_bits;
        self.decoded = 1;

        Ok(Some((timestamp, f64::from_bits(value_bits))))
    }

    fn decode_timestamp(&mut self) -> Result<u64> {
        let delta_of_delta = if !self.reader.read_bit().ok_or_else(Self::eof)? {
            // '0' - same delta
            0
        } else if !self.reader.read_bit().ok_or_else(Self::eof)? {
            // '10' - 7 bits
            let v = self.reader.read_bits(7).ok_or_else(Self::eof)?;
            v as i64 - 63
        } else if !self.reader.read_bit().ok_or_else(Self::eof)? {
            // '110' - 9 bits
            let v = self.reader.read_bits(9).ok_or_else(Self::eof)?;
            v as i64 - 255
        } else if !self.reader.read_bit().ok_or_else(Self::eof)? {
            // '1110' - 12 bits
            let v = self.reader.read_bits(12).ok_or_else(Self::eof)?;
            v as i64 - 2047
        } else {
            // '1111' - full 64 bits
            self.reader.read_bits(64).ok_or_else(Self::eof)? as i64
        };

        let delta = self.prev_timestamp_delta + delta_of_delta;
        let timestamp = self.prev_timestamp.wrapping_add(delta as u64);

        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;

        Ok(timestamp)
    }

    fn decode_value(&mut self) -> Result<f64> {
        if !self.reader.read_bit().ok_or_else(Self::eof)? {
            // Same value
            return Ok(f64::from_bits(self.prev_value_bits));
        }

        let (leading_zeros, meaningful_bits) = if !self.reader.read_bit().ok_or_else(Self::eof)? {
            // Previous window
            let meaningful = 64 - self.prev_leading_zeros - self.prev_trailing_zeros;
            (self.prev_leading_zeros, meaningful)
        } else {
            // New window; 0 in the 6-bit length field means all 64 bits
            let leading = self.reader.read_bits(5).ok_or_else(Self::eof)? as u32;
            let meaningful = match self.reader.read_bits(6).ok_or_else(Self::eof)? as u32 {
                0 => 64,
                m => m,
            };

            self.prev_leading_zeros = leading;
            self.prev_trailing_zeros = 64 - leading - meaningful;

            (leading, meaningful)
        };

        let meaningful_value = self
            .reader
            .read_bits(meaningful_bits as usize)
            .ok_or_else(Self::eof)?;

        let trailing_zeros = 64 - leading_zeros - meaningful_bits;
        let xor = meaningful_value << trailing_zeros;
        let value_bits = self.prev_value_bits ^ xor;

        self.prev_value_bits = value_bits;

        Ok(f64::from_bits(value_bits))
    }
}
