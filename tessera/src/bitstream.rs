//! Bit-granular output stream used by block compressors.
//!
//! A [`BitStream`] appends bits most-significant-bit first into a growable
//! byte buffer and tracks how many bits of the last byte are in use. No bit
//! is ever wasted between writes: a byte written while a partial byte is open
//! is split across the tail of that byte and the head of a new one.
//!
//! # Layout
//!
//! ```text
//! raw:  [b0][b1]...[bN]
//!                    ^^^^^^^^
//!                    pos bits of bN are data, bits [pos, 8) are padding
//! ```
//!
//! [`BitReader`] walks the same layout back, stopping at `pos` in the final
//! byte, so the padding bits are never observed as data.
//!
//! # Example
//!
//! ```rust
//! use tessera::bitstream::{BitReader, BitStream};
//!
//! let mut stream = BitStream::new();
//! stream.write_bit(true);
//! stream.write_bits(0b1010, 4);
//! stream.write_byte(0xff);
//!
//! let (bytes, pos) = stream.raw_bytes();
//! assert_eq!(bytes, &[0b1101_0111, 0b1111_1000]);
//! assert_eq!(pos, 5);
//!
//! let mut reader = BitReader::new(bytes, pos);
//! assert_eq!(reader.read_bits(5), Some(0b11010));
//! assert_eq!(reader.read_bits(8), Some(0xff));
//! assert_eq!(reader.read_bit(), None);
//! ```

/// Number of bits in a byte, as the cursor type.
const BYTE_BITS: u8 = 8;

/// Append-only, write-only bit-packed byte buffer.
///
/// `pos` is the number of occupied bits in the last byte of the buffer:
/// `0` only for an empty stream, `1..=7` while a partial byte is open and
/// `8` when the last byte is fully committed.
///
/// The stream is single-owner. Cloning produces a deep copy, so writes to a
/// clone never touch bits committed in the original and vice versa.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitStream {
    raw: Vec<u8>,
    pos: u8,
}

impl BitStream {
    /// Creates an empty stream without allocating.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty stream with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            raw: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Creates an empty stream that writes into `buffer`, reusing its capacity.
    ///
    /// Any existing contents of `buffer` are discarded.
    pub fn from_buffer(mut buffer: Vec<u8>) -> Self {
        buffer.clear();
        Self {
            raw: buffer,
            pos: 0,
        }
    }

    /// Replaces the internal buffer with `bytes`.
    ///
    /// A non-empty buffer is treated as fully committed (`pos = 8`): the next
    /// write always starts a fresh byte and never alters the supplied bytes.
    pub fn reset(&mut self, bytes: Vec<u8>) {
        self.pos = if bytes.is_empty() { 0 } else { BYTE_BITS };
        self.raw = bytes;
    }

    /// Number of bytes in the buffer, counting a partially filled last byte.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.pos == 0
    }

    /// Number of data bits in the stream.
    pub fn bit_len(&self) -> usize {
        match self.raw.len() {
            0 => 0,
            n => (n - 1) * usize::from(BYTE_BITS) + usize::from(self.pos),
        }
    }

    /// Returns the backing bytes and the number of used bits in the last byte.
    ///
    /// Bits at or beyond `pos` in the last byte are padding, not data.
    pub fn raw_bytes(&self) -> (&[u8], u8) {
        (&self.raw, self.pos)
    }

    /// Consumes the stream, returning the backing buffer and trailing `pos`.
    pub fn into_parts(self) -> (Vec<u8>, u8) {
        (self.raw, self.pos)
    }

    /// Writes a single bit.
    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        let v = u8::from(bit) << 7;
        if !self.has_unused_bits() {
            self.grow(v, 1);
            return;
        }
        self.fill_unused(v);
        self.pos += 1;
    }

    /// Writes all eight bits of `v`, most significant first.
    #[inline]
    pub fn write_byte(&mut self, v: u8) {
        if !self.has_unused_bits() {
            self.grow(v, BYTE_BITS);
            return;
        }
        // High (8 - pos) bits close the open byte; low pos bits open the next.
        self.fill_unused(v);
        self.grow(v << (BYTE_BITS - self.pos), self.pos);
    }

    /// Writes each byte of `bytes` in order, as if by [`write_byte`](Self::write_byte).
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// Writes the lowest `num_bits` bits of `v`, most significant first.
    ///
    /// Requests for more than 64 bits are clamped to 64. Writing zero bits
    /// leaves the stream untouched.
    #[allow(clippy::cast_possible_truncation)] // top byte extracted by shift
    pub fn write_bits(&mut self, v: u64, num_bits: u32) {
        if num_bits == 0 {
            return;
        }
        let mut num_bits = num_bits.min(64);

        let mut v = v << (64 - num_bits);
        while num_bits >= 8 {
            self.write_byte((v >> 56) as u8);
            v <<= 8;
            num_bits -= 8;
        }

        while num_bits > 0 {
            self.write_bit((v >> 63) & 1 == 1);
            v <<= 1;
            num_bits -= 1;
        }
    }

    #[inline]
    fn has_unused_bits(&self) -> bool {
        self.pos > 0 && self.pos < BYTE_BITS
    }

    #[inline]
    fn grow(&mut self, v: u8, pos: u8) {
        self.raw.push(v);
        self.pos = pos;
    }

    #[inline]
    fn fill_unused(&mut self, v: u8) {
        if let Some(last) = self.raw.last_mut() {
            *last |= v >> self.pos;
        }
    }
}

/// Reads bits back from a [`BitStream`]'s raw output.
///
/// The reader yields exactly the data bits: it stops at `pos` in the final
/// byte and never returns padding.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    total_bits: usize,
    offset: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a reader over `bytes` whose last byte holds `pos` data bits.
    pub fn new(bytes: &'a [u8], pos: u8) -> Self {
        let total_bits = match bytes.len() {
            0 => 0,
            n => (n - 1) * usize::from(BYTE_BITS) + usize::from(pos.min(BYTE_BITS)),
        };
        Self {
            bytes,
            total_bits,
            offset: 0,
        }
    }

    /// Number of data bits not yet read.
    pub fn remaining_bits(&self) -> usize {
        self.total_bits - self.offset
    }

    /// Reads one bit, or `None` at the end of the data.
    pub fn read_bit(&mut self) -> Option<bool> {
        if self.offset >= self.total_bits {
            return None;
        }
        let byte = self.bytes[self.offset / 8];
        let shift = 7 - (self.offset % 8);
        self.offset += 1;
        Some((byte >> shift) & 1 == 1)
    }

    /// Reads `num_bits` bits (at most 64) as an unsigned integer.
    ///
    /// Returns `None` without consuming anything if fewer than `num_bits`
    /// bits remain or `num_bits` exceeds 64.
    pub fn read_bits(&mut self, num_bits: u32) -> Option<u64> {
        let wanted = usize::try_from(num_bits).ok()?;
        if num_bits > 64 || wanted > self.remaining_bits() {
            return None;
        }
        let mut v = 0u64;
        for _ in 0..num_bits {
            v = (v << 1) | u64::from(self.read_bit()?);
        }
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a stream whose cursor sits at `pos` after writing `pos` one-bits.
    fn stream_at(pos: u8) -> BitStream {
        let mut stream = BitStream::new();
        for _ in 0..pos {
            stream.write_bit(true);
        }
        stream
    }

    fn bits_of(stream: &BitStream) -> Vec<bool> {
        let (bytes, pos) = stream.raw_bytes();
        let mut reader = BitReader::new(bytes, pos);
        std::iter::from_fn(|| reader.read_bit()).collect()
    }

    #[test]
    fn test_new_stream_is_empty() {
        let stream = BitStream::new();
        assert!(stream.is_empty());
        assert_eq!(stream.len(), 0);
        assert_eq!(stream.raw_bytes(), (&[][..], 0));
    }

    #[test]
    fn test_write_bit_msb_first() {
        let mut stream = BitStream::new();
        stream.write_bit(true);
        assert_eq!(stream.raw_bytes(), (&[0x80][..], 1));

        stream.write_bit(false);
        stream.write_bit(true);
        assert_eq!(stream.raw_bytes(), (&[0b1010_0000][..], 3));
        assert!(!stream.is_empty());
    }

    #[test]
    fn test_write_bit_opens_new_byte_when_full() {
        let mut stream = BitStream::new();
        stream.write_byte(0x00);
        stream.write_bit(true);
        assert_eq!(stream.raw_bytes(), (&[0x00, 0x80][..], 1));
    }

    #[test]
    fn test_write_bit_at_every_pos() {
        for pos in 0u8..8 {
            let mut stream = stream_at(pos);
            stream.write_bit(false);
            let expected: Vec<bool> = (0..pos).map(|_| true).chain([false]).collect();
            assert_eq!(bits_of(&stream), expected, "pos {pos}");
            assert_eq!(stream.raw_bytes().1, pos + 1, "pos {pos}");
        }
    }

    #[test]
    fn test_write_byte_aligned() {
        let mut stream = BitStream::new();
        stream.write_byte(0xab);
        assert_eq!(stream.raw_bytes(), (&[0xab][..], 8));
    }

    #[test]
    fn test_write_byte_splits_across_boundary() {
        let mut stream = stream_at(3);
        stream.write_byte(0b1010_1100);
        // 111 + 10101 | 100 + padding
        assert_eq!(stream.raw_bytes(), (&[0b1111_0101, 0b1000_0000][..], 3));
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn test_write_byte_matches_bitwise_at_every_pos() {
        for pos in 0u8..8 {
            for value in [0x00u8, 0xff, 0xa5, 0x5a, 0x01, 0x80] {
                let mut by_byte = stream_at(pos);
                by_byte.write_byte(value);

                let mut by_bit = stream_at(pos);
                for shift in (0..8).rev() {
                    by_bit.write_bit((value >> shift) & 1 == 1);
                }

                assert_eq!(bits_of(&by_byte), bits_of(&by_bit), "pos {pos} value {value:#x}");
                let expected_pos = if pos == 0 { 8 } else { pos };
                assert_eq!(by_byte.raw_bytes().1, expected_pos);
            }
        }
    }

    #[test]
    fn test_write_bits_at_every_pos() {
        for pos in 0u8..8 {
            let mut stream = stream_at(pos);
            stream.write_bits(0b1_0110_0111_0001, 13);

            let mut expected: Vec<bool> = (0..pos).map(|_| true).collect();
            expected.extend((0..13).rev().map(|i| (0b1_0110_0111_0001u64 >> i) & 1 == 1));
            assert_eq!(bits_of(&stream), expected, "pos {pos}");
        }
    }

    #[test]
    fn test_write_bits_zero_is_noop() {
        for pos in 0u8..8 {
            let mut stream = stream_at(pos);
            let before = stream.clone();
            stream.write_bits(u64::MAX, 0);
            assert_eq!(stream, before);
        }
    }

    #[test]
    fn test_write_bits_exactly_64() {
        let mut stream = BitStream::new();
        stream.write_bits(0x0123_4567_89ab_cdef, 64);
        assert_eq!(
            stream.raw_bytes(),
            (&[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef][..], 8)
        );
    }

    #[test]
    fn test_write_bits_clamps_above_64() {
        for pos in 0u8..8 {
            let mut clamped = stream_at(pos);
            clamped.write_bits(0xdead_beef_cafe_f00d, 200);

            let mut exact = stream_at(pos);
            exact.write_bits(0xdead_beef_cafe_f00d, 64);

            assert_eq!(clamped, exact);
        }
    }

    #[test]
    fn test_write_bits_ignores_high_bits() {
        let mut stream = BitStream::new();
        stream.write_bits(0xffff_ffff_ffff_fff5, 4);
        assert_eq!(stream.raw_bytes(), (&[0b0101_0000][..], 4));
    }

    #[test]
    fn test_write_bytes_matches_individual_writes() {
        for pos in 0u8..8 {
            let payload = [0x12u8, 0x34, 0xfe, 0x00, 0x81];

            let mut bulk = stream_at(pos);
            bulk.write_bytes(&payload);

            let mut single = stream_at(pos);
            for &b in &payload {
                single.write_byte(b);
            }

            assert_eq!(bulk, single, "pos {pos}");
        }
    }

    #[test]
    fn test_reset_with_bytes_commits_last_byte() {
        let mut stream = BitStream::new();
        stream.reset(vec![0xf0]);
        assert_eq!(stream.raw_bytes(), (&[0xf0][..], 8));

        stream.write_bit(true);
        assert_eq!(stream.raw_bytes(), (&[0xf0, 0x80][..], 1));
    }

    #[test]
    fn test_reset_empty() {
        let mut stream = stream_at(5);
        stream.reset(Vec::new());
        assert!(stream.is_empty());
        assert_eq!(stream.raw_bytes().1, 0);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = stream_at(3);
        let mut copy = original.clone();

        original.write_bits(0b11111, 5);
        copy.write_bits(0b00000, 5);

        assert_eq!(original.raw_bytes(), (&[0xff][..], 8));
        assert_eq!(copy.raw_bytes(), (&[0b1110_0000][..], 8));
    }

    #[test]
    fn test_from_buffer_reuses_capacity() {
        let buffer = Vec::with_capacity(64);
        let stream = BitStream::from_buffer(buffer);
        assert!(stream.is_empty());
        let (raw, _) = stream.into_parts();
        assert!(raw.capacity() >= 64);
    }

    #[test]
    fn test_bit_len() {
        let mut stream = BitStream::new();
        assert_eq!(stream.bit_len(), 0);
        stream.write_bits(0, 11);
        assert_eq!(stream.bit_len(), 11);
        stream.write_byte(0);
        assert_eq!(stream.bit_len(), 19);
    }

    #[test]
    fn test_reader_stops_at_pos() {
        let mut reader = BitReader::new(&[0xff, 0b1100_0000], 2);
        assert_eq!(reader.remaining_bits(), 10);
        assert_eq!(reader.read_bits(10), Some(0b11_1111_1111));
        assert_eq!(reader.read_bit(), None);
    }

    #[test]
    fn test_reader_rejects_short_reads() {
        let mut reader = BitReader::new(&[0xaa], 8);
        assert_eq!(reader.read_bits(9), None);
        assert_eq!(reader.read_bits(65), None);
        assert_eq!(reader.remaining_bits(), 8);
        assert_eq!(reader.read_bits(8), Some(0xaa));
    }
}
