//! Integration tests for the bit-level output stream.
//!
//! These tests check that whatever sequence of bit, byte and multi-bit writes
//! is applied, reading the stream back yields exactly the bits written, in
//! order, no matter how the writes straddle byte boundaries.

use proptest::prelude::*;
use tessera::{BitReader, BitStream};

#[derive(Debug, Clone)]
enum Write {
    Bit(bool),
    Byte(u8),
    Bits(u64, u32),
}

fn write_strategy() -> impl Strategy<Value = Write> {
    prop_oneof![
        any::<bool>().prop_map(Write::Bit),
        any::<u8>().prop_map(Write::Byte),
        (any::<u64>(), 0u32..=64).prop_map(|(v, n)| Write::Bits(v, n)),
    ]
}

/// Applies `writes` to `stream` and returns the bits they should produce.
fn apply(stream: &mut BitStream, writes: &[Write]) -> Vec<bool> {
    let mut expected = Vec::new();
    for write in writes {
        match *write {
            Write::Bit(bit) => {
                stream.write_bit(bit);
                expected.push(bit);
            }
            Write::Byte(byte) => {
                stream.write_byte(byte);
                expected.extend((0..8).rev().map(|i| (byte >> i) & 1 == 1));
            }
            Write::Bits(v, n) => {
                stream.write_bits(v, n);
                expected.extend((0..n).rev().map(|i| (v >> i) & 1 == 1));
            }
        }
    }
    expected
}

fn read_all(stream: &BitStream) -> Vec<bool> {
    let (bytes, pos) = stream.raw_bytes();
    let mut reader = BitReader::new(bytes, pos);
    std::iter::from_fn(|| reader.read_bit()).collect()
}

proptest! {
    #[test]
    fn prop_written_bits_read_back(writes in proptest::collection::vec(write_strategy(), 0..48)) {
        let mut stream = BitStream::new();
        let expected = apply(&mut stream, &writes);

        prop_assert_eq!(stream.bit_len(), expected.len());
        prop_assert_eq!(read_all(&stream), expected);
    }

    #[test]
    fn prop_oversized_width_is_clamped(v in any::<u64>(), n in 65u32..=512, prefix in 0u32..8) {
        let mut clamped = BitStream::new();
        let mut exact = BitStream::new();
        clamped.write_bits(0, prefix);
        exact.write_bits(0, prefix);

        clamped.write_bits(v, n);
        exact.write_bits(v, 64);
        prop_assert_eq!(clamped, exact);
    }

    #[test]
    fn prop_write_byte_matches_eight_bits(prefix in 0u32..8, byte in any::<u8>()) {
        let mut by_byte = BitStream::new();
        let mut by_bit = BitStream::new();
        by_byte.write_bits(u64::MAX, prefix);
        by_bit.write_bits(u64::MAX, prefix);

        by_byte.write_byte(byte);
        for i in (0..8).rev() {
            by_bit.write_bit((byte >> i) & 1 == 1);
        }
        prop_assert_eq!(read_all(&by_byte), read_all(&by_bit));
        prop_assert_eq!(by_byte.raw_bytes(), by_bit.raw_bytes());
    }

    #[test]
    fn prop_clones_are_independent(
        shared in proptest::collection::vec(write_strategy(), 1..16),
        left in proptest::collection::vec(write_strategy(), 1..16),
        right in proptest::collection::vec(write_strategy(), 1..16),
    ) {
        let mut original = BitStream::new();
        let committed = apply(&mut original, &shared);
        let mut copy = original.clone();

        let left_bits = apply(&mut original, &left);
        let right_bits = apply(&mut copy, &right);

        let original_bits = read_all(&original);
        let copy_bits = read_all(&copy);
        prop_assert_eq!(&original_bits[..committed.len()], &committed[..]);
        prop_assert_eq!(&copy_bits[..committed.len()], &committed[..]);
        prop_assert_eq!(&original_bits[committed.len()..], &left_bits[..]);
        prop_assert_eq!(&copy_bits[committed.len()..], &right_bits[..]);
    }
}

#[test]
fn test_zero_width_write_is_noop() {
    let mut stream = BitStream::new();
    stream.write_bits(0b101, 3);
    let before = stream.clone();

    stream.write_bits(u64::MAX, 0);
    assert_eq!(stream, before);
    assert_eq!(stream.raw_bytes(), (&[0b1010_0000][..], 3));
}

#[test]
fn test_reset_then_write_appends() {
    let mut stream = BitStream::new();
    stream.reset(vec![0xab, 0xcd]);
    assert_eq!(stream.raw_bytes(), (&[0xab, 0xcd][..], 8));

    stream.write_bit(true);
    assert_eq!(stream.raw_bytes(), (&[0xab, 0xcd, 0x80][..], 1));

    stream.reset(Vec::new());
    assert!(stream.is_empty());
    assert_eq!(stream.raw_bytes(), (&[][..], 0));
}

#[test]
fn test_write_byte_across_boundary() {
    let mut stream = BitStream::new();
    stream.write_bits(0b11, 2);
    stream.write_byte(0b1010_1010);

    assert_eq!(stream.raw_bytes(), (&[0b1110_1010, 0b1000_0000][..], 2));
    assert_eq!(stream.len(), 2);
}

#[test]
fn test_write_bytes_matches_per_byte_writes() {
    let mut bulk = BitStream::new();
    let mut single = BitStream::new();
    bulk.write_bit(true);
    single.write_bit(true);

    bulk.write_bytes(&[0x12, 0x34, 0x56]);
    for byte in [0x12, 0x34, 0x56] {
        single.write_byte(byte);
    }
    assert_eq!(bulk, single);
}

#[test]
fn test_into_parts_reuses_buffer() {
    let buffer = Vec::with_capacity(64);
    let mut stream = BitStream::from_buffer(buffer);
    stream.write_bits(0xffff_ffff, 32);

    let (bytes, pos) = stream.into_parts();
    assert_eq!(bytes, vec![0xff; 4]);
    assert_eq!(pos, 8);
    assert!(bytes.capacity() >= 64);
}
