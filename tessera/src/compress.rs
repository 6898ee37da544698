//! Compressor contract and the reference raw encoding.
//!
//! A drain hands each block's buffered points to a [`Compressor`] together
//! with an empty [`BitStream`]. The compressor's algorithm is pluggable; the
//! lifecycle manager only relies on this contract:
//!
//! - points are written in the order given (insertion order),
//! - on error the stream contents are discarded, never sealed,
//! - a compressor instance is used by one drain attempt at a time.
//!
//! [`RawCompressor`] is the default implementation: every point becomes 64
//! timestamp bits followed by the 64 IEEE-754 bits of its value.

use crate::bitstream::{BitReader, BitStream};
use crate::block::Datapoint;
use crate::error::DrainError;

/// Encodes a block's points into a bit stream.
pub trait Compressor: Send {
    /// Writes `points`, in order, into `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::Compressor`] if the points cannot be encoded. The
    /// caller discards whatever was written to `stream`.
    fn compress(
        &mut self,
        block_start: u64,
        points: &[Datapoint],
        stream: &mut BitStream,
    ) -> Result<(), DrainError>;
}

/// Creates compressors for drain attempts.
///
/// Any `Fn() -> Box<dyn Compressor>` closure is a factory.
pub trait CompressorFactory: Send + Sync {
    /// Returns a fresh compressor.
    fn new_compressor(&self) -> Box<dyn Compressor>;
}

impl<F> CompressorFactory for F
where
    F: Fn() -> Box<dyn Compressor> + Send + Sync,
{
    fn new_compressor(&self) -> Box<dyn Compressor> {
        self()
    }
}

/// Bits written per point by [`RawCompressor`].
pub const RAW_POINT_BITS: usize = 128;

/// Uncompressed reference encoding: `timestamp:64 | value_bits:64` per point.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCompressor;

impl RawCompressor {
    /// Decodes points written by [`RawCompressor`] from `(bytes, pos)`.
    ///
    /// Returns `None` if the bit count is not a whole number of points.
    pub fn decode(bytes: &[u8], pos: u8) -> Option<Vec<Datapoint>> {
        let mut reader = BitReader::new(bytes, pos);
        if reader.remaining_bits() % RAW_POINT_BITS != 0 {
            return None;
        }

        let mut points = Vec::with_capacity(reader.remaining_bits() / RAW_POINT_BITS);
        while reader.remaining_bits() > 0 {
            let timestamp = reader.read_bits(64)?;
            let value = f64::from_bits(reader.read_bits(64)?);
            points.push(Datapoint { timestamp, value });
        }
        Some(points)
    }
}

impl Compressor for RawCompressor {
    fn compress(
        &mut self,
        _block_start: u64,
        points: &[Datapoint],
        stream: &mut BitStream,
    ) -> Result<(), DrainError> {
        for point in points {
            stream.write_bits(point.timestamp, 64);
            stream.write_bits(point.value.to_bits(), 64);
        }
        Ok(())
    }
}

/// Factory for [`RawCompressor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCompressorFactory;

impl CompressorFactory for RawCompressorFactory {
    fn new_compressor(&self) -> Box<dyn Compressor> {
        Box::new(RawCompressor)
    }
}
