//! # tessera
//!
//! In-memory write path of a time-series storage engine.
//!
//! tessera accepts timestamped values per series, keeps them in a bounded
//! sliding buffer split into fixed-size blocks, and periodically compresses
//! each block through a bit-packed output stream into an immutable sealed
//! block. Sealed blocks stay in memory until their retention period has
//! passed.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Bit-granular output stream with no wasted bits between writes
//! - Explicit acceptance window: points too far in the past or future are rejected
//! - Drains never block ingest: compression runs on a snapshot, outside any lock
//! - Failed drains keep every point, in order, and retry on the next cycle
//! - Pluggable compressor, clock, byte pool, block retriever and sink
//!
//! ## Quick Start
//!
//! ```rust
//! use tessera::{BlockLifecycleManager, ManualClock, Options, RawCompressor, SeriesId};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let t0 = 1_640_995_200_000_000_000; // aligned to a 2h block
//! let clock = ManualClock::new(t0);
//! let manager = BlockLifecycleManager::new(Options::builder().clock(clock).build()?);
//!
//! let cpu = SeriesId::new("cpu.usage");
//! manager.append(&cpu, t0, 85.5)?;
//! manager.append(&cpu, t0 + 1_000_000_000, 86.0)?;
//!
//! // Seal everything buffered so far.
//! manager.run_drain_cycle();
//!
//! for block in manager.fetch_sealed(&cpu, t0)? {
//!     let points = RawCompressor::decode(block.bytes(), block.pos()).unwrap_or_default();
//!     println!("block {} holds {} point(s)", block.start(), points.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`BlockLifecycleManager`] — Owns all series; ingest, drain, eviction, background thread
//! - [`Options`] — Validated configuration built by [`OptionsBuilder`]
//! - [`BufferWindow`] — Acceptance, block alignment and retention policy
//! - [`BitStream`] — Bit-packed output stream used by compressors
//! - [`SealedBlock`] — Immutable compressed segment of one block
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`bitstream`] — Bit-level output stream and reader
//! - [`block`] — Datapoints, series ids, block states and sealed blocks
//! - [`clock`] — Time sources
//! - [`compress`] — Compressor contract and the raw reference encoding
//! - [`lifecycle`] — Block lifecycle manager
//! - [`options`] — Options, builder and configuration file format
//! - [`pool`] — Byte-buffer pooling
//! - [`window`] — Buffer window policy
//! - [`error`] — Error types

pub mod bitstream;
pub mod block;
pub mod clock;
pub mod compress;
pub mod error;
pub mod lifecycle;
pub mod options;
pub mod pool;
pub mod window;

// Re-export primary API types at crate root for convenience.
pub use bitstream::{BitReader, BitStream};
pub use block::{BlockState, Datapoint, SealedBlock, SeriesId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compress::{Compressor, CompressorFactory, RawCompressor, RawCompressorFactory};
pub use error::{ConfigError, DrainError, Result, RetrieveError, TesseraError, WriteError};
pub use lifecycle::{
    BackgroundHandle, BlockLifecycleManager, BlockRetriever, CancellationToken, DrainFailure,
    DrainReport, EvictionReport, SealedBlockSink,
};
pub use options::{Options, OptionsBuilder, OptionsConfig};
pub use pool::{BytesPool, HeapPool, PooledBuffer, SimpleBytesPool};
pub use window::BufferWindow;
