//! Error types for the tessera write path.

use std::time::Duration;

use thiserror::Error;

/// The main error type for all tessera operations.
///
/// Each variant wraps the error enum of one concern. Only configuration and
/// write rejections are ever returned to an ingesting caller; drain failures
/// are recorded on the block and reported by the drain cycle instead.
#[derive(Error, Debug)]
pub enum TesseraError {
    /// Invalid configuration, detected before any ingest happens.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A point was rejected by the buffer window.
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// A drain attempt failed.
    #[error("drain error: {0}")]
    Drain(#[from] DrainError),

    /// A block retriever failed to produce a sealed block.
    #[error("retrieve error: {0}")]
    Retrieve(#[from] RetrieveError),
}

/// Errors raised while building or loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A duration that must be positive was zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration {
        /// Name of the offending option.
        field: &'static str,
    },

    /// A buffer tolerance does not fit inside one block.
    #[error("{field} ({tolerance:?}) must be less than block_size ({block_size:?})")]
    ToleranceExceedsBlock {
        /// Name of the offending option.
        field: &'static str,
        /// The configured tolerance.
        tolerance: Duration,
        /// The configured block size.
        block_size: Duration,
    },

    /// Retention shorter than a single block.
    #[error("retention_period ({retention:?}) must be at least block_size ({block_size:?})")]
    RetentionShorterThanBlock {
        /// The configured retention period.
        retention: Duration,
        /// The configured block size.
        block_size: Duration,
    },

    /// A duration is too large to be represented in nanoseconds.
    #[error("{field} ({value:?}) does not fit in u64 nanoseconds")]
    DurationOverflow {
        /// Name of the offending option.
        field: &'static str,
        /// The configured value.
        value: Duration,
    },

    /// `max_flush_retries` must allow at least one attempt.
    #[error("max_flush_retries must be at least 1")]
    NoFlushAttempts,

    /// An allocation size hint was zero.
    #[error("{field} must be greater than zero")]
    ZeroAllocSize {
        /// Name of the offending option.
        field: &'static str,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`crate::OptionsConfig`].
    #[error("failed to parse config: {source}")]
    Parse {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned synchronously by the ingest path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// The timestamp is older than `now - buffer_past`.
    #[error("timestamp {timestamp} is before the earliest accepted time {earliest}")]
    TooFarInPast {
        /// The rejected timestamp.
        timestamp: u64,
        /// The earliest timestamp accepted at the time of the write.
        earliest: u64,
    },

    /// The timestamp is newer than `now + buffer_future`.
    #[error("timestamp {timestamp} is after the latest accepted time {latest}")]
    TooFarInFuture {
        /// The rejected timestamp.
        timestamp: u64,
        /// The latest timestamp accepted at the time of the write.
        latest: u64,
    },
}

/// Errors from a single drain attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DrainError {
    /// The compressor rejected or failed to encode the points.
    #[error("compressor failed for block {block_start}: {reason}")]
    Compressor {
        /// Start of the block being drained.
        block_start: u64,
        /// Description supplied by the compressor.
        reason: String,
    },

    /// A pooled buffer could not be checked out.
    #[error("buffer pool exhausted: {reason}")]
    Pool {
        /// Description supplied by the pool.
        reason: String,
    },

    /// The drain was interrupted by shutdown before it completed.
    #[error("drain of block {block_start} cancelled")]
    Cancelled {
        /// Start of the block being drained.
        block_start: u64,
    },
}

/// Errors raised by a [`crate::lifecycle::BlockRetriever`].
#[derive(Error, Debug)]
pub enum RetrieveError {
    /// The retriever could not load the block.
    #[error("failed to retrieve block {block_start} for series '{series}': {reason}")]
    Failed {
        /// The series the block belongs to.
        series: String,
        /// Start of the requested block.
        block_start: u64,
        /// Description of the failure.
        reason: String,
    },
}

/// Type alias for `Result<T, TesseraError>`.
pub type Result<T> = std::result::Result<T, TesseraError>;
