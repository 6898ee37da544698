//! Configuration for the write path.
//!
//! [`Options`] is immutable and always valid: the only way to get one is
//! [`OptionsBuilder::build`], which checks every constraint once, before any
//! point is ingested. Collaborators (clock, compressor factory, byte pool,
//! retriever, sink) are injected through the builder as trait objects.
//!
//! [`OptionsConfig`] is the serializable subset used for configuration files.
//! Durations are expressed as seconds (floating point) for readability:
//!
//! ```json
//! {
//!   "block_size": 7200,
//!   "buffer_past": 600,
//!   "buffer_future": 120,
//!   "buffer_drain_interval": 60,
//!   "retention_period": 172800,
//!   "max_flush_retries": 3
//! }
//! ```
//!
//! Fields missing from the file take their defaults.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::compress::{CompressorFactory, RawCompressorFactory};
use crate::error::{ConfigError, Result};
use crate::lifecycle::{BlockRetriever, SealedBlockSink};
use crate::pool::{BytesPool, HeapPool};
use crate::window::{BufferWindow, duration_nanos};

/// Default block size.
pub const DEFAULT_BLOCK_SIZE: Duration = Duration::from_secs(2 * 60 * 60);

/// Default tolerance for points ahead of now.
pub const DEFAULT_BUFFER_FUTURE: Duration = Duration::from_secs(2 * 60);

/// Default tolerance for points behind now.
pub const DEFAULT_BUFFER_PAST: Duration = Duration::from_secs(10 * 60);

/// Default interval between drain cycles.
pub const DEFAULT_BUFFER_DRAIN_INTERVAL: Duration = Duration::from_secs(60);

/// Default in-memory retention for sealed blocks.
pub const DEFAULT_RETENTION_PERIOD: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Default initial capacity, in points, of a block's buffer.
///
/// Should match the number of points expected per drain interval.
pub const DEFAULT_BUFFER_BUCKET_ALLOC_SIZE: usize = 256;

/// Default initial capacity, in bytes, of a sealed block's encoding.
///
/// Should match the encoded size expected per block.
pub const DEFAULT_DATABASE_BLOCK_ALLOC_SIZE: usize = 1024;

/// Default number of compression attempts per block per drain cycle.
pub const DEFAULT_MAX_FLUSH_RETRIES: u32 = 3;

/// Validated, immutable configuration for a
/// [`BlockLifecycleManager`](crate::lifecycle::BlockLifecycleManager).
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tessera::{ManualClock, Options};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options = Options::builder()
///     .block_size(Duration::from_secs(3600))
///     .buffer_past(Duration::from_secs(300))
///     .clock(ManualClock::new(0))
///     .build()?;
///
/// assert_eq!(options.window().block_size(), Duration::from_secs(3600));
/// assert_eq!(options.max_flush_retries(), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Options {
    window: BufferWindow,
    buffer_drain_interval: Duration,
    max_flush_retries: u32,
    buffer_bucket_alloc_size: usize,
    database_block_alloc_size: usize,
    clock: Arc<dyn Clock>,
    compressor_factory: Arc<dyn CompressorFactory>,
    bytes_pool: Arc<dyn BytesPool>,
    retriever: Option<Arc<dyn BlockRetriever>>,
    sink: Option<Arc<dyn SealedBlockSink>>,
}

impl Options {
    /// Returns a builder populated with defaults.
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// The acceptance and retention policy.
    pub fn window(&self) -> &BufferWindow {
        &self.window
    }

    /// Interval between drain cycles.
    pub fn buffer_drain_interval(&self) -> Duration {
        self.buffer_drain_interval
    }

    /// Compression attempts per block per drain cycle.
    pub fn max_flush_retries(&self) -> u32 {
        self.max_flush_retries
    }

    /// Initial capacity of a block's point buffer.
    pub fn buffer_bucket_alloc_size(&self) -> usize {
        self.buffer_bucket_alloc_size
    }

    /// Initial capacity of an encoded block.
    pub fn database_block_alloc_size(&self) -> usize {
        self.database_block_alloc_size
    }

    /// The time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The compressor factory.
    pub fn compressor_factory(&self) -> &Arc<dyn CompressorFactory> {
        &self.compressor_factory
    }

    /// The byte-buffer pool.
    pub fn bytes_pool(&self) -> &Arc<dyn BytesPool> {
        &self.bytes_pool
    }

    /// The retriever consulted on in-memory misses, if any.
    pub fn retriever(&self) -> Option<&Arc<dyn BlockRetriever>> {
        self.retriever.as_ref()
    }

    /// The sink notified of newly sealed segments, if any.
    pub fn sink(&self) -> Option<&Arc<dyn SealedBlockSink>> {
        self.sink.as_ref()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("window", &self.window)
            .field("buffer_drain_interval", &self.buffer_drain_interval)
            .field("max_flush_retries", &self.max_flush_retries)
            .field("buffer_bucket_alloc_size", &self.buffer_bucket_alloc_size)
            .field("database_block_alloc_size", &self.database_block_alloc_size)
            .field("clock", &self.clock)
            .field("bytes_pool", &self.bytes_pool)
            .field("retriever", &self.retriever.is_some())
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Options`].
#[derive(Clone)]
pub struct OptionsBuilder {
    block_size: Duration,
    buffer_past: Duration,
    buffer_future: Duration,
    buffer_drain_interval: Duration,
    retention_period: Duration,
    max_flush_retries: u32,
    buffer_bucket_alloc_size: usize,
    database_block_alloc_size: usize,
    clock: Arc<dyn Clock>,
    compressor_factory: Arc<dyn CompressorFactory>,
    bytes_pool: Arc<dyn BytesPool>,
    retriever: Option<Arc<dyn BlockRetriever>>,
    sink: Option<Arc<dyn SealedBlockSink>>,
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_past: DEFAULT_BUFFER_PAST,
            buffer_future: DEFAULT_BUFFER_FUTURE,
            buffer_drain_interval: DEFAULT_BUFFER_DRAIN_INTERVAL,
            retention_period: DEFAULT_RETENTION_PERIOD,
            max_flush_retries: DEFAULT_MAX_FLUSH_RETRIES,
            buffer_bucket_alloc_size: DEFAULT_BUFFER_BUCKET_ALLOC_SIZE,
            database_block_alloc_size: DEFAULT_DATABASE_BLOCK_ALLOC_SIZE,
            clock: Arc::new(SystemClock),
            compressor_factory: Arc::new(RawCompressorFactory),
            bytes_pool: Arc::new(HeapPool),
            retriever: None,
            sink: None,
        }
    }
}

impl OptionsBuilder {
    /// Sets the block size.
    pub fn block_size(mut self, value: Duration) -> Self {
        self.block_size = value;
        self
    }

    /// Sets how far behind now a point may be.
    pub fn buffer_past(mut self, value: Duration) -> Self {
        self.buffer_past = value;
        self
    }

    /// Sets how far ahead of now a point may be.
    pub fn buffer_future(mut self, value: Duration) -> Self {
        self.buffer_future = value;
        self
    }

    /// Sets the interval between drain cycles.
    pub fn buffer_drain_interval(mut self, value: Duration) -> Self {
        self.buffer_drain_interval = value;
        self
    }

    /// Sets how long sealed blocks stay in memory.
    pub fn retention_period(mut self, value: Duration) -> Self {
        self.retention_period = value;
        self
    }

    /// Sets the number of compression attempts per block per drain cycle.
    pub fn max_flush_retries(mut self, value: u32) -> Self {
        self.max_flush_retries = value;
        self
    }

    /// Sets the initial capacity of a block's point buffer.
    pub fn buffer_bucket_alloc_size(mut self, value: usize) -> Self {
        self.buffer_bucket_alloc_size = value;
        self
    }

    /// Sets the initial capacity of an encoded block.
    pub fn database_block_alloc_size(mut self, value: usize) -> Self {
        self.database_block_alloc_size = value;
        self
    }

    /// Sets the time source.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sets the compressor factory.
    pub fn compressor_factory(mut self, factory: impl CompressorFactory + 'static) -> Self {
        self.compressor_factory = Arc::new(factory);
        self
    }

    /// Sets the byte-buffer pool.
    pub fn bytes_pool(mut self, pool: Arc<dyn BytesPool>) -> Self {
        self.bytes_pool = pool;
        self
    }

    /// Sets the retriever consulted when a sealed block is not in memory.
    pub fn retriever(mut self, retriever: Arc<dyn BlockRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Sets the sink notified of every newly sealed segment.
    pub fn sink(mut self, sink: Arc<dyn SealedBlockSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validates and builds the options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - any duration is zero or does not fit in u64 nanoseconds
    /// - `buffer_past` or `buffer_future` is not less than `block_size`
    /// - `retention_period` is shorter than `block_size`
    /// - `max_flush_retries` is zero
    /// - an allocation size hint is zero
    pub fn build(self) -> Result<Options> {
        let window = BufferWindow::new(
            self.block_size,
            self.buffer_past,
            self.buffer_future,
            self.retention_period,
        )?;

        if self.buffer_drain_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "buffer_drain_interval",
            }
            .into());
        }
        duration_nanos("buffer_drain_interval", self.buffer_drain_interval)?;

        if self.max_flush_retries == 0 {
            return Err(ConfigError::NoFlushAttempts.into());
        }

        for (field, value) in [
            ("buffer_bucket_alloc_size", self.buffer_bucket_alloc_size),
            ("database_block_alloc_size", self.database_block_alloc_size),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroAllocSize { field }.into());
            }
        }

        Ok(Options {
            window,
            buffer_drain_interval: self.buffer_drain_interval,
            max_flush_retries: self.max_flush_retries,
            buffer_bucket_alloc_size: self.buffer_bucket_alloc_size,
            database_block_alloc_size: self.database_block_alloc_size,
            clock: self.clock,
            compressor_factory: self.compressor_factory,
            bytes_pool: self.bytes_pool,
            retriever: self.retriever,
            sink: self.sink,
        })
    }
}

/// File-level configuration: the value options of [`Options`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsConfig {
    /// Block size, in seconds.
    #[serde(with = "duration_secs")]
    pub block_size: Duration,

    /// Past tolerance, in seconds.
    #[serde(with = "duration_secs")]
    pub buffer_past: Duration,

    /// Future tolerance, in seconds.
    #[serde(with = "duration_secs")]
    pub buffer_future: Duration,

    /// Drain interval, in seconds.
    #[serde(with = "duration_secs")]
    pub buffer_drain_interval: Duration,

    /// Retention period, in seconds.
    #[serde(with = "duration_secs")]
    pub retention_period: Duration,

    /// Compression attempts per block per drain cycle.
    pub max_flush_retries: u32,

    /// Initial capacity of a block's point buffer.
    pub buffer_bucket_alloc_size: usize,

    /// Initial capacity of an encoded block.
    pub database_block_alloc_size: usize,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_past: DEFAULT_BUFFER_PAST,
            buffer_future: DEFAULT_BUFFER_FUTURE,
            buffer_drain_interval: DEFAULT_BUFFER_DRAIN_INTERVAL,
            retention_period: DEFAULT_RETENTION_PERIOD,
            max_flush_retries: DEFAULT_MAX_FLUSH_RETRIES,
            buffer_bucket_alloc_size: DEFAULT_BUFFER_BUCKET_ALLOC_SIZE,
            database_block_alloc_size: DEFAULT_DATABASE_BLOCK_ALLOC_SIZE,
        }
    }
}

impl OptionsConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed JSON, unknown fields, or
    /// negative durations.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse { source }.into())
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not valid configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Returns a builder with these values and default collaborators.
    pub fn into_builder(self) -> OptionsBuilder {
        Options::builder()
            .block_size(self.block_size)
            .buffer_past(self.buffer_past)
            .buffer_future(self.buffer_future)
            .buffer_drain_interval(self.buffer_drain_interval)
            .retention_period(self.retention_period)
            .max_flush_retries(self.max_flush_retries)
            .buffer_bucket_alloc_size(self.buffer_bucket_alloc_size)
            .database_block_alloc_size(self.database_block_alloc_size)
    }
}

impl From<&Options> for OptionsConfig {
    fn from(options: &Options) -> Self {
        let window = options.window();
        Self {
            block_size: window.block_size(),
            buffer_past: window.buffer_past(),
            buffer_future: window.buffer_future(),
            buffer_drain_interval: options.buffer_drain_interval(),
            retention_period: window.retention_period(),
            max_flush_retries: options.max_flush_retries(),
            buffer_bucket_alloc_size: options.buffer_bucket_alloc_size(),
            database_block_alloc_size: options.database_block_alloc_size(),
        }
    }
}

/// Serde support for Duration fields as (fractional) seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(de::Error::custom)
    }
}
