//! Block lifecycle: ingest, drain, eviction.
//!
//! [`BlockLifecycleManager`] owns every series buffer of a namespace. Points
//! are checked against the [`BufferWindow`](crate::window::BufferWindow) and
//! appended to the open block for their interval. Drains and eviction sweeps
//! run either on demand ([`run_drain_cycle`](BlockLifecycleManager::run_drain_cycle),
//! [`run_eviction_sweep`](BlockLifecycleManager::run_eviction_sweep)) or on a
//! background thread started by [`BlockLifecycleManager::spawn_background`].
//!
//! # Locking
//!
//! ```text
//! series map   RwLock<HashMap<SeriesId, Arc<Mutex<SeriesBuffer>>>>
//!                 read:  append to an existing series, sweeps listing series
//!                 write: create a series, remove an empty series
//! series       Mutex<SeriesBuffer>
//!                 held for append, drain snapshot/commit, eviction
//!                 never held while compressing
//! ```
//!
//! A drain takes a snapshot of a block's pending points under the series lock,
//! compresses it without any lock held, and commits or rolls back under the
//! lock again. Appends to the same block keep landing in the pending set in
//! the meantime. A compressor that panics counts as a failed attempt.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use tessera::{BlockLifecycleManager, BlockState, ManualClock, Options, SeriesId};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = ManualClock::new(7_200_000_000_000);
//! let options = Options::builder().clock(clock.clone()).build()?;
//! let manager = BlockLifecycleManager::new(options);
//!
//! let cpu = SeriesId::new("cpu.usage");
//! manager.append(&cpu, 7_200_000_000_000, 42.0)?;
//!
//! let report = manager.run_drain_cycle();
//! assert_eq!(report.blocks_drained, 1);
//! assert_eq!(manager.block_state(&cpu, 7_200_000_000_000), Some(BlockState::Sealed));
//!
//! clock.advance(Duration::from_secs(49 * 3600));
//! assert_eq!(manager.run_eviction_sweep().blocks_evicted, 1);
//! assert_eq!(manager.series_count(), 0);
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::bitstream::BitStream;
use crate::block::{Block, BlockState, Datapoint, DrainTask, SealedBlock, SeriesBuffer, SeriesId};
use crate::error::{DrainError, Result, RetrieveError};
use crate::options::Options;
use crate::pool::PooledBuffer;

/// Longest single sleep of the background thread, so shutdown stays prompt.
const BACKGROUND_TICK: Duration = Duration::from_millis(50);

/// Name of the background maintenance thread.
const BACKGROUND_THREAD_NAME: &str = "tessera-lifecycle";

/// Loads sealed blocks that are no longer held in memory.
pub trait BlockRetriever: Send + Sync {
    /// Returns the sealed segments of `block_start` for `series`, or `None`
    /// if the block does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RetrieveError`] if the block exists but cannot be loaded.
    fn retrieve(
        &self,
        series: &SeriesId,
        block_start: u64,
    ) -> std::result::Result<Option<Vec<SealedBlock>>, RetrieveError>;
}

/// Receives every newly sealed segment, e.g. to persist it.
pub trait SealedBlockSink: Send + Sync {
    /// Called once per sealed segment, after it has been committed.
    ///
    /// # Errors
    ///
    /// Errors are logged by the caller; the segment stays sealed in memory.
    fn on_sealed(
        &self,
        block: &SealedBlock,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Shared flag that stops drain cycles and eviction sweeps.
///
/// Cancellation is observed between series and between drain attempts.
/// Once cancelled a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A block whose drain failed in this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainFailure {
    /// The series of the block.
    pub series: SeriesId,
    /// Start of the block.
    pub block_start: u64,
    /// Error of the last attempt.
    pub error: DrainError,
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Series visited before the cycle finished or was cancelled.
    pub series_scanned: usize,
    /// Blocks sealed into a new segment.
    pub blocks_drained: usize,
    /// Points encoded into new segments.
    pub points_drained: usize,
    /// Blocks whose points were restored after every attempt failed.
    pub failures: Vec<DrainFailure>,
    /// `true` if cancellation stopped the cycle early.
    pub cancelled: bool,
}

/// Outcome of one eviction sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Blocks removed from memory.
    pub blocks_evicted: usize,
    /// Sealed segments released by the removed blocks.
    pub segments_evicted: usize,
    /// Series dropped because they no longer held any block.
    pub series_removed: usize,
    /// `true` if cancellation stopped the sweep early.
    pub cancelled: bool,
}

type SeriesMap = HashMap<SeriesId, Arc<Mutex<SeriesBuffer>>>;

/// Owns the in-memory blocks of every series and moves them through
/// open, draining, sealed and evicted.
///
/// The manager is `Send + Sync`; share it behind an [`Arc`] between ingest
/// threads and the background thread.
#[derive(Debug)]
pub struct BlockLifecycleManager {
    options: Options,
    series: RwLock<SeriesMap>,
    cancel: CancellationToken,
}

impl BlockLifecycleManager {
    /// Creates an empty manager.
    pub fn new(options: Options) -> Self {
        Self::with_cancellation(options, CancellationToken::new())
    }

    /// Creates an empty manager that stops its sweeps when `cancel` fires.
    pub fn with_cancellation(options: Options, cancel: CancellationToken) -> Self {
        Self {
            options,
            series: RwLock::new(HashMap::new()),
            cancel,
        }
    }

    /// The options this manager was built with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The token that stops this manager's sweeps.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Buffers a point for `series`.
    ///
    /// The point goes to the block containing `timestamp`; the block and the
    /// series are created on first use. Points of a block that is already
    /// sealed are buffered as a delta and sealed into an extra segment by
    /// the next drain.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`](crate::error::WriteError) if `timestamp` is
    /// outside the buffer window around the clock's current time.
    pub fn append(&self, series: &SeriesId, timestamp: u64, value: f64) -> Result<()> {
        let now = self.options.clock().now();
        let block_start = self.options.window().check(now, timestamp)?;
        let point = Datapoint::new(timestamp, value);

        {
            let map = read(&self.series);
            if let Some(buffer) = map.get(series) {
                lock(buffer).append(block_start, point);
                return Ok(());
            }
        }

        let mut map = write(&self.series);
        let alloc = self.options.buffer_bucket_alloc_size();
        let buffer = map
            .entry(series.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SeriesBuffer::new(series.clone(), alloc))));
        lock(buffer).append(block_start, point);
        Ok(())
    }

    /// Drains every block that has pending points and no drain in flight.
    ///
    /// Each block gets up to `max_flush_retries` compression attempts. A
    /// block whose attempts all fail keeps its points, in order, ahead of
    /// anything appended during the drain, and is retried next cycle.
    /// Failures are reported, never returned.
    pub fn run_drain_cycle(&self) -> DrainReport {
        let mut report = DrainReport::default();

        for buffer in self.snapshot_series() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.series_scanned += 1;
            self.drain_series(&buffer, &mut report);
        }

        if report.blocks_drained > 0 || !report.failures.is_empty() {
            tracing::debug!(
                "drain cycle sealed {} block(s) with {} point(s), {} failure(s)",
                report.blocks_drained,
                report.points_drained,
                report.failures.len()
            );
        }
        report
    }

    /// Removes sealed blocks past the retention period.
    ///
    /// Only blocks with no pending points and no drain in flight are
    /// removed. A block exactly `retention_period` old is kept. Series left
    /// without blocks are dropped.
    pub fn run_eviction_sweep(&self) -> EvictionReport {
        let mut report = EvictionReport::default();
        let now = self.options.clock().now();
        let window = *self.options.window();
        let pool = self.options.bytes_pool();
        let mut emptied = Vec::new();

        for buffer in self.snapshot_series() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let evicted = {
                let mut guard = lock(&buffer);
                let evicted = guard.evict(|start| window.is_expired(now, start));
                if guard.is_empty() {
                    emptied.push(guard.id().clone());
                }
                evicted
            };

            for (_, segments) in evicted {
                report.blocks_evicted += 1;
                report.segments_evicted += segments.len();
                for segment in segments {
                    // Segments still shared with a reader are freed when the
                    // reader drops them.
                    if let Some(bytes) = segment.into_buffer() {
                        pool.checkin(bytes);
                    }
                }
            }
        }

        if !emptied.is_empty() {
            let mut map = write(&self.series);
            for id in emptied {
                let still_empty = map.get(&id).is_some_and(|buffer| lock(buffer).is_empty());
                if still_empty {
                    map.remove(&id);
                    report.series_removed += 1;
                }
            }
        }

        if report.blocks_evicted > 0 {
            tracing::debug!(
                "evicted {} block(s), removed {} series",
                report.blocks_evicted,
                report.series_removed
            );
        }
        report
    }

    /// Returns the sealed segments of a block, base first.
    ///
    /// Blocks held in memory are answered directly. Otherwise the configured
    /// [`BlockRetriever`] is asked; without one, a miss yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`RetrieveError`] if the retriever fails.
    pub fn fetch_sealed(&self, series: &SeriesId, block_start: u64) -> Result<Vec<SealedBlock>> {
        let cached = self.sealed_blocks(series, block_start);
        if !cached.is_empty() {
            return Ok(cached);
        }

        match self.options.retriever() {
            Some(retriever) => Ok(retriever.retrieve(series, block_start)?.unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Current state of a block, or `None` if it is not in memory.
    pub fn block_state(&self, series: &SeriesId, block_start: u64) -> Option<BlockState> {
        self.with_block(series, block_start, Block::state)
    }

    /// Sealed segments of an in-memory block, base first.
    pub fn sealed_blocks(&self, series: &SeriesId, block_start: u64) -> Vec<SealedBlock> {
        self.with_block(series, block_start, |block| block.sealed().to_vec())
            .unwrap_or_default()
    }

    /// Buffered points of a block not yet sealed, including an in-flight
    /// drain snapshot.
    pub fn pending_points(&self, series: &SeriesId, block_start: u64) -> usize {
        self.with_block(series, block_start, Block::pending_len)
            .unwrap_or(0)
    }

    /// Consecutive failed drains of a block since its last successful seal.
    pub fn drain_failures(&self, series: &SeriesId, block_start: u64) -> u32 {
        self.with_block(series, block_start, Block::failed_drains)
            .unwrap_or(0)
    }

    /// Error of the most recent failed drain of a block, cleared on success.
    pub fn last_drain_error(&self, series: &SeriesId, block_start: u64) -> Option<DrainError> {
        self.with_block(series, block_start, |block| block.last_drain_error().cloned())
            .flatten()
    }

    /// Starts of the in-memory blocks of `series`, oldest first.
    pub fn block_starts(&self, series: &SeriesId) -> Vec<u64> {
        read(&self.series)
            .get(series)
            .map(|buffer| lock(buffer).block_starts().collect())
            .unwrap_or_default()
    }

    /// Number of series held in memory.
    pub fn series_count(&self) -> usize {
        read(&self.series).len()
    }

    /// Starts a thread that runs a drain cycle and then an eviction sweep
    /// every `buffer_drain_interval`.
    ///
    /// The thread stops once the manager's cancellation token fires, which
    /// [`BackgroundHandle::shutdown`] does.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread cannot be spawned.
    pub fn spawn_background(manager: Arc<Self>) -> io::Result<BackgroundHandle> {
        let cancel = manager.cancel.clone();
        let join = thread::Builder::new()
            .name(BACKGROUND_THREAD_NAME.to_string())
            .spawn(move || manager.maintenance_loop())?;

        Ok(BackgroundHandle {
            cancel,
            join: Some(join),
        })
    }

    fn maintenance_loop(&self) {
        let interval = self.options.buffer_drain_interval();
        tracing::info!("lifecycle thread started, drain interval {interval:?}");

        loop {
            let deadline = Instant::now() + interval;
            while !self.cancel.is_cancelled() {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                thread::sleep(left.min(BACKGROUND_TICK));
            }
            if self.cancel.is_cancelled() {
                break;
            }

            self.run_drain_cycle();
            self.run_eviction_sweep();
        }

        tracing::info!("lifecycle thread stopped");
    }

    fn snapshot_series(&self) -> Vec<Arc<Mutex<SeriesBuffer>>> {
        read(&self.series).values().cloned().collect()
    }

    fn with_block<R>(
        &self,
        series: &SeriesId,
        block_start: u64,
        f: impl FnOnce(&Block) -> R,
    ) -> Option<R> {
        let map = read(&self.series);
        let guard = lock(map.get(series)?);
        guard.block(block_start).map(f)
    }

    fn drain_series(&self, buffer: &Mutex<SeriesBuffer>, report: &mut DrainReport) {
        let (id, tasks) = {
            let mut guard = lock(buffer);
            (guard.id().clone(), guard.begin_drains())
        };

        for task in tasks {
            let start = task.start;
            match self.drain_block(&id, &task) {
                Ok(sealed) => {
                    lock(buffer).complete_drain(start, sealed.clone());
                    report.blocks_drained += 1;
                    report.points_drained += task.points.len();
                    self.notify_sink(&sealed);
                }
                Err(DrainError::Cancelled { .. }) => {
                    lock(buffer).abort_drain(start);
                    report.cancelled = true;
                }
                Err(error) => {
                    tracing::warn!(
                        "drain of block {start} for series {id} failed after {} attempt(s): {error}",
                        self.options.max_flush_retries()
                    );
                    lock(buffer).fail_drain(start, error.clone());
                    report.failures.push(DrainFailure {
                        series: id.clone(),
                        block_start: start,
                        error,
                    });
                }
            }
        }
    }

    fn drain_block(
        &self,
        series: &SeriesId,
        task: &DrainTask,
    ) -> std::result::Result<SealedBlock, DrainError> {
        let attempts = self.options.max_flush_retries();
        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(DrainError::Cancelled {
                    block_start: task.start,
                });
            }
            match self.compress(series, task) {
                Ok(sealed) => return Ok(sealed),
                Err(error) if attempt >= attempts => return Err(error),
                Err(error) => {
                    tracing::debug!(
                        "drain attempt {attempt}/{attempts} of block {} for series {series} failed: {error}",
                        task.start
                    );
                    attempt += 1;
                }
            }
        }
    }

    fn compress(
        &self,
        series: &SeriesId,
        task: &DrainTask,
    ) -> std::result::Result<SealedBlock, DrainError> {
        let mut pooled = PooledBuffer::checkout(
            self.options.bytes_pool(),
            self.options.database_block_alloc_size(),
        )?;
        let mut stream = BitStream::from_buffer(pooled.take());
        let factory = self.options.compressor_factory();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            factory
                .new_compressor()
                .compress(task.start, &task.points, &mut stream)
        }))
        .unwrap_or_else(|payload| {
            Err(DrainError::Compressor {
                block_start: task.start,
                reason: format!("compressor panicked: {}", panic_message(payload.as_ref())),
            })
        });

        let (bytes, pos) = stream.into_parts();
        pooled.restore(bytes);
        outcome?;

        Ok(SealedBlock::new(
            series.clone(),
            task.start,
            task.segment,
            pooled.detach(),
            pos,
            task.points.len(),
        ))
    }

    fn notify_sink(&self, sealed: &SealedBlock) {
        let Some(sink) = self.options.sink() else {
            return;
        };
        if let Err(e) = sink.on_sealed(sealed) {
            tracing::warn!(
                "sink rejected block {} segment {} of series {}: {e}",
                sealed.start(),
                sealed.segment(),
                sealed.series()
            );
        }
    }
}

/// Handle to the background thread started by
/// [`BlockLifecycleManager::spawn_background`].
///
/// Dropping the handle also stops and joins the thread.
#[derive(Debug)]
pub struct BackgroundHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl BackgroundHandle {
    /// Cancels the manager's sweeps and waits for the thread to exit.
    ///
    /// A drain in progress stops before its next attempt and leaves its
    /// points buffered.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(Err(_)) = self.join.take().map(JoinHandle::join) {
            tracing::warn!("lifecycle thread panicked");
        }
    }
}

impl Drop for BackgroundHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}
