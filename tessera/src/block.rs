//! Block and series buffer types.
//!
//! A block covers one `block_size`-aligned interval of one series. While open
//! it holds uncompressed points; a drain snapshots those points, compresses
//! them and appends a [`SealedBlock`] segment. Segments are never modified
//! afterwards: points that arrive for an already sealed interval are buffered
//! again and sealed into an additional segment layered over the first.
//!
//! ```text
//!            drain ok                 retention expiry
//!   Open ───────────────► Sealed ───────────────────► (evicted)
//!    ▲ │                   │  ▲
//!    │ │ drain started     │  │ delta drain ok
//!    │ ▼                   ▼  │
//!  Draining         SealedWithDelta
//!    │
//!    └── drain failed: points restored, back to Open
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::DrainError;

/// A single timestamped value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
    /// The sample value.
    pub value: f64,
}

impl Datapoint {
    /// Creates a new datapoint.
    pub fn new(timestamp: u64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Identity of a time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId(Arc<str>);

impl SeriesId {
    /// Creates a series id from any string-like value.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SeriesId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SeriesId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observable lifecycle state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Accepting points; nothing sealed yet.
    Open,
    /// A drain holds a snapshot of the buffered points.
    Draining,
    /// Immutable; no buffered points.
    Sealed,
    /// Sealed segments exist and late points are buffered as a delta.
    SealedWithDelta,
}

/// An immutable, compressed segment of one block.
///
/// The first segment sealed for a block is its base; later segments are
/// deltas holding points that arrived after the base was sealed. Bytes past
/// `pos` in the last byte are padding.
#[derive(Debug, Clone)]
pub struct SealedBlock {
    series: SeriesId,
    start: u64,
    segment: usize,
    bytes: Arc<Vec<u8>>,
    pos: u8,
    num_points: usize,
}

impl SealedBlock {
    /// Creates a sealed segment from a finished stream's parts.
    pub fn new(
        series: SeriesId,
        start: u64,
        segment: usize,
        bytes: Vec<u8>,
        pos: u8,
        num_points: usize,
    ) -> Self {
        Self {
            series,
            start,
            segment,
            bytes: Arc::new(bytes),
            pos,
            num_points,
        }
    }

    /// The series this block belongs to.
    pub fn series(&self) -> &SeriesId {
        &self.series
    }

    /// Aligned start of the block, in nanoseconds.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Position of this segment within its block: `0` is the base.
    pub fn segment(&self) -> usize {
        self.segment
    }

    /// Returns `true` for segments layered over the base.
    pub fn is_delta(&self) -> bool {
        self.segment > 0
    }

    /// The encoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of data bits used in the last byte.
    pub fn pos(&self) -> u8 {
        self.pos
    }

    /// Number of points encoded in this segment.
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    /// Returns the backing buffer if no other handle to it remains.
    pub(crate) fn into_buffer(self) -> Option<Vec<u8>> {
        Arc::try_unwrap(self.bytes).ok()
    }
}

/// One block's mutable state.
#[derive(Debug)]
pub(crate) struct Block {
    pending: Vec<Datapoint>,
    draining: Option<Arc<[Datapoint]>>,
    sealed: Vec<SealedBlock>,
    failed_drains: u32,
    last_drain_error: Option<DrainError>,
}

impl Block {
    fn new(alloc_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(alloc_size),
            draining: None,
            sealed: Vec::new(),
            failed_drains: 0,
            last_drain_error: None,
        }
    }

    pub(crate) fn state(&self) -> BlockState {
        if self.draining.is_some() {
            BlockState::Draining
        } else if self.sealed.is_empty() {
            BlockState::Open
        } else if self.pending.is_empty() {
            BlockState::Sealed
        } else {
            BlockState::SealedWithDelta
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len() + self.draining.as_ref().map_or(0, |snapshot| snapshot.len())
    }

    pub(crate) fn failed_drains(&self) -> u32 {
        self.failed_drains
    }

    pub(crate) fn last_drain_error(&self) -> Option<&DrainError> {
        self.last_drain_error.as_ref()
    }

    pub(crate) fn sealed(&self) -> &[SealedBlock] {
        &self.sealed
    }

    fn is_evictable(&self) -> bool {
        self.state() == BlockState::Sealed
    }

    fn restore_snapshot(&mut self) {
        if let Some(snapshot) = self.draining.take() {
            let mut restored = Vec::with_capacity(snapshot.len() + self.pending.len());
            restored.extend_from_slice(&snapshot);
            restored.append(&mut self.pending);
            self.pending = restored;
        }
    }
}

/// Snapshot of one block's buffered points, handed to a compressor.
#[derive(Debug)]
pub(crate) struct DrainTask {
    pub(crate) start: u64,
    pub(crate) segment: usize,
    pub(crate) points: Arc<[Datapoint]>,
}

/// All blocks of a single series.
///
/// Mutated only under the series lock held by the lifecycle manager.
#[derive(Debug)]
pub(crate) struct SeriesBuffer {
    id: SeriesId,
    blocks: BTreeMap<u64, Block>,
    bucket_alloc_size: usize,
}

impl SeriesBuffer {
    pub(crate) fn new(id: SeriesId, bucket_alloc_size: usize) -> Self {
        Self {
            id,
            blocks: BTreeMap::new(),
            bucket_alloc_size,
        }
    }

    pub(crate) fn id(&self) -> &SeriesId {
        &self.id
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub(crate) fn block(&self, start: u64) -> Option<&Block> {
        self.blocks.get(&start)
    }

    pub(crate) fn block_starts(&self) -> impl Iterator<Item = u64> + '_ {
        self.blocks.keys().copied()
    }

    /// Buffers a point for the block starting at `block_start`, creating the
    /// block if needed.
    pub(crate) fn append(&mut self, block_start: u64, point: Datapoint) {
        let alloc = self.bucket_alloc_size;
        self.blocks
            .entry(block_start)
            .or_insert_with(|| Block::new(alloc))
            .pending
            .push(point);
    }

    /// Snapshots the buffered points of every block that has some and is not
    /// already being drained. Each returned block is left in `Draining`.
    pub(crate) fn begin_drains(&mut self) -> Vec<DrainTask> {
        let mut tasks = Vec::new();
        for (&start, block) in &mut self.blocks {
            if block.pending.is_empty() || block.draining.is_some() {
                continue;
            }
            let points: Arc<[Datapoint]> = std::mem::replace(
                &mut block.pending,
                Vec::with_capacity(self.bucket_alloc_size),
            )
            .into();
            block.draining = Some(Arc::clone(&points));
            tasks.push(DrainTask {
                start,
                segment: block.sealed.len(),
                points,
            });
        }
        tasks
    }

    /// Records a successful drain: the snapshot is released and the segment
    /// appended.
    pub(crate) fn complete_drain(&mut self, start: u64, sealed: SealedBlock) {
        if let Some(block) = self.blocks.get_mut(&start) {
            block.draining = None;
            block.sealed.push(sealed);
            block.failed_drains = 0;
            block.last_drain_error = None;
        }
    }

    /// Records a failed drain: the snapshot goes back in front of any points
    /// buffered while the drain was running.
    pub(crate) fn fail_drain(&mut self, start: u64, error: DrainError) {
        if let Some(block) = self.blocks.get_mut(&start) {
            block.restore_snapshot();
            block.failed_drains = block.failed_drains.saturating_add(1);
            block.last_drain_error = Some(error);
        }
    }

    /// Abandons an in-flight drain without counting it as a failure.
    pub(crate) fn abort_drain(&mut self, start: u64) {
        if let Some(block) = self.blocks.get_mut(&start) {
            block.restore_snapshot();
        }
    }

    /// Removes sealed blocks for which `expired(start)` holds and returns
    /// each removed block's start with its segments.
    pub(crate) fn evict(
        &mut self,
        mut expired: impl FnMut(u64) -> bool,
    ) -> Vec<(u64, Vec<SealedBlock>)> {
        let starts: Vec<u64> = self
            .blocks
            .iter()
            .filter(|(start, block)| block.is_evictable() && expired(**start))
            .map(|(start, _)| *start)
            .collect();

        starts
            .into_iter()
            .filter_map(|start| self.blocks.remove(&start).map(|block| (start, block.sealed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u64 = 7_200_000_000_000;

    fn sealed(series: &SeriesBuffer, start: u64, segment: usize, n: usize) -> SealedBlock {
        SealedBlock::new(series.id().clone(), start, segment, vec![0xaa], 8, n)
    }

    fn pending(series: &SeriesBuffer, start: u64) -> Vec<Datapoint> {
        series.block(start).unwrap().pending.clone()
    }

    #[test]
    fn test_append_creates_open_block() {
        let mut series = SeriesBuffer::new("cpu".into(), 4);
        series.append(START, Datapoint::new(START + 1, 1.0));

        let block = series.block(START).unwrap();
        assert_eq!(block.state(), BlockState::Open);
        assert_eq!(block.pending_len(), 1);
    }

    #[test]
    fn test_drain_success_seals_block() {
        let mut series = SeriesBuffer::new("cpu".into(), 4);
        series.append(START, Datapoint::new(START + 1, 1.0));
        series.append(START, Datapoint::new(START + 2, 2.0));

        let tasks = series.begin_drains();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].points.len(), 2);
        assert_eq!(tasks[0].segment, 0);
        assert_eq!(series.block(START).unwrap().state(), BlockState::Draining);

        let segment = sealed(&series, START, 0, 2);
        series.complete_drain(START, segment);
        let block = series.block(START).unwrap();
        assert_eq!(block.state(), BlockState::Sealed);
        assert_eq!(block.pending_len(), 0);
        assert_eq!(block.sealed().len(), 1);
    }

    #[test]
    fn test_drain_failure_restores_points_in_order() {
        let mut series = SeriesBuffer::new("cpu".into(), 4);
        series.append(START, Datapoint::new(START + 1, 1.0));
        series.append(START, Datapoint::new(START + 2, 2.0));

        let _tasks = series.begin_drains();
        // Arrives while the drain is in flight.
        series.append(START, Datapoint::new(START + 3, 3.0));
        assert_eq!(series.block(START).unwrap().pending_len(), 3);

        series.fail_drain(
            START,
            DrainError::Pool {
                reason: "exhausted".to_string(),
            },
        );

        let block = series.block(START).unwrap();
        assert_eq!(block.state(), BlockState::Open);
        assert_eq!(block.failed_drains(), 1);
        assert!(block.last_drain_error().is_some());
        let timestamps: Vec<u64> = pending(&series, START).iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![START + 1, START + 2, START + 3]);
    }

    #[test]
    fn test_abort_drain_does_not_count_failure() {
        let mut series = SeriesBuffer::new("cpu".into(), 4);
        series.append(START, Datapoint::new(START + 1, 1.0));
        let _ = series.begin_drains();
        series.abort_drain(START);

        let block = series.block(START).unwrap();
        assert_eq!(block.state(), BlockState::Open);
        assert_eq!(block.failed_drains(), 0);
        assert_eq!(block.pending_len(), 1);
    }

    #[test]
    fn test_draining_block_is_not_snapshotted_twice() {
        let mut series = SeriesBuffer::new("cpu".into(), 4);
        series.append(START, Datapoint::new(START + 1, 1.0));
        let first = series.begin_drains();
        series.append(START, Datapoint::new(START + 2, 2.0));

        assert_eq!(first.len(), 1);
        assert!(series.begin_drains().is_empty());
    }

    #[test]
    fn test_late_point_becomes_delta() {
        let mut series = SeriesBuffer::new("cpu".into(), 4);
        series.append(START, Datapoint::new(START + 1, 1.0));
        let _ = series.begin_drains();
        let base = sealed(&series, START, 0, 1);
        series.complete_drain(START, base);

        series.append(START, Datapoint::new(START + 5, 5.0));
        assert_eq!(series.block(START).unwrap().state(), BlockState::SealedWithDelta);

        let tasks = series.begin_drains();
        assert_eq!(tasks[0].segment, 1);
        let delta = sealed(&series, START, 1, 1);
        series.complete_drain(START, delta);

        let block = series.block(START).unwrap();
        assert_eq!(block.state(), BlockState::Sealed);
        assert!(!block.sealed()[0].is_delta());
        assert!(block.sealed()[1].is_delta());
    }

    #[test]
    fn test_evict_only_sealed_blocks() {
        let mut series = SeriesBuffer::new("cpu".into(), 4);
        series.append(START, Datapoint::new(START, 1.0));
        series.append(2 * START, Datapoint::new(2 * START, 1.0));
        let _ = series.begin_drains();
        let segment = sealed(&series, START, 0, 1);
        series.complete_drain(START, segment);
        series.fail_drain(
            2 * START,
            DrainError::Pool {
                reason: "exhausted".to_string(),
            },
        );

        let evicted = series.evict(|_| true);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, START);
        assert_eq!(evicted[0].1.len(), 1);
        assert!(series.block(START).is_none());
        assert!(series.block(2 * START).is_some());
        assert!(!series.is_empty());
    }

    #[test]
    fn test_into_buffer_requires_unique_owner() {
        let segment = SealedBlock::new("cpu".into(), START, 0, vec![1, 2], 8, 1);
        let reader = segment.clone();
        assert!(segment.into_buffer().is_none());
        assert_eq!(reader.into_buffer(), Some(vec![1, 2]));
    }
}
