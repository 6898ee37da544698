//! Buffer window: which timestamps are accepted, and where they go.
//!
//! Every incoming point is checked against the current time. A point is
//! accepted if it lies within `[now - buffer_past, now + buffer_future]`
//! (both ends inclusive) and is then routed to the block starting at
//! `floor(timestamp, block_size)`. Anything outside the window is rejected
//! instead of silently reopening an arbitrary historical block.
//!
//! ```text
//!              buffer_past        buffer_future
//!          |<---------------->|<------------>|
//!   -------[==================now============]-------> t
//!     rejected               accepted              rejected
//! ```
//!
//! The same policy decides retention: a block whose start is more than
//! `retention_period` behind now is expired. A block exactly
//! `retention_period` old is kept.

use std::time::Duration;

use crate::error::{ConfigError, Result, WriteError};

/// Converts a duration to nanoseconds, rejecting values that do not fit.
pub(crate) fn duration_nanos(field: &'static str, value: Duration) -> Result<u64> {
    u64::try_from(value.as_nanos())
        .map_err(|_| ConfigError::DurationOverflow { field, value }.into())
}

/// Temporal acceptance and retention policy for a namespace.
///
/// Construction validates that both tolerances are positive and strictly
/// smaller than the block size, so a point can never straddle more than one
/// block boundary because of tolerance alone.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tessera::window::BufferWindow;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let window = BufferWindow::new(
///     Duration::from_secs(2 * 3600),
///     Duration::from_secs(600),
///     Duration::from_secs(120),
///     Duration::from_secs(48 * 3600),
/// )?;
///
/// let now = 10 * 3_600_000_000_000;
/// assert_eq!(window.check(now, now)?, now);
/// assert!(window.check(now, now + 121_000_000_000).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferWindow {
    block_size: u64,
    buffer_past: u64,
    buffer_future: u64,
    retention: u64,
}

impl BufferWindow {
    /// Creates a validated window.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any duration is zero or too large, if
    /// either tolerance is not less than `block_size`, or if `retention` is
    /// shorter than one block.
    pub fn new(
        block_size: Duration,
        buffer_past: Duration,
        buffer_future: Duration,
        retention: Duration,
    ) -> Result<Self> {
        for (field, value) in [
            ("block_size", block_size),
            ("buffer_past", buffer_past),
            ("buffer_future", buffer_future),
            ("retention_period", retention),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field }.into());
            }
        }

        for (field, tolerance) in [("buffer_past", buffer_past), ("buffer_future", buffer_future)] {
            if tolerance >= block_size {
                return Err(ConfigError::ToleranceExceedsBlock {
                    field,
                    tolerance,
                    block_size,
                }
                .into());
            }
        }

        if retention < block_size {
            return Err(ConfigError::RetentionShorterThanBlock {
                retention,
                block_size,
            }
            .into());
        }

        Ok(Self {
            block_size: duration_nanos("block_size", block_size)?,
            buffer_past: duration_nanos("buffer_past", buffer_past)?,
            buffer_future: duration_nanos("buffer_future", buffer_future)?,
            retention: duration_nanos("retention_period", retention)?,
        })
    }

    /// Block size.
    pub fn block_size(&self) -> Duration {
        Duration::from_nanos(self.block_size)
    }

    /// How far behind now a point may be.
    pub fn buffer_past(&self) -> Duration {
        Duration::from_nanos(self.buffer_past)
    }

    /// How far ahead of now a point may be.
    pub fn buffer_future(&self) -> Duration {
        Duration::from_nanos(self.buffer_future)
    }

    /// How long sealed blocks stay in memory.
    pub fn retention_period(&self) -> Duration {
        Duration::from_nanos(self.retention)
    }

    /// Start of the block containing `timestamp`.
    #[inline]
    pub fn block_start(&self, timestamp: u64) -> u64 {
        timestamp - timestamp % self.block_size
    }

    /// Checks `timestamp` against the window around `now`.
    ///
    /// Returns the start of the block the point belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::TooFarInPast`] or [`WriteError::TooFarInFuture`]
    /// if the point is outside `[now - buffer_past, now + buffer_future]`.
    pub fn check(&self, now: u64, timestamp: u64) -> std::result::Result<u64, WriteError> {
        let earliest = now.saturating_sub(self.buffer_past);
        if timestamp < earliest {
            return Err(WriteError::TooFarInPast {
                timestamp,
                earliest,
            });
        }

        let latest = now.saturating_add(self.buffer_future);
        if timestamp > latest {
            return Err(WriteError::TooFarInFuture { timestamp, latest });
        }

        Ok(self.block_start(timestamp))
    }

    /// Starts of the blocks that can currently receive points, oldest first.
    ///
    /// This is one block most of the time and two near a block boundary.
    pub fn accepting_blocks(&self, now: u64) -> Vec<u64> {
        let oldest = self.block_start(now.saturating_sub(self.buffer_past));
        let newest = self.block_start(now.saturating_add(self.buffer_future));
        (oldest..=newest)
            .step_by(usize::try_from(self.block_size).unwrap_or(usize::MAX))
            .collect()
    }

    /// Returns `true` if the block starting at `block_start` is past retention.
    #[inline]
    pub fn is_expired(&self, now: u64, block_start: u64) -> bool {
        now.saturating_sub(block_start) > self.retention
    }
}
