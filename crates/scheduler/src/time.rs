//! Tick-based time for relative scheduling.
//!
//! Delays and periods are measured in host ticks, not wall-clock time. A
//! [`TimeSource`] reports the current tick; only differences between two
//! readings are meaningful.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Supplies a monotonically non-decreasing tick counter.
pub trait TimeSource: Send + Sync {
    fn current_ticks(&self) -> u64;
}

/// A tick counter advanced explicitly by the host loop (or a test).
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    ticks: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(start: u64) -> Self {
        Self { ticks: AtomicU64::new(start) }
    }

    /// Advance by `ticks` and return the new tick.
    pub fn advance(&self, ticks: u64) -> u64 {
        let prev = self
            .ticks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| Some(t.saturating_add(ticks)))
            .unwrap_or_else(|t| t);
        prev.saturating_add(ticks)
    }

    /// Jump to `tick`. Earlier values are ignored, the counter never goes back.
    pub fn set(&self, tick: u64) {
        self.ticks.fetch_max(tick, Ordering::AcqRel);
    }
}

impl TimeSource for ManualTimeSource {
    fn current_ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}

/// Ticks derived from a monotonic clock at a fixed tick rate.
#[derive(Debug, Clone)]
pub struct ClockTimeSource {
    origin: Instant,
    ticks_per_second: u32,
}

impl ClockTimeSource {
    pub fn new(ticks_per_second: u32) -> Self {
        Self {
            origin: Instant::now(),
            ticks_per_second: ticks_per_second.max(1),
        }
    }
}

impl TimeSource for ClockTimeSource {
    fn current_ticks(&self) -> u64 {
        let nanos = self.origin.elapsed().as_nanos();
        let ticks = nanos * u128::from(self.ticks_per_second) / 1_000_000_000;
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}

/// Units accepted by the `*_in` builder methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickUnit {
    Millis,
    Ticks,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TickUnit {
    fn millis(self) -> u128 {
        match self {
            TickUnit::Millis => 1,
            TickUnit::Ticks => 0,
            TickUnit::Seconds => 1_000,
            TickUnit::Minutes => 60_000,
            TickUnit::Hours => 3_600_000,
            TickUnit::Days => 86_400_000,
        }
    }

    /// Convert `amount` of this unit to ticks at the given tick rate.
    ///
    /// Rounds toward zero (999ms at 1 tick/s is 0 ticks) and saturates at
    /// `u64::MAX`.
    pub fn to_ticks(self, amount: u64, ticks_per_second: u32) -> u64 {
        if self == TickUnit::Ticks {
            return amount;
        }
        let ticks = u128::from(amount) * self.millis() * u128::from(ticks_per_second) / 1_000;
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}
