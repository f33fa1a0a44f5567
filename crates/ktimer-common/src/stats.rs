//! Sleep and tick statistics.
//!
//! Counters are plain atomics so the interrupt path can bump them without
//! taking any lock or allocating.

use crossbeam_utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative counters kept by the timer.
#[derive(Debug, Default)]
pub struct TimerStats {
    /// Interrupts handled; written only from interrupt context.
    interrupts: CachePadded<AtomicU64>,
    /// Contexts released from the sleep queue.
    wakeups: CachePadded<AtomicU64>,
    /// Sleeps that went through the queue.
    queued_sleeps: AtomicU64,
    /// Sleeps absorbed by a busy-wait.
    spin_sleeps: AtomicU64,
    /// Busy-wait iterations requested by sub-tick sleeps.
    spin_loops: AtomicU64,
    /// Sleeps for zero or negative ticks.
    noop_sleeps: AtomicU64,
    /// Largest queue length observed after an insert.
    peak_queue_depth: AtomicU64,
    /// Interrupts that found the sleep queue held and skipped the drain.
    deferred_drains: AtomicU64,
}

impl TimerStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one handled interrupt and the number of contexts it released.
    #[inline]
    pub fn record_interrupt(&self, released: usize) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
        if released > 0 {
            self.wakeups.fetch_add(released as u64, Ordering::Relaxed);
        }
    }

    /// Record a sleep that parked the caller; `depth` is the queue length after insert.
    pub fn record_queued(&self, depth: usize) {
        self.queued_sleeps.fetch_add(1, Ordering::Relaxed);
        self.peak_queue_depth
            .fetch_max(depth as u64, Ordering::Relaxed);
    }

    /// Record a sub-tick sleep served by `loops` busy-wait iterations.
    pub fn record_spin(&self, loops: i64) {
        self.spin_sleeps.fetch_add(1, Ordering::Relaxed);
        self.spin_loops
            .fetch_add(u64::try_from(loops).unwrap_or(0), Ordering::Relaxed);
    }

    /// Record an interrupt that could not take the sleep queue.
    #[inline]
    pub fn record_deferred(&self) {
        self.deferred_drains.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sleep request that returned immediately.
    pub fn record_noop(&self) {
        self.noop_sleeps.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self, ticks: i64, loops_per_tick: Option<u32>) -> TimerStatsSnapshot {
        TimerStatsSnapshot {
            ticks,
            interrupts: self.interrupts.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            queued_sleeps: self.queued_sleeps.load(Ordering::Relaxed),
            spin_sleeps: self.spin_sleeps.load(Ordering::Relaxed),
            spin_loops: self.spin_loops.load(Ordering::Relaxed),
            noop_sleeps: self.noop_sleeps.load(Ordering::Relaxed),
            peak_queue_depth: self.peak_queue_depth.load(Ordering::Relaxed),
            deferred_drains: self.deferred_drains.load(Ordering::Relaxed),
            loops_per_tick,
        }
    }
}

/// Immutable snapshot of timer statistics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TimerStatsSnapshot {
    /// Ticks since boot.
    pub ticks: i64,
    /// Timer interrupts handled.
    pub interrupts: u64,
    /// Contexts released from the sleep queue.
    pub wakeups: u64,
    /// Sleeps that went through the queue.
    pub queued_sleeps: u64,
    /// Sleeps absorbed by a busy-wait.
    pub spin_sleeps: u64,
    /// Total busy-wait iterations requested.
    pub spin_loops: u64,
    /// Sleeps that returned immediately.
    pub noop_sleeps: u64,
    /// Largest sleep queue length observed.
    pub peak_queue_depth: u64,
    /// Interrupts that skipped the drain because the queue was held.
    pub deferred_drains: u64,
    /// Calibration result, if calibration has run.
    pub loops_per_tick: Option<u32>,
}

impl TimerStatsSnapshot {
    /// Busy-wait iterations per second implied by the calibration.
    #[must_use]
    pub fn loops_per_second(&self, frequency_hz: u32) -> Option<u64> {
        self.loops_per_tick
            .map(|lpt| u64::from(lpt) * u64::from(frequency_hz))
    }
}

impl fmt::Display for TimerStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer: {} ticks", self.ticks)
    }
}
