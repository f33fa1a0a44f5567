//! Monotonic tick counter.
//!
//! The timer interrupt handler is the only writer. Readers in normal
//! context take a snapshot with interrupts disabled so the read cannot be
//! torn by, or reordered across, a concurrent increment.

use crate::hal::InterruptControl;
use crossbeam_utils::CachePadded;
use ktimer_common::Tick;
use std::sync::atomic::{compiler_fence, AtomicI64, Ordering};

/// Ticks since the timer was installed.
#[derive(Debug, Default)]
pub struct TickCounter {
    ticks: CachePadded<AtomicI64>,
}

impl TickCounter {
    /// A counter at tick 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent snapshot of the tick count.
    pub fn now<C: InterruptControl + ?Sized>(&self, cpu: &C) -> Tick {
        let old_level = cpu.disable();
        let t = self.ticks.load(Ordering::Relaxed);
        cpu.set_level(old_level);
        compiler_fence(Ordering::SeqCst);
        t
    }

    /// Ticks elapsed since `since`, which must come from an earlier `now`.
    pub fn elapsed<C: InterruptControl + ?Sized>(&self, cpu: &C, since: Tick) -> Tick {
        self.now(cpu) - since
    }

    /// Unsynchronized read for polling loops that already tolerate a stale value.
    #[inline]
    pub fn raw(&self) -> Tick {
        compiler_fence(Ordering::SeqCst);
        self.ticks.load(Ordering::Relaxed)
    }

    /// Advance by one tick and return the new value. Interrupt context only.
    #[inline]
    pub(crate) fn advance(&self) -> Tick {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }
}
