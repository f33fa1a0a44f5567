//! Busy-wait calibration.
//!
//! Finds `loops_per_tick`, the number of `busy_wait` iterations that fit
//! in one timer tick, by timing trial runs against tick boundaries:
//!
//! 1. Coarse: starting at 2^10, double while twice the candidate still
//!    fits in a tick.
//! 2. Fine: below the resulting power of two, set each of the next nine
//!    bits whose addition still fits.
//!
//! The result is within about 1/1024 of the true rate. Given a fixed cost
//! per iteration the search is fully deterministic.

use ktimer_common::Tick;
use tracing::trace;

/// First candidate of the coarse search.
pub const INITIAL_LOOPS: u32 = 1 << 10;

/// The fine search stops at `high_bit >> REFINE_SHIFT`.
pub const REFINE_SHIFT: u32 = 10;

/// Time source the calibration measures against.
pub trait TickClock {
    /// Current tick count. May be read without masking interrupts.
    fn ticks(&self) -> Tick;

    /// Pause between polls of `ticks`.
    fn relax(&self) {
        std::hint::spin_loop();
    }

    /// Run the busy-wait loop for `loops` iterations.
    fn spin(&self, loops: u32);
}

/// Runs timing trials against a [`TickClock`].
pub struct Calibrator<'a, K: TickClock + ?Sized> {
    clock: &'a K,
}

impl<'a, K: TickClock + ?Sized> Calibrator<'a, K> {
    /// Calibrate against `clock`.
    pub fn new(clock: &'a K) -> Self {
        Self { clock }
    }

    /// Returns true if `loops` iterations take longer than one tick.
    pub fn too_many_loops(&self, loops: u32) -> bool {
        // Wait for a tick boundary.
        let start = self.clock.ticks();
        while self.clock.ticks() == start {
            self.clock.relax();
        }

        let start = self.clock.ticks();
        self.clock.spin(loops);

        // If the tick count changed, we iterated too long.
        start != self.clock.ticks()
    }

    /// Search for the largest iteration count that fits in one tick.
    ///
    /// # Panics
    ///
    /// Panics if the coarse search overflows, which means the clock never
    /// advanced during a spin.
    pub fn run(&self) -> u32 {
        let mut loops_per_tick = INITIAL_LOOPS;
        while !self.too_many_loops(loops_per_tick << 1) {
            loops_per_tick <<= 1;
            assert!(
                loops_per_tick != 0,
                "busy-wait calibration overflowed: ticks never advanced during a spin"
            );
        }
        trace!(loops_per_tick, "Coarse calibration done");

        let high_bit = loops_per_tick;
        let mut test_bit = high_bit >> 1;
        while test_bit != high_bit >> REFINE_SHIFT {
            if !self.too_many_loops(loops_per_tick | test_bit) {
                loops_per_tick |= test_bit;
            }
            test_bit >>= 1;
        }
        loops_per_tick
    }
}
