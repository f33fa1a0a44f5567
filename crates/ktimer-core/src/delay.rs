//! Conversion of wall-clock durations into a tick sleep or a spin.

use ktimer_common::{Tick, TimeUnit};

/// How a duration will be waited out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPlan {
    /// At least one whole tick: park in the sleep queue and yield the CPU.
    Ticks(Tick),
    /// Less than a tick: busy-wait this many iterations in the caller.
    Spin(i64),
}

impl DelayPlan {
    /// Plan a wait of `amount / denom` seconds at `frequency_hz` ticks per second.
    ///
    /// The tick count is rounded down. Only when it rounds to zero is the
    /// duration turned into busy-wait iterations; numerator and denominator
    /// are both scaled down by 1000 first. Non-positive amounts spin nothing.
    ///
    /// # Panics
    ///
    /// Panics if `denom` is not positive, or if a sub-tick wait is requested
    /// with a `denom` that is not a multiple of 1000.
    #[must_use]
    pub fn for_duration(amount: i64, denom: i64, frequency_hz: u32, loops_per_tick: u32) -> Self {
        assert!(denom > 0, "time unit denominator must be positive, got {denom}");
        let freq = i64::from(frequency_hz);

        let ticks = i128::from(amount) * i128::from(freq) / i128::from(denom);
        let ticks = Tick::try_from(ticks).unwrap_or(if ticks < 0 { Tick::MIN } else { Tick::MAX });
        if ticks > 0 {
            return Self::Ticks(ticks);
        }

        assert!(
            denom % 1000 == 0,
            "sub-tick delay needs a denominator that is a multiple of 1000, got {denom}"
        );
        if amount <= 0 {
            return Self::Spin(0);
        }
        let loops = i128::from(loops_per_tick) * i128::from(amount) / 1000 * i128::from(freq)
            / i128::from(denom / 1000);
        Self::Spin(i64::try_from(loops).unwrap_or(i64::MAX))
    }

    /// Plan a wait of `amount` in `unit`.
    #[must_use]
    pub fn for_unit(amount: i64, unit: TimeUnit, frequency_hz: u32, loops_per_tick: u32) -> Self {
        Self::for_duration(amount, unit.per_second(), frequency_hz, loops_per_tick)
    }

    /// True if this plan parks the caller.
    #[must_use]
    pub fn yields(&self) -> bool {
        matches!(self, Self::Ticks(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LPT: u32 = 10_000;

    #[test]
    fn test_one_second_is_frequency_ticks() {
        assert_eq!(
            DelayPlan::for_unit(1000, TimeUnit::Millis, 100, LPT),
            DelayPlan::Ticks(100)
        );
        assert_eq!(
            DelayPlan::for_unit(1000, TimeUnit::Millis, 1000, LPT),
            DelayPlan::Ticks(1000)
        );
    }

    #[test]
    fn test_ticks_round_down() {
        // 25ms at 100 Hz is 2.5 ticks.
        assert_eq!(
            DelayPlan::for_unit(25, TimeUnit::Millis, 100, LPT),
            DelayPlan::Ticks(2)
        );
        assert_eq!(
            DelayPlan::for_unit(10_000, TimeUnit::Micros, 100, LPT),
            DelayPlan::Ticks(1)
        );
    }

    #[test]
    fn test_sub_tick_spins() {
        // 9ms at 100 Hz: 0.9 of a tick.
        assert_eq!(
            DelayPlan::for_unit(9, TimeUnit::Millis, 100, LPT),
            DelayPlan::Spin(9_000)
        );
        // 5000us at 100 Hz: half a tick.
        assert_eq!(
            DelayPlan::for_unit(5_000, TimeUnit::Micros, 100, LPT),
            DelayPlan::Spin(5_000)
        );
        // 500ns at 100 Hz is far below the 1000-scaled resolution.
        assert_eq!(
            DelayPlan::for_unit(500, TimeUnit::Nanos, 100, LPT),
            DelayPlan::Spin(0)
        );
        assert!(!DelayPlan::for_unit(1, TimeUnit::Millis, 100, LPT).yields());
    }

    #[test]
    fn test_uncalibrated_spin_is_empty() {
        assert_eq!(
            DelayPlan::for_unit(5, TimeUnit::Millis, 100, 0),
            DelayPlan::Spin(0)
        );
    }

    #[test]
    fn test_nonpositive_amounts_spin_nothing() {
        assert_eq!(
            DelayPlan::for_unit(0, TimeUnit::Millis, 100, LPT),
            DelayPlan::Spin(0)
        );
        assert_eq!(
            DelayPlan::for_unit(-50, TimeUnit::Millis, 100, LPT),
            DelayPlan::Spin(0)
        );
        assert_eq!(
            DelayPlan::for_duration(i64::MIN, 1000, 100, LPT),
            DelayPlan::Spin(0)
        );
        assert_eq!(
            DelayPlan::for_duration(-(1 << 62) - 1, 1000, 100, 3),
            DelayPlan::Spin(0)
        );
    }

    #[test]
    fn test_huge_amount_does_not_overflow() {
        assert_eq!(
            DelayPlan::for_duration(i64::MAX, 1, 1000, LPT),
            DelayPlan::Ticks(Tick::MAX)
        );
    }

    #[test]
    fn test_non_millisecond_unit_with_whole_ticks() {
        // Only the spin path needs the 1000 scaling.
        assert_eq!(
            DelayPlan::for_duration(3, 2, 100, LPT),
            DelayPlan::Ticks(150)
        );
    }

    #[test]
    #[should_panic(expected = "multiple of 1000")]
    fn test_sub_tick_with_odd_unit() {
        let _ = DelayPlan::for_duration(1, 1500, 100, LPT);
    }
}
