//! Tick and time-unit vocabulary.

use static_assertions::const_assert;
use std::fmt;

/// Absolute tick value since boot. Signed so that `elapsed` arithmetic
/// never underflows; wraparound past `i64::MAX` is not handled.
pub type Tick = i64;

/// Input clock of the 8254 Programmable Interval Timer, in Hz.
pub const PIT_BASE_HZ: u32 = 1_193_180;

/// Lowest tick rate the 8254 can produce from its base clock with a 16-bit divisor.
pub const MIN_FREQUENCY_HZ: u32 = 19;

/// Highest supported tick rate.
pub const MAX_FREQUENCY_HZ: u32 = 1000;

/// Tick rate used when nothing else is configured.
pub const DEFAULT_FREQUENCY_HZ: u32 = 100;

const_assert!(DEFAULT_FREQUENCY_HZ >= MIN_FREQUENCY_HZ);
const_assert!(DEFAULT_FREQUENCY_HZ <= MAX_FREQUENCY_HZ);

/// Interrupt vector of IRQ0 after the PIC has been remapped.
pub const TIMER_VECTOR: u8 = 0x20;

/// Sub-second units accepted by the duration sleep entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    /// 1/1000 s.
    Millis,
    /// 1/1_000_000 s.
    Micros,
    /// 1/1_000_000_000 s.
    Nanos,
}

impl TimeUnit {
    /// Number of this unit in one second.
    #[must_use]
    pub const fn per_second(self) -> i64 {
        match self {
            Self::Millis => 1_000,
            Self::Micros => 1_000_000,
            Self::Nanos => 1_000_000_000,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis => write!(f, "ms"),
            Self::Micros => write!(f, "us"),
            Self::Nanos => write!(f, "ns"),
        }
    }
}
