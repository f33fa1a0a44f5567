use thiserror::Error;

/// Timer subsystem errors.
///
/// Only boot-time and configuration failures are recoverable. Contract
/// breaches at runtime (sleeping with interrupts off, calibrating twice,
/// a non-millisecond-scaled unit on the spin path) are fatal and panic.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimerError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tick frequency outside the range the 8254 can produce usefully.
    #[error("timer frequency {hz} Hz out of range (19..=1000)")]
    FrequencyOutOfRange {
        /// Requested frequency in ticks per second.
        hz: u32,
    },

    /// The PIT divisor for the requested rate does not fit in 16 bits.
    #[error("divisor for {hz} Hz from a {base_hz} Hz base clock does not fit in 16 bits")]
    DivisorOutOfRange {
        /// Input clock of the counter.
        base_hz: u32,
        /// Requested frequency in ticks per second.
        hz: u32,
    },

    /// An interrupt vector already has a handler bound.
    #[error("interrupt vector {vector:#04x} already has a handler")]
    VectorInUse {
        /// The contested vector.
        vector: u8,
    },

    /// Hardware (or simulated hardware) is not in the expected state.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for timer operations.
pub type TimerResult<T> = Result<T, TimerError>;
