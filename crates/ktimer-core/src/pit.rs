//! 8254 Programmable Interval Timer.
//!
//! Channel 0 raises IRQ0 on every rising edge of its output. Loading it
//! with `base_clock / frequency` in square-wave mode gives a periodic
//! interrupt at `frequency` Hz.

use crate::hal::PortIo;
use ktimer_common::{TimerConfig, TimerError, TimerResult};
use tracing::debug;

/// Data port of counter 0.
pub const CHANNEL_0: u16 = 0x40;

/// Mode/command register.
pub const COMMAND: u16 = 0x43;

/// Counter 0, lobyte/hibyte access, mode 3 (square wave), binary counting.
pub const SQUARE_WAVE_CH0: u8 = 0x36;

/// Counter reload value for `config`, checked to fit the 16-bit counter.
///
/// # Errors
///
/// Returns an error if the configuration is out of range.
pub fn divisor_for(config: &TimerConfig) -> TimerResult<u16> {
    config.validate()?;
    u16::try_from(config.divisor()).map_err(|_| TimerError::DivisorOutOfRange {
        base_hz: config.base_clock_hz,
        hz: config.frequency_hz,
    })
}

/// Channel 0 of the PIT, reached through a port-I/O backend.
pub struct Pit<'a, P: PortIo + ?Sized> {
    io: &'a P,
}

impl<'a, P: PortIo + ?Sized> Pit<'a, P> {
    /// Wrap a port-I/O backend.
    pub fn new(io: &'a P) -> Self {
        Self { io }
    }

    /// Start channel 0 free-running with the given reload value.
    pub fn set_divider(&self, div: u16) {
        debug!(divisor = div, "Programming PIT channel 0");
        self.io.outb(COMMAND, SQUARE_WAVE_CH0);
        // With the current access mode, write the low byte followed by the
        // high byte.
        self.io.outb(CHANNEL_0, (div & 0xff) as u8);
        self.io.outb(CHANNEL_0, (div >> 8) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingPorts {
        writes: RefCell<Vec<(u16, u8)>>,
    }

    impl PortIo for RecordingPorts {
        fn outb(&self, port: u16, value: u8) {
            self.writes.borrow_mut().push((port, value));
        }
    }

    #[test]
    fn test_programming_sequence() {
        let ports = RecordingPorts::default();
        let divisor = divisor_for(&TimerConfig::default()).unwrap();
        assert_eq!(divisor, 11932);

        Pit::new(&ports).set_divider(divisor);

        assert_eq!(
            *ports.writes.borrow(),
            vec![(0x43, 0x36), (0x40, 0x9c), (0x40, 0x2e)]
        );
    }

    #[test]
    fn test_divisor_rejects_slow_rate() {
        let config = TimerConfig {
            frequency_hz: 10,
            ..Default::default()
        };
        assert_eq!(
            divisor_for(&config),
            Err(TimerError::FrequencyOutOfRange { hz: 10 })
        );
    }
}
