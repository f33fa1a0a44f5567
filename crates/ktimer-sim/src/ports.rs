//! Port-space decoding for the simulated 8254.
//!
//! Only counter 0 in lobyte/hibyte access mode is modelled. Writes are kept
//! in a log so tests can check the exact byte sequence.

use ktimer_core::pit::{CHANNEL_0, COMMAND};
use std::time::Duration;
use tracing::{debug, warn};

/// Access-mode bits of a control word selecting lobyte/hibyte.
const ACCESS_LOHI: u8 = 0b0011_0000;

/// Decoded state of PIT counter 0.
#[derive(Debug, Default)]
pub struct PitPorts {
    log: Vec<(u16, u8)>,
    control: Option<u8>,
    pending_low: Option<u8>,
    divisor: Option<u16>,
}

impl PitPorts {
    /// A PIT that has not been programmed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one byte written to `port`.
    pub fn write(&mut self, port: u16, value: u8) {
        self.log.push((port, value));

        match port {
            COMMAND => {
                if value >> 6 != 0 || value & ACCESS_LOHI != ACCESS_LOHI {
                    warn!(control = value, "Unsupported PIT control word");
                }
                self.control = Some(value);
                self.pending_low = None;
            }
            CHANNEL_0 => match self.pending_low.take() {
                None => self.pending_low = Some(value),
                Some(low) => {
                    let divisor = u16::from_le_bytes([low, value]);
                    debug!(divisor, "PIT counter 0 loaded");
                    self.divisor = Some(divisor);
                }
            },
            other => warn!(port = other, value, "Write to unmapped port"),
        }
    }

    /// Every write seen so far, in order.
    pub fn log(&self) -> &[(u16, u8)] {
        &self.log
    }

    /// Last control word written.
    pub fn control(&self) -> Option<u8> {
        self.control
    }

    /// Reload value of counter 0, once both bytes have been written.
    pub fn divisor(&self) -> Option<u16> {
        self.divisor
    }

    /// Interval between output edges given the counter's input clock.
    ///
    /// A reload value of 0 counts 65536 input cycles, as on the real part.
    pub fn period(&self, base_clock_hz: u32) -> Option<Duration> {
        let divisor = match self.divisor? {
            0 => 65_536,
            d => u64::from(d),
        };
        Some(Duration::from_nanos(
            divisor * 1_000_000_000 / u64::from(base_clock_hz.max(1)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_divisor() {
        let mut ports = PitPorts::new();
        assert_eq!(ports.divisor(), None);

        ports.write(COMMAND, 0x36);
        ports.write(CHANNEL_0, 0x9c);
        assert_eq!(ports.divisor(), None);
        ports.write(CHANNEL_0, 0x2e);

        assert_eq!(ports.control(), Some(0x36));
        assert_eq!(ports.divisor(), Some(11_932));
        assert_eq!(ports.log().len(), 3);
    }

    #[test]
    fn test_period_at_100hz() {
        let mut ports = PitPorts::new();
        ports.write(COMMAND, 0x36);
        ports.write(CHANNEL_0, 0x9c);
        ports.write(CHANNEL_0, 0x2e);

        let period = ports.period(1_193_180).unwrap();
        assert!(period > Duration::from_micros(9_990));
        assert!(period < Duration::from_micros(10_010));
    }

    #[test]
    fn test_command_resets_byte_order() {
        let mut ports = PitPorts::new();
        ports.write(COMMAND, 0x36);
        ports.write(CHANNEL_0, 0xff);
        ports.write(COMMAND, 0x36);
        ports.write(CHANNEL_0, 0xa9);
        ports.write(CHANNEL_0, 0x04);
        assert_eq!(ports.divisor(), Some(1193));
    }

    #[test]
    fn test_zero_reload_is_full_count() {
        let mut ports = PitPorts::new();
        ports.write(COMMAND, 0x36);
        ports.write(CHANNEL_0, 0);
        ports.write(CHANNEL_0, 0);
        assert_eq!(
            ports.period(65_536),
            Some(Duration::from_secs(1))
        );
    }
}
