//! Configuration acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A daemon configuration file drives the timer's PIT programming
//! - Out-of-range frequencies are rejected before any hardware is touched

use ktimer_common::{DaemonConfig, TimerError};
use ktimer_core::Timer;
use ktimer_sim::SimMachine;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_file_programs_pit() {
    let file = write_config(
        r#"
status_interval_ticks = 50

[timer]
frequency_hz = 1000

[calibration]
enabled = false

[[workloads]]
name = "blink"
interval = "250ms"
repeat = 4
"#,
    );

    let config = DaemonConfig::from_file(file.path()).unwrap();
    assert_eq!(config.status_interval_ticks, 50);
    assert!(!config.calibration.enabled);
    assert_eq!(config.workloads[0].interval, Duration::from_millis(250));

    let machine = SimMachine::new();
    let timer = Arc::new(
        Timer::new(config.timer, Arc::clone(&machine), Arc::clone(&machine)).unwrap(),
    );
    timer.install(&*machine, &*machine).unwrap();

    assert_eq!(timer.frequency(), 1000);
    assert_eq!(machine.pit_divisor(), Some(1193));
    let period = machine.pit_period().unwrap();
    assert!(period > Duration::from_micros(990) && period < Duration::from_micros(1010));
}

#[test]
fn test_out_of_range_frequency_rejected() {
    let file = write_config("[timer]\nfrequency_hz = 10\n");
    let config = DaemonConfig::from_file(file.path()).unwrap();

    let machine = SimMachine::new();
    let result = Timer::new(config.timer, Arc::clone(&machine), Arc::clone(&machine));
    assert!(matches!(
        result,
        Err(TimerError::FrequencyOutOfRange { hz: 10 })
    ));
    assert!(machine.port_log().is_empty());
}

#[test]
fn test_malformed_interval_rejected() {
    let file = write_config("[[workloads]]\nname = \"bad\"\ninterval = \"soon\"\n");
    assert!(DaemonConfig::from_file(file.path()).is_err());
}
