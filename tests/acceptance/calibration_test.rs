//! Busy-wait calibration acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Calibration against a fixed-rate clock is reproducible
//! - Live calibration on the real clock thread terminates with a usable rate
//! - Calibrated sub-tick sleeps return without waiting for a tick

use super::common::{FixedRateClock, Rig};
use ktimer_common::TIMER_VECTOR;
use ktimer_core::calibrate::INITIAL_LOOPS;
use ktimer_core::{Calibrator, InterruptControl};

#[test]
fn test_fixed_rate_calibration_is_reproducible() {
    let first = Calibrator::new(&FixedRateClock::new(1_000_000, 1)).run();
    let second = Calibrator::new(&FixedRateClock::new(1_000_000, 1)).run();
    assert_eq!(first, second);
    assert_eq!(first, 999_424);
}

#[test]
fn test_uncalibrated_timer_reports_none() {
    let rig = Rig::boot(100);
    assert_eq!(rig.timer.loops_per_tick(), None);
    assert_eq!(rig.timer.stats().loops_per_tick, None);

    // Sub-tick delays degrade to no delay at all.
    let handle = rig.spawn("early", |timer| timer.sleep_us(100));
    handle.join().unwrap();
    assert_eq!(rig.timer.stats().spin_loops, 0);
}

#[test]
fn test_live_calibration() {
    let rig = Rig::boot(1000);
    rig.machine.start_clock(TIMER_VECTOR).unwrap();

    let loops_per_tick = rig.timer.calibrate();
    assert!(loops_per_tick >= INITIAL_LOOPS);
    assert_eq!(rig.timer.loops_per_tick(), Some(loops_per_tick));
    assert!(rig.timer.ticks() > 0);

    let stats = rig.timer.print_stats();
    assert_eq!(
        stats.loops_per_second(1000),
        Some(u64::from(loops_per_tick) * 1000)
    );

    rig.machine.power_off();
}

#[test]
#[should_panic(expected = "calibration requires interrupts enabled")]
fn test_calibration_with_interrupts_disabled_is_fatal() {
    let rig = Rig::boot(100);
    rig.machine.disable();
    rig.timer.calibrate();
}
