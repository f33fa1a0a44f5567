//! End-to-end tests on the simulated machine.
//!
//! Sleep tests advance time by raising the timer vector by hand, so tick
//! boundaries are exact. Calibration tests use the real clock thread and
//! only check coarse properties.

mod calibration_test;
mod common;
mod config_test;
mod sleep_test;
