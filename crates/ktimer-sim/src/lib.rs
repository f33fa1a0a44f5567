//! Hosted stand-in for the hardware the timer runs on.
//!
//! This crate provides:
//! - [`SimMachine`], implementing every `ktimer_core::hal` trait on host
//!   threads: interrupt masking, block/unblock scheduling, an interrupt
//!   registry, and PIT port decoding
//! - [`clock`] module with the periodic thread that plays the PIT output
//! - [`ports`] module decoding PIT programming

pub mod clock;
pub mod machine;
pub mod ports;

pub use clock::ClockThread;
pub use machine::*;
pub use ports::PitPorts;
