#![doc = "Tick counter, calibrated busy-wait, and sleep queue for a uniprocessor kernel timer."]

pub mod busy_wait;
pub mod calibrate;
pub mod delay;
pub mod hal;
pub mod pit;
pub mod sleep_queue;
pub mod tick;
pub mod timer;

pub use busy_wait::busy_wait;
pub use calibrate::{Calibrator, TickClock};
pub use delay::DelayPlan;
pub use hal::*;
pub use pit::Pit;
pub use sleep_queue::*;
pub use tick::TickCounter;
pub use timer::*;
