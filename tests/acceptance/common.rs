//! Common utilities for acceptance tests.

#![allow(dead_code)]

use ktimer_common::{ContextState, Tick, TimerConfig, TIMER_VECTOR};
use ktimer_core::{TickClock, Timer};
use ktimer_sim::{ContextHandle, ContextId, SimMachine};
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on any wait for a context to change state.
pub const WAIT: Duration = Duration::from_secs(10);

/// Timer running on the simulated machine.
pub type SimTimer = Timer<SimMachine, SimMachine>;

/// A booted machine with the timer installed and no clock running.
pub struct Rig {
    pub machine: Arc<SimMachine>,
    pub timer: Arc<SimTimer>,
}

impl Rig {
    /// Boot at `frequency_hz` with the timer handler bound.
    pub fn boot(frequency_hz: u32) -> Self {
        let config = TimerConfig {
            frequency_hz,
            ..TimerConfig::default()
        };
        let machine = SimMachine::new();
        let timer = Arc::new(
            Timer::new(config, Arc::clone(&machine), Arc::clone(&machine)).expect("valid config"),
        );
        timer
            .install(&*machine, &*machine)
            .expect("timer vector free");
        Self { machine, timer }
    }

    /// Deliver `n` timer interrupts.
    pub fn tick(&self, n: u32) {
        for _ in 0..n {
            assert!(self.machine.raise(TIMER_VECTOR));
        }
    }

    /// Run `body` with the timer as a new context.
    pub fn spawn<F>(&self, name: &str, body: F) -> ContextHandle
    where
        F: FnOnce(&SimTimer) + Send + 'static,
    {
        let timer = Arc::clone(&self.timer);
        self.machine
            .spawn_context(name, move || body(&*timer))
            .expect("spawn context")
    }

    /// Spawn a context that sleeps `ticks` and wait until it is queued.
    pub fn spawn_sleeper(&self, name: &str, ticks: Tick) -> ContextHandle {
        let handle = self.spawn(name, move |timer| timer.sleep(ticks));
        self.wait_queued(handle.id());
        handle
    }

    /// Block until `id` is parked in the sleep queue.
    pub fn wait_queued(&self, id: ContextId) {
        assert!(
            self.machine
                .wait_for_state(id, ContextState::Queued, WAIT),
            "{id} never went to sleep"
        );
    }

    /// Contexts in the sleep queue, in wake order.
    pub fn queue_order(&self) -> Vec<(ContextId, Tick)> {
        self.timer
            .queued()
            .iter()
            .map(|e| (e.context, e.wake_tick))
            .collect()
    }
}

/// Clock with a fixed cost per busy-wait iteration, for reproducible
/// calibration.
pub struct FixedRateClock {
    now: Cell<u64>,
    units_per_tick: u64,
    units_per_loop: u64,
}

impl FixedRateClock {
    pub fn new(units_per_tick: u64, units_per_loop: u64) -> Self {
        Self {
            now: Cell::new(0),
            units_per_tick,
            units_per_loop,
        }
    }
}

impl TickClock for FixedRateClock {
    fn ticks(&self) -> Tick {
        (self.now.get() / self.units_per_tick) as Tick
    }

    fn relax(&self) {
        self.now.set(self.now.get() + 1);
    }

    fn spin(&self, loops: u32) {
        self.now
            .set(self.now.get() + u64::from(loops) * self.units_per_loop);
    }
}
