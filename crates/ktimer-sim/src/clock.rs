//! Periodic interrupt source.
//!
//! A host thread that calls a tick callback once per period, standing in for
//! the PIT output edge. Ticks are scheduled against absolute deadlines so a
//! slow callback does not make the clock drift; if the thread falls more than
//! a period behind it skips ahead instead of bursting.

use ktimer_common::{TimerError, TimerResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shared between the owner and the clock thread.
#[derive(Debug, Default)]
struct ClockState {
    stop_requested: AtomicBool,
    edges: AtomicU64,
    missed: AtomicU64,
}

/// Handle to a running clock thread.
pub struct ClockThread {
    state: Arc<ClockState>,
    period: Duration,
    handle: Option<JoinHandle<()>>,
}

impl ClockThread {
    /// Start calling `on_edge` every `period`.
    ///
    /// The thread also stops on its own once `on_edge` returns `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the period is zero or the thread cannot be spawned.
    pub fn start<F>(period: Duration, on_edge: F) -> TimerResult<Self>
    where
        F: Fn() -> bool + Send + 'static,
    {
        if period.is_zero() {
            return Err(TimerError::Hardware("clock period must be non-zero".into()));
        }

        info!(period_us = period.as_micros(), "Starting clock");
        let state = Arc::new(ClockState::default());
        let thread_state = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name("ktimer-clock".into())
            .spawn(move || {
                debug!("Clock thread started");
                let mut deadline = Instant::now() + period;

                while !thread_state.stop_requested.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    }
                    if thread_state.stop_requested.load(Ordering::Acquire) {
                        break;
                    }

                    thread_state.edges.fetch_add(1, Ordering::Relaxed);
                    if !on_edge() {
                        break;
                    }

                    deadline += period;
                    let now = Instant::now();
                    if now > deadline + period {
                        thread_state.missed.fetch_add(1, Ordering::Relaxed);
                        deadline = now + period;
                    }
                }
                debug!("Clock thread stopped");
            })
            .map_err(|e| TimerError::Hardware(format!("Failed to spawn clock thread: {e}")))?;

        Ok(Self {
            state,
            period,
            handle: Some(handle),
        })
    }

    /// Interval between edges.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Edges delivered so far.
    pub fn edges(&self) -> u64 {
        self.state.edges.load(Ordering::Relaxed)
    }

    /// Times the thread fell behind and skipped ahead.
    pub fn missed(&self) -> u64 {
        self.state.missed.load(Ordering::Relaxed)
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.state.stop_requested.store(true, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            // Dropped from inside the callback: nothing to wait for.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if let Err(e) = handle.join() {
                warn!("Clock thread panicked: {:?}", e);
            }
            info!(edges = self.edges(), missed = self.missed(), "Clock stopped");
        }
    }
}

impl Drop for ClockThread {
    fn drop(&mut self) {
        self.stop();
    }
}
