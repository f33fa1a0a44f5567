//! The timer subsystem instance.
//!
//! [`Timer`] owns all timer state: the tick counter, the calibrated spin
//! rate, and the sleep queue. Normal-context code touches the queue only
//! with interrupts disabled; the interrupt handler is the only other
//! accessor, so on a uniprocessor no further locking is required. The
//! queue still sits behind a `Mutex` so the type is `Sync`, but that lock
//! is never contended unless the masking contract is broken.
//!
//! Lifecycle:
//! 1. [`Timer::new`] validates the configuration.
//! 2. [`Timer::install`] programs the PIT and binds [`Timer::on_interrupt`].
//! 3. [`Timer::calibrate`] measures `loops_per_tick` with interrupts live.
//! 4. Sleep entry points are usable; [`Timer::uninstall`] unbinds the handler.

use crate::busy_wait::busy_wait;
use crate::calibrate::{Calibrator, TickClock};
use crate::delay::DelayPlan;
use crate::hal::{InterruptControl, InterruptRegistry, IntrLevel, PortIo, Scheduler};
use crate::pit::{self, Pit};
use crate::sleep_queue::{SleepQueue, WaitEntry};
use crate::tick::TickCounter;
use ktimer_common::{Tick, TimeUnit, TimerConfig, TimerResult, TimerStats, TimerStatsSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, TryLockError};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Name the handler is registered under.
pub const HANDLER_NAME: &str = "8254 Timer";

/// Tick counter, calibrated busy-wait, and sleep queue for one CPU.
pub struct Timer<C: InterruptControl, S: Scheduler> {
    config: TimerConfig,
    divisor: u16,
    cpu: Arc<C>,
    scheduler: Arc<S>,
    ticks: TickCounter,
    /// Written once by calibration.
    loops_per_tick: OnceLock<u32>,
    sleepers: Mutex<SleepQueue<S::Context>>,
    stats: TimerStats,
    warned_uncalibrated: AtomicBool,
}

impl<C, S> Timer<C, S>
where
    C: InterruptControl + 'static,
    S: Scheduler + 'static,
{
    /// Create a timer for the given CPU and scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the frequency is out of range or the divisor
    /// does not fit the counter.
    pub fn new(config: TimerConfig, cpu: Arc<C>, scheduler: Arc<S>) -> TimerResult<Self> {
        let divisor = pit::divisor_for(&config)?;
        debug!(
            frequency_hz = config.frequency_hz,
            divisor,
            vector = config.vector,
            "Timer created"
        );

        Ok(Self {
            sleepers: Mutex::new(SleepQueue::with_capacity(config.queue_capacity)),
            config,
            divisor,
            cpu,
            scheduler,
            ticks: TickCounter::new(),
            loops_per_tick: OnceLock::new(),
            stats: TimerStats::new(),
            warned_uncalibrated: AtomicBool::new(false),
        })
    }

    /// Program the PIT and bind the interrupt handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry refuses the vector.
    pub fn install<P, R>(self: &Arc<Self>, ports: &P, registry: &R) -> TimerResult<()>
    where
        P: PortIo + ?Sized,
        R: InterruptRegistry + ?Sized,
    {
        Pit::new(ports).set_divider(self.divisor);

        let timer = Arc::clone(self);
        registry.register(
            self.config.vector,
            HANDLER_NAME,
            Arc::new(move || timer.on_interrupt()),
        )?;

        info!(
            frequency_hz = self.config.frequency_hz,
            vector = self.config.vector,
            "Timer installed"
        );
        Ok(())
    }

    /// Unbind the interrupt handler. Ticks stop advancing.
    pub fn uninstall<R: InterruptRegistry + ?Sized>(&self, registry: &R) {
        registry.unregister(self.config.vector);
        info!(vector = self.config.vector, "Timer uninstalled");
    }

    /// Timer interrupt handler.
    ///
    /// Advances the tick count, runs scheduler accounting, and releases
    /// every sleeper whose wake tick has been reached. Does not allocate,
    /// block, or log; the work done is proportional to the number of
    /// sleepers released. A drain skipped because the queue was held is
    /// only counted, and reported later by [`Timer::print_stats`].
    pub fn on_interrupt(&self) {
        let now = self.ticks.advance();
        self.scheduler.on_tick();

        let scheduler = &self.scheduler;
        let released = match self.sleepers.try_lock() {
            Ok(mut queue) => queue.drain_due(now, |ctx| scheduler.unblock(ctx)),
            Err(TryLockError::Poisoned(poisoned)) => poisoned
                .into_inner()
                .drain_due(now, |ctx| scheduler.unblock(ctx)),
            Err(TryLockError::WouldBlock) => {
                self.stats.record_deferred();
                0
            }
        };

        self.stats.record_interrupt(released);
    }

    /// Ticks since the timer was installed.
    pub fn ticks(&self) -> Tick {
        self.ticks.now(&*self.cpu)
    }

    /// Ticks elapsed since `since`, a value returned by [`Timer::ticks`].
    pub fn elapsed(&self, since: Tick) -> Tick {
        self.ticks.elapsed(&*self.cpu, since)
    }

    /// Suspend the calling context for approximately `ticks` ticks.
    ///
    /// Zero or negative counts return immediately. A wake tick past
    /// `Tick::MAX` is clamped there.
    pub fn sleep(&self, ticks: Tick) {
        let start = self.ticks();
        if ticks <= 0 {
            self.stats.record_noop();
            return;
        }

        let old_level = self.cpu.disable();

        let context = self.scheduler.current();
        let wake_tick = start.saturating_add(ticks);
        let depth = self.queue().insert(WaitEntry { wake_tick, context });
        self.stats.record_queued(depth);
        trace!(?context, wake_tick, depth, "Sleeping");

        self.scheduler.block();
        self.cpu.set_level(old_level);
    }

    /// Suspend for approximately `ms` milliseconds.
    pub fn sleep_ms(&self, ms: i64) {
        self.sleep_for(ms, TimeUnit::Millis.per_second());
    }

    /// Suspend for approximately `us` microseconds.
    pub fn sleep_us(&self, us: i64) {
        self.sleep_for(us, TimeUnit::Micros.per_second());
    }

    /// Suspend for approximately `ns` nanoseconds.
    pub fn sleep_ns(&self, ns: i64) {
        self.sleep_for(ns, TimeUnit::Nanos.per_second());
    }

    /// Suspend for approximately `duration`.
    pub fn sleep_duration(&self, duration: Duration) {
        self.sleep_ns(i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX));
    }

    /// Suspend for approximately `amount / denom` seconds.
    ///
    /// Whole ticks go through the sleep queue and yield the CPU; anything
    /// shorter is spun out in the caller using the calibrated rate.
    ///
    /// # Panics
    ///
    /// Panics if called with interrupts disabled, or if a sub-tick delay is
    /// requested with a `denom` that is not a multiple of 1000.
    pub fn sleep_for(&self, amount: i64, denom: i64) {
        assert_eq!(
            self.cpu.level(),
            IntrLevel::On,
            "timed sleep requires interrupts enabled"
        );

        match DelayPlan::for_duration(amount, denom, self.config.frequency_hz, self.spin_rate()) {
            DelayPlan::Ticks(ticks) => self.sleep(ticks),
            DelayPlan::Spin(loops) => {
                self.stats.record_spin(loops);
                busy_wait(loops);
            }
        }
    }

    /// Measure `loops_per_tick` against the live tick counter.
    ///
    /// Call once at boot, after [`Timer::install`].
    ///
    /// # Panics
    ///
    /// Panics if interrupts are disabled (ticks would never advance), if the
    /// timer is already calibrated, or if the search overflows.
    pub fn calibrate(&self) -> u32 {
        assert_eq!(
            self.cpu.level(),
            IntrLevel::On,
            "calibration requires interrupts enabled"
        );
        info!("Calibrating timer");

        let clock = LiveClock {
            counter: &self.ticks,
        };
        let loops_per_tick = Calibrator::new(&clock).run();
        self.store_calibration(loops_per_tick)
    }

    /// Calibrate against an external clock instead of the live counter.
    ///
    /// # Panics
    ///
    /// Panics if the timer is already calibrated.
    pub fn calibrate_with<K: TickClock + ?Sized>(&self, clock: &K) -> u32 {
        let loops_per_tick = Calibrator::new(clock).run();
        self.store_calibration(loops_per_tick)
    }

    fn store_calibration(&self, loops_per_tick: u32) -> u32 {
        assert!(
            self.loops_per_tick.set(loops_per_tick).is_ok(),
            "timer calibrated twice"
        );
        info!(
            loops_per_tick,
            loops_per_second = u64::from(loops_per_tick) * u64::from(self.config.frequency_hz),
            "Timer calibrated"
        );
        loops_per_tick
    }

    /// Calibrated busy-wait iterations per tick, once calibration has run.
    pub fn loops_per_tick(&self) -> Option<u32> {
        self.loops_per_tick.get().copied()
    }

    /// Spin rate for sub-tick delays; zero until calibrated.
    fn spin_rate(&self) -> u32 {
        if let Some(&loops_per_tick) = self.loops_per_tick.get() {
            return loops_per_tick;
        }
        if !self.warned_uncalibrated.swap(true, Ordering::Relaxed) {
            warn!("Sub-tick sleep before calibration; delay will be skipped");
        }
        0
    }

    /// Number of contexts parked in the sleep queue.
    pub fn sleepers(&self) -> usize {
        let old_level = self.cpu.disable();
        let len = self.queue().len();
        self.cpu.set_level(old_level);
        len
    }

    /// Wake tick of the next sleeper, if any.
    pub fn next_wakeup(&self) -> Option<Tick> {
        let old_level = self.cpu.disable();
        let next = self.queue().next_wake();
        self.cpu.set_level(old_level);
        next
    }

    /// Copy of the sleep queue in wake order.
    pub fn queued(&self) -> Vec<WaitEntry<S::Context>> {
        let old_level = self.cpu.disable();
        let entries = self.queue().iter().copied().collect();
        self.cpu.set_level(old_level);
        entries
    }

    /// Snapshot of the cumulative counters.
    pub fn stats(&self) -> TimerStatsSnapshot {
        self.stats.snapshot(self.ticks(), self.loops_per_tick())
    }

    /// Log and return the cumulative statistics.
    pub fn print_stats(&self) -> TimerStatsSnapshot {
        let snapshot = self.stats();
        if snapshot.deferred_drains > 0 {
            error!(
                deferred = snapshot.deferred_drains,
                "Sleep queue was held with interrupts enabled; wakeups were deferred"
            );
        }
        info!(
            interrupts = snapshot.interrupts,
            wakeups = snapshot.wakeups,
            "{snapshot}"
        );
        snapshot
    }

    /// Tick rate in Hz.
    pub fn frequency(&self) -> u32 {
        self.config.frequency_hz
    }

    /// PIT reload value in use.
    pub fn divisor(&self) -> u16 {
        self.divisor
    }

    /// Active configuration.
    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    fn queue(&self) -> MutexGuard<'_, SleepQueue<S::Context>> {
        self.sleepers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The live tick counter paired with the real busy-wait loop.
struct LiveClock<'a> {
    counter: &'a TickCounter,
}

impl TickClock for LiveClock<'_> {
    fn ticks(&self) -> Tick {
        self.counter.raw()
    }

    fn spin(&self, loops: u32) {
        busy_wait(i64::from(loops));
    }
}
