//! A uniprocessor simulated on host threads.
//!
//! Each kernel context is a host thread. "The CPU" is modelled by a single
//! interrupt flag that at most one party owns at a time:
//!
//! - a context that disables interrupts owns the flag until it re-enables
//!   them or blocks;
//! - an interrupt owns the flag while its handler runs.
//!
//! That gives the same exclusion the timer relies on from a real
//! uniprocessor: code running with interrupts disabled never overlaps the
//! interrupt handler, and interrupt delivery is latched until the flag is
//! released. Everything is guarded by one mutex with one condition variable.

use crate::clock::ClockThread;
use crate::ports::PitPorts;
use ktimer_common::{ContextState, ContextStatus, TimerError, TimerResult, PIT_BASE_HZ};
use ktimer_core::hal::{
    InterruptControl, InterruptRegistry, IntrLevel, IrqHandler, PortIo, Scheduler,
};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<Option<ContextId>> = const { Cell::new(None) };
    static IN_INTERRUPT: Cell<bool> = const { Cell::new(false) };
}

/// Identifier of a simulated execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn allocate() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Context of the calling thread, allocating one on first use.
    fn of_current_thread() -> Self {
        CURRENT.with(|current| {
            current.get().unwrap_or_else(|| {
                let id = Self::allocate();
                current.set(Some(id));
                id
            })
        })
    }

    /// Raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

fn in_interrupt() -> bool {
    IN_INTERRUPT.with(Cell::get)
}

/// Who holds the interrupt flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Context(ContextId),
    Interrupt,
}

#[derive(Debug)]
struct ContextEntry {
    name: String,
    status: ContextStatus,
}

/// Summary of one context for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    /// Context id.
    pub id: ContextId,
    /// Name given at spawn, or the host thread name.
    pub name: String,
    /// Current scheduling state.
    pub state: ContextState,
    /// Times released from the sleep queue.
    pub wakeups: u64,
}

#[derive(Default)]
struct MachineState {
    owner: Option<Owner>,
    contexts: HashMap<ContextId, ContextEntry>,
    wake_log: Vec<ContextId>,
    handlers: HashMap<u8, (&'static str, IrqHandler)>,
    tick_hooks: u64,
    interrupts: u64,
}

impl MachineState {
    fn register(&mut self, id: ContextId) {
        self.contexts.entry(id).or_insert_with(|| ContextEntry {
            name: thread::current().name().unwrap_or("anonymous").to_string(),
            status: ContextStatus::new(),
        });
    }

    fn transition(&mut self, id: ContextId, target: ContextState) {
        let Some(entry) = self.contexts.get_mut(&id) else {
            panic!("scheduler contract breach: {id} is not a known context");
        };
        if let Err(e) = entry.status.transition(target) {
            panic!("scheduler contract breach for {id} ({}): {e}", entry.name);
        }
    }

    fn state_of(&self, id: ContextId) -> Option<ContextState> {
        self.contexts.get(&id).map(|entry| entry.status.state())
    }
}

/// Releases the interrupt flag when a handler returns or unwinds.
struct InterruptFrame<'a> {
    machine: &'a SimMachine,
}

impl Drop for InterruptFrame<'_> {
    fn drop(&mut self) {
        IN_INTERRUPT.with(|flag| flag.set(false));
        let mut state = self.machine.lock();
        state.owner = None;
        state.interrupts += 1;
        self.machine.changed.notify_all();
    }
}

/// Handle to a spawned context.
pub struct ContextHandle {
    id: ContextId,
    join: JoinHandle<()>,
}

impl ContextHandle {
    /// Id of the spawned context.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Wait for the context body to return.
    pub fn join(self) -> thread::Result<()> {
        self.join.join()
    }

    /// True once the context body has returned.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Simulated uniprocessor: CPU interrupt flag, scheduler, interrupt
/// controller, and PIT.
pub struct SimMachine {
    base_clock_hz: u32,
    state: Mutex<MachineState>,
    changed: Condvar,
    ports: Mutex<PitPorts>,
    clock: Mutex<Option<ClockThread>>,
}

impl SimMachine {
    /// A machine whose PIT runs from the standard 1.193182 MHz input.
    pub fn new() -> Arc<Self> {
        Self::with_base_clock(PIT_BASE_HZ)
    }

    /// A machine whose PIT runs from `base_clock_hz`.
    pub fn with_base_clock(base_clock_hz: u32) -> Arc<Self> {
        debug!(base_clock_hz, "Simulated machine created");
        Arc::new(Self {
            base_clock_hz,
            state: Mutex::new(MachineState::default()),
            changed: Condvar::new(),
            ports: Mutex::new(PitPorts::new()),
            clock: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_while<'a, F>(
        &self,
        guard: MutexGuard<'a, MachineState>,
        condition: F,
    ) -> MutexGuard<'a, MachineState>
    where
        F: FnMut(&mut MachineState) -> bool,
    {
        self.changed
            .wait_while(guard, condition)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `body` as a new context on its own host thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the host thread cannot be spawned.
    pub fn spawn_context<F>(&self, name: &str, body: F) -> TimerResult<ContextHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = ContextId::allocate();
        self.lock().contexts.insert(
            id,
            ContextEntry {
                name: name.to_string(),
                status: ContextStatus::new(),
            },
        );

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                CURRENT.with(|current| current.set(Some(id)));
                body();
            })
            .map_err(|e| TimerError::Hardware(format!("Failed to spawn context {name}: {e}")))?;

        debug!(%id, name, "Context spawned");
        Ok(ContextHandle { id, join })
    }

    /// Deliver one interrupt on `vector` and run its handler to completion.
    ///
    /// Waits while interrupts are disabled. Returns `false` if no handler is
    /// bound.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a handler, or by a context that has
    /// interrupts disabled (the interrupt could never be delivered).
    pub fn raise(&self, vector: u8) -> bool {
        assert!(!in_interrupt(), "nested interrupt on vector {vector:#04x}");
        let caller = CURRENT.with(Cell::get);

        let handler = {
            let state = self.lock();
            if let Some(id) = caller {
                assert!(
                    state.owner != Some(Owner::Context(id)),
                    "{id} raised an interrupt with interrupts disabled"
                );
            }
            let mut state = self.wait_while(state, |s| s.owner.is_some());
            let Some((name, handler)) = state.handlers.get(&vector) else {
                trace!(vector, "Spurious interrupt");
                return false;
            };
            trace!(vector, name, "Interrupt");
            let handler = Arc::clone(handler);
            state.owner = Some(Owner::Interrupt);
            handler
        };

        IN_INTERRUPT.with(|flag| flag.set(true));
        let _frame = InterruptFrame { machine: self };
        handler();
        true
    }

    /// Start a clock thread raising `vector` at the rate the PIT was
    /// programmed for.
    ///
    /// # Errors
    ///
    /// Returns an error if the PIT has not been programmed or the clock is
    /// already running.
    pub fn start_clock(self: &Arc<Self>, vector: u8) -> TimerResult<()> {
        let period = self
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .period(self.base_clock_hz)
            .ok_or_else(|| TimerError::Hardware("PIT counter 0 was never programmed".into()))?;

        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        if clock.is_some() {
            return Err(TimerError::Hardware("clock already running".into()));
        }

        let machine: Weak<Self> = Arc::downgrade(self);
        *clock = Some(ClockThread::start(period, move || {
            machine.upgrade().is_some_and(|m| {
                m.raise(vector);
                true
            })
        })?);
        Ok(())
    }

    /// Stop the clock, if running.
    pub fn stop_clock(&self) {
        let clock = self
            .clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut clock) = clock {
            clock.stop();
        }
    }

    /// Stop the clock and drop every bound handler.
    pub fn power_off(&self) {
        self.stop_clock();
        let mut state = self.lock();
        state.handlers.clear();
        info!(interrupts = state.interrupts, "Machine powered off");
    }

    /// State of `id`, if it is known.
    pub fn context_state(&self, id: ContextId) -> Option<ContextState> {
        self.lock().state_of(id)
    }

    /// Wait up to `timeout` for `id` to reach `target`.
    pub fn wait_for_state(&self, id: ContextId, target: ContextState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.state_of(id) == Some(target) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Every known context, ordered by id.
    pub fn contexts(&self) -> Vec<ContextInfo> {
        let state = self.lock();
        let mut contexts: Vec<_> = state
            .contexts
            .iter()
            .map(|(&id, entry)| ContextInfo {
                id,
                name: entry.name.clone(),
                state: entry.status.state(),
                wakeups: entry.status.wakeups(),
            })
            .collect();
        contexts.sort_by_key(|c| c.id);
        contexts
    }

    /// Contexts in the order they were unblocked.
    pub fn wake_log(&self) -> Vec<ContextId> {
        self.lock().wake_log.clone()
    }

    /// Number of times scheduler tick accounting ran.
    pub fn tick_hooks(&self) -> u64 {
        self.lock().tick_hooks
    }

    /// Interrupts delivered to a handler.
    pub fn interrupts(&self) -> u64 {
        self.lock().interrupts
    }

    /// Name of the handler bound to `vector`.
    pub fn handler_name(&self, vector: u8) -> Option<&'static str> {
        self.lock().handlers.get(&vector).map(|(name, _)| *name)
    }

    /// Every port write so far.
    pub fn port_log(&self) -> Vec<(u16, u8)> {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .log()
            .to_vec()
    }

    /// Reload value the PIT was programmed with.
    pub fn pit_divisor(&self) -> Option<u16> {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .divisor()
    }

    /// Edge interval of the programmed PIT.
    pub fn pit_period(&self) -> Option<Duration> {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .period(self.base_clock_hz)
    }
}

impl Drop for SimMachine {
    fn drop(&mut self) {
        self.stop_clock();
    }
}

impl InterruptControl for SimMachine {
    fn level(&self) -> IntrLevel {
        if in_interrupt() {
            return IntrLevel::Off;
        }
        let me = ContextId::of_current_thread();
        if self.lock().owner == Some(Owner::Context(me)) {
            IntrLevel::Off
        } else {
            IntrLevel::On
        }
    }

    fn disable(&self) -> IntrLevel {
        if in_interrupt() {
            return IntrLevel::Off;
        }
        let me = ContextId::of_current_thread();
        let state = self.lock();
        if state.owner == Some(Owner::Context(me)) {
            return IntrLevel::Off;
        }
        let mut state = self.wait_while(state, |s| s.owner.is_some());
        state.owner = Some(Owner::Context(me));
        IntrLevel::On
    }

    fn enable(&self) -> IntrLevel {
        assert!(!in_interrupt(), "interrupts enabled inside a handler");
        let me = ContextId::of_current_thread();
        let mut state = self.lock();
        if state.owner == Some(Owner::Context(me)) {
            state.owner = None;
            self.changed.notify_all();
            IntrLevel::Off
        } else {
            IntrLevel::On
        }
    }
}

impl Scheduler for SimMachine {
    type Context = ContextId;

    fn current(&self) -> ContextId {
        let me = ContextId::of_current_thread();
        self.lock().register(me);
        me
    }

    fn block(&self) {
        let me = ContextId::of_current_thread();
        let mut state = self.lock();
        state.register(me);
        assert!(
            state.owner == Some(Owner::Context(me)),
            "{me} blocked with interrupts enabled"
        );

        state.transition(me, ContextState::Queued);
        state.owner = None;
        self.changed.notify_all();

        let mut state = self.wait_while(state, |s| {
            s.state_of(me) != Some(ContextState::Runnable) || s.owner.is_some()
        });
        state.owner = Some(Owner::Context(me));
        state.transition(me, ContextState::Running);
        self.changed.notify_all();
    }

    fn unblock(&self, context: ContextId) {
        let mut state = self.lock();
        state.transition(context, ContextState::Runnable);
        state.wake_log.push(context);
        self.changed.notify_all();
    }

    fn on_tick(&self) {
        self.lock().tick_hooks += 1;
    }
}

impl PortIo for SimMachine {
    fn outb(&self, port: u16, value: u8) {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(port, value);
    }
}

impl InterruptRegistry for SimMachine {
    fn register(&self, vector: u8, name: &'static str, handler: IrqHandler) -> TimerResult<()> {
        let mut state = self.lock();
        if state.handlers.contains_key(&vector) {
            return Err(TimerError::VectorInUse { vector });
        }
        state.handlers.insert(vector, (name, handler));
        debug!(vector, name, "Interrupt handler registered");
        Ok(())
    }

    fn unregister(&self, vector: u8) {
        if let Some((name, _)) = self.lock().handlers.remove(&vector) {
            debug!(vector, name, "Interrupt handler removed");
        }
    }
}
