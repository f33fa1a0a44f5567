//! Seams between the timer and the rest of the kernel.
//!
//! The timer never touches interrupt flags, I/O ports, or run queues
//! directly. Everything it needs from the CPU, the interrupt controller,
//! and the scheduler goes through these traits, so the same logic runs on
//! bare metal and on the hosted simulator.

use ktimer_common::TimerResult;
use std::fmt;
use std::sync::Arc;

/// Interrupt enable state of the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntrLevel {
    /// External interrupts are delivered.
    On,
    /// External interrupts are held off.
    Off,
}

impl fmt::Display for IntrLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// Masking of external interrupts on the (single) CPU.
///
/// On a uniprocessor this is the only mutual exclusion the timer uses:
/// code that disables interrupts cannot be interleaved with the timer
/// interrupt handler.
pub trait InterruptControl: Send + Sync {
    /// Current interrupt level of the caller.
    fn level(&self) -> IntrLevel;

    /// Disable interrupts, returning the previous level.
    fn disable(&self) -> IntrLevel;

    /// Enable interrupts, returning the previous level.
    fn enable(&self) -> IntrLevel;

    /// Restore a level previously returned by `disable` or `enable`.
    fn set_level(&self, level: IntrLevel) -> IntrLevel {
        match level {
            IntrLevel::On => self.enable(),
            IntrLevel::Off => self.disable(),
        }
    }
}

/// The parts of the scheduler the timer drives.
pub trait Scheduler: Send + Sync {
    /// Handle identifying an execution context.
    type Context: Copy + Eq + fmt::Debug + Send + 'static;

    /// The context that is executing this call.
    fn current(&self) -> Self::Context;

    /// Suspend the current context until someone calls `unblock` on it.
    ///
    /// Called with interrupts disabled; returns with interrupts still
    /// disabled once the context has been resumed.
    fn block(&self);

    /// Make a blocked context runnable. Callable from interrupt context.
    fn unblock(&self, context: Self::Context);

    /// Periodic accounting, invoked once per timer interrupt.
    fn on_tick(&self);
}

/// Byte-wide access to the I/O port space.
pub trait PortIo {
    /// Write `value` to `port`.
    fn outb(&self, port: u16, value: u8);
}

/// Callback bound to an interrupt vector.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Binding of handlers to external interrupt vectors.
pub trait InterruptRegistry {
    /// Bind `handler` to `vector`.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector is already bound.
    fn register(&self, vector: u8, name: &'static str, handler: IrqHandler) -> TimerResult<()>;

    /// Drop whatever handler is bound to `vector`.
    fn unregister(&self, vector: u8);
}
