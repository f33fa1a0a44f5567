//! Signal handling for graceful daemon shutdown.
//!
//! SIGINT and SIGTERM set an atomic flag from the handler; the main loop
//! polls it between status checks. Nothing else happens in signal context.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Set from the raw signal handlers.
static SIGNALLED: AtomicBool = AtomicBool::new(false);

/// Number of the last signal caught, 0 if none.
static LAST_SIGNAL: AtomicU32 = AtomicU32::new(0);

/// Signal types that stop the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
}

impl SignalKind {
    #[cfg(unix)]
    fn from_raw(signum: i32) -> Option<Self> {
        match signum {
            libc::SIGTERM => Some(Self::Terminate),
            libc::SIGINT => Some(Self::Interrupt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Shutdown flag shared between the signal handlers and the main loop.
#[derive(Clone, Debug, Default)]
pub struct SignalHandler {
    manual: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Register SIGINT and SIGTERM handlers.
    ///
    /// On non-Unix platforms only [`SignalHandler::request_shutdown`] works.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a handler cannot be installed.
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        register_unix_handlers()?;

        Ok(Self::default())
    }

    /// True once a stop signal arrived or shutdown was requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.manual.load(Ordering::Relaxed) || SIGNALLED.load(Ordering::Relaxed)
    }

    /// The signal that requested shutdown, if any.
    pub fn last_signal(&self) -> Option<SignalKind> {
        #[cfg(unix)]
        {
            let raw = LAST_SIGNAL.load(Ordering::Relaxed);
            i32::try_from(raw).ok().and_then(SignalKind::from_raw)
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    /// Manually request shutdown.
    pub fn request_shutdown(&self) {
        debug!("Shutdown requested");
        self.manual.store(true, Ordering::Relaxed);
    }
}

#[cfg(unix)]
extern "C" fn on_stop_signal(signum: libc::c_int) {
    // Async-signal-safe: atomics only.
    LAST_SIGNAL.store(u32::try_from(signum).unwrap_or(0), Ordering::Relaxed);
    SIGNALLED.store(true, Ordering::Relaxed);
}

#[cfg(unix)]
fn register_unix_handlers() -> std::io::Result<()> {
    for signum in [libc::SIGTERM, libc::SIGINT] {
        // SAFETY: the handler only touches atomics, which is async-signal-safe.
        let previous = unsafe { libc::signal(signum, on_stop_signal as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }
    debug!("Unix signal handlers registered");
    Ok(())
}
