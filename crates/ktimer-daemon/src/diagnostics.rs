//! Run reporting for the daemon.
//!
//! Workload contexts publish progress through [`WorkloadProgress`]; at the
//! end of a run everything is folded into a [`RunReport`] printed as text or
//! JSON.

use ktimer_common::{Tick, TimerStatsSnapshot, WorkloadConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

/// Why the daemon stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every workload ran to completion.
    WorkloadsComplete,
    /// `--max-ticks` was reached.
    TickLimit,
    /// SIGINT/SIGTERM or a manual request.
    Signal,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::WorkloadsComplete => write!(f, "workloads complete"),
            StopReason::TickLimit => write!(f, "tick limit reached"),
            StopReason::Signal => write!(f, "shutdown requested"),
        }
    }
}

/// Progress of one workload context, updated as it runs.
#[derive(Debug, Default)]
pub struct WorkloadProgress {
    completed: AtomicU32,
    ticks_elapsed: AtomicI64,
}

impl WorkloadProgress {
    /// Record one finished sleep that took `ticks`.
    pub fn record_sleep(&self, ticks: Tick) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.ticks_elapsed.fetch_add(ticks, Ordering::Relaxed);
    }

    /// Sleeps finished so far.
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Ticks spent in finished sleeps.
    pub fn ticks_elapsed(&self) -> Tick {
        self.ticks_elapsed.load(Ordering::Relaxed)
    }
}

/// Final state of one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadReport {
    /// Workload name.
    pub name: String,
    /// Requested interval, human-readable.
    pub interval: String,
    /// Sleeps requested.
    pub repeat: u32,
    /// Sleeps finished.
    pub completed: u32,
    /// Ticks spent in finished sleeps.
    pub ticks_elapsed: Tick,
}

impl WorkloadReport {
    /// Combine a workload's configuration with its progress.
    pub fn new(config: &WorkloadConfig, progress: &WorkloadProgress) -> Self {
        Self {
            name: config.name.clone(),
            interval: humantime::format_duration(config.interval).to_string(),
            repeat: config.repeat,
            completed: progress.completed(),
            ticks_elapsed: progress.ticks_elapsed(),
        }
    }

    /// True if every requested sleep finished.
    pub fn is_complete(&self) -> bool {
        self.completed >= self.repeat
    }
}

/// Everything the daemon reports at exit.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Tick rate.
    pub frequency_hz: u32,
    /// PIT reload value.
    pub divisor: u16,
    /// Calibrated spin rate, if calibration ran.
    pub loops_per_second: Option<u64>,
    /// Wall-clock run time in milliseconds.
    pub uptime_ms: u64,
    /// Why the run ended.
    pub stop_reason: StopReason,
    /// Timer counters.
    pub stats: TimerStatsSnapshot,
    /// Per-workload results.
    pub workloads: Vec<WorkloadReport>,
}

impl RunReport {
    /// Uptime as a `Duration`.
    pub fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime_ms)
    }
}

/// Human-readable multi-line report.
pub fn format_text(report: &RunReport) -> String {
    let stats = &report.stats;
    let mut output = String::new();

    output.push_str(&format!("{stats}\n"));
    output.push_str(&format!(
        "  frequency: {} Hz (divisor {})\n",
        report.frequency_hz, report.divisor
    ));
    match (stats.loops_per_tick, report.loops_per_second) {
        (Some(lpt), Some(lps)) => output.push_str(&format!(
            "  calibration: {lpt} loops/tick ({lps} loops/s)\n"
        )),
        _ => output.push_str("  calibration: not calibrated\n"),
    }
    output.push_str(&format!(
        "  interrupts: {}, wakeups: {}, peak queue depth: {}\n",
        stats.interrupts, stats.wakeups, stats.peak_queue_depth
    ));
    output.push_str(&format!(
        "  sleeps: {} queued, {} spun ({} loops), {} no-op\n",
        stats.queued_sleeps, stats.spin_sleeps, stats.spin_loops, stats.noop_sleeps
    ));

    for w in &report.workloads {
        output.push_str(&format!(
            "  workload {}: {}/{} x {}, {} ticks\n",
            w.name, w.completed, w.repeat, w.interval, w.ticks_elapsed
        ));
    }

    output.push_str(&format!(
        "stopped: {} after {}\n",
        report.stop_reason,
        humantime::format_duration(report.uptime())
    ));
    output
}

/// Report as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn format_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
