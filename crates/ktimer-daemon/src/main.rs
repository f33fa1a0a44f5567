//! ktimer daemon entry point.
//!
//! Boots the timer subsystem on the simulated machine, runs the configured
//! sleeper workloads as kernel contexts, and reports what the timer did.

mod diagnostics;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use ktimer_common::{DaemonConfig, Tick, WorkloadConfig};
use ktimer_core::Timer;
use ktimer_sim::{ContextHandle, SimMachine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::diagnostics::{
    format_json, format_text, RunReport, StopReason, WorkloadProgress, WorkloadReport,
};
use crate::signals::SignalHandler;

type SimTimer = Timer<SimMachine, SimMachine>;

/// How often the main loop checks for completion and signals.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// ktimer daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "ktimerd",
    about = "Kernel timer daemon - PIT tick counter, calibrated busy-wait, and sleep queue on a simulated CPU",
    version,
    long_about = None
)]
struct Args {
    /// Path to a daemon configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tick frequency in Hz (overrides config file).
    #[arg(long, short = 'f', value_name = "HZ")]
    frequency: Option<u32>,

    /// Stop after this many ticks (0 = run until workloads finish).
    #[arg(long, default_value = "0")]
    max_ticks: Tick,

    /// Skip busy-wait calibration.
    #[arg(long)]
    no_calibrate: bool,

    /// Print the final report as JSON.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ktimer daemon");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config
        .timer
        .validate()
        .context("Invalid timer configuration")?;

    info!(
        frequency_hz = config.timer.frequency_hz,
        workloads = config.workloads.len(),
        calibrate = config.calibration.enabled,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let report = run_daemon(&config, args.max_ticks, &signal_handler)?;

    if let Some(signal) = signal_handler.last_signal() {
        info!(%signal, "Stopped by signal");
    }

    if args.json {
        println!(
            "{}",
            format_json(&report).context("Failed to serialize report")?
        );
    } else {
        print!("{}", format_text(&report));
    }

    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "ktimerd={level},ktimer_core={level},ktimer_sim={level},ktimer_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `KTIMER_CONFIG_PATH` environment variable
/// 3. `/etc/ktimer/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<DaemonConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return DaemonConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("KTIMER_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from KTIMER_CONFIG_PATH");
            return DaemonConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from KTIMER_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "KTIMER_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/ktimer/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return DaemonConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {config_path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(DaemonConfig::default())
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut DaemonConfig, args: &Args) {
    if let Some(hz) = args.frequency {
        config.timer.frequency_hz = hz;
    }
    if args.no_calibrate {
        config.calibration.enabled = false;
    }
}

/// Boot the timer, run the workloads, and tear everything down.
fn run_daemon(
    config: &DaemonConfig,
    max_ticks: Tick,
    signal_handler: &SignalHandler,
) -> Result<RunReport> {
    let started = Instant::now();

    let machine = SimMachine::with_base_clock(config.timer.base_clock_hz);
    let timer = Arc::new(
        Timer::new(
            config.timer.clone(),
            Arc::clone(&machine),
            Arc::clone(&machine),
        )
        .context("Failed to create timer")?,
    );
    timer
        .install(&*machine, &*machine)
        .context("Failed to install timer")?;
    machine
        .start_clock(config.timer.vector)
        .context("Failed to start clock")?;

    if config.calibration.enabled {
        timer.calibrate();
    } else {
        warn!("Calibration disabled, sub-tick sleeps will not delay");
    }

    let mut contexts = Vec::with_capacity(config.workloads.len());
    for workload in &config.workloads {
        let progress = Arc::new(WorkloadProgress::default());
        let handle = spawn_workload(&machine, &timer, workload, Arc::clone(&progress))?;
        contexts.push((workload, progress, handle));
    }
    info!(contexts = contexts.len(), "Workloads started");

    let status_every = Tick::try_from(config.status_interval_ticks)
        .unwrap_or(Tick::MAX)
        .max(1);
    let mut next_status = status_every;

    let stop_reason = loop {
        if signal_handler.shutdown_requested() {
            break StopReason::Signal;
        }
        if contexts.iter().all(|(_, _, handle)| handle.is_finished()) {
            break StopReason::WorkloadsComplete;
        }

        let now = timer.ticks();
        if max_ticks > 0 && now >= max_ticks {
            info!(ticks = now, "Maximum tick count reached");
            signal_handler.request_shutdown();
            break StopReason::TickLimit;
        }
        if now >= next_status {
            info!(
                ticks = now,
                sleepers = timer.sleepers(),
                next_wakeup = ?timer.next_wakeup(),
                "Periodic status"
            );
            next_status = now.saturating_add(status_every);
        }

        std::thread::sleep(POLL_INTERVAL);
    };
    info!(reason = %stop_reason, "Shutting down...");

    let mut workloads = Vec::with_capacity(contexts.len());
    for (workload, progress, handle) in contexts {
        if !handle.is_finished() {
            warn!(workload = %workload.name, "Workload still sleeping at shutdown");
        } else if handle.join().is_err() {
            warn!(workload = %workload.name, "Workload context panicked");
        }
        workloads.push(WorkloadReport::new(workload, &progress));
    }
    let incomplete = workloads.iter().filter(|w| !w.is_complete()).count();
    if incomplete > 0 {
        warn!(incomplete, "Some workloads did not finish");
    }

    timer.uninstall(&*machine);
    machine.power_off();

    let stats = timer.print_stats();
    let report = RunReport {
        frequency_hz: timer.frequency(),
        divisor: timer.divisor(),
        loops_per_second: stats.loops_per_second(timer.frequency()),
        uptime_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        stop_reason,
        stats,
        workloads,
    };

    info!(
        ticks = report.stats.ticks,
        wakeups = report.stats.wakeups,
        uptime_ms = report.uptime_ms,
        "Daemon shutdown complete"
    );
    Ok(report)
}

/// Run one workload as a kernel context: sleep `interval`, `repeat` times.
fn spawn_workload(
    machine: &SimMachine,
    timer: &Arc<SimTimer>,
    workload: &WorkloadConfig,
    progress: Arc<WorkloadProgress>,
) -> Result<ContextHandle> {
    let timer = Arc::clone(timer);
    let name = workload.name.clone();
    let interval = workload.interval;
    let repeat = workload.repeat;

    machine
        .spawn_context(&workload.name, move || {
            for iteration in 0..repeat {
                let start = timer.ticks();
                timer.sleep_duration(interval);
                let slept = timer.elapsed(start);
                progress.record_sleep(slept);
                trace!(workload = %name, iteration, slept, "Sleep finished");
            }
            debug!(workload = %name, "Workload finished");
        })
        .with_context(|| format!("Failed to spawn workload {}", workload.name))
}
