//! Configuration structures for the timer subsystem and its host daemon.
//!
//! Supports TOML deserialization with sensible defaults for
//! development and explicit values for deployment.

use crate::error::{TimerError, TimerResult};
use crate::time::{
    DEFAULT_FREQUENCY_HZ, MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ, PIT_BASE_HZ, TIMER_VECTOR,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Hardware timer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Tick rate in interrupts per second (19..=1000).
    pub frequency_hz: u32,

    /// Input clock of the programmable interval timer.
    pub base_clock_hz: u32,

    /// Interrupt vector the timer handler is bound to.
    pub vector: u8,

    /// Sleep queue slots reserved up front.
    pub queue_capacity: usize,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            base_clock_hz: PIT_BASE_HZ,
            vector: TIMER_VECTOR,
            queue_capacity: 64,
        }
    }
}

impl TimerConfig {
    /// Check the tick rate against what the counter can produce.
    ///
    /// # Errors
    ///
    /// Returns an error if the frequency is outside 19..=1000 Hz or the
    /// resulting divisor does not fit the 16-bit counter.
    pub fn validate(&self) -> TimerResult<()> {
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&self.frequency_hz) {
            return Err(TimerError::FrequencyOutOfRange {
                hz: self.frequency_hz,
            });
        }
        if self.base_clock_hz == 0 {
            return Err(TimerError::Config("base clock must be non-zero".into()));
        }
        let divisor = self.divisor();
        if divisor == 0 || divisor > u64::from(u16::MAX) {
            return Err(TimerError::DivisorOutOfRange {
                base_hz: self.base_clock_hz,
                hz: self.frequency_hz,
            });
        }
        debug!(
            frequency_hz = self.frequency_hz,
            divisor, "Timer configuration validated"
        );
        Ok(())
    }

    /// Counter reload value: base clock divided by the tick rate, rounded to nearest.
    #[must_use]
    pub fn divisor(&self) -> u64 {
        let hz = u64::from(self.frequency_hz.max(1));
        (u64::from(self.base_clock_hz) + hz / 2) / hz
    }
}

/// Boot-time calibration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Run the busy-wait calibration at boot.
    pub enabled: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One simulated sleeper run by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Context name used in logs.
    pub name: String,

    /// Time slept per iteration.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Number of sleeps before the context exits.
    pub repeat: u32,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            name: String::from("sleeper"),
            interval: Duration::from_millis(50),
            repeat: 10,
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Ticks between periodic status lines.
    pub status_interval_ticks: u64,

    /// Hardware timer configuration.
    pub timer: TimerConfig,

    /// Calibration settings.
    pub calibration: CalibrationConfig,

    /// Sleepers to run.
    pub workloads: Vec<WorkloadConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            status_interval_ticks: 100,
            timer: TimerConfig::default(),
            calibration: CalibrationConfig::default(),
            workloads: vec![
                WorkloadConfig {
                    name: String::from("fast"),
                    interval: Duration::from_millis(30),
                    repeat: 20,
                },
                WorkloadConfig {
                    name: String::from("slow"),
                    interval: Duration::from_millis(200),
                    repeat: 3,
                },
                WorkloadConfig {
                    name: String::from("spin"),
                    interval: Duration::from_micros(500),
                    repeat: 50,
                },
            ],
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
