//! Simulation configuration
//!
//! Everything an outer layer (CLI, config file, UI) can choose before a run:
//! process and resource counts, the active resolution strategy, speed,
//! automatic detection and the workload profile. Scenario presets only
//! rewrite these values.

use crate::core::error::SimError;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;

pub const MIN_PROCESSES: usize = 1;
/// One process per letter of the alphabet
pub const MAX_PROCESSES: usize = 26;
pub const MIN_RESOURCES: usize = 1;
pub const MAX_RESOURCES: usize = 26;
pub const MIN_SPEED: f64 = 0.05;
pub const MAX_SPEED: f64 = 100.0;

/// Deadlock resolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Release everything and let processes re-acquire in arrival order
    #[default]
    Fifo,
    /// Banker's safety test; roll back only when the state is unsafe
    #[serde(alias = "banker")]
    #[value(alias = "banker")]
    SafetyCheck,
    /// Roll back and restart every process with the canonical resource order
    Ordering,
    /// Revoke everything one waiting process holds and send it back to idle
    Preempt,
    /// Terminate the implicated process holding the fewest resources
    Abort,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Fifo => "fifo",
            Strategy::SafetyCheck => "safety-check",
            Strategy::Ordering => "ordering",
            Strategy::Preempt => "preempt",
            Strategy::Abort => "abort",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and appetite of the simulated workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadProfile {
    /// Requests ceil(60%) of the resources per cycle
    #[default]
    Standard,
    /// Requests ceil(70%) of the resources per cycle and holds them longer
    Aggressive,
}

/// Millisecond ranges for every timed phase of an actor cycle, at speed 1.0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub think: Range<u64>,
    pub hold: Range<u64>,
    pub critical: Range<u64>,
    pub cooldown: Range<u64>,
}

impl WorkloadProfile {
    pub fn timings(&self) -> Timings {
        let hold = match self {
            WorkloadProfile::Standard => 600..1200,
            WorkloadProfile::Aggressive => 800..1200,
        };
        Timings {
            think: 800..1400,
            hold,
            critical: 1200..2200,
            cooldown: 200..500,
        }
    }

    /// Number of resources an actor requests per cycle out of `total`
    pub fn resources_per_cycle(&self, total: usize) -> usize {
        // ceil(total * tenths / 10) in integers
        let tenths = match self {
            WorkloadProfile::Standard => 6,
            WorkloadProfile::Aggressive => 7,
        };
        (total * tenths).div_ceil(10).min(total)
    }
}

/// Scenario presets; they only adjust counts, strategy, speed and profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    Random,
    DeadlockProne,
    Safe,
    Race,
}

/// Configuration of one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub processes: usize,
    pub resources: usize,
    pub strategy: Strategy,
    /// Multiplier applied to every actor delay (2.0 runs twice as fast)
    pub speed: f64,
    /// Run detection on a fixed interval and auto-resolve persistent deadlocks
    pub auto_detect: bool,
    pub detection_interval_ms: u64,
    /// How long a deadlock must persist before auto-resolution kicks in
    pub resolution_dwell_ms: u64,
    pub profile: WorkloadProfile,
    /// Seed for actor timing and initial permutations
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            processes: 2,
            resources: 2,
            strategy: Strategy::Fifo,
            speed: 1.0,
            auto_detect: true,
            detection_interval_ms: 800,
            resolution_dwell_ms: 1000,
            profile: WorkloadProfile::Standard,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults; unknown fields are rejected.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not parse
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Check every bound before a run starts
    pub fn validate(&self) -> Result<(), SimError> {
        if !(MIN_PROCESSES..=MAX_PROCESSES).contains(&self.processes) {
            return Err(SimError::InvalidConfiguration(format!(
                "process count {} outside {MIN_PROCESSES}..={MAX_PROCESSES}",
                self.processes
            )));
        }
        if !(MIN_RESOURCES..=MAX_RESOURCES).contains(&self.resources) {
            return Err(SimError::InvalidConfiguration(format!(
                "resource count {} outside {MIN_RESOURCES}..={MAX_RESOURCES}",
                self.resources
            )));
        }
        validate_speed(self.speed)?;
        if self.detection_interval_ms == 0 {
            return Err(SimError::InvalidConfiguration(
                "detection interval must be at least 1 ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Rewrite counts, strategy, speed and profile according to a preset
    pub fn apply_scenario(&mut self, scenario: Scenario) {
        match scenario {
            Scenario::DeadlockProne => {
                self.resources = 2.max((self.processes as f64 / 1.5).ceil() as usize);
                self.speed = 0.25;
                self.strategy = Strategy::Fifo;
                self.profile = WorkloadProfile::Aggressive;
            }
            Scenario::Safe => {
                self.resources = (self.processes + 2).max(5);
                self.speed = 1.0;
                self.strategy = Strategy::Ordering;
                self.profile = WorkloadProfile::Standard;
            }
            Scenario::Race => {
                self.speed = 2.0;
                self.strategy = Strategy::Abort;
            }
            Scenario::Random => {
                self.speed = 1.0;
                self.strategy = Strategy::Fifo;
            }
        }
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn resolution_dwell(&self) -> Duration {
        Duration::from_millis(self.resolution_dwell_ms)
    }
}

pub(crate) fn validate_speed(speed: f64) -> Result<(), SimError> {
    if !speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        return Err(SimError::InvalidConfiguration(format!(
            "speed {speed} outside {MIN_SPEED}..={MAX_SPEED}"
        )));
    }
    Ok(())
}
