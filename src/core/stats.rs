use chrono::Utc;
use serde::Serialize;

/// Running totals of a simulation
///
/// Only the engine thread writes these. Observers get cloned copies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    /// Number of deadlock episodes detected
    pub deadlocks_detected: u64,
    /// Number of resolutions that completed (including safe-state no-ops)
    pub resolutions_applied: u64,
    /// Number of resolutions that found no eligible victim
    pub resolutions_failed: u64,
    /// Duration of every applied resolution, in milliseconds
    pub resolution_durations_ms: Vec<f64>,
    /// RFC 3339 time of every detected episode
    pub deadlock_timestamps: Vec<String>,
}

impl Stats {
    /// Arithmetic mean of the resolution durations
    pub fn mean_resolution_ms(&self) -> Option<f64> {
        if self.resolution_durations_ms.is_empty() {
            return None;
        }
        let total: f64 = self.resolution_durations_ms.iter().sum();
        Some(total / self.resolution_durations_ms.len() as f64)
    }

    pub(crate) fn record_deadlock(&mut self) {
        self.deadlocks_detected += 1;
        self.deadlock_timestamps.push(Utc::now().to_rfc3339());
    }

    pub(crate) fn record_resolution(&mut self, duration_ms: f64) {
        self.resolutions_applied += 1;
        self.resolution_durations_ms.push(duration_ms);
    }

    pub(crate) fn record_failure(&mut self) {
        self.resolutions_failed += 1;
    }
}
