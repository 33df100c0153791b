//! Deadlock detector
//!
//! Detection itself is a pure function of a [`Snapshot`]: build the wait-for
//! graph, look for a cycle. The [`Detector`] adds the bookkeeping around
//! repeated passes: it groups consecutive deadlocked passes into episodes and
//! decides when an episode has lasted long enough to be resolved
//! automatically.

use crate::core::graph::WaitForGraph;
use crate::core::manager::Snapshot;
use crate::core::types::{Detection, ProcessId};
use std::time::{Duration, Instant};

/// Run one detection pass over a snapshot
///
/// Processes are visited in ascending id order, so the result is
/// deterministic for a given snapshot.
pub fn detect(snapshot: &Snapshot) -> Detection {
    detect_with_order(snapshot, &[])
}

/// Run one detection pass, starting the traversal from the processes in `order`
pub fn detect_with_order(snapshot: &Snapshot, order: &[ProcessId]) -> Detection {
    let graph = WaitForGraph::from_snapshot(snapshot);
    match graph.find_cycle_in_order(order) {
        Some(cycle) => {
            let waiting_for = cycle
                .iter()
                .filter_map(|&process| {
                    snapshot
                        .process(process)
                        .and_then(|view| view.waiting_on)
                        .map(|resource| (process, resource))
                })
                .collect();
            Detection {
                deadlocked: true,
                implicated: cycle,
                waiting_for,
            }
        }
        None => Detection::default(),
    }
}

/// How a detection pass relates to the previous ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No deadlock now, none before
    Clear,
    /// First pass of a new deadlock episode
    Started,
    /// The current episode is still going on
    Ongoing,
    /// The previous episode is over
    Ended,
}

#[derive(Debug, Clone, Copy)]
struct Episode {
    since: Instant,
    resolution_attempted: bool,
}

/// Episode tracker for periodic detection
#[derive(Debug)]
pub struct Detector {
    dwell: Duration,
    episode: Option<Episode>,
}

impl Detector {
    /// Create a detector that waits `dwell` before asking for auto-resolution
    pub fn new(dwell: Duration) -> Self {
        Detector {
            dwell,
            episode: None,
        }
    }

    /// Feed the result of a detection pass taken at `now`
    pub fn observe(&mut self, detection: &Detection, now: Instant) -> Observation {
        match (detection.deadlocked, self.episode.is_some()) {
            (true, false) => {
                self.episode = Some(Episode {
                    since: now,
                    resolution_attempted: false,
                });
                Observation::Started
            }
            (true, true) => Observation::Ongoing,
            (false, true) => {
                self.episode = None;
                Observation::Ended
            }
            (false, false) => Observation::Clear,
        }
    }

    /// Whether the current episode has persisted past the dwell time and has
    /// not been resolved yet
    pub fn resolution_due(&self, now: Instant) -> bool {
        self.episode.is_some_and(|episode| {
            !episode.resolution_attempted && now.saturating_duration_since(episode.since) >= self.dwell
        })
    }

    /// Remember that the current episode got its resolution attempt
    pub fn mark_resolved(&mut self) {
        if let Some(episode) = self.episode.as_mut() {
            episode.resolution_attempted = true;
        }
    }

    pub fn in_episode(&self) -> bool {
        self.episode.is_some()
    }

    /// Forget the current episode
    pub fn reset(&mut self) {
        self.episode = None;
    }
}
