//! Engine thread: the single consumer of every command
//!
//! Actor messages, control requests from the [`Simulation`](crate::Simulation)
//! handle and detection ticks all arrive here and are processed one at a time
//! to completion. This is what gives the simulation a single total order over
//! all lock mutations.

use crate::core::config::{SimConfig, Strategy};
use crate::core::detector::{self, Detector, Observation};
use crate::core::error::SimError;
use crate::core::manager::{ResourceManager, Snapshot};
use crate::core::stats::Stats;
use crate::core::types::{
    Detection, ProcessId, ProcessState, Resolution, ResourceId, SimEvent,
};
use crossbeam_channel::{Receiver, Sender, never, select, tick};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

/// Everything the engine thread can be asked to do
#[derive(Debug)]
pub enum Command {
    // From actors
    Request {
        process: ProcessId,
        resource: ResourceId,
        epoch: u64,
    },
    Release {
        process: ProcessId,
        resource: ResourceId,
        epoch: u64,
    },
    Claim {
        process: ProcessId,
        epoch: u64,
        resources: Vec<ResourceId>,
    },
    StateChanged {
        process: ProcessId,
        state: ProcessState,
    },
    Log {
        process: ProcessId,
        message: String,
    },

    // From the control handle
    Detect(Sender<Detection>),
    Resolve(Sender<Result<Resolution, SimError>>),
    SetSpeed(f64, Sender<Result<(), SimError>>),
    Snapshot(Sender<Snapshot>),
    Stats(Sender<Stats>),
    Subscribe(Sender<SimEvent>),
    Shutdown(Sender<Stats>),
}

/// Owner of the manager, the detector and the statistics
pub struct Coordinator {
    manager: ResourceManager,
    detector: Detector,
    stats: Stats,
    strategy: Strategy,
}

impl Coordinator {
    pub fn new(manager: ResourceManager, config: &SimConfig) -> Self {
        Coordinator {
            manager,
            detector: Detector::new(config.resolution_dwell()),
            stats: Stats::default(),
            strategy: config.strategy,
        }
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ResourceManager {
        &mut self.manager
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Process one command to completion
    ///
    /// # Returns
    /// `ControlFlow::Break` with the final statistics once shut down
    pub fn handle(&mut self, command: Command) -> ControlFlow<Stats> {
        match command {
            Command::Request {
                process,
                resource,
                epoch,
            } => {
                if self.manager.is_current(process, epoch) {
                    // Protocol errors stay inside the engine
                    let _ = self.manager.request(process, resource);
                }
            }
            Command::Release {
                process,
                resource,
                epoch,
            } => {
                if self.manager.is_current(process, epoch) {
                    let _ = self.manager.release(process, resource, false);
                }
            }
            Command::Claim {
                process,
                epoch,
                resources,
            } => {
                if self.manager.is_current(process, epoch) {
                    self.manager.set_claim(process, resources);
                }
            }
            Command::StateChanged { process, state } => self.manager.set_state(process, state),
            Command::Log { process, message } => self.manager.log(process, message),
            Command::Detect(reply) => {
                let detection = self.detect();
                let _ = reply.send(detection);
            }
            Command::Resolve(reply) => {
                let outcome = self.resolve();
                let _ = reply.send(outcome);
            }
            Command::SetSpeed(multiplier, reply) => {
                let _ = reply.send(self.manager.set_speed(multiplier));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.manager.snapshot());
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats.clone());
            }
            Command::Subscribe(subscriber) => self.manager.attach_subscriber(subscriber),
            Command::Shutdown(reply) => {
                let stats = self.shutdown();
                let _ = reply.send(stats.clone());
                return ControlFlow::Break(stats);
            }
        }
        ControlFlow::Continue(())
    }

    /// Run a detection pass now
    pub fn detect(&mut self) -> Detection {
        self.detect_at(Instant::now())
    }

    fn detect_at(&mut self, now: Instant) -> Detection {
        let detection = detector::detect(&self.manager.snapshot());
        match self.detector.observe(&detection, now) {
            Observation::Started => {
                self.stats.record_deadlock();
                self.manager.emit(SimEvent::DeadlockDetected {
                    cycle: detection.implicated.clone(),
                    waiting_for: detection.waiting_for.clone(),
                });
            }
            Observation::Ended => self.manager.emit(SimEvent::DeadlockCleared),
            Observation::Ongoing | Observation::Clear => {}
        }
        detection
    }

    /// Detect, then resolve with the active strategy
    ///
    /// # Errors
    /// `NoDeadlock` when the fresh pass finds no cycle, `ResolutionFailed`
    /// when the strategy has no eligible victim
    pub fn resolve(&mut self) -> Result<Resolution, SimError> {
        let detection = self.detect();
        self.resolve_detected(&detection)
    }

    fn resolve_detected(&mut self, detection: &Detection) -> Result<Resolution, SimError> {
        if !detection.deadlocked {
            return Err(SimError::NoDeadlock);
        }
        self.detector.mark_resolved();

        match self.manager.resolve(self.strategy, detection) {
            Ok(resolution) => {
                self.stats.record_resolution(resolution.duration_ms);
                self.manager.emit(SimEvent::ResolutionApplied {
                    strategy: resolution.strategy,
                    action: resolution.action.clone(),
                    duration_ms: resolution.duration_ms,
                });
                // A deadlock seen after this is a new episode
                if self.detector.in_episode() {
                    self.detector.reset();
                    self.manager.emit(SimEvent::DeadlockCleared);
                }
                Ok(resolution)
            }
            Err(e) => {
                self.stats.record_failure();
                self.manager.emit(SimEvent::ResolutionFailed {
                    strategy: self.strategy,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Periodic detection pass; auto-resolves an episode once past its dwell
    pub fn tick(&mut self, now: Instant) {
        let detection = self.detect_at(now);
        if detection.deadlocked && self.detector.resolution_due(now) {
            let _ = self.resolve_detected(&detection);
        }
    }

    /// Stop every actor, reset lock state and flush the event log
    pub fn shutdown(&mut self) -> Stats {
        self.manager.shutdown();
        self.detector.reset();
        if let Err(e) = self.manager.events().flush() {
            eprintln!("Warning: Failed to flush event log on shutdown: {e:?}");
        }
        self.stats.clone()
    }
}

/// Engine loop
///
/// # Arguments
/// * `coordinator` - State owned by the engine thread
/// * `commands` - The single command queue
/// * `interval` - Detection interval, or `None` with automatic detection off
///
/// # Returns
/// Final statistics once shut down or once every sender is gone
pub fn run(
    mut coordinator: Coordinator,
    commands: Receiver<Command>,
    interval: Option<Duration>,
) -> Stats {
    let ticker = match interval {
        Some(interval) => tick(interval),
        None => never(),
    };

    loop {
        select! {
            recv(commands) -> command => match command {
                Ok(command) => {
                    if let ControlFlow::Break(stats) = coordinator.handle(command) {
                        return stats;
                    }
                }
                Err(_) => return coordinator.shutdown(),
            },
            recv(ticker) -> _ => coordinator.tick(Instant::now()),
        }
    }
}
