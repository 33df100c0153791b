// Core types
pub mod types;
pub use types::*;

pub mod config;
pub mod error;

// Event logging and fan-out
pub mod logger;

// Wait-for graph
pub mod graph;

// Lock state and resolution strategies
pub mod manager;

pub mod banker;
pub mod detector;
pub mod engine;
pub mod process;
pub mod stats;

use crate::core::config::{Scenario, SimConfig, Strategy, WorkloadProfile};
use crate::core::engine::{Command, Coordinator};
use crate::core::error::SimError;
use crate::core::logger::{EventBus, EventLogger};
use crate::core::manager::{ResourceManager, Snapshot};
use crate::core::process::ProcessActor;
use crate::core::stats::Stats;
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type EventCallback = Box<dyn Fn(SimEvent) + Send + 'static>;

/// Simulation builder
pub struct Simulator {
    config: SimConfig,
    orders: FxHashMap<ProcessId, Vec<ResourceId>>,
    log_path: Option<String>,
    callback: Option<EventCallback>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// Create a builder with the default configuration
    ///
    /// By default:
    /// - 2 processes competing for 2 resources
    /// - FIFO resolution, automatic detection on
    /// - Logging is disabled
    pub fn new() -> Self {
        Self::from_config(SimConfig::default())
    }

    pub fn from_config(config: SimConfig) -> Self {
        Simulator {
            config,
            orders: FxHashMap::default(),
            log_path: None,
            callback: None,
        }
    }

    pub fn processes(mut self, count: usize) -> Self {
        self.config.processes = count;
        self
    }

    pub fn resources(mut self, count: usize) -> Self {
        self.config.resources = count;
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn speed(mut self, multiplier: f64) -> Self {
        self.config.speed = multiplier;
        self
    }

    pub fn auto_detect(mut self, enabled: bool) -> Self {
        self.config.auto_detect = enabled;
        self
    }

    pub fn detection_interval(mut self, interval: Duration) -> Self {
        self.config.detection_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn resolution_dwell(mut self, dwell: Duration) -> Self {
        self.config.resolution_dwell_ms = dwell.as_millis() as u64;
        self
    }

    pub fn profile(mut self, profile: WorkloadProfile) -> Self {
        self.config.profile = profile;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Apply a scenario preset on top of the current configuration
    pub fn scenario(mut self, scenario: Scenario) -> Self {
        self.config.apply_scenario(scenario);
        self
    }

    /// Pin the acquisition order of one process instead of drawing it at random
    ///
    /// The order may list a subset of the resources; the process only ever
    /// requests from its order.
    pub fn acquisition_order(mut self, process: ProcessId, order: Vec<ResourceId>) -> Self {
        self.orders.insert(process, order);
        self
    }

    /// Activate logger and set the path for the log file
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    pub fn with_log<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Set a callback invoked for every event, on a dedicated dispatcher thread
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(SimEvent) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Validate the configuration, then spawn the engine and every actor
    ///
    /// # Errors
    /// Returns an error if the configuration is out of bounds, an acquisition
    /// order is malformed, the log file cannot be opened or a thread cannot be
    /// spawned
    pub fn start(self) -> Result<Simulation> {
        let config = self.config;
        config.validate()?;
        validate_orders(&self.orders, &config)?;

        let events = match &self.log_path {
            Some(path) => EventBus::with_logger(
                EventLogger::with_file(path).context("Failed to initialize logger")?,
            ),
            None => EventBus::new(),
        };
        let mut manager = ResourceManager::with_events(config.resources, events);

        let dispatcher = match self.callback {
            Some(callback) => {
                let events = manager.subscribe();
                Some(
                    thread::Builder::new()
                        .name("gridlock-events".to_string())
                        .spawn(move || {
                            for event in events {
                                callback(event);
                            }
                        })
                        .context("Failed to spawn event dispatcher")?,
                )
            }
            None => None,
        };

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let (commands, command_rx) = unbounded();

        let mut actors = Vec::with_capacity(config.processes);
        let mut pending = Vec::with_capacity(config.processes);
        for index in 0..config.processes {
            let process = ProcessId(index);
            let order = match self.orders.get(&process) {
                Some(order) => order.clone(),
                None => initial_order(&config, &mut rng),
            };
            let (inbox_tx, inbox_rx) = unbounded();
            manager.register_process(process, inbox_tx);
            pending.push(ProcessActor::new(
                process,
                order,
                config.resources,
                config.profile,
                config.speed,
                inbox_rx,
                commands.clone(),
                StdRng::seed_from_u64(rng.random()),
            ));
        }

        manager.emit(SimEvent::SimulationStarted {
            processes: config.processes,
            resources: config.resources,
            strategy: config.strategy,
        });

        let interval = config.auto_detect.then(|| config.detection_interval());
        let coordinator = Coordinator::new(manager, &config);
        let engine = thread::Builder::new()
            .name("gridlock-engine".to_string())
            .spawn(move || engine::run(coordinator, command_rx, interval))
            .context("Failed to spawn engine thread")?;

        let simulation = Simulation {
            commands,
            threads: Mutex::new(Some(Threads {
                engine,
                actors: Vec::new(),
                dispatcher,
            })),
        };

        for actor in pending {
            match actor.spawn() {
                Ok(handle) => actors.push(handle),
                Err(e) => {
                    // Dropping the handle stops everything spawned so far
                    return Err(e).context("Failed to spawn process actor");
                }
            }
        }
        if let Some(threads) = simulation.threads.lock().as_mut() {
            threads.actors = actors;
        }

        Ok(simulation)
    }
}

fn validate_orders(
    orders: &FxHashMap<ProcessId, Vec<ResourceId>>,
    config: &SimConfig,
) -> Result<(), SimError> {
    for (process, order) in orders {
        if process.0 >= config.processes {
            return Err(SimError::InvalidConfiguration(format!(
                "acquisition order given for {process}, but only {} processes exist",
                config.processes
            )));
        }
        let mut seen = vec![false; config.resources];
        for resource in order {
            match seen.get_mut(resource.0) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(SimError::InvalidConfiguration(format!(
                        "{resource} listed twice in the order of {process}"
                    )));
                }
                None => return Err(SimError::UnknownResource(*resource)),
            }
        }
    }
    Ok(())
}

/// Canonical order under the ordering strategy, a random permutation otherwise
fn initial_order(config: &SimConfig, rng: &mut StdRng) -> Vec<ResourceId> {
    let mut order: Vec<ResourceId> = (0..config.resources).map(ResourceId).collect();
    if config.strategy != Strategy::Ordering {
        order.shuffle(rng);
    }
    order
}

struct Threads {
    engine: JoinHandle<Stats>,
    actors: Vec<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Handle to a running simulation
///
/// Every call is a request to the engine thread and is answered once the
/// engine has processed it, after every command queued before it. Dropping
/// the handle stops the simulation.
pub struct Simulation {
    commands: Sender<Command>,
    threads: Mutex<Option<Threads>>,
}

impl Simulation {
    /// Run a detection pass now
    pub fn detect(&self) -> Result<Detection, SimError> {
        self.call(Command::Detect)
    }

    /// Detect, then resolve with the active strategy
    pub fn resolve(&self) -> Result<Resolution, SimError> {
        self.call(Command::Resolve)?
    }

    /// Change the speed multiplier of every live actor
    pub fn set_speed(&self, multiplier: f64) -> Result<(), SimError> {
        self.call(|reply| Command::SetSpeed(multiplier, reply))?
    }

    pub fn snapshot(&self) -> Result<Snapshot, SimError> {
        self.call(Command::Snapshot)
    }

    pub fn stats(&self) -> Result<Stats, SimError> {
        self.call(Command::Stats)
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> Result<Receiver<SimEvent>, SimError> {
        let (tx, rx) = unbounded();
        self.commands
            .send(Command::Subscribe(tx))
            .map_err(|_| SimError::NotRunning)?;
        Ok(rx)
    }

    /// Stop every actor and the engine, and wait for all threads to exit
    ///
    /// # Returns
    /// The final statistics, or `NotRunning` if already stopped
    pub fn stop(&self) -> Result<Stats, SimError> {
        let threads = self.threads.lock().take().ok_or(SimError::NotRunning)?;

        let (reply, answer) = bounded(1);
        let replied = match self.commands.send(Command::Shutdown(reply)) {
            Ok(()) => answer.recv().ok(),
            Err(_) => None,
        };
        // An engine that already exited still hands back its totals on join
        let joined = threads.engine.join().ok();
        let stats = replied.or(joined).ok_or(SimError::NotRunning)?;

        for actor in threads.actors {
            let _ = actor.join();
        }
        if let Some(dispatcher) = threads.dispatcher {
            let _ = dispatcher.join();
        }
        Ok(stats)
    }

    pub fn is_running(&self) -> bool {
        self.threads.lock().is_some()
    }

    fn call<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T, SimError> {
        let (reply, answer) = bounded(1);
        self.commands
            .send(make(reply))
            .map_err(|_| SimError::NotRunning)?;
        answer.recv().map_err(|_| SimError::NotRunning)
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
