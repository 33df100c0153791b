//! # Gridlock
//!
//! A deadlock simulator: simulated processes compete for a pool of exclusive
//! resources, a detector looks for circular waits in the wait-for graph, and
//! a resolution engine breaks them.
//!
//! ## Features
//!
//! - FIFO lock manager with per-resource wait queues
//! - One thread per simulated process, all lock state owned by a single engine thread
//! - Cycle detection on demand or on a fixed interval
//! - Five resolution strategies: fifo, safety-check (banker), ordering, preempt, abort
//! - JSON Lines event logging and event subscriptions
//!
//! ## Example
//!
//! ```no_run
//! use gridlock::{ProcessId, ResourceId, Simulator, Strategy};
//!
//! let simulation = Simulator::new()
//!     .strategy(Strategy::Ordering)
//!     .acquisition_order(ProcessId(0), vec![ResourceId(0), ResourceId(1)])
//!     .acquisition_order(ProcessId(1), vec![ResourceId(1), ResourceId(0)])
//!     .start()?;
//!
//! let detection = simulation.detect()?;
//! if detection.deadlocked {
//!     simulation.resolve()?;
//! }
//! let stats = simulation.stop()?;
//! println!("{} deadlocks", stats.deadlocks_detected);
//! # Ok::<(), anyhow::Error>(())
//! ```

mod core;
pub use self::core::{
    Simulation, Simulator,
    banker::SafetyCheck,
    config::{
        MAX_PROCESSES, MAX_RESOURCES, MAX_SPEED, MIN_PROCESSES, MIN_RESOURCES, MIN_SPEED,
        Scenario, SimConfig, Strategy, Timings, WorkloadProfile,
    },
    detector::{Detector, Observation, detect, detect_with_order},
    engine::{Command, Coordinator},
    error::SimError,
    graph::WaitForGraph,
    logger::{EventBus, EventLogger, LogEntry},
    manager::{
        ActorMessage, Lock, ProcessView, RequestOutcome, ResourceManager, ResourceView, Snapshot,
    },
    stats::Stats,
    types::{
        Detection, ProcessId, ProcessState, Resolution, ResolutionAction, ResourceId, SimEvent,
    },
};

pub const BANNER: &str = r#"
   ▄▖▄▖▄▖▄ ▖ ▄▖▄▖▖▖
   ▌ ▙▘▐ ▌▌▌ ▌▌▌ ▙▘
   ▙▌▌▌▟▖▙▘▙▖▙▌▙▖▌▌
"#;
