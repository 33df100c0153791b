use crate::core::config::Strategy;
use serde::{Serialize, Serializer};
use std::fmt;

/// Process identifier type
///
/// Processes are named "A".."Z" in creation order; the inner value is the
/// zero-based index of that letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub usize);

impl ProcessId {
    /// Single-letter name of the process
    pub fn name(self) -> char {
        char::from(b'A' + (self.0 % 26) as u8)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ProcessId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Resource identifier type
///
/// Resources are named "R1".."Rn". The inner value is the zero-based index, so
/// ascending ids are also the canonical global acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub usize);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0 + 1)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lifecycle state of a simulated process
///
/// Reported by the actor itself, except for `Aborted` which the manager also
/// sets when it terminates a victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "resource", rename_all = "snake_case")]
pub enum ProcessState {
    /// Thinking or cooling down between cycles
    Idle,
    /// Waiting for a grant of the given resource
    Requesting(ResourceId),
    /// Holding at least one resource between requests
    Holding,
    /// Working with every resource of the cycle
    InCriticalSection,
    /// Giving every resource back
    Releasing,
    /// Resources were revoked by a resolution; about to return to `Idle`
    Preempted,
    /// Terminated; never resumes
    Aborted,
}

impl ProcessState {
    /// Short label suitable for rendering next to the process
    pub fn label(&self) -> String {
        match self {
            ProcessState::Idle => "idle".to_string(),
            ProcessState::Requesting(resource) => format!("requesting {resource}"),
            ProcessState::Holding => "holding".to_string(),
            ProcessState::InCriticalSection => "critical section".to_string(),
            ProcessState::Releasing => "releasing".to_string(),
            ProcessState::Preempted => "preempted".to_string(),
            ProcessState::Aborted => "aborted".to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Aborted)
    }
}

/// Result of one deadlock detection pass
///
/// `implicated` is the witness path the traversal was on when it closed the
/// cycle. It is a diagnostic: not necessarily minimal, and its rotation depends
/// on the iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Detection {
    /// Whether the wait-for graph contains a cycle
    pub deadlocked: bool,
    /// Processes on the reported cycle, in traversal order
    pub implicated: Vec<ProcessId>,
    /// Resource each implicated process is queued for
    pub waiting_for: Vec<(ProcessId, ResourceId)>,
}

/// What a resolution strategy actually did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Every owned resource was released and every queue drained
    Rollback {
        released: Vec<ResourceId>,
        restarted: Vec<ProcessId>,
    },
    /// Rollback followed by a switch to the canonical acquisition order
    Reordered {
        released: Vec<ResourceId>,
        restarted: Vec<ProcessId>,
    },
    /// The banker's test judged the allocation safe; nothing was touched
    SafeState { sequence: Vec<ProcessId> },
    /// The banker's test judged the allocation unsafe and rolled it back
    UnsafeRollback {
        released: Vec<ResourceId>,
        restarted: Vec<ProcessId>,
    },
    /// One waiting process lost everything it held and went back to idle
    Preempted {
        victim: ProcessId,
        revoked: Vec<ResourceId>,
    },
    /// One process was terminated and its resources handed on
    Aborted {
        victim: ProcessId,
        released: Vec<ResourceId>,
    },
}

/// Record of an applied resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub strategy: Strategy,
    pub action: ResolutionAction,
    /// RFC 3339 wall-clock time the strategy started
    pub started_at: String,
    /// RFC 3339 wall-clock time the strategy finished
    pub finished_at: String,
    /// Elapsed time in milliseconds
    pub duration_ms: f64,
}

/// Events emitted by the core for external observers
///
/// Every ownership change, state transition, deadlock notice and resolution
/// outcome is published as one of these; renderers and loggers subscribe to
/// them instead of poking at manager state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimEvent {
    SimulationStarted {
        processes: usize,
        resources: usize,
        strategy: Strategy,
    },
    SimulationStopped,
    StateChanged {
        process: ProcessId,
        state: ProcessState,
    },
    Granted {
        process: ProcessId,
        resource: ResourceId,
    },
    MustWait {
        process: ProcessId,
        resource: ResourceId,
        /// One-based position in the wait queue
        position: usize,
    },
    Released {
        process: ProcessId,
        resource: ResourceId,
        forced: bool,
    },
    InvalidRelease {
        process: ProcessId,
        resource: ResourceId,
        owner: Option<ProcessId>,
    },
    UnreachableActor {
        process: ProcessId,
        resource: ResourceId,
    },
    DeadlockDetected {
        cycle: Vec<ProcessId>,
        waiting_for: Vec<(ProcessId, ResourceId)>,
    },
    DeadlockCleared,
    ResolutionApplied {
        strategy: Strategy,
        action: ResolutionAction,
        duration_ms: f64,
    },
    ResolutionFailed {
        strategy: Strategy,
        reason: String,
    },
    ProcessPreempted {
        process: ProcessId,
        resources: Vec<ResourceId>,
    },
    ProcessAborted {
        process: ProcessId,
    },
    SpeedChanged {
        multiplier: f64,
    },
    ActorLog {
        process: ProcessId,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_follow_letters_and_resource_numbers() {
        assert_eq!(ProcessId(0).to_string(), "A");
        assert_eq!(ProcessId(25).to_string(), "Z");
        assert_eq!(ResourceId(0).to_string(), "R1");
        assert_eq!(ResourceId(9).to_string(), "R10");
    }

    #[test]
    fn test_event_serialization_uses_names() {
        let event = SimEvent::Granted {
            process: ProcessId(1),
            resource: ResourceId(0),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"granted\""));
        assert!(json.contains("\"process\":\"B\""));
        assert!(json.contains("\"resource\":\"R1\""));
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(ProcessState::Requesting(ResourceId(1)).label(), "requesting R2");
        assert_eq!(ProcessState::InCriticalSection.label(), "critical section");
        assert!(ProcessState::Aborted.is_terminal());
        assert!(!ProcessState::Preempted.is_terminal());
    }
}
