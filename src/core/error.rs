use crate::core::config::Strategy;
use crate::core::types::{ProcessId, ResourceId};
use thiserror::Error;

/// Errors raised by the resource protocol, the resolution engine and the
/// simulation handle
///
/// Protocol errors (`InvalidRelease`, `UnreachableActor`, `Unknown*`,
/// `ProcessAborted`) are handled inside the engine and only ever reach
/// observers as events. Resolution outcomes and configuration errors are
/// returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// A process released a resource it does not own, without force
    #[error("{process} released {resource} without owning it (owner: {owner:?})")]
    InvalidRelease {
        process: ProcessId,
        resource: ResourceId,
        owner: Option<ProcessId>,
    },

    /// A grant could not be delivered because the actor is gone
    #[error("grant of {resource} could not be delivered to {process}")]
    UnreachableActor {
        process: ProcessId,
        resource: ResourceId,
    },

    /// The active strategy found no eligible victim; nothing was changed
    #[error("resolution with {strategy} failed: no eligible victim")]
    ResolutionFailed { strategy: Strategy },

    /// Resolution was requested while no deadlock is present
    #[error("no deadlock to resolve")]
    NoDeadlock,

    /// Process or resource counts, speed or timing out of bounds
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),

    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    /// The process was terminated and can no longer take part
    #[error("process {0} has been aborted")]
    ProcessAborted(ProcessId),

    /// The engine thread is no longer accepting commands
    #[error("simulation is not running")]
    NotRunning,
}
