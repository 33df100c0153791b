//! Resource manager: the single writer of lock state
//!
//! The manager owns one [`Lock`] per resource and the table of registered
//! processes. Every request, release and resolution goes through a `&mut`
//! method on it, and the engine thread is its only owner, so all mutations are
//! totally ordered. Actors learn about outcomes exclusively through
//! [`ActorMessage`]s sent to their inboxes.

mod resolution;
mod resource;

pub use resource::RequestOutcome;

use crate::core::config::validate_speed;
use crate::core::error::SimError;
use crate::core::logger::EventBus;
use crate::core::types::{ProcessId, ProcessState, ResourceId, SimEvent};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

/// Messages from the manager to a process actor
#[derive(Debug, Clone, PartialEq)]
pub enum ActorMessage {
    /// The requested resource is now owned by the actor
    Granted(ResourceId),
    /// The request was queued behind other processes
    MustWait(ResourceId),
    /// New simulation speed multiplier
    SetSpeed(f64),
    /// The resource was revoked by a resolution; forget it
    Preempt(ResourceId),
    /// Abandon the current cycle and start over from idle
    ///
    /// `canonical` asks the actor to sort its acquisition order ascending.
    /// `retry` skips the think pause, so a process that was queued asks again
    /// right away.
    Restart {
        epoch: u64,
        canonical: bool,
        retry: bool,
    },
    /// Release everything and terminate
    Stop,
}

/// State of one exclusive resource
#[derive(Debug, Clone)]
pub struct Lock {
    resource: ResourceId,
    owner: Option<ProcessId>,
    acquired_at: Option<Instant>,
    /// Arrival order, no duplicates, never contains `owner`
    waiters: VecDeque<ProcessId>,
}

impl Lock {
    fn new(resource: ResourceId) -> Self {
        Lock {
            resource,
            owner: None,
            acquired_at: None,
            waiters: VecDeque::new(),
        }
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn owner(&self) -> Option<ProcessId> {
        self.owner
    }

    pub fn acquired_at(&self) -> Option<Instant> {
        self.acquired_at
    }

    pub fn waiters(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.waiters.iter().copied()
    }

    pub fn queue_len(&self) -> usize {
        self.waiters.len()
    }

    fn clear(&mut self) {
        self.owner = None;
        self.acquired_at = None;
        self.waiters.clear();
    }
}

/// Manager-side record of a registered process
#[derive(Debug)]
struct ProcessRecord {
    inbox: Sender<ActorMessage>,
    state: ProcessState,
    /// Resources the process declared it will request this cycle
    claim: Vec<ResourceId>,
    /// Bumped on every restart; messages from older epochs are stale
    epoch: u64,
    aborted: bool,
}

/// Owner and queue of one resource at snapshot time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceView {
    pub resource: ResourceId,
    pub owner: Option<ProcessId>,
    pub waiters: Vec<ProcessId>,
    /// How long the current owner has held the resource
    pub held_for_ms: Option<f64>,
}

impl ResourceView {
    pub fn queue_len(&self) -> usize {
        self.waiters.len()
    }
}

/// State of one process at snapshot time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessView {
    pub process: ProcessId,
    pub state: ProcessState,
    pub label: String,
    pub held: Vec<ResourceId>,
    pub waiting_on: Option<ResourceId>,
    pub claim: Vec<ResourceId>,
    pub aborted: bool,
}

/// Copy of the manager's ownership and queue state at one instant
///
/// Detection and the safety check work on snapshots only, never on live state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub resources: Vec<ResourceView>,
    pub processes: Vec<ProcessView>,
}

impl Snapshot {
    pub fn resource(&self, resource: ResourceId) -> Option<&ResourceView> {
        self.resources.get(resource.0)
    }

    pub fn process(&self, process: ProcessId) -> Option<&ProcessView> {
        self.processes.iter().find(|view| view.process == process)
    }

    /// Verify the lock invariants
    ///
    /// # Returns
    /// * `Ok(())` - At most one owner per resource, no duplicate waiters, no
    ///   owner queued on its own resource, and per-process holdings agree
    /// * `Err(description)` - The first violation found
    pub fn check_invariants(&self) -> Result<(), String> {
        for view in &self.resources {
            if let Some(owner) = view.owner
                && view.waiters.contains(&owner)
            {
                return Err(format!("{owner} waits on {} which it owns", view.resource));
            }
            let mut seen = view.waiters.clone();
            seen.sort();
            seen.dedup();
            if seen.len() != view.waiters.len() {
                return Err(format!("duplicate waiters on {}", view.resource));
            }
        }
        for process in &self.processes {
            for resource in &process.held {
                let owner = self.resource(*resource).and_then(|view| view.owner);
                if owner != Some(process.process) {
                    return Err(format!(
                        "{} claims {resource} but the owner is {owner:?}",
                        process.process
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The lock manager
pub struct ResourceManager {
    locks: Vec<Lock>,
    processes: BTreeMap<ProcessId, ProcessRecord>,
    events: EventBus,
}

impl ResourceManager {
    /// Create a manager for `resources` resources named R1..Rn, with no observers
    pub fn new(resources: usize) -> Self {
        Self::with_events(resources, EventBus::new())
    }

    /// Create a manager that publishes every change on `events`
    pub fn with_events(resources: usize, events: EventBus) -> Self {
        ResourceManager {
            locks: (0..resources).map(|i| Lock::new(ResourceId(i))).collect(),
            processes: BTreeMap::new(),
            events,
        }
    }

    /// Register a process and the inbox its actor reads from
    pub fn register_process(&mut self, process: ProcessId, inbox: Sender<ActorMessage>) {
        self.processes.insert(
            process,
            ProcessRecord {
                inbox,
                state: ProcessState::Idle,
                claim: Vec::new(),
                epoch: 0,
                aborted: false,
            },
        );
    }

    pub fn resource_count(&self) -> usize {
        self.locks.len()
    }

    pub fn process_ids(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.processes.keys().copied()
    }

    pub fn lock(&self, resource: ResourceId) -> Option<&Lock> {
        self.locks.get(resource.0)
    }

    pub fn owner_of(&self, resource: ResourceId) -> Option<ProcessId> {
        self.lock(resource).and_then(Lock::owner)
    }

    /// Resources currently owned by `process`, ascending
    pub fn held_by(&self, process: ProcessId) -> Vec<ResourceId> {
        self.locks
            .iter()
            .filter(|lock| lock.owner == Some(process))
            .map(|lock| lock.resource)
            .collect()
    }

    /// Resource `process` is queued for, if any
    pub fn waiting_on(&self, process: ProcessId) -> Option<ResourceId> {
        self.locks
            .iter()
            .find(|lock| lock.waiters.contains(&process))
            .map(|lock| lock.resource)
    }

    pub fn is_waiting(&self, process: ProcessId) -> bool {
        self.waiting_on(process).is_some()
    }

    pub fn state_of(&self, process: ProcessId) -> Option<ProcessState> {
        self.processes.get(&process).map(|record| record.state)
    }

    pub fn is_aborted(&self, process: ProcessId) -> bool {
        self.processes
            .get(&process)
            .is_some_and(|record| record.aborted)
    }

    pub fn epoch_of(&self, process: ProcessId) -> Option<u64> {
        self.processes.get(&process).map(|record| record.epoch)
    }

    /// Whether a message stamped with `epoch` from `process` is still current
    pub fn is_current(&self, process: ProcessId, epoch: u64) -> bool {
        self.processes
            .get(&process)
            .is_some_and(|record| !record.aborted && record.epoch == epoch)
    }

    /// Record a state transition reported by an actor
    ///
    /// Aborted processes keep their terminal state. Reaching `Idle` ends the
    /// cycle, so the declared claim is dropped.
    pub fn set_state(&mut self, process: ProcessId, state: ProcessState) {
        let Some(record) = self.processes.get_mut(&process) else {
            return;
        };
        if record.aborted {
            return;
        }
        record.state = state;
        if state == ProcessState::Idle {
            record.claim.clear();
        }
        self.events.emit(SimEvent::StateChanged { process, state });
    }

    /// Record the resources `process` intends to request this cycle
    pub fn set_claim(&mut self, process: ProcessId, claim: Vec<ResourceId>) {
        if let Some(record) = self.processes.get_mut(&process)
            && !record.aborted
        {
            record.claim = claim;
        }
    }

    /// Broadcast a new speed multiplier to every live actor
    pub fn set_speed(&mut self, multiplier: f64) -> Result<(), SimError> {
        validate_speed(multiplier)?;
        for record in self.processes.values().filter(|record| !record.aborted) {
            let _ = record.inbox.send(ActorMessage::SetSpeed(multiplier));
        }
        self.events.emit(SimEvent::SpeedChanged { multiplier });
        Ok(())
    }

    /// Forward an observational log line from an actor
    pub fn log(&mut self, process: ProcessId, message: String) {
        self.events.emit(SimEvent::ActorLog { process, message });
    }

    pub fn subscribe(&mut self) -> Receiver<SimEvent> {
        self.events.subscribe()
    }

    pub fn attach_subscriber(&mut self, subscriber: Sender<SimEvent>) {
        self.events.attach(subscriber);
    }

    pub(crate) fn emit(&mut self, event: SimEvent) {
        self.events.emit(event);
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    /// Copy ownership, queues and process states
    pub fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        let resources = self
            .locks
            .iter()
            .map(|lock| ResourceView {
                resource: lock.resource,
                owner: lock.owner,
                waiters: lock.waiters().collect(),
                held_for_ms: lock
                    .acquired_at
                    .map(|at| now.duration_since(at).as_secs_f64() * 1000.0),
            })
            .collect();

        let processes = self
            .processes
            .iter()
            .map(|(&process, record)| ProcessView {
                process,
                state: record.state,
                label: record.state.label(),
                held: self.held_by(process),
                waiting_on: self.waiting_on(process),
                claim: record.claim.clone(),
                aborted: record.aborted,
            })
            .collect();

        Snapshot {
            resources,
            processes,
        }
    }

    /// Stop every actor and reset all lock state
    ///
    /// The process table is emptied, which drops the inbox senders; actors
    /// that missed the `Stop` see a disconnected inbox and exit as well.
    pub fn shutdown(&mut self) {
        for record in self.processes.values() {
            let _ = record.inbox.send(ActorMessage::Stop);
        }
        self.processes.clear();
        for lock in &mut self.locks {
            lock.clear();
        }
        self.events.emit(SimEvent::SimulationStopped);
    }

    /// Deliver a message to an actor
    ///
    /// # Returns
    /// `false` if the process is unknown, aborted, or its inbox is closed
    fn notify(&self, process: ProcessId, message: ActorMessage) -> bool {
        match self.processes.get(&process) {
            Some(record) if !record.aborted => record.inbox.send(message).is_ok(),
            _ => false,
        }
    }

    fn check_process(&self, process: ProcessId) -> Result<(), SimError> {
        match self.processes.get(&process) {
            None => Err(SimError::UnknownProcess(process)),
            Some(record) if record.aborted => Err(SimError::ProcessAborted(process)),
            Some(_) => Ok(()),
        }
    }

    fn check_resource(&self, resource: ResourceId) -> Result<(), SimError> {
        if resource.0 < self.locks.len() {
            Ok(())
        } else {
            Err(SimError::UnknownResource(resource))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crossbeam_channel::unbounded;

    /// Manager with `processes` registered processes and their inbox receivers
    pub fn manager_with(
        processes: usize,
        resources: usize,
    ) -> (ResourceManager, Vec<Receiver<ActorMessage>>) {
        let mut manager = ResourceManager::new(resources);
        let inboxes = (0..processes)
            .map(|i| {
                let (tx, rx) = unbounded();
                manager.register_process(ProcessId(i), tx);
                rx
            })
            .collect();
        (manager, inboxes)
    }

    pub fn drain(inbox: &Receiver<ActorMessage>) -> Vec<ActorMessage> {
        inbox.try_iter().collect()
    }
}
