use crate::core::banker::SafetyCheck;
use crate::core::config::Strategy;
use crate::core::error::SimError;
use crate::core::manager::{ActorMessage, ResourceManager};
use crate::core::types::{
    Detection, ProcessId, ProcessState, Resolution, ResolutionAction, ResourceId, SimEvent,
};
use chrono::Utc;
use std::time::{Duration, Instant};

impl ResourceManager {
    /// Break a detected deadlock with `strategy`
    ///
    /// # Arguments
    /// * `strategy` - The active resolution strategy
    /// * `detection` - The detection pass that reported the deadlock
    ///
    /// # Returns
    /// A record of what was done, with wall-clock start and end times
    ///
    /// # Errors
    /// * `NoDeadlock` - `detection` does not report a deadlock
    /// * `ResolutionFailed` - preempt or abort found no eligible victim; no
    ///   state was changed
    pub fn resolve(
        &mut self,
        strategy: Strategy,
        detection: &Detection,
    ) -> Result<Resolution, SimError> {
        if !detection.deadlocked {
            return Err(SimError::NoDeadlock);
        }

        let started_at = Utc::now();
        let clock = Instant::now();

        let action = match strategy {
            Strategy::Fifo => {
                let (released, restarted) = self.rollback_all(false);
                ResolutionAction::Rollback {
                    released,
                    restarted,
                }
            }
            Strategy::SafetyCheck => {
                match SafetyCheck::from_snapshot(&self.snapshot()).safe_sequence() {
                    Some(sequence) => ResolutionAction::SafeState { sequence },
                    None => {
                        let (released, restarted) = self.rollback_all(false);
                        ResolutionAction::UnsafeRollback {
                            released,
                            restarted,
                        }
                    }
                }
            }
            Strategy::Ordering => {
                let (released, restarted) = self.rollback_all(true);
                ResolutionAction::Reordered {
                    released,
                    restarted,
                }
            }
            Strategy::Preempt => {
                let victim = self
                    .preemption_victim(&detection.implicated, Instant::now())
                    .ok_or(SimError::ResolutionFailed { strategy })?;
                let revoked = self.preempt(victim)?;
                ResolutionAction::Preempted { victim, revoked }
            }
            Strategy::Abort => {
                let victim = self
                    .abort_victim(&detection.implicated)
                    .ok_or(SimError::ResolutionFailed { strategy })?;
                let released = self.abort(victim)?;
                ResolutionAction::Aborted { victim, released }
            }
        };

        let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;
        Ok(Resolution {
            strategy,
            action,
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            duration_ms,
        })
    }

    /// Release every owned resource and drain every wait queue
    ///
    /// Every process that owned or waited for something is restarted. Restart
    /// notices go out in arrival order: queue heads first (by resource), then
    /// the rest of each queue, then owners. Queued processes retry at once;
    /// owners that were not queued anywhere go through their think pause
    /// first, so the waiters get their requests in ahead of them.
    ///
    /// # Returns
    /// The released resources and the restarted processes, in notice order
    pub fn rollback_all(&mut self, canonical: bool) -> (Vec<ResourceId>, Vec<ProcessId>) {
        let mut restarted: Vec<ProcessId> = Vec::new();
        let depth = self.locks.iter().map(|lock| lock.waiters.len()).max();
        for position in 0..depth.unwrap_or(0) {
            for lock in &self.locks {
                if let Some(&waiter) = lock.waiters.get(position)
                    && !restarted.contains(&waiter)
                {
                    restarted.push(waiter);
                }
            }
        }

        let waiters = restarted.len();

        let mut released = Vec::new();
        let mut events = Vec::new();
        for lock in &mut self.locks {
            if let Some(owner) = lock.owner {
                released.push(lock.resource);
                events.push(SimEvent::Released {
                    process: owner,
                    resource: lock.resource,
                    forced: true,
                });
                if !restarted.contains(&owner) {
                    restarted.push(owner);
                }
            }
            lock.clear();
        }
        for event in events {
            self.events.emit(event);
        }

        for (index, &process) in restarted.iter().enumerate() {
            self.restart(process, canonical, index < waiters);
        }

        (released, restarted)
    }

    /// Pick the process to preempt
    ///
    /// Candidates are the waiting processes on the reported cycle, or any
    /// waiting process if none of those is waiting anymore. The one whose
    /// holdings add up to the least hold time wins (least work thrown away);
    /// ties go to the earliest process id.
    pub(crate) fn preemption_victim(
        &self,
        implicated: &[ProcessId],
        now: Instant,
    ) -> Option<ProcessId> {
        let waiting = |process: &ProcessId| !self.is_aborted(*process) && self.is_waiting(*process);

        let mut candidates: Vec<ProcessId> = implicated.iter().copied().filter(waiting).collect();
        if candidates.is_empty() {
            candidates = self.process_ids().filter(waiting).collect();
        }

        candidates
            .into_iter()
            .map(|process| (self.hold_time(process, now), process))
            .min()
            .map(|(_, process)| process)
    }

    /// Pick the process to abort
    ///
    /// Among the live processes on the reported cycle, the one holding the
    /// fewest resources; ties go to the earliest process id.
    pub(crate) fn abort_victim(&self, implicated: &[ProcessId]) -> Option<ProcessId> {
        implicated
            .iter()
            .copied()
            .filter(|&process| self.processes.contains_key(&process) && !self.is_aborted(process))
            .map(|process| (self.held_by(process).len(), process))
            .min()
            .map(|(_, process)| process)
    }

    /// Revoke everything `victim` holds and send it back to idle
    fn preempt(&mut self, victim: ProcessId) -> Result<Vec<ResourceId>, SimError> {
        self.withdraw(victim);
        let revoked = self.held_by(victim);
        for &resource in &revoked {
            self.revoke(resource)?;
        }
        if let Some(record) = self.processes.get_mut(&victim) {
            record.state = ProcessState::Preempted;
        }
        self.events.emit(SimEvent::ProcessPreempted {
            process: victim,
            resources: revoked.clone(),
        });
        self.restart(victim, false, false);
        Ok(revoked)
    }

    /// Terminate `victim`, handing its resources to their next waiters
    fn abort(&mut self, victim: ProcessId) -> Result<Vec<ResourceId>, SimError> {
        self.withdraw(victim);
        let released = self.held_by(victim);
        for &resource in &released {
            self.revoke(resource)?;
        }
        self.notify(victim, ActorMessage::Stop);
        if let Some(record) = self.processes.get_mut(&victim) {
            record.aborted = true;
            record.state = ProcessState::Aborted;
            record.claim.clear();
        }
        self.events.emit(SimEvent::StateChanged {
            process: victim,
            state: ProcessState::Aborted,
        });
        self.events
            .emit(SimEvent::ProcessAborted { process: victim });
        Ok(released)
    }

    /// Bump the epoch of `process` and tell its actor to start over
    fn restart(&mut self, process: ProcessId, canonical: bool, retry: bool) {
        let Some(record) = self.processes.get_mut(&process) else {
            return;
        };
        if record.aborted {
            return;
        }
        record.epoch += 1;
        record.claim.clear();
        let epoch = record.epoch;
        self.notify(
            process,
            ActorMessage::Restart {
                epoch,
                canonical,
                retry,
            },
        );
    }

    /// Total time `process` has held its current resources
    fn hold_time(&self, process: ProcessId, now: Instant) -> Duration {
        self.locks
            .iter()
            .filter(|lock| lock.owner == Some(process))
            .filter_map(|lock| lock.acquired_at)
            .map(|at| now.saturating_duration_since(at))
            .sum()
    }
}
