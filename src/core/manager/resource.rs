use crate::core::error::SimError;
use crate::core::manager::{ActorMessage, ResourceManager};
use crate::core::types::{ProcessId, ResourceId, SimEvent};
use std::time::Instant;

/// What happened to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The resource was free with an empty queue and is now owned
    Granted,
    /// Appended to the wait queue at this one-based position
    Queued(usize),
    /// Already queued; the duplicate request changed nothing
    AlreadyQueued,
    /// The requester already owns the resource; the grant was re-sent
    AlreadyHeld,
    /// Granted, but the grant could not be delivered and ownership was undone
    Undeliverable,
}

impl ResourceManager {
    /// Handle a request of `resource` by `process`
    ///
    /// Grants immediately only when the resource has no owner and nobody is
    /// queued for it; otherwise the process is appended to the FIFO queue and
    /// told to wait.
    ///
    /// # Errors
    /// Unknown process or resource, or a process that has been aborted
    pub fn request(
        &mut self,
        process: ProcessId,
        resource: ResourceId,
    ) -> Result<RequestOutcome, SimError> {
        self.check_process(process)?;
        self.check_resource(resource)?;

        let lock = &mut self.locks[resource.0];

        if lock.owner == Some(process) {
            self.notify(process, ActorMessage::Granted(resource));
            return Ok(RequestOutcome::AlreadyHeld);
        }

        if lock.owner.is_none() && lock.waiters.is_empty() {
            lock.owner = Some(process);
            lock.acquired_at = Some(Instant::now());
            if self.notify(process, ActorMessage::Granted(resource)) {
                self.events.emit(SimEvent::Granted { process, resource });
                return Ok(RequestOutcome::Granted);
            }
            let lock = &mut self.locks[resource.0];
            lock.owner = None;
            lock.acquired_at = None;
            self.events
                .emit(SimEvent::UnreachableActor { process, resource });
            return Ok(RequestOutcome::Undeliverable);
        }

        if lock.waiters.contains(&process) {
            return Ok(RequestOutcome::AlreadyQueued);
        }

        lock.waiters.push_back(process);
        let position = lock.waiters.len();
        self.notify(process, ActorMessage::MustWait(resource));
        self.events.emit(SimEvent::MustWait {
            process,
            resource,
            position,
        });
        Ok(RequestOutcome::Queued(position))
    }

    /// Handle a release of `resource` by `process`
    ///
    /// Only the owner may release unless `forced` is set. On success the head
    /// of the wait queue (if any) becomes the new owner.
    ///
    /// # Returns
    /// The process the resource was handed to, if any
    ///
    /// # Errors
    /// `InvalidRelease` when a non-owner releases without force; nothing is
    /// changed in that case
    pub fn release(
        &mut self,
        process: ProcessId,
        resource: ResourceId,
        forced: bool,
    ) -> Result<Option<ProcessId>, SimError> {
        self.check_resource(resource)?;

        let lock = &mut self.locks[resource.0];
        let owner = lock.owner;
        if owner != Some(process) && !forced {
            self.events.emit(SimEvent::InvalidRelease {
                process,
                resource,
                owner,
            });
            return Err(SimError::InvalidRelease {
                process,
                resource,
                owner,
            });
        }

        lock.owner = None;
        lock.acquired_at = None;
        if let Some(previous) = owner {
            self.events.emit(SimEvent::Released {
                process: previous,
                resource,
                forced,
            });
        }

        Ok(self.hand_off(resource))
    }

    /// Give a free resource to the first reachable waiter
    ///
    /// A waiter whose grant cannot be delivered loses the ownership it was just
    /// given and the next one is tried, so the resource never stays owned by a
    /// process that can no longer release it.
    fn hand_off(&mut self, resource: ResourceId) -> Option<ProcessId> {
        while let Some(next) = self.locks[resource.0].waiters.pop_front() {
            let lock = &mut self.locks[resource.0];
            lock.owner = Some(next);
            lock.acquired_at = Some(Instant::now());

            if self.notify(next, ActorMessage::Granted(resource)) {
                self.events.emit(SimEvent::Granted {
                    process: next,
                    resource,
                });
                return Some(next);
            }

            let lock = &mut self.locks[resource.0];
            lock.owner = None;
            lock.acquired_at = None;
            self.events.emit(SimEvent::UnreachableActor {
                process: next,
                resource,
            });
        }
        None
    }

    /// Remove `process` from every wait queue
    ///
    /// # Returns
    /// The resources it was queued for
    pub fn withdraw(&mut self, process: ProcessId) -> Vec<ResourceId> {
        let mut withdrawn = Vec::new();
        for lock in &mut self.locks {
            let before = lock.waiters.len();
            lock.waiters.retain(|&waiter| waiter != process);
            if lock.waiters.len() != before {
                withdrawn.push(lock.resource);
            }
        }
        withdrawn
    }

    /// Forcibly take `resource` away from its owner
    ///
    /// The former owner is told with a `Preempt` notice, then the resource is
    /// handed to the next waiter.
    ///
    /// # Returns
    /// The former owner, or `None` if the resource was free
    pub fn revoke(&mut self, resource: ResourceId) -> Result<Option<ProcessId>, SimError> {
        self.check_resource(resource)?;
        let Some(owner) = self.locks[resource.0].owner else {
            return Ok(None);
        };
        self.release(owner, resource, true)?;
        self.notify(owner, ActorMessage::Preempt(resource));
        Ok(Some(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manager::test_support::{drain, manager_with};

    const A: ProcessId = ProcessId(0);
    const B: ProcessId = ProcessId(1);
    const C: ProcessId = ProcessId(2);
    const D: ProcessId = ProcessId(3);
    const R1: ResourceId = ResourceId(0);
    const R2: ResourceId = ResourceId(1);

    #[test]
    fn test_free_resource_is_granted_immediately() {
        let (mut manager, inboxes) = manager_with(2, 2);

        assert_eq!(manager.request(A, R1), Ok(RequestOutcome::Granted));
        assert_eq!(manager.owner_of(R1), Some(A));
        assert!(manager.lock(R1).unwrap().acquired_at().is_some());
        assert_eq!(drain(&inboxes[0]), vec![ActorMessage::Granted(R1)]);
    }

    #[test]
    fn test_busy_resource_queues_in_arrival_order() {
        let (mut manager, inboxes) = manager_with(3, 1);

        manager.request(A, R1).unwrap();
        assert_eq!(manager.request(B, R1), Ok(RequestOutcome::Queued(1)));
        assert_eq!(manager.request(C, R1), Ok(RequestOutcome::Queued(2)));
        assert_eq!(drain(&inboxes[1]), vec![ActorMessage::MustWait(R1)]);

        let waiters: Vec<_> = manager.lock(R1).unwrap().waiters().collect();
        assert_eq!(waiters, vec![B, C]);
    }

    #[test]
    fn test_duplicate_request_is_a_noop() {
        let (mut manager, inboxes) = manager_with(2, 1);

        manager.request(A, R1).unwrap();
        manager.request(B, R1).unwrap();
        drain(&inboxes[1]);

        assert_eq!(manager.request(B, R1), Ok(RequestOutcome::AlreadyQueued));
        assert_eq!(manager.lock(R1).unwrap().queue_len(), 1);
        assert!(drain(&inboxes[1]).is_empty());
    }

    #[test]
    fn test_owner_never_joins_its_own_queue() {
        let (mut manager, _inboxes) = manager_with(1, 1);

        manager.request(A, R1).unwrap();
        assert_eq!(manager.request(A, R1), Ok(RequestOutcome::AlreadyHeld));
        assert_eq!(manager.lock(R1).unwrap().queue_len(), 0);
    }

    #[test]
    fn test_release_hands_off_to_queue_head() {
        let (mut manager, inboxes) = manager_with(3, 1);

        manager.request(A, R1).unwrap();
        manager.request(B, R1).unwrap();
        manager.request(C, R1).unwrap();
        drain(&inboxes[1]);

        assert_eq!(manager.release(A, R1, false), Ok(Some(B)));
        assert_eq!(manager.owner_of(R1), Some(B));
        assert_eq!(drain(&inboxes[1]), vec![ActorMessage::Granted(R1)]);
        assert_eq!(manager.release(B, R1, false), Ok(Some(C)));
        assert_eq!(manager.release(C, R1, false), Ok(None));
        assert_eq!(manager.owner_of(R1), None);
    }

    #[test]
    fn test_release_by_non_owner_is_rejected_without_change() {
        let (mut manager, _inboxes) = manager_with(2, 1);

        manager.request(A, R1).unwrap();
        let result = manager.release(B, R1, false);
        assert_eq!(
            result,
            Err(SimError::InvalidRelease {
                process: B,
                resource: R1,
                owner: Some(A),
            })
        );
        assert_eq!(manager.owner_of(R1), Some(A));
    }

    #[test]
    fn test_forced_release_by_anyone() {
        let (mut manager, _inboxes) = manager_with(2, 1);

        manager.request(A, R1).unwrap();
        manager.request(B, R1).unwrap();
        assert_eq!(manager.release(C, R1, true), Ok(Some(B)));
    }

    #[test]
    fn test_unreachable_waiters_are_skipped() {
        let (mut manager, mut inboxes) = manager_with(4, 1);

        manager.request(A, R1).unwrap();
        manager.request(B, R1).unwrap();
        manager.request(C, R1).unwrap();
        manager.request(D, R1).unwrap();

        // B and C terminate while queued
        let d_inbox = inboxes.pop().unwrap();
        inboxes.truncate(1);

        let events = manager.subscribe();
        assert_eq!(manager.release(A, R1, false), Ok(Some(D)));
        assert_eq!(manager.owner_of(R1), Some(D));
        assert!(d_inbox.try_iter().any(|m| m == ActorMessage::Granted(R1)));

        let unreachable: Vec<_> = events
            .try_iter()
            .filter_map(|event| match event {
                SimEvent::UnreachableActor { process, .. } => Some(process),
                _ => None,
            })
            .collect();
        assert_eq!(unreachable, vec![B, C]);
    }

    #[test]
    fn test_queue_empties_when_every_waiter_is_gone() {
        let (mut manager, mut inboxes) = manager_with(3, 1);

        manager.request(A, R1).unwrap();
        manager.request(B, R1).unwrap();
        manager.request(C, R1).unwrap();
        inboxes.truncate(1);

        assert_eq!(manager.release(A, R1, false), Ok(None));
        assert_eq!(manager.owner_of(R1), None);
        assert_eq!(manager.lock(R1).unwrap().queue_len(), 0);
    }

    #[test]
    fn test_revoke_notifies_former_owner() {
        let (mut manager, inboxes) = manager_with(2, 2);

        manager.request(A, R2).unwrap();
        manager.request(B, R2).unwrap();
        drain(&inboxes[0]);

        assert_eq!(manager.revoke(R2), Ok(Some(A)));
        assert_eq!(manager.owner_of(R2), Some(B));
        assert_eq!(drain(&inboxes[0]), vec![ActorMessage::Preempt(R2)]);
        assert_eq!(manager.revoke(R1), Ok(None));
    }

    #[test]
    fn test_withdraw_leaves_other_waiters_in_order() {
        let (mut manager, _inboxes) = manager_with(3, 1);

        manager.request(A, R1).unwrap();
        manager.request(B, R1).unwrap();
        manager.request(C, R1).unwrap();

        assert_eq!(manager.withdraw(B), vec![R1]);
        let waiters: Vec<_> = manager.lock(R1).unwrap().waiters().collect();
        assert_eq!(waiters, vec![C]);
    }

    #[test]
    fn test_unknown_ids_are_rejected() {
        let (mut manager, _inboxes) = manager_with(1, 1);

        assert_eq!(
            manager.request(B, R1),
            Err(SimError::UnknownProcess(B))
        );
        assert_eq!(
            manager.request(A, R2),
            Err(SimError::UnknownResource(R2))
        );
    }
}
