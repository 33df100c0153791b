//! Banker's safety test over single-unit resources
//!
//! Every resource has exactly one unit, so the classic vectors collapse to
//! zeros and ones: `available[r]` is 1 when `r` is free, `allocation[p][r]` is
//! 1 when `p` owns `r`, and `max[p][r]` is 1 when `p` may ask for `r` during
//! its current cycle. A state is safe when the processes can be ordered so
//! that each one's remaining need fits into what is free plus what the
//! processes before it give back.

use crate::core::manager::Snapshot;
use crate::core::types::ProcessId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyCheck {
    processes: Vec<ProcessId>,
    available: Vec<u32>,
    allocation: Vec<Vec<u32>>,
    max: Vec<Vec<u32>>,
}

impl SafetyCheck {
    /// Build the vectors from a snapshot
    ///
    /// Aborted processes are left out. A process's maximum demand is its
    /// declared claim plus whatever it already holds or is queued for.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let resources = snapshot.resources.len();
        let available = snapshot
            .resources
            .iter()
            .map(|view| u32::from(view.owner.is_none()))
            .collect();

        let mut processes = Vec::new();
        let mut allocation = Vec::new();
        let mut max = Vec::new();
        for view in snapshot.processes.iter().filter(|view| !view.aborted) {
            let mut allocated = vec![0; resources];
            let mut demand = vec![0; resources];
            for resource in &view.held {
                allocated[resource.0] = 1;
                demand[resource.0] = 1;
            }
            for resource in view.claim.iter().chain(view.waiting_on.iter()) {
                if let Some(slot) = demand.get_mut(resource.0) {
                    *slot = 1;
                }
            }
            processes.push(view.process);
            allocation.push(allocated);
            max.push(demand);
        }

        SafetyCheck {
            processes,
            available,
            allocation,
            max,
        }
    }

    /// Build the check from raw vectors
    ///
    /// `allocation` and `max` are indexed `[process][resource]`.
    pub fn new(
        processes: Vec<ProcessId>,
        available: Vec<u32>,
        allocation: Vec<Vec<u32>>,
        max: Vec<Vec<u32>>,
    ) -> Self {
        SafetyCheck {
            processes,
            available,
            allocation,
            max,
        }
    }

    /// Remaining demand of the process at `index`
    pub fn need(&self, index: usize) -> Vec<u32> {
        self.max[index]
            .iter()
            .zip(&self.allocation[index])
            .map(|(&max, &allocated)| max.saturating_sub(allocated))
            .collect()
    }

    /// Find an order in which every process can run to completion
    ///
    /// Scans processes in index order and always picks the first one whose
    /// need fits, so the sequence is deterministic.
    ///
    /// # Returns
    /// * `Some(sequence)` - The state is safe
    /// * `None` - Some process can never finish
    pub fn safe_sequence(&self) -> Option<Vec<ProcessId>> {
        let mut work = self.available.clone();
        let mut finished = vec![false; self.processes.len()];
        let mut sequence = Vec::with_capacity(self.processes.len());

        while sequence.len() < self.processes.len() {
            let runnable = (0..self.processes.len()).find(|&i| {
                !finished[i]
                    && self
                        .need(i)
                        .iter()
                        .zip(&work)
                        .all(|(&need, &free)| need <= free)
            })?;

            for (free, &held) in work.iter_mut().zip(&self.allocation[runnable]) {
                *free += held;
            }
            finished[runnable] = true;
            sequence.push(self.processes[runnable]);
        }

        Some(sequence)
    }

    pub fn is_safe(&self) -> bool {
        self.safe_sequence().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: usize) -> ProcessId {
        ProcessId(id)
    }

    #[test]
    fn test_crossed_claims_are_unsafe() {
        // A holds R1 and needs R2, B holds R2 and needs R1
        let check = SafetyCheck::new(
            vec![p(0), p(1)],
            vec![0, 0],
            vec![vec![1, 0], vec![0, 1]],
            vec![vec![1, 1], vec![1, 1]],
        );
        assert_eq!(check.need(0), vec![0, 1]);
        assert!(!check.is_safe());
    }

    #[test]
    fn test_sequence_releases_resources_for_later_processes() {
        // A holds R1 and needs nothing else; B waits for R1; R2 is free
        let check = SafetyCheck::new(
            vec![p(0), p(1)],
            vec![0, 1],
            vec![vec![1, 0], vec![0, 0]],
            vec![vec![1, 0], vec![1, 1]],
        );
        assert_eq!(check.safe_sequence(), Some(vec![p(0), p(1)]));
    }

    #[test]
    fn test_order_is_first_fit() {
        let check = SafetyCheck::new(
            vec![p(0), p(1), p(2)],
            vec![1, 0, 0],
            vec![vec![0, 1, 0], vec![0, 0, 1], vec![0, 0, 0]],
            vec![vec![1, 1, 1], vec![0, 0, 1], vec![1, 0, 0]],
        );
        // A needs R1+R3, B needs nothing, C needs R1
        assert_eq!(check.safe_sequence(), Some(vec![p(1), p(0), p(2)]));
    }

    #[test]
    fn test_empty_system_is_safe() {
        let check = SafetyCheck::new(Vec::new(), vec![1, 1], Vec::new(), Vec::new());
        assert_eq!(check.safe_sequence(), Some(Vec::new()));
    }
}
