//! Wait-For Graph for detecting active deadlocks
//!
//! The graph is derived from a manager [`Snapshot`] on every detection pass
//! and thrown away afterwards; it is never updated incrementally.
//!
//! # How it works
//!
//! For every resource with an owner `Q`, each queued waiter `P` contributes the
//! directed edge `P -> Q` ("P waits for Q"). A cycle in this graph is a
//! deadlock. Cycles are found with an iterative depth-first traversal using
//! three-color marking: a back-edge to a node that is still on the DFS path
//! closes a cycle, and the path from that node to the current one is reported
//! as the witness.

use crate::core::manager::Snapshot;
use crate::core::types::ProcessId;
use fxhash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not visited yet
    White,
    /// On the current DFS path
    Gray,
    /// Fully explored
    Black,
}

/// Directed graph of processes waiting for other processes
#[derive(Debug, Clone, Default)]
pub struct WaitForGraph {
    /// Every process known to the snapshot, in ascending id order
    nodes: Vec<ProcessId>,
    /// Outgoing edges per process, in insertion order without duplicates
    edges: FxHashMap<ProcessId, Vec<ProcessId>>,
}

impl WaitForGraph {
    /// Create a new empty wait-for graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from a manager snapshot
    ///
    /// # Arguments
    /// * `snapshot` - Ownership and wait queues at one instant
    ///
    /// # Returns
    /// A graph with one node per process and one edge per (waiter, owner) pair
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut graph = WaitForGraph::new();
        for process in &snapshot.processes {
            graph.add_node(process.process);
        }
        for resource in &snapshot.resources {
            if let Some(owner) = resource.owner {
                for &waiter in &resource.waiters {
                    if waiter != owner {
                        graph.add_edge(waiter, owner);
                    }
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, process: ProcessId) {
        if let Err(pos) = self.nodes.binary_search(&process) {
            self.nodes.insert(pos, process);
        }
    }

    /// Add a directed edge: `from` process waits for `to` process
    pub fn add_edge(&mut self, from: ProcessId, to: ProcessId) {
        self.add_node(from);
        self.add_node(to);
        let targets = self.edges.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
    }

    /// Processes `process` is waiting for
    pub fn successors(&self, process: ProcessId) -> &[ProcessId] {
        self.edges.get(&process).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn nodes(&self) -> &[ProcessId] {
        &self.nodes
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Find a cycle, starting traversals in ascending process order
    ///
    /// # Returns
    /// * `Some(path)` - The processes on the first cycle found, in traversal order
    /// * `None` - The graph is acyclic
    pub fn find_cycle(&self) -> Option<Vec<ProcessId>> {
        self.find_cycle_in_order(&self.nodes)
    }

    /// Find a cycle, starting traversals from the processes in `order`
    ///
    /// Nodes missing from `order` are still explored after it is exhausted,
    /// so every cycle reachable in the graph is found regardless of the order.
    pub fn find_cycle_in_order(&self, order: &[ProcessId]) -> Option<Vec<ProcessId>> {
        let mut colors: FxHashMap<ProcessId, Color> =
            self.nodes.iter().map(|&p| (p, Color::White)).collect();

        for &root in order.iter().chain(self.nodes.iter()) {
            if colors.get(&root).copied().unwrap_or(Color::White) != Color::White {
                continue;
            }
            if let Some(cycle) = self.dfs(root, &mut colors) {
                return Some(cycle);
            }
        }
        None
    }

    /// Iterative DFS from `root`; returns the first cycle closed by a back-edge
    fn dfs(
        &self,
        root: ProcessId,
        colors: &mut FxHashMap<ProcessId, Color>,
    ) -> Option<Vec<ProcessId>> {
        // Each frame is (node, index of the next edge to follow)
        let mut stack: Vec<(ProcessId, usize)> = vec![(root, 0)];
        let mut path: Vec<ProcessId> = vec![root];
        colors.insert(root, Color::Gray);

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            let successors = self.successors(node);

            if next >= successors.len() {
                colors.insert(node, Color::Black);
                stack.pop();
                path.pop();
                continue;
            }
            frame.1 += 1;

            let target = successors[next];
            match colors.get(&target).copied().unwrap_or(Color::White) {
                Color::White => {
                    colors.insert(target, Color::Gray);
                    stack.push((target, 0));
                    path.push(target);
                }
                Color::Gray => {
                    let start = path.iter().position(|&p| p == target).unwrap_or(0);
                    return Some(path[start..].to_vec());
                }
                Color::Black => {}
            }
        }
        None
    }
}
