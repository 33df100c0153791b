//! Graph module for deadlock detection
//!
//! The wait-for graph records which processes are blocked on resources held by
//! which other processes. It is rebuilt from a snapshot on every pass.

pub(crate) mod wait_for_graph;

pub use wait_for_graph::WaitForGraph;
