//! Lock wait graph built from a `pg_locks` snapshot.
//!
//! Every ungranted request that shares a lockable object with a granted,
//! conflicting holder becomes an edge `waiting -> blocking`. All such edges
//! are kept, including parallel edges between the same two backends on
//! different objects, so a graph built from N edges has exactly N edges.
//!
//! A cycle is a deadlock candidate: the server's detector has not resolved it
//! yet at the moment of the snapshot. Cycles are reported, never acted on.

mod conflict;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

pub use conflict::{LockMode, PREDICATE_LOCK_MODE, modes_conflict};

/// Error type for malformed lock snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An edge references a process id that cannot exist.
    InvalidPid { pid: i32 },
    /// An edge claims a backend waits for itself.
    SelfWait { pid: i32 },
    /// A snapshot row lacks a required field.
    MalformedRow { row: usize, reason: &'static str },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::InvalidPid { pid } => write!(f, "edge references invalid pid {}", pid),
            GraphError::SelfWait { pid } => write!(f, "pid {} waits for itself", pid),
            GraphError::MalformedRow { row, reason } => {
                write!(f, "snapshot row {}: {}", row, reason)
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// One row of the lock snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockRow {
    pub pid: i32,
    pub locktype: String,
    /// Identifies the lockable object; equal values mean the same object.
    pub object: String,
    /// Relation name for relation-scoped locks.
    pub relation: Option<String>,
    pub mode: String,
    pub granted: bool,
}

/// A backend waiting on a lock held by another backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockEdge {
    pub waiting_pid: i32,
    pub blocking_pid: i32,
    pub object: String,
    pub relation: Option<String>,
    /// Mode requested by the waiter.
    pub mode: String,
    /// Mode held by the blocker.
    pub held_mode: String,
}

impl LockEdge {
    fn validate(&self) -> Result<(), GraphError> {
        for pid in [self.waiting_pid, self.blocking_pid] {
            if pid <= 0 {
                return Err(GraphError::InvalidPid { pid });
            }
        }
        if self.waiting_pid == self.blocking_pid {
            return Err(GraphError::SelfWait {
                pid: self.waiting_pid,
            });
        }
        Ok(())
    }

    /// Relation name if known, otherwise the raw object identifier.
    pub fn target(&self) -> &str {
        self.relation.as_deref().unwrap_or(&self.object)
    }
}

fn validate_row(idx: usize, row: &LockRow) -> Result<(), GraphError> {
    if row.pid <= 0 {
        return Err(GraphError::MalformedRow {
            row: idx,
            reason: "pid must be positive",
        });
    }
    if row.object.is_empty() {
        return Err(GraphError::MalformedRow {
            row: idx,
            reason: "object identifier is empty",
        });
    }
    if row.mode.is_empty() {
        return Err(GraphError::MalformedRow {
            row: idx,
            reason: "lock mode is empty",
        });
    }
    Ok(())
}

/// Derives wait edges from a snapshot.
///
/// Every conflicting holder of the object gets its own edge; a holder with
/// several granted modes on the same object yields one edge per waiter.
pub fn derive_edges(rows: &[LockRow]) -> Result<Vec<LockEdge>, GraphError> {
    for (idx, row) in rows.iter().enumerate() {
        validate_row(idx, row)?;
    }

    let mut holders: BTreeMap<&str, Vec<&LockRow>> = BTreeMap::new();
    for row in rows
        .iter()
        .filter(|r| r.granted && r.mode != PREDICATE_LOCK_MODE)
    {
        holders.entry(row.object.as_str()).or_default().push(row);
    }

    let mut edges = Vec::new();
    let mut seen: HashSet<(i32, i32, &str)> = HashSet::new();
    for waiter in rows.iter().filter(|r| !r.granted) {
        let Some(granted) = holders.get(waiter.object.as_str()) else {
            continue;
        };
        for holder in granted {
            if holder.pid == waiter.pid || !modes_conflict(&waiter.mode, &holder.mode) {
                continue;
            }
            if !seen.insert((waiter.pid, holder.pid, waiter.object.as_str())) {
                continue;
            }
            edges.push(LockEdge {
                waiting_pid: waiter.pid,
                blocking_pid: holder.pid,
                object: waiter.object.clone(),
                relation: waiter.relation.clone().or_else(|| holder.relation.clone()),
                mode: waiter.mode.clone(),
                held_mode: holder.mode.clone(),
            });
        }
    }
    Ok(edges)
}

/// A backend's position in a blocking tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub pid: i32,
    /// 1 for the root blocker.
    pub depth: usize,
    pub root_pid: i32,
}

/// Everything the renderer shows about one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WaitReport {
    pub edges: Vec<LockEdge>,
    pub root_blockers: Vec<i32>,
    pub tree: Vec<TreeNode>,
    /// Deadlock candidates, each rotated to start at its smallest pid.
    pub cycles: Vec<Vec<i32>>,
}

impl WaitReport {
    pub fn has_deadlock_candidates(&self) -> bool {
        !self.cycles.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Directed wait graph over backend pids.
pub struct WaitGraph {
    graph: DiGraph<i32, LockEdge>,
    nodes: HashMap<i32, NodeIndex>,
}

impl WaitGraph {
    /// Builds the graph; fails on the first malformed edge.
    pub fn from_edges(edges: Vec<LockEdge>) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(edges.len(), edges.len());
        let mut nodes: HashMap<i32, NodeIndex> = HashMap::new();
        for edge in edges {
            edge.validate()?;
            let from = *nodes
                .entry(edge.waiting_pid)
                .or_insert_with(|| graph.add_node(edge.waiting_pid));
            let to = *nodes
                .entry(edge.blocking_pid)
                .or_insert_with(|| graph.add_node(edge.blocking_pid));
            graph.add_edge(from, to, edge);
        }
        Ok(Self { graph, nodes })
    }

    /// Derives edges from a snapshot and builds the graph.
    pub fn from_snapshot(rows: &[LockRow]) -> Result<Self, GraphError> {
        Self::from_edges(derive_edges(rows)?)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.edge_count() == 0
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &LockEdge> {
        self.graph.edge_weights()
    }

    /// All pids in ascending order.
    pub fn pids(&self) -> Vec<i32> {
        let mut pids: Vec<i32> = self.nodes.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    fn neighbors(&self, node: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(node, dir).collect();
        out.sort_unstable_by_key(|n| self.graph[*n]);
        out.dedup();
        out
    }

    fn related(&self, pid: i32, dir: Direction) -> Vec<i32> {
        match self.nodes.get(&pid) {
            Some(&node) => self
                .neighbors(node, dir)
                .into_iter()
                .map(|n| self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Pids that `pid` waits for.
    pub fn blockers_of(&self, pid: i32) -> Vec<i32> {
        self.related(pid, Direction::Outgoing)
    }

    /// Pids waiting for `pid`.
    pub fn waiters_of(&self, pid: i32) -> Vec<i32> {
        self.related(pid, Direction::Incoming)
    }

    /// Backends that block others without waiting themselves.
    pub fn root_blockers(&self) -> Vec<i32> {
        self.pids()
            .into_iter()
            .filter(|pid| self.blockers_of(*pid).is_empty() && !self.waiters_of(*pid).is_empty())
            .collect()
    }

    /// Blocking trees below each root blocker, depth-first.
    ///
    /// A backend waiting on several roots appears under each of them.
    pub fn blocking_tree(&self) -> Vec<TreeNode> {
        let mut out = Vec::new();
        for root in self.root_blockers() {
            let mut visited = HashSet::new();
            let mut stack = vec![(root, 1usize)];
            while let Some((pid, depth)) = stack.pop() {
                if !visited.insert(pid) {
                    continue;
                }
                out.push(TreeNode {
                    pid,
                    depth,
                    root_pid: root,
                });
                for waiter in self.waiters_of(pid).into_iter().rev() {
                    stack.push((waiter, depth + 1));
                }
            }
        }
        out
    }

    /// Finds deadlock candidates.
    ///
    /// Depth-first traversal with in-progress/done marking; every back edge
    /// closes a cycle. Cycles are rotated to start at their smallest pid and
    /// de-duplicated, so each is reported once no matter where the traversal
    /// entered it.
    pub fn find_cycles(&self) -> Vec<Vec<i32>> {
        let mut marks: HashMap<NodeIndex, Mark> = HashMap::new();
        let mut stack: Vec<NodeIndex> = Vec::new();
        let mut found: BTreeSet<Vec<i32>> = BTreeSet::new();

        for pid in self.pids() {
            let node = self.nodes[&pid];
            if !marks.contains_key(&node) {
                self.visit(node, &mut marks, &mut stack, &mut found);
            }
        }
        found.into_iter().collect()
    }

    fn visit(
        &self,
        node: NodeIndex,
        marks: &mut HashMap<NodeIndex, Mark>,
        stack: &mut Vec<NodeIndex>,
        found: &mut BTreeSet<Vec<i32>>,
    ) {
        marks.insert(node, Mark::InProgress);
        stack.push(node);

        for next in self.neighbors(node, Direction::Outgoing) {
            match marks.get(&next) {
                None => self.visit(next, marks, stack, found),
                Some(Mark::InProgress) => {
                    if let Some(start) = stack.iter().position(|n| *n == next) {
                        let cycle = stack[start..].iter().map(|n| self.graph[*n]).collect();
                        found.insert(canonical_cycle(cycle));
                    }
                }
                Some(Mark::Done) => {}
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
    }

    pub fn report(&self) -> WaitReport {
        WaitReport {
            edges: self.edges().cloned().collect(),
            root_blockers: self.root_blockers(),
            tree: self.blocking_tree(),
            cycles: self.find_cycles(),
        }
    }
}

/// Rotates a cycle so its smallest pid comes first.
fn canonical_cycle(mut cycle: Vec<i32>) -> Vec<i32> {
    if let Some(start) = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, pid)| **pid)
        .map(|(idx, _)| idx)
    {
        cycle.rotate_left(start);
    }
    cycle
}
