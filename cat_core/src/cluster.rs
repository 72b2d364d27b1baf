//! Clusters: ordered chains of nodes grown by the cellular automaton.
//!
//! A cluster starts from one seed node and grows at its tail, then at its
//! head (by inverting, growing the tail and inverting back). Each step
//! follows the most probable triplet continuation from the last two nodes.
//! Cells taken by a cluster are recorded in the caller's [`CellSet`], so a
//! cell never enters a chain twice and growth always terminates.
//!
//! After growth the cluster flags the nodes where the path is not unique
//! (two ways round a drift circle, competing continuations, a bridged gap)
//! and groups them into windows that are resolved into broken lines.

use crate::ambiguity::{self, WindowSolution};
use crate::budget::Deadline;
use crate::cell::{Cell, CellId, CellSet};
use crate::circle::{best_fit_circle, Circle};
use crate::clusterizer::NodeGraph;
use crate::config::CatConfig;
use crate::node::Node;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

// ============================================================================
// STATE
// ============================================================================

/// Life cycle of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterState {
    /// Still accepting nodes at either end
    Growing,
    /// Growth finished with at least one ambiguous window
    Ambiguous,
    /// Alternatives produced for every window
    Resolved,
    /// No further changes
    Frozen,
}

/// Result of resolving the windows of one cluster.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub solutions: Vec<WindowSolution>,
    pub timed_out: bool,
}

// ============================================================================
// CLUSTER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    nodes: Vec<Node>,
    /// Plausible continuations seen when leaving each node
    branches: Vec<usize>,
    ambiguous: Vec<bool>,
    state: ClusterState,
}

impl Cluster {
    /// A one-node cluster ready to grow.
    pub fn seed(node: Node) -> Self {
        Self {
            nodes: vec![node],
            branches: vec![0],
            ambiguous: vec![false],
            state: ClusterState::Growing,
        }
    }

    /// A cluster over an explicit chain of nodes.
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        let n = nodes.len();
        Self {
            nodes,
            branches: vec![0; n],
            ambiguous: vec![false; n],
            state: ClusterState::Growing,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn branches(&self) -> &[usize] {
        &self.branches
    }

    pub fn cells(&self) -> Vec<Cell> {
        self.nodes.iter().map(|n| *n.cell()).collect()
    }

    pub fn has_cell(&self, cell: &Cell) -> bool {
        self.position_of(cell.id()).is_some()
    }

    /// Index of the node holding cell `id`.
    pub fn position_of(&self, id: CellId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id() == id)
    }

    pub fn node_of_cell(&self, id: CellId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Every cell of `self` is also in `other`.
    pub fn is_contained_in(&self, other: &Cluster) -> bool {
        self.nodes.iter().all(|n| other.has_cell(n.cell()))
    }

    pub fn contains(&self, other: &Cluster) -> bool {
        other.is_contained_in(self)
    }

    /// Nodes `first..=last` as a frozen cluster of their own.
    pub fn sub_cluster(&self, first: usize, last: usize) -> Option<Cluster> {
        if first > last || last >= self.nodes.len() {
            return None;
        }
        Some(Self {
            nodes: self.nodes[first..=last].to_vec(),
            branches: self.branches[first..=last].to_vec(),
            ambiguous: self.ambiguous[first..=last].to_vec(),
            state: ClusterState::Frozen,
        })
    }

    /// Least-squares circle through the node centres.
    pub fn circle_fit(&self) -> Option<Circle> {
        let centers: Vec<_> = self.nodes.iter().map(|n| *n.cell().center()).collect();
        best_fit_circle(&centers)
    }

    /// Same chain walked from the other end.
    pub fn invert(&self) -> Self {
        Self {
            nodes: self.nodes.iter().rev().map(Node::invert).collect(),
            branches: self.branches.iter().rev().copied().collect(),
            ambiguous: self.ambiguous.iter().rev().copied().collect(),
            state: self.state,
        }
    }

    pub fn freeze(&mut self) {
        self.state = ClusterState::Frozen;
    }

    // ========================================================================
    // GROWTH
    // ========================================================================

    /// Grow at both ends until no admissible neighbour remains.
    ///
    /// Cells taken are added to `owned`. Returns true when the deadline
    /// stopped growth early.
    pub fn grow(
        &mut self,
        graph: &NodeGraph,
        owned: &mut CellSet,
        config: &CatConfig,
        deadline: &Deadline,
    ) -> bool {
        for slot in self.nodes.iter().filter_map(|n| graph.slot_of(n.id())) {
            owned.insert(slot);
        }

        let mut timed_out = self.grow_tail(graph, owned, config, deadline);
        if !timed_out {
            *self = self.invert();
            timed_out = self.grow_tail(graph, owned, config, deadline);
            *self = self.invert();
        }

        debug!(
            seed = self.nodes.first().map(Node::id),
            nodes = self.nodes.len(),
            timed_out,
            "Cluster grown"
        );
        timed_out
    }

    fn grow_tail(
        &mut self,
        graph: &NodeGraph,
        owned: &mut CellSet,
        config: &CatConfig,
        deadline: &Deadline,
    ) -> bool {
        loop {
            if deadline.expired() {
                return true;
            }

            let step = if self.nodes.len() == 1 {
                self.first_step(graph, owned)
            } else {
                self.next_step(graph, owned, config.ratio)
            };
            let Some((slot, branches)) = step else {
                return false;
            };
            let Some(node) = graph.node(slot) else {
                return false;
            };

            let last = self.nodes.len() - 1;
            self.branches[last] = self.branches[last].max(branches);
            trace!(from = self.nodes[last].id(), to = node.id(), branches, "Growth step");

            owned.insert(slot);
            self.nodes.push(node.clone());
            self.branches.push(0);
            self.ambiguous.push(false);
        }
    }

    /// From a lone seed: the closest free neighbour, preferring direct
    /// links and neighbours that can carry the chain further.
    fn first_step(&self, graph: &NodeGraph, owned: &CellSet) -> Option<(usize, usize)> {
        let seed = &self.nodes[0];
        seed.couplets()
            .iter()
            .filter_map(|c| {
                let slot = graph.slot_of(c.b().id())?;
                if owned.contains(slot) {
                    return None;
                }
                let extends = graph
                    .node(slot)
                    .is_some_and(|n| n.continuations_after(seed.id()).next().is_some());
                Some((slot, c, extends))
            })
            .min_by(|(_, x, ex), (_, y, ey)| {
                x.skipped()
                    .cmp(&y.skipped())
                    .then(ey.cmp(ex))
                    .then(x.distance_hor().value.total_cmp(&y.distance_hor().value))
                    .then(x.b().id().cmp(&y.b().id()))
            })
            .map(|(slot, _, _)| (slot, 1))
    }

    /// From the last two nodes: the free far cell of the most probable
    /// triplet, with the number of continuations within `ratio` of it.
    fn next_step(&self, graph: &NodeGraph, owned: &CellSet, ratio: f64) -> Option<(usize, usize)> {
        let n = self.nodes.len();
        let (prev, last) = (&self.nodes[n - 2], &self.nodes[n - 1]);

        let candidates: Vec<(usize, CellId, f64)> = last
            .continuations_after(prev.id())
            .filter_map(|(cell, p)| {
                let slot = graph.slot_of(cell.id())?;
                (!owned.contains(slot)).then_some((slot, cell.id(), p))
            })
            .collect();

        let best = candidates.iter().map(|c| c.2).fold(0.0, f64::max);
        let branches = candidates.iter().filter(|c| c.2 >= best / ratio).count();
        candidates
            .into_iter()
            .max_by(|x, y| x.2.total_cmp(&y.2).then(y.1.cmp(&x.1)))
            .map(|(slot, _, _)| (slot, branches))
    }

    // ========================================================================
    // AMBIGUITIES
    // ========================================================================

    /// Flag the nodes where the path through the chain is not unique and
    /// move to `Ambiguous` or `Frozen` accordingly.
    pub fn detect_ambiguities(&mut self, quadrant_angle: f64) {
        self.ambiguous = (0..self.nodes.len())
            .map(|i| self.node_is_ambiguous(i, quadrant_angle))
            .collect();
        self.state = if self.windows().is_empty() {
            ClusterState::Frozen
        } else {
            ClusterState::Ambiguous
        };
    }

    fn node_is_ambiguous(&self, i: usize, quadrant_angle: f64) -> bool {
        if self.nodes.len() < 2 {
            return false;
        }
        self.nodes[i].side_points(quadrant_angle).len() >= 2
            || self.branches[i] >= 2
            || self.gap_at(i)
    }

    /// Node `i` is linked to a chain neighbour across missing layers.
    pub fn gap_at(&self, i: usize) -> bool {
        let Some(node) = self.nodes.get(i) else {
            return false;
        };
        let neighbours = [i.checked_sub(1), (i + 1 < self.nodes.len()).then_some(i + 1)];
        neighbours
            .into_iter()
            .flatten()
            .filter_map(|j| node.couplet_to(self.nodes[j].id()))
            .any(|c| c.is_gap())
    }

    pub fn is_ambiguous(&self, i: usize) -> bool {
        self.ambiguous.get(i).copied().unwrap_or(false)
    }

    /// First node of an ambiguous run.
    pub fn start_ambiguity(&self, i: usize) -> bool {
        self.is_ambiguous(i) && (i == 0 || !self.is_ambiguous(i - 1))
    }

    /// Last node of an ambiguous run.
    pub fn end_ambiguity(&self, i: usize) -> bool {
        self.is_ambiguous(i) && !self.is_ambiguous(i + 1)
    }

    /// Ambiguous runs widened by one anchor node on each side where one
    /// exists, as `(ifirst, ilast)`.
    pub fn windows(&self) -> Vec<(usize, usize)> {
        let n = self.nodes.len();
        let mut windows = Vec::new();
        let mut i = 0;
        while i < n {
            if !self.start_ambiguity(i) {
                i += 1;
                continue;
            }
            let mut j = i;
            while !self.end_ambiguity(j) {
                j += 1;
            }
            let (first, last) = (i.saturating_sub(1), (j + 1).min(n - 1));
            if first < last {
                windows.push((first, last));
            }
            i = j + 1;
        }
        windows
    }

    /// Enumerate the broken lines through each window.
    pub fn solve_ambiguities(
        &mut self,
        windows: &[(usize, usize)],
        config: &CatConfig,
        deadline: &Deadline,
    ) -> Resolution {
        let mut resolution = Resolution::default();
        for &(ifirst, ilast) in windows {
            let solution = ambiguity::solve(self, ifirst, ilast, config, deadline);
            trace!(
                ifirst,
                ilast,
                alternatives = solution.alternatives.len(),
                steps = solution.steps,
                "Window resolved"
            );
            resolution.solutions.push(solution);
            if deadline.expired() {
                resolution.timed_out = true;
                break;
            }
        }
        if !resolution.timed_out && !windows.is_empty() {
            self.state = ClusterState::Resolved;
        }
        resolution
    }
}
