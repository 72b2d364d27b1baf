//! The per-event driver: adjacency, node graph, clusters and windows.
//!
//! ```text
//! hits → CellArena → adjacency → good couplets → nodes (+ triplets)
//!      → connected components → seeded growth → windows → broken lines
//! ```
//!
//! Components share no cells, so each one is resolved with its own
//! ownership set and can run on the rayon pool.

use crate::ambiguity::WindowSolution;
use crate::budget::{Clock, Deadline, SystemClock};
use crate::cell::{Cell, CellArena, CellId, CellSet, Hit};
use crate::cluster::Cluster;
use crate::config::CatConfig;
use crate::couplet::Couplet;
use crate::error::ConfigError;
use crate::node::Node;
use crate::triplet::Triplet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Relative tolerance on the distance between neighbouring wires.
const PITCH_TOLERANCE: f64 = 0.15;

// ============================================================================
// ADJACENCY
// ============================================================================

/// How two cells neighbour each other on the wire grid.
///
/// Ordered from loosest to tightest: `Far < Gap(k) < Diagonal < Side`,
/// with wider gaps looser than narrower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Adjacency {
    Far,
    /// Neighbours across `k` missing layers
    Gap(u32),
    Diagonal,
    Side,
}

impl Adjacency {
    fn rank(&self) -> (u8, i64) {
        match self {
            Adjacency::Far => (0, 0),
            Adjacency::Gap(k) => (1, -i64::from(*k)),
            Adjacency::Diagonal => (2, 0),
            Adjacency::Side => (3, 0),
        }
    }

    pub fn skipped(&self) -> u32 {
        match self {
            Adjacency::Gap(k) => *k,
            _ => 0,
        }
    }
}

impl PartialOrd for Adjacency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Adjacency {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

fn matches_pitch(distance: f64, expected: f64, cell_distance: f64) -> bool {
    (distance - expected).abs() < PITCH_TOLERANCE * cell_distance
}

/// 2 for side-by-side wires, 1 for diagonal ones, 0 otherwise.
pub fn near_level(a: &Cell, b: &Cell, cell_distance: f64) -> u8 {
    let distance = a.center().hor_distance(b.center()).value;
    if matches_pitch(distance, cell_distance, cell_distance) {
        2
    } else if matches_pitch(distance, std::f64::consts::SQRT_2 * cell_distance, cell_distance) {
        1
    } else {
        0
    }
}

/// Grid relation between two distinct cells.
pub fn adjacency(a: &Cell, b: &Cell, config: &CatConfig) -> Adjacency {
    if a.id() == b.id() || a.is_fast() != b.is_fast() {
        return Adjacency::Far;
    }
    if config.separate_sides && a.side() != b.side() {
        return Adjacency::Far;
    }

    let pitch = config.cell_distance;
    match near_level(a, b, pitch) {
        2 => return Adjacency::Side,
        1 => return Adjacency::Diagonal,
        _ => {}
    }

    // a gap of k layers sits k + 1 pitches away: straight, tilted by one
    // row, or diagonal; only the nearest k of each pattern can match
    let distance = a.center().hor_distance(b.center()).value;
    let steps = distance / pitch;
    [steps, (steps * steps - 1.0).max(0.0).sqrt(), steps / std::f64::consts::SQRT_2]
        .into_iter()
        .filter_map(|estimate| {
            let k = estimate.round() - 1.0;
            if !(1.0..=config.nofflayers as f64).contains(&k) {
                return None;
            }
            let n = k + 1.0;
            let expected = [
                n * pitch,
                (n * n + 1.0).sqrt() * pitch,
                n * std::f64::consts::SQRT_2 * pitch,
            ];
            expected
                .iter()
                .any(|&e| matches_pitch(distance, e, pitch))
                .then_some(k as u32)
        })
        .min()
        .map_or(Adjacency::Far, Adjacency::Gap)
}

// ============================================================================
// NODE GRAPH
// ============================================================================

/// Every cell of the event with its good couplets and triplets, indexed by
/// arena slot.
#[derive(Debug, Clone, Default)]
pub struct NodeGraph {
    arena: CellArena,
    nodes: Vec<Node>,
}

impl NodeGraph {
    pub fn build(arena: CellArena, config: &CatConfig) -> Self {
        let cells = arena.cells();
        let neighbours: Vec<Vec<(usize, Adjacency)>> = cells
            .iter()
            .map(|a| {
                cells
                    .iter()
                    .enumerate()
                    .filter_map(|(j, b)| {
                        let level = adjacency(a, b, config);
                        (level != Adjacency::Far).then_some((j, level))
                    })
                    .collect()
            })
            .collect();

        let nodes = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let couplets = neighbours[i]
                    .iter()
                    .filter(|&&(k, _)| {
                        is_good_couplet(cells, &neighbours, i, k, config)
                            && is_good_couplet(cells, &neighbours, k, i, config)
                    })
                    .map(|&(k, level)| Couplet::bridging(*cell, cells[k], level.skipped()))
                    .collect();
                let mut node = Node::new(*cell, couplets);
                node.calculate_triplets(config);
                node
            })
            .collect();

        Self { arena, nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn arena(&self) -> &CellArena {
        &self.arena
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, slot: usize) -> Option<&Node> {
        self.nodes.get(slot)
    }

    pub fn slot_of(&self, id: CellId) -> Option<usize> {
        self.arena.slot_of(id)
    }

    /// Cells linked by good couplets, as sorted slot lists ordered by their
    /// first slot.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut visited = CellSet::with_capacity(self.nodes.len());
        let mut components = Vec::new();

        for start in 0..self.nodes.len() {
            if !visited.insert(start) {
                continue;
            }
            let mut component = vec![start];
            let mut stack = vec![start];
            while let Some(slot) = stack.pop() {
                for couplet in self.nodes[slot].couplets() {
                    if let Some(next) = self.slot_of(couplet.b().id()) {
                        if visited.insert(next) {
                            component.push(next);
                            stack.push(next);
                        }
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }
}

/// The couplet `a → c` is redundant when some cell `b`, at least as close
/// to both of them, already joins them through a triplet with joints.
fn is_good_couplet(
    cells: &[Cell],
    neighbours: &[Vec<(usize, Adjacency)>],
    a: usize,
    c: usize,
    config: &CatConfig,
) -> bool {
    let level = adjacency(&cells[a], &cells[c], config);
    for &(b, ba) in &neighbours[a] {
        if b == c {
            continue;
        }
        let bc = adjacency(&cells[b], &cells[c], config);
        if bc == Adjacency::Far || bc < level || ba < level {
            continue;
        }
        let triplet = Triplet::build(
            Couplet::bridging(cells[b], cells[a], ba.skipped()),
            Couplet::bridging(cells[b], cells[c], bc.skipped()),
            config,
        );
        if triplet.has_joints() {
            return false;
        }
    }
    true
}

// ============================================================================
// OUTPUT
// ============================================================================

/// One grown cluster with the alternatives for each of its windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackCandidate {
    pub cluster: Cluster,
    pub solutions: Vec<WindowSolution>,
}

/// Counters for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub cells: usize,
    pub couplets: usize,
    pub triplets: usize,
    pub components: usize,
    pub clusters: usize,
    pub windows: usize,
    pub alternatives: usize,
    pub search_steps: usize,
}

impl EventStats {
    fn merge(&mut self, other: &EventStats) {
        self.clusters += other.clusters;
        self.windows += other.windows;
        self.alternatives += other.alternatives;
        self.search_steps += other.search_steps;
    }
}

/// Everything the tracker produced for one event.
///
/// Choosing one broken line per window is left to the consumer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventReconstruction {
    pub candidates: Vec<TrackCandidate>,
    /// The time budget ran out; `candidates` holds what was finished
    pub timed_out: bool,
    pub stats: EventStats,
}

struct ComponentResult {
    candidates: Vec<TrackCandidate>,
    timed_out: bool,
    stats: EventStats,
}

// ============================================================================
// CLUSTERIZER
// ============================================================================

/// Reconstructs track candidates from the hits of one event.
pub struct Clusterizer {
    config: CatConfig,
    clock: Arc<dyn Clock>,
}

impl Clusterizer {
    /// Validates the configuration once; the event path never fails.
    pub fn new(config: CatConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            clock: SystemClock::shared(),
        })
    }

    /// Creates a clusterizer with default configuration.
    pub fn with_defaults() -> Self {
        Self {
            config: CatConfig::default(),
            clock: SystemClock::shared(),
        }
    }

    /// Replace the time source used for the per-event budget.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CatConfig {
        &self.config
    }

    pub fn reconstruct(&self, hits: &[Hit]) -> EventReconstruction {
        let deadline = Deadline::start(Arc::clone(&self.clock), self.config.time_budget);
        let arena = CellArena::from_hits(hits, self.config.small_radius);
        let graph = NodeGraph::build(arena, &self.config);
        let components = graph.components();

        let results: Vec<ComponentResult> = if self.config.parallel {
            components
                .par_iter()
                .map(|component| self.resolve_component(&graph, component, &deadline))
                .collect()
        } else {
            components
                .iter()
                .map(|component| self.resolve_component(&graph, component, &deadline))
                .collect()
        };

        let mut event = EventReconstruction {
            stats: EventStats {
                cells: graph.len(),
                couplets: graph.nodes().iter().map(|n| n.couplets().len()).sum(),
                triplets: graph.nodes().iter().map(|n| n.triplets().len()).sum(),
                components: components.len(),
                ..EventStats::default()
            },
            ..EventReconstruction::default()
        };
        for result in results {
            event.stats.merge(&result.stats);
            event.timed_out |= result.timed_out;
            event.candidates.extend(result.candidates);
        }

        if event.timed_out {
            info!(
                candidates = event.candidates.len(),
                "Event time budget exhausted, returning partial reconstruction"
            );
        }
        debug!(
            cells = event.stats.cells,
            components = event.stats.components,
            clusters = event.stats.clusters,
            windows = event.stats.windows,
            alternatives = event.stats.alternatives,
            "Event reconstructed"
        );
        event
    }

    /// Seed, grow and resolve clusters until every cell of the component
    /// is taken.
    fn resolve_component(
        &self,
        graph: &NodeGraph,
        component: &[usize],
        deadline: &Deadline,
    ) -> ComponentResult {
        let mut owned = CellSet::with_capacity(graph.len());
        let mut result = ComponentResult {
            candidates: Vec::new(),
            timed_out: false,
            stats: EventStats::default(),
        };

        loop {
            if deadline.expired() {
                result.timed_out = true;
                break;
            }

            // track ends first: fewest couplets, then lowest id
            let seed = component
                .iter()
                .copied()
                .filter(|&slot| !owned.contains(slot))
                .filter_map(|slot| graph.node(slot).map(|n| (slot, n)))
                .min_by_key(|(_, n)| (n.couplets().len(), n.id()));
            let Some((_, seed)) = seed else {
                break;
            };

            let mut cluster = Cluster::seed(seed.clone());
            let grow_timed_out = cluster.grow(graph, &mut owned, &self.config, deadline);
            cluster.detect_ambiguities(self.config.quadrant_angle);

            let windows = cluster.windows();
            let resolution = if grow_timed_out {
                Default::default()
            } else {
                cluster.solve_ambiguities(&windows, &self.config, deadline)
            };
            cluster.freeze();

            result.stats.clusters += 1;
            result.stats.windows += resolution.solutions.len();
            for solution in &resolution.solutions {
                result.stats.alternatives += solution.alternatives.len();
                result.stats.search_steps += solution.steps;
            }
            result.candidates.push(TrackCandidate {
                cluster,
                solutions: resolution.solutions,
            });

            if grow_timed_out || resolution.timed_out {
                result.timed_out = true;
                break;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_NOFFLAYERS;
    use crate::experimental::{Point3E, ValueWithError};
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn hit(id: usize, x: f64, z: f64, r: f64) -> Hit {
        Hit {
            id,
            position: [x, 0.0, z],
            position_error: [0.1, 1.0, 0.1],
            radius: r,
            radius_error: 0.3,
            fast: true,
        }
    }

    fn cell(id: usize, x: f64, z: f64) -> Cell {
        Cell::new(
            id,
            Point3E::from_arrays([x, 0.0, z], [0.1, 1.0, 0.1]),
            ValueWithError::new(5.0, 0.3),
            true,
            2.0,
        )
    }

    #[test]
    fn test_adjacency_levels() {
        let config = CatConfig::default();
        let origin = cell(0, 0.0, 0.0);
        assert_eq!(adjacency(&origin, &cell(1, 30.0, 0.0), &config), Adjacency::Side);
        assert_eq!(adjacency(&origin, &cell(2, 30.0, 30.0), &config), Adjacency::Diagonal);
        assert_eq!(adjacency(&origin, &cell(3, 60.0, 0.0), &config), Adjacency::Gap(1));
        assert_eq!(adjacency(&origin, &cell(4, 60.0, 30.0), &config), Adjacency::Gap(1));
        assert_eq!(adjacency(&origin, &cell(5, 90.0, 0.0), &config), Adjacency::Far);
        assert_eq!(adjacency(&origin, &origin, &config), Adjacency::Far);
        assert_eq!(near_level(&origin, &cell(1, 0.0, 31.0), 30.0), 2);
        assert_eq!(near_level(&origin, &cell(1, 0.0, 36.0), 30.0), 0);
    }

    #[test]
    fn test_adjacency_order() {
        assert!(Adjacency::Far < Adjacency::Gap(2));
        assert!(Adjacency::Gap(2) < Adjacency::Gap(1));
        assert!(Adjacency::Gap(1) < Adjacency::Diagonal);
        assert!(Adjacency::Diagonal < Adjacency::Side);
    }

    #[test]
    fn test_adjacency_respects_timing_and_sides() {
        let a = cell(0, 0.0, 10.0);
        let b = cell(1, 0.0, -20.0);
        let mut config = CatConfig::default();
        assert_eq!(adjacency(&a, &b, &config), Adjacency::Side);
        config.separate_sides = true;
        assert_eq!(adjacency(&a, &b, &config), Adjacency::Far);

        let slow = Cell::new(2, *b.center(), b.radius(), false, 2.0);
        assert_eq!(adjacency(&a, &slow, &CatConfig::default()), Adjacency::Far);
    }

    #[test]
    fn test_redundant_gap_link_dropped() {
        let config = CatConfig::default();
        let hits: Vec<_> = (0..3).map(|i| hit(i, 30.0 * i as f64, 0.0, 0.0)).collect();
        let graph = NodeGraph::build(CellArena::from_hits(&hits, 2.0), &config);
        let first = graph.node(0).unwrap();
        assert!(first.has_couplet_to(1));
        assert!(!first.has_couplet_to(2));
        assert_eq!(graph.node(1).unwrap().triplets().len(), 1);
    }

    #[test]
    fn test_components_split_far_cells() {
        let config = CatConfig::default();
        let mut hits: Vec<_> = (0..3).map(|i| hit(i, 30.0 * i as f64, 0.0, 0.0)).collect();
        hits.push(hit(10, 600.0, 300.0, 0.0));
        let graph = NodeGraph::build(CellArena::from_hits(&hits, 2.0), &config);
        assert_eq!(graph.components(), vec![vec![0, 1, 2], vec![3]]);
    }

    #[test]
    fn test_config_rejected_at_setup() {
        let config = CatConfig {
            ratio: 0.0,
            ..CatConfig::default()
        };
        assert!(matches!(Clusterizer::new(config), Err(ConfigError::InvalidRatio(_))));

        let config = CatConfig {
            nofflayers: usize::MAX,
            ..CatConfig::default()
        };
        assert!(matches!(
            Clusterizer::new(config),
            Err(ConfigError::InvalidNoffLayers { .. })
        ));
    }

    #[test]
    fn test_wide_gap_adjacency() {
        let config = CatConfig {
            nofflayers: MAX_NOFFLAYERS,
            ..CatConfig::default()
        };
        let origin = cell(0, 0.0, 0.0);
        assert_eq!(adjacency(&origin, &cell(1, 90.0, 0.0), &config), Adjacency::Gap(2));
        assert_eq!(adjacency(&origin, &cell(2, 150.0, 30.0), &config), Adjacency::Gap(4));
        assert_eq!(adjacency(&origin, &cell(3, 120.0, 120.0), &config), Adjacency::Gap(3));
        assert_eq!(adjacency(&origin, &cell(4, 400.0, 0.0), &config), Adjacency::Far);
        assert_eq!(adjacency(&origin, &cell(5, 75.0, 0.0), &config), Adjacency::Far);
    }

    #[test]
    fn test_widest_gap_setting_reconstructs() {
        let config = CatConfig {
            nofflayers: MAX_NOFFLAYERS,
            ..CatConfig::default()
        };
        let clusterizer = Clusterizer::new(config).unwrap();
        let hits: Vec<_> = (0..3).map(|i| hit(i, 30.0 * i as f64, 0.0, 8.0)).collect();
        let event = clusterizer.reconstruct(&hits);
        assert!(!event.timed_out);
        assert_eq!(event.stats.cells, 3);
        assert!(!event.candidates.is_empty());
    }

    #[test]
    fn test_reconstruct_single_track() {
        let clusterizer = Clusterizer::new(CatConfig::default()).unwrap();
        let hits: Vec<_> = (0..8).map(|i| hit(i, 30.0 * i as f64, 0.0, 9.0)).collect();
        let event = clusterizer.reconstruct(&hits);

        assert!(!event.timed_out);
        assert_eq!(event.candidates.len(), 1);
        let candidate = &event.candidates[0];
        assert_eq!(candidate.cluster.len(), 8);
        assert_eq!(candidate.solutions.len(), 1);
        assert_eq!(candidate.solutions[0].alternatives.len(), 2);
        assert_eq!(event.stats.clusters, 1);
        assert_eq!(event.stats.alternatives, 2);
    }

    #[test]
    fn test_reconstruct_two_separate_tracks_in_parallel() {
        let config = CatConfig {
            parallel: true,
            ..CatConfig::default()
        };
        let clusterizer = Clusterizer::new(config).unwrap();
        let mut hits: Vec<_> = (0..5).map(|i| hit(i, 30.0 * i as f64, 0.0, 0.0)).collect();
        hits.extend((0..5).map(|i| hit(100 + i, 30.0 * i as f64, 600.0, 0.0)));
        let event = clusterizer.reconstruct(&hits);
        assert_eq!(event.stats.components, 2);
        assert_eq!(event.candidates.len(), 2);
        assert!(event.candidates.iter().all(|c| c.cluster.len() == 5));
    }

    #[test]
    fn test_empty_event() {
        let event = Clusterizer::with_defaults().reconstruct(&[]);
        assert!(event.candidates.is_empty());
        assert!(!event.timed_out);
    }

    struct TickingClock(AtomicU64);

    impl Clock for TickingClock {
        fn now(&self) -> Duration {
            // every reading moves time forward by one millisecond
            Duration::from_millis(self.0.fetch_add(1, AtomicOrdering::SeqCst))
        }
    }

    #[test]
    fn test_deadline_returns_partial_result() {
        let config = CatConfig {
            time_budget: Some(Duration::from_millis(2)),
            ..CatConfig::default()
        };
        let clusterizer = Clusterizer::new(config)
            .unwrap()
            .with_clock(Arc::new(TickingClock(AtomicU64::new(0))));
        let mut hits: Vec<_> = (0..6).map(|i| hit(i, 30.0 * i as f64, 0.0, 9.0)).collect();
        hits.extend((0..6).map(|i| hit(100 + i, 30.0 * i as f64, 900.0, 9.0)));
        let event = clusterizer.reconstruct(&hits);
        assert!(event.timed_out);
        assert!(event.candidates.len() < 2);
    }
}
