//! Scenario runner - generates events, reconstructs them and scores the
//! candidates against ground truth.

use crate::clock::SimClock;
use crate::oracle::{DetectorGeometry, Oracle, SimEvent};
use crate::scenarios::ScenarioId;

use cat_core::{BrokenLine, CatConfig, Clusterizer, ConfigError, EventReconstruction, Node};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tracks with fewer hits are not counted.
const MIN_TRACK_HITS: usize = 3;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    pub events: usize,

    /// True tracks with at least `MIN_TRACK_HITS` hits
    pub true_tracks: usize,

    /// True tracks with more than half their hits in one candidate
    pub found_tracks: usize,

    /// found_tracks / true_tracks
    pub efficiency: f64,

    /// Mean dominant-track fraction over candidates of 3+ cells
    pub purity: f64,

    pub mean_candidates: f64,

    pub windows: usize,

    pub alternatives: usize,

    pub search_steps: usize,

    /// Events whose time budget ran out
    pub timeouts: usize,

    /// Alternatives that break the broken-line contract
    pub invalid_alternatives: usize,
}

/// Running sums over the events of one scenario.
#[derive(Debug, Default)]
struct Tally {
    events: usize,
    true_tracks: usize,
    found_tracks: usize,
    purity_sum: f64,
    purity_count: usize,
    candidates: usize,
    windows: usize,
    alternatives: usize,
    search_steps: usize,
    timeouts: usize,
    invalid_alternatives: usize,
}

impl Tally {
    fn record(&mut self, event: &SimEvent, reco: &EventReconstruction) {
        self.events += 1;
        self.candidates += reco.candidates.len();
        self.windows += reco.stats.windows;
        self.alternatives += reco.stats.alternatives;
        self.search_steps += reco.stats.search_steps;
        if reco.timed_out {
            self.timeouts += 1;
        }

        let candidate_cells: Vec<HashSet<usize>> = reco
            .candidates
            .iter()
            .map(|c| c.cluster.nodes().iter().map(Node::id).collect())
            .collect();

        for track in &event.tracks {
            let hits = event.hits_of(track.id);
            if hits.len() < MIN_TRACK_HITS {
                continue;
            }
            self.true_tracks += 1;
            let best = candidate_cells
                .iter()
                .map(|cells| hits.iter().filter(|id| cells.contains(id)).count())
                .max()
                .unwrap_or(0);
            if 2 * best > hits.len() {
                self.found_tracks += 1;
            }
        }

        for cells in candidate_cells.iter().filter(|c| c.len() >= MIN_TRACK_HITS) {
            let mut per_track: HashMap<usize, usize> = HashMap::new();
            for id in cells {
                if let Some(Some(track)) = event.truth.get(*id) {
                    *per_track.entry(*track).or_default() += 1;
                }
            }
            let dominant = per_track.values().copied().max().unwrap_or(0);
            self.purity_sum += dominant as f64 / cells.len() as f64;
            self.purity_count += 1;
        }

        for candidate in &reco.candidates {
            for solution in &candidate.solutions {
                self.invalid_alternatives += solution
                    .alternatives
                    .iter()
                    .filter(|line| !is_consistent(line, solution.ifirst, solution.ilast))
                    .count();
            }
        }
    }

    fn finish(self) -> ScenarioMetrics {
        ScenarioMetrics {
            events: self.events,
            true_tracks: self.true_tracks,
            found_tracks: self.found_tracks,
            efficiency: ratio_or_one(self.found_tracks as f64, self.true_tracks),
            purity: ratio_or_one(self.purity_sum, self.purity_count),
            mean_candidates: if self.events == 0 {
                0.0
            } else {
                self.candidates as f64 / self.events as f64
            },
            windows: self.windows,
            alternatives: self.alternatives,
            search_steps: self.search_steps,
            timeouts: self.timeouts,
            invalid_alternatives: self.invalid_alternatives,
        }
    }
}

fn ratio_or_one(numerator: f64, count: usize) -> f64 {
    if count == 0 {
        1.0
    } else {
        numerator / count as f64
    }
}

/// A broken line spans its window, visits increasing nodes and carries a
/// probability.
fn is_consistent(line: &BrokenLine, ifirst: usize, ilast: usize) -> bool {
    (0.0..=1.0).contains(&line.p)
        && line.ifirst == ifirst
        && line.ilast == ilast
        && line.nodes.first() == Some(&ifirst)
        && line.nodes.last() == Some(&ilast)
        && line.nodes.windows(2).all(|w| w[0] < w[1])
        && line.points.len() == line.nodes.len()
}

/// Runs reconstruction scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Events per scenario
    events: usize,

    config: CatConfig,

    geometry: DetectorGeometry,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            events: 20,
            config: CatConfig::default(),
            geometry: DetectorGeometry::default(),
        }
    }

    /// Sets the number of events per scenario.
    pub fn with_events(mut self, events: usize) -> Self {
        self.events = events;
        self
    }

    /// Sets the tracker configuration; the wire pitch follows
    /// `cell_distance`.
    pub fn with_config(mut self, config: CatConfig) -> Self {
        self.geometry.pitch = config.cell_distance;
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={}, events={})", scenario.name(), self.seed, self.events);

        let outcome = match scenario {
            ScenarioId::StraightTrack => self.run_straight_track(),
            ScenarioId::CurvedTrack => self.run_curved_track(),
            ScenarioId::MissingLayer => self.run_missing_layer(),
            ScenarioId::TwoTracks => self.run_two_tracks(),
            ScenarioId::NoisyEvent => self.run_noisy_event(),
            ScenarioId::TightDeadline => self.run_tight_deadline(),
        };

        match outcome {
            Ok((metrics, failure_reason)) => {
                let failure_reason = failure_reason.or_else(|| {
                    (metrics.invalid_alternatives > 0).then(|| {
                        format!("{} inconsistent broken lines", metrics.invalid_alternatives)
                    })
                });
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: failure_reason.is_none(),
                    failure_reason,
                    metrics,
                }
            }
            Err(e) => {
                warn!("Scenario {} rejected configuration: {}", scenario.name(), e);
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    failure_reason: Some(format!("invalid configuration: {}", e)),
                    metrics: ScenarioMetrics::default(),
                }
            }
        }
    }

    /// Generates and reconstructs `self.events` events; `populate` adds the
    /// tracks of each event to a cleared oracle.
    fn simulate<F>(
        &self,
        config: CatConfig,
        clock: Option<Arc<SimClock>>,
        mut populate: F,
    ) -> Result<ScenarioMetrics, ConfigError>
    where
        F: FnMut(&mut Oracle),
    {
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut oracle = Oracle::new(physics_seed, self.geometry);
        let mut clusterizer = Clusterizer::new(config)?;
        if let Some(clock) = clock {
            clusterizer = clusterizer.with_clock(clock);
        }

        let mut tally = Tally::default();
        for index in 0..self.events {
            oracle.clear_tracks();
            populate(&mut oracle);
            let event = oracle.generate_event();
            let reco = clusterizer.reconstruct(&event.hits);
            debug!(
                "  event {} | hits={} | candidates={} | windows={} | timed_out={}",
                index,
                event.hits.len(),
                reco.candidates.len(),
                reco.stats.windows,
                reco.timed_out
            );
            tally.record(&event, &reco);
        }
        Ok(tally.finish())
    }

    fn require_efficiency(metrics: &ScenarioMetrics, min: f64) -> Option<String> {
        (metrics.efficiency < min).then(|| {
            format!("efficiency {:.2} below {:.2}", metrics.efficiency, min)
        })
    }

    /// CAT-001: one straight track per event.
    fn run_straight_track(&self) -> Result<(ScenarioMetrics, Option<String>), ConfigError> {
        let metrics = self.simulate(self.config.clone(), None, |oracle| {
            oracle.add_random_line((-0.5, 0.5), 15.0);
        })?;

        info!("  STRAIGHT TRACK: efficiency {:.2}, purity {:.2}", metrics.efficiency, metrics.purity);
        let failure = Self::require_efficiency(&metrics, 0.8);
        Ok((metrics, failure))
    }

    /// CAT-002: one circular track per event.
    fn run_curved_track(&self) -> Result<(ScenarioMetrics, Option<String>), ConfigError> {
        let metrics = self.simulate(self.config.clone(), None, |oracle| {
            oracle.add_random_arc((-0.3, 0.3), (1500.0, 3000.0));
        })?;

        info!("  CURVED TRACK: efficiency {:.2}, purity {:.2}", metrics.efficiency, metrics.purity);
        let failure = Self::require_efficiency(&metrics, 0.7);
        Ok((metrics, failure))
    }

    /// CAT-003: a dead layer in the middle of the chamber.
    fn run_missing_layer(&self) -> Result<(ScenarioMetrics, Option<String>), ConfigError> {
        let dead = self.geometry.layers / 2;
        let metrics = self.simulate(self.config.clone(), None, |oracle| {
            oracle.set_dead_layers(vec![dead]);
            oracle.add_random_line((-0.5, 0.5), 10.0);
        })?;

        info!("  MISSING LAYER: efficiency {:.2}, windows {}", metrics.efficiency, metrics.windows);
        let failure = Self::require_efficiency(&metrics, 0.7);
        Ok((metrics, failure))
    }

    /// CAT-004: two tracks, one per half of the chamber.
    fn run_two_tracks(&self) -> Result<(ScenarioMetrics, Option<String>), ConfigError> {
        let metrics = self.simulate(self.config.clone(), None, |oracle| {
            oracle.add_random_line((0.35, 0.6), 8.0);
            oracle.add_random_line((-0.6, -0.35), 8.0);
        })?;

        info!("  TWO TRACKS: efficiency {:.2}, purity {:.2}", metrics.efficiency, metrics.purity);
        let failure = Self::require_efficiency(&metrics, 0.7).or_else(|| {
            (metrics.purity < 0.8).then(|| format!("purity {:.2} below 0.80", metrics.purity))
        });
        Ok((metrics, failure))
    }

    /// CAT-005: lost hits and noise.
    fn run_noisy_event(&self) -> Result<(ScenarioMetrics, Option<String>), ConfigError> {
        let metrics = self.simulate(self.config.clone(), None, |oracle| {
            oracle.set_inefficiency(0.05);
            oracle.set_noise_hits(8);
            oracle.add_random_line((-0.5, 0.5), 15.0);
        })?;

        info!("  NOISY EVENT: efficiency {:.2}, purity {:.2}", metrics.efficiency, metrics.purity);
        let failure = Self::require_efficiency(&metrics, 0.5);
        Ok((metrics, failure))
    }

    /// CAT-006: every reading of the virtual clock costs 1 ms against a
    /// 2 ms budget, so each event must come back partial and flagged.
    fn run_tight_deadline(&self) -> Result<(ScenarioMetrics, Option<String>), ConfigError> {
        let config = CatConfig {
            time_budget: Some(Duration::from_millis(2)),
            ..self.config.clone()
        };
        let clock = Arc::new(SimClock::ticking(Duration::from_millis(1)));
        let metrics = self.simulate(config, Some(clock), |oracle| {
            oracle.add_random_line((0.35, 0.6), 8.0);
            oracle.add_random_line((-0.6, -0.35), 8.0);
        })?;

        info!("  TIGHT DEADLINE: {}/{} events timed out", metrics.timeouts, metrics.events);
        let failure = (metrics.timeouts != metrics.events).then(|| {
            format!("{} of {} events finished inside a 2 ms budget", metrics.events - metrics.timeouts, metrics.events)
        });
        Ok((metrics, failure))
    }
}
