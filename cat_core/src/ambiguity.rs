//! Resolution of ambiguous windows into broken lines.
//!
//! A window `[ifirst, ilast]` of a cluster is resolved by a depth-first
//! search over choices per node: whether the node is visited (up to
//! `nofflayers` consecutive nodes may be skipped) and on which side of its
//! drift circle the path passes. Both anchors are always visited.
//!
//! A step `prev → cur → next` is admissible when `cur` holds a triplet
//! `(prev, cur, next)` with a joint passing all three cells on the chosen
//! sides. The joint's kink pulls make up the chi2 of the broken line.
//!
//! The score of a path from `cur` to `ilast` only depends on `prev` and
//! `cur`, so completed suffix fragments are memoised on that pair and
//! shared by every prefix reaching it. The search stops early on the step
//! limit, the alternative limit or the deadline.

use crate::broken_line::BrokenLine;
use crate::budget::Deadline;
use crate::cluster::Cluster;
use crate::config::CatConfig;
use crate::experimental::Point3E;
use crate::joint::Joint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

/// How often (in search steps) the deadline is polled, starting with the
/// first step of each window.
const DEADLINE_POLL: usize = 256;

/// Alternatives found for one window, most probable first.
///
/// An empty list means no consistent path exists through the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSolution {
    pub ifirst: usize,
    pub ilast: usize,
    pub alternatives: Vec<BrokenLine>,
    /// Search steps spent
    pub steps: usize,
    /// The search hit the step limit or the deadline
    pub truncated: bool,
}

/// Node index and side index.
type Choice = (usize, usize);

/// Partial path from some node to the end of the window.
#[derive(Debug, Clone)]
struct Fragment {
    nodes: Vec<usize>,
    points: Vec<Point3E>,
    chi2: f64,
}

struct Search<'a> {
    cluster: &'a Cluster,
    ilast: usize,
    config: &'a CatConfig,
    deadline: &'a Deadline,
    sides: Vec<Vec<Point3E>>,
    memo: HashMap<(Option<Choice>, Choice), Rc<Vec<Fragment>>>,
    steps: usize,
    truncated: bool,
}

/// Enumerate the broken lines through nodes `ifirst..=ilast` of `cluster`.
pub fn solve(
    cluster: &Cluster,
    ifirst: usize,
    ilast: usize,
    config: &CatConfig,
    deadline: &Deadline,
) -> WindowSolution {
    let mut solution = WindowSolution {
        ifirst,
        ilast,
        alternatives: Vec::new(),
        steps: 0,
        truncated: false,
    };
    if ifirst >= ilast || ilast >= cluster.len() {
        return solution;
    }

    let mut search = Search {
        cluster,
        ilast,
        config,
        deadline,
        sides: Vec::with_capacity(cluster.len()),
        memo: HashMap::new(),
        steps: 0,
        truncated: false,
    };
    search.sides = cluster
        .nodes()
        .iter()
        .enumerate()
        .map(|(k, node)| {
            if k < ifirst || k > ilast {
                return Vec::new();
            }
            let sides = node.side_points(config.quadrant_angle);
            if sides.is_empty() {
                vec![node.cell().as_point()]
            } else {
                sides
            }
        })
        .collect();

    let mut alternatives = Vec::new();
    for side in 0..search.sides[ifirst].len() {
        let fragments = search.suffixes(None, (ifirst, side));
        alternatives.extend(fragments.iter().map(|f| {
            BrokenLine::new(ifirst, ilast, f.nodes.clone(), f.points.clone(), f.chi2)
        }));
    }

    alternatives.sort_by(|a, b| b.p.total_cmp(&a.p).then(a.chi2.total_cmp(&b.chi2)));
    let best = alternatives.first().map_or(0.0, |l| l.p);
    alternatives.retain(|l| l.p >= best / config.ratio);
    alternatives.truncate(config.max_alternatives);

    solution.alternatives = alternatives;
    solution.steps = search.steps;
    solution.truncated = search.truncated;
    solution
}

impl Search<'_> {
    fn side_point(&self, choice: Choice) -> Point3E {
        self.sides[choice.0][choice.1]
    }

    /// All admissible paths from `cur` to the end of the window, given
    /// that the path arrived at `cur` from `prev`.
    fn suffixes(&mut self, prev: Option<Choice>, cur: Choice) -> Rc<Vec<Fragment>> {
        if let Some(done) = self.memo.get(&(prev, cur)) {
            return Rc::clone(done);
        }

        self.steps += 1;
        if self.steps > self.config.max_search_steps
            || (self.steps % DEADLINE_POLL == 1 && self.deadline.expired())
        {
            self.truncated = true;
        }
        if self.truncated {
            return Rc::new(Vec::new());
        }

        let fragments = if cur.0 == self.ilast {
            vec![Fragment {
                nodes: vec![cur.0],
                points: vec![self.side_point(cur)],
                chi2: 0.0,
            }]
        } else {
            self.extend(prev, cur)
        };

        let fragments = Rc::new(fragments);
        self.memo.insert((prev, cur), Rc::clone(&fragments));
        fragments
    }

    fn extend(&mut self, prev: Option<Choice>, cur: Choice) -> Vec<Fragment> {
        let cluster = self.cluster;
        let nodes = cluster.nodes();
        let reach = cur
            .0
            .saturating_add(1)
            .saturating_add(self.config.nofflayers)
            .min(self.ilast);

        let mut fragments = Vec::new();
        for next_k in cur.0 + 1..=reach {
            if !nodes[cur.0].has_couplet_to(nodes[next_k].id()) {
                continue;
            }
            for next_side in 0..self.sides[next_k].len() {
                let next = (next_k, next_side);
                let Some((point, chi2)) = self.pass(prev, cur, next) else {
                    continue;
                };
                for tail in self.suffixes(Some(cur), next).iter() {
                    let mut visited = Vec::with_capacity(tail.nodes.len() + 1);
                    visited.push(cur.0);
                    visited.extend_from_slice(&tail.nodes);
                    let mut points = Vec::with_capacity(tail.points.len() + 1);
                    points.push(point);
                    points.extend_from_slice(&tail.points);
                    fragments.push(Fragment {
                        nodes: visited,
                        points,
                        chi2: chi2 + tail.chi2,
                    });
                }
            }
        }

        fragments.sort_by(|a, b| a.chi2.total_cmp(&b.chi2));
        fragments.truncate(self.config.max_alternatives);
        fragments
    }

    /// Where the path crosses `cur` and the kink chi2 it pays there.
    fn pass(&self, prev: Option<Choice>, cur: Choice, next: Choice) -> Option<(Point3E, f64)> {
        let Some(prev) = prev else {
            return Some((self.side_point(cur), 0.0));
        };

        let nodes = self.cluster.nodes();
        let (a, b, c) = (&nodes[prev.0], &nodes[cur.0], &nodes[next.0]);
        let triplet = b.triplet_between(a.id(), c.id())?;
        let quadrant = self.config.quadrant_angle;

        let joint: &Joint = triplet.joints().iter().find(|j| {
            b.cell().same_quadrant(&j.epb, &self.side_point(cur), quadrant)
                && a.cell().same_quadrant(&j.epa, &self.side_point(prev), quadrant)
                && c.cell().same_quadrant(&j.epc, &self.side_point(next), quadrant)
        })?;
        if joint.kink_phi.value.to_degrees().abs() > self.config.phi_limit {
            return None;
        }

        let mut chi2 = joint.kink_phi.pull().powi(2);
        if self.config.use_theta_kink {
            chi2 += joint.kink_theta.pull().powi(2);
        }
        Some((joint.epb, chi2))
    }
}
