//! Broken lines: one resolved path through an ambiguous window.

use crate::experimental::Point3E;
use crate::line::Line;
use crate::probability::probof;
use serde::{Deserialize, Serialize};

/// A path through the nodes `ifirst..=ilast` of a cluster, passing each
/// included node at one chosen point.
///
/// `nodes` lists the cluster indices actually visited (a node may be
/// skipped); `points[k]` is where the path crosses `nodes[k]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokenLine {
    pub ifirst: usize,
    pub ilast: usize,
    pub nodes: Vec<usize>,
    pub points: Vec<Point3E>,
    pub chi2: f64,
    pub ndof: usize,
    pub p: f64,
}

impl BrokenLine {
    /// Score a path whose kink chi2 over its interior points is known.
    /// Every interior point is one degree of freedom; a bare segment scores
    /// `chi2 = 0, ndof = 1, p = 1`.
    pub fn new(ifirst: usize, ilast: usize, nodes: Vec<usize>, points: Vec<Point3E>, chi2: f64) -> Self {
        let interior = points.len().saturating_sub(2);
        let (chi2, ndof, p) = if interior == 0 {
            (0.0, 1, 1.0)
        } else {
            (chi2, interior, probof(chi2, interior))
        };
        Self {
            ifirst,
            ilast,
            nodes,
            points,
            chi2,
            ndof,
            p,
        }
    }

    /// Score a path from the bends between its straight segments.
    pub fn from_points(
        ifirst: usize,
        ilast: usize,
        nodes: Vec<usize>,
        points: Vec<Point3E>,
        use_theta_kink: bool,
    ) -> Self {
        let segments: Vec<Line> = points.windows(2).map(|w| Line::new(w[0], w[1])).collect();
        let chi2 = segments
            .windows(2)
            .map(|w| w[0].chi2(&w[1], use_theta_kink).chi2)
            .sum();
        Self::new(ifirst, ilast, nodes, points, chi2)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The same path walked from `ilast` back to `ifirst`.
    pub fn invert(&self) -> Self {
        Self {
            ifirst: self.ilast,
            ilast: self.ifirst,
            nodes: self.nodes.iter().rev().copied().collect(),
            points: self.points.iter().rev().copied().collect(),
            ..self.clone()
        }
    }
}
