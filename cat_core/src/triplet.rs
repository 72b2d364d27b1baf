//! Triplets: local curvature hypotheses through three connected cells.
//!
//! A triplet `(a, b, c)` lives at its middle cell `b` and is built from the
//! two couplets leaving it, `b → a` and `b → c`. Every pair of tangents of
//! those couplets is a candidate way of passing through `b`; the survivors
//! become [`Joint`]s.

use crate::cell::{Cell, CellId};
use crate::config::CatConfig;
use crate::couplet::Couplet;
use crate::joint::Joint;
use crate::line::Line;
use crate::probability::probof;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Two tangents leaving the middle cell closer than this (degrees) do not
/// go through it.
const MIN_OPENING_ANGLE: f64 = 60.0;

/// Tangents this close to perpendicular (degrees) run along an overlap.
const ALONG_OVERLAP_TOLERANCE: f64 = 30.0;

/// Limits relaxed for delayed cells (degrees).
const SLOW_PHI_LIMIT: f64 = 90.0;
const SLOW_THETA_LIMIT: f64 = 180.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triplet {
    /// Middle to first outer cell
    ca: Couplet,
    /// Middle to second outer cell
    cb: Couplet,
    joints: Vec<Joint>,
}

impl Triplet {
    /// Triplet from two couplets leaving the same middle cell. No joints
    /// until [`Triplet::calculate_joints`] runs.
    pub fn new(ca: Couplet, cb: Couplet) -> Self {
        debug_assert_eq!(ca.a().id(), cb.a().id());
        Self {
            ca,
            cb,
            joints: Vec::new(),
        }
    }

    /// Triplet with its joints already calculated.
    pub fn build(ca: Couplet, cb: Couplet, config: &CatConfig) -> Self {
        let mut triplet = Self::new(ca, cb);
        triplet.calculate_joints(config);
        triplet
    }

    #[inline]
    pub fn a(&self) -> &Cell {
        self.ca.b()
    }

    #[inline]
    pub fn b(&self) -> &Cell {
        self.ca.a()
    }

    #[inline]
    pub fn c(&self) -> &Cell {
        self.cb.b()
    }

    pub fn ca(&self) -> &Couplet {
        &self.ca
    }

    pub fn cb(&self) -> &Couplet {
        &self.cb
    }

    /// Surviving joints, most probable first.
    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn has_joints(&self) -> bool {
        !self.joints.is_empty()
    }

    pub fn best_joint(&self) -> Option<&Joint> {
        self.joints.first()
    }

    /// True when the outer cells are `first` and `last`, in either order.
    pub fn joins(&self, first: CellId, last: CellId) -> bool {
        let (a, c) = (self.a().id(), self.c().id());
        (a == first && c == last) || (a == last && c == first)
    }

    /// The outer cell opposite to `id`, if `id` is an outer cell.
    pub fn other_end(&self, id: CellId) -> Option<&Cell> {
        if self.a().id() == id {
            Some(self.c())
        } else if self.c().id() == id {
            Some(self.a())
        } else {
            None
        }
    }

    /// The triplet `(c, b, a)`.
    pub fn invert(&self) -> Self {
        Self {
            ca: self.cb.clone(),
            cb: self.ca.clone(),
            joints: self.joints.iter().map(Joint::invert).collect(),
        }
    }

    /// Keep only joints with `p >= best_p / ratio`, in their current order.
    pub fn refine(joints: &[Joint], ratio: f64) -> Vec<Joint> {
        let best = joints.iter().map(|j| j.p).fold(0.0, f64::max);
        let threshold = best / ratio;
        joints.iter().filter(|j| j.p >= threshold).copied().collect()
    }

    // ========================================================================
    // JOINTS
    // ========================================================================

    /// Score every pair of tangents and keep the admissible joints.
    pub fn calculate_joints(&mut self, config: &CatConfig) {
        let (a, b, c) = (*self.a(), *self.b(), *self.c());

        let (mut phi_limit, mut theta_limit) = (config.phi_limit, config.theta_limit);
        if !(a.is_fast() && b.is_fast() && c.is_fast()) {
            phi_limit = phi_limit.max(SLOW_PHI_LIMIT);
            theta_limit = theta_limit.max(SLOW_THETA_LIMIT);
        }

        let use_theta = config.use_theta_kink
            && !(a.unknown_vertical() || b.unknown_vertical() || c.unknown_vertical());
        let use_separation = !b.is_small();
        let ndof = 1 + usize::from(use_theta) + usize::from(use_separation);

        let mut joints = Vec::new();
        for t1 in self.ca.tangents() {
            for t2 in self.cb.tangents() {
                if !self.tangents_cross_middle(t1, t2) {
                    continue;
                }

                let (middle, separation) = if use_separation {
                    let (point, separation) = b.angular_average(t1.epa(), t2.epa());
                    (point, Some(separation))
                } else {
                    (b.as_point(), None)
                };
                if !middle.is_valid() {
                    continue;
                }

                let first = Line::new(*t1.epb(), middle);
                let second = Line::new(middle, *t2.epb());
                let kink = first.chi2(&second, use_theta);
                let chi2 = kink.chi2 + separation.map_or(0.0, |s| s.pull().powi(2));
                let p = probof(chi2, ndof);

                let kink_phi = first.kink_phi(&second).value.to_degrees().abs();
                let kink_theta = first.kink_theta(&second).value.to_degrees().abs();
                let separation_deg = separation.map_or(0.0, |s| s.value.to_degrees().abs());

                let accepted = p > config.probmin
                    && probof(kink.chi2_phi, 1) > config.probmin
                    && kink_phi <= phi_limit
                    && (!use_theta || kink_theta <= theta_limit)
                    && separation_deg <= config.separation_limit;

                trace!(
                    a = a.id(),
                    b = b.id(),
                    c = c.id(),
                    chi2,
                    p,
                    kink_phi,
                    accepted,
                    "joint candidate"
                );

                if accepted {
                    joints.push(Joint::new(*first.epa(), middle, *second.epb()).with_score(chi2, ndof, p));
                }
            }
        }

        let mut joints = prune_same_quadrants(joints, &a, &c, config.quadrant_angle);
        joints.sort_by(Joint::by_probability);
        joints.truncate(config.max_joints);
        self.joints = Self::refine(&joints, config.ratio);
    }

    /// Geometric sanity of a tangent pair through the middle cell: the two
    /// tangents must leave it in clearly different directions, and when an
    /// outer cell overlaps the middle one a tangent running along the
    /// overlap must agree with the cell ordering.
    fn tangents_cross_middle(&self, t1: &Line, t2: &Line) -> bool {
        let to_a = t1.forward_axis().hor();
        let to_c = t2.forward_axis().hor();
        if to_a.kink_phi(&to_c).value.to_degrees().abs() < MIN_OPENING_ANGLE {
            return false;
        }

        let (a, b, c) = (self.a(), self.b(), self.c());
        if b.is_small() {
            return true;
        }

        let axis_a = self.ca.forward_axis().hor();
        let axis_c = self.cb.forward_axis().hor();
        if a.intersect(b) {
            if along_overlap(to_a.kink_phi(&axis_a).value.to_degrees())
                && axis_a.kink_phi(&axis_c).value.to_degrees().abs() < MIN_OPENING_ANGLE
            {
                return false;
            }
        } else if b.intersect(c)
            && along_overlap(to_c.kink_phi(&axis_c).value.to_degrees())
            && axis_c.kink_phi(&axis_a).value.to_degrees().abs() < MIN_OPENING_ANGLE
        {
            return false;
        }

        true
    }
}

fn along_overlap(angle_deg: f64) -> bool {
    (angle_deg.abs() - 90.0).abs() < ALONG_OVERLAP_TOLERANCE
}

/// Among joints passing the outer cells in the same sectors keep only the
/// most probable one (the earliest on ties).
fn prune_same_quadrants(joints: Vec<Joint>, a: &Cell, c: &Cell, quadrant_angle: f64) -> Vec<Joint> {
    joints
        .iter()
        .enumerate()
        .filter(|(i, j)| {
            !joints.iter().enumerate().any(|(k, other)| {
                k != *i
                    && (other.p > j.p || (other.p == j.p && k < *i))
                    && a.same_quadrant(&j.epa, &other.epa, quadrant_angle)
                    && c.same_quadrant(&j.epc, &other.epc, quadrant_angle)
            })
        })
        .map(|(_, j)| *j)
        .collect()
}

/// Same cells in the same orientation with the same joints. Use
/// [`Triplet::joins`] to match the outer cells in either order.
impl PartialEq for Triplet {
    fn eq(&self, other: &Self) -> bool {
        self.a().id() == other.a().id()
            && self.b().id() == other.b().id()
            && self.c().id() == other.c().id()
            && self.joints == other.joints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experimental::{Point3E, ValueWithError};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn cell(id: usize, x: f64, z: f64, r: f64, sigma: f64) -> Cell {
        Cell::new(
            id,
            Point3E::from_arrays([x, 0.0, z], [sigma, 1.0, sigma]),
            ValueWithError::new(r, sigma),
            true,
            CatConfig::default().small_radius,
        )
    }

    fn triplet(a: Cell, b: Cell, c: Cell) -> Triplet {
        Triplet::build(Couplet::new(b, a), Couplet::new(b, c), &CatConfig::default())
    }

    #[test]
    fn test_collinear_points_give_one_straight_joint() {
        let t = triplet(
            cell(1, 0.0, 0.0, 0.0, 3.0),
            cell(2, 30.0, 0.0, 0.0, 3.0),
            cell(3, 60.0, 0.0, 0.0, 3.0),
        );
        assert_eq!(t.joints().len(), 1);
        let j = &t.joints()[0];
        assert_relative_eq!(j.kink_phi.value, 0.0, epsilon = 1e-9);
        assert!(j.p > 0.9);
        assert_eq!(j.ndof, 2);
    }

    #[test]
    fn test_straight_drift_circles_pass_above_or_below() {
        let t = triplet(
            cell(1, 0.0, 0.0, 10.0, 0.2),
            cell(2, 30.0, 0.0, 10.0, 0.2),
            cell(3, 60.0, 0.0, 10.0, 0.2),
        );
        assert_eq!(t.joints().len(), 2);
        let mut sides: Vec<_> = t.joints().iter().map(|j| j.epb.z.value.signum()).collect();
        sides.sort_by(|x, y| x.total_cmp(y));
        assert_eq!(sides, vec![-1.0, 1.0]);
        for j in t.joints() {
            assert_relative_eq!(j.kink_phi.value, 0.0, epsilon = 1e-6);
            assert_relative_eq!(j.epb.z.value.abs(), 10.0, epsilon = 1e-6);
            assert_eq!(j.ndof, 3);
        }
    }

    #[test]
    fn test_joint_circle_matches_track_radius() {
        let radius = 1000.0;
        let at = |id: usize, deg: f64| {
            let a = deg.to_radians();
            cell(id, radius * a.sin(), radius - radius * a.cos(), 0.0, 3.0)
        };
        let t = triplet(at(1, 0.0), at(2, 1.7), at(3, 3.4));
        assert_eq!(t.joints().len(), 1);
        let circle = t.joints()[0].circle().unwrap();
        assert_relative_eq!(circle.radius.value, radius, epsilon = 1e-6);
    }

    #[test]
    fn test_sharp_turn_rejected() {
        let t = triplet(
            cell(1, 0.0, 0.0, 0.0, 0.5),
            cell(2, 30.0, 0.0, 0.0, 0.5),
            cell(3, 30.0, 30.0, 0.0, 0.5),
        );
        assert!(!t.has_joints());
    }

    #[test]
    fn test_invert_twice_restores_triplet() {
        let t = triplet(
            cell(1, 0.0, 0.0, 10.0, 0.2),
            cell(2, 30.0, 0.0, 8.0, 0.2),
            cell(3, 60.0, 5.0, 10.0, 0.2),
        );
        let inv = t.invert();
        assert_eq!(inv.a().id(), 3);
        assert_eq!(inv.c().id(), 1);
        assert_ne!(inv, t);
        assert!(inv.joins(t.a().id(), t.c().id()));

        let back = inv.invert();
        assert_eq!(back.a().id(), 1);
        assert_eq!(back.joints(), t.joints());
        assert_eq!(back, t);
    }

    #[test]
    fn test_outer_cell_lookup() {
        let t = triplet(
            cell(1, 0.0, 0.0, 0.0, 3.0),
            cell(2, 30.0, 0.0, 0.0, 3.0),
            cell(3, 60.0, 0.0, 0.0, 3.0),
        );
        assert!(t.joins(3, 1));
        assert!(!t.joins(2, 1));
        assert_eq!(t.other_end(1).map(Cell::id), Some(3));
        assert!(t.other_end(2).is_none());
    }

    fn scored(ps: &[f64]) -> Vec<Joint> {
        let p = Point3E::exact(0.0, 0.0, 0.0);
        ps.iter()
            .map(|&prob| Joint::new(p, p, p).with_score(1.0, 2, prob))
            .collect()
    }

    #[test]
    fn test_refine_threshold() {
        let kept = Triplet::refine(&scored(&[0.8, 0.5, 0.00001, 0.0001]), 10000.0);
        let ps: Vec<_> = kept.iter().map(|j| j.p).collect();
        assert_eq!(ps, vec![0.8, 0.5, 0.0001]);
    }

    proptest! {
        #[test]
        fn prop_refine_keeps_exactly_the_plausible_joints(
            ps in prop::collection::vec(0.0f64..=1.0, 0..10),
            ratio in 1.0f64..1e5,
        ) {
            let joints = scored(&ps);
            let once = Triplet::refine(&joints, ratio);
            let best = ps.iter().cloned().fold(0.0, f64::max);
            prop_assert_eq!(once.len(), ps.iter().filter(|&&p| p >= best / ratio).count());
            let twice = Triplet::refine(&once, ratio);
            prop_assert_eq!(once, twice);
        }
    }
}
