//! Couplets: a directed connection between two cells and its tangent lines.

use crate::cell::Cell;
use crate::experimental::{ValueWithError, Vector3E};
use crate::line::Line;
use serde::{Deserialize, Serialize};

/// Directed pair of connected cells `a → b`.
///
/// The axes and tangents are derived once at construction; a couplet is
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Couplet {
    a: Cell,
    b: Cell,
    forward_axis: Vector3E,
    transverse_axis: Vector3E,
    distance: ValueWithError,
    distance_hor: ValueWithError,
    tangents: Vec<Line>,
    /// Number of missing layers bridged by this connection (0 for neighbours)
    skipped: u32,
}

impl Couplet {
    /// Connect two neighbouring cells.
    pub fn new(a: Cell, b: Cell) -> Self {
        Self::bridging(a, b, 0)
    }

    /// Connect two cells across `skipped` missing layers.
    pub fn bridging(a: Cell, b: Cell, skipped: u32) -> Self {
        let displacement = Vector3E::between(a.center(), b.center());
        let distance = displacement.length();
        let distance_hor = displacement.hor().length();
        let forward_axis = displacement / distance.value;
        let transverse_axis = forward_axis.cross(&Vector3E::wire_axis()).unit();

        let mut couplet = Self {
            a,
            b,
            forward_axis,
            transverse_axis,
            distance,
            distance_hor,
            tangents: Vec::new(),
            skipped,
        };
        couplet.tangents = couplet.obtain_tangents();
        couplet
    }

    #[inline]
    pub fn a(&self) -> &Cell {
        &self.a
    }

    #[inline]
    pub fn b(&self) -> &Cell {
        &self.b
    }

    #[inline]
    pub fn forward_axis(&self) -> &Vector3E {
        &self.forward_axis
    }

    #[inline]
    pub fn transverse_axis(&self) -> &Vector3E {
        &self.transverse_axis
    }

    #[inline]
    pub fn distance(&self) -> ValueWithError {
        self.distance
    }

    #[inline]
    pub fn distance_hor(&self) -> ValueWithError {
        self.distance_hor
    }

    /// Lines tangent to both drift circles, oriented `a → b`.
    #[inline]
    pub fn tangents(&self) -> &[Line] {
        &self.tangents
    }

    #[inline]
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    pub fn is_gap(&self) -> bool {
        self.skipped > 0
    }

    pub fn intersecting(&self) -> bool {
        self.a.intersect(&self.b)
    }

    /// The same connection traversed `b → a`.
    pub fn invert(&self) -> Self {
        Self {
            a: self.b,
            b: self.a,
            forward_axis: -self.forward_axis,
            transverse_axis: -self.transverse_axis,
            distance: self.distance,
            distance_hor: self.distance_hor,
            tangents: self.tangents.iter().map(Line::invert).collect(),
            skipped: self.skipped,
        }
    }

    // ========================================================================
    // TANGENTS
    // ========================================================================

    fn obtain_tangents(&self) -> Vec<Line> {
        let forward = self.forward_axis.hor().unit();
        let transverse = self.transverse_axis;

        let lines = match (self.a.is_small(), self.b.is_small()) {
            (true, true) => vec![Line::new(self.a.as_point(), self.b.as_point())],
            (false, true) => {
                let cos = self.a.radius() / self.distance_hor;
                [1.0, -1.0]
                    .iter()
                    .map(|&sign| {
                        let epa = self.a.build_from_cell(&forward, &transverse, cos, sign);
                        Line::new(epa, self.b.as_point())
                    })
                    .collect()
            }
            (true, false) => {
                let cos = -(self.b.radius() / self.distance_hor);
                [1.0, -1.0]
                    .iter()
                    .map(|&sign| {
                        let epb = self.b.build_from_cell(&forward, &transverse, cos, sign);
                        Line::new(self.a.as_point(), epb)
                    })
                    .collect()
            }
            (false, false) => self.tangents_between_circles(&forward, &transverse),
        };

        lines.into_iter().filter(Line::is_valid).collect()
    }

    /// Tangents between two drift circles.
    ///
    /// With `k` the centre-to-centre vector and `R1`, `R2` the radial vectors
    /// to the tangency points, `R1 + t - R2 = k` and `t·R1 = t·R2 = 0` give
    /// `cos(a1) = (|R1| ∓ |R2|)/|k|` (parallel / crossed tangents).
    fn tangents_between_circles(&self, forward: &Vector3E, transverse: &Vector3E) -> Vec<Line> {
        let (ra, rb) = (self.a.radius(), self.b.radius());
        let cos_parallel = (ra - rb) / self.distance_hor;
        let cos_crossed = (ra + rb) / self.distance_hor;

        let mut lines = Vec::with_capacity(4);
        for sign in [1.0, -1.0] {
            let epa = self.a.build_from_cell(forward, transverse, cos_parallel, sign);
            let epb = self.b.build_from_cell(forward, transverse, cos_parallel, sign);
            lines.push(Line::new(epa, epb));
        }

        if self.intersecting() {
            // overlapping circles: short lines across the overlap, with a
            // large error on the offset
            let average = self.a.center().midpoint(self.b.center());
            let offset = ValueWithError::new(0.1, (ra.value + rb.value) / 4.0);
            for sign in [1.0, -1.0] {
                let shift = *transverse * (offset * sign);
                lines.push(Line::new(average + shift, average - shift));
            }
        } else {
            for sign in [1.0, -1.0] {
                let epa = self.a.build_from_cell(forward, transverse, cos_crossed, sign);
                let epb = self.b.build_from_cell(forward, transverse, -cos_crossed, -sign);
                lines.push(Line::new(epa, epb));
            }
        }

        lines
    }
}

/// Couplets leaving the same cell are told apart by their far cell.
impl PartialEq for Couplet {
    fn eq(&self, other: &Self) -> bool {
        self.b.id() == other.b.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experimental::Point3E;
    use approx::assert_relative_eq;

    fn cell(id: usize, x: f64, z: f64, r: f64) -> Cell {
        Cell::new(
            id,
            Point3E::from_arrays([x, 0.0, z], [0.1, 1.0, 0.1]),
            ValueWithError::new(r, 0.1),
            true,
            2.0,
        )
    }

    /// Distance from a circle centre to a line in the drift plane.
    fn hor_distance_to_line(c: &Cell, l: &Line) -> f64 {
        let p = l.epa().value();
        let d = l.forward_axis().hor().unit().value();
        let v = c.center().value() - p;
        let v = nalgebra::Vector3::new(v.x, 0.0, v.z);
        (v - d * v.dot(&d)).norm()
    }

    #[test]
    fn test_axes() {
        let c = Couplet::new(cell(1, 0.0, 0.0, 5.0), cell(2, 30.0, 0.0, 5.0));
        assert_relative_eq!(c.distance().value, 30.0);
        assert_relative_eq!(c.distance_hor().value, 30.0);
        assert_relative_eq!(c.forward_axis().x.value, 1.0);
        assert_relative_eq!(c.transverse_axis().z.value, 1.0);
        assert_relative_eq!(c.transverse_axis().x.value, 0.0);
    }

    #[test]
    fn test_four_tangents_between_separate_circles() {
        let a = cell(1, 0.0, 0.0, 5.0);
        let b = cell(2, 30.0, 0.0, 8.0);
        let c = Couplet::new(a, b);
        assert_eq!(c.tangents().len(), 4);
        for t in c.tangents() {
            assert_relative_eq!(hor_distance_to_line(&a, t), 5.0, epsilon = 1e-9);
            assert_relative_eq!(hor_distance_to_line(&b, t), 8.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_intersecting_circles_get_offset_lines() {
        let c = Couplet::new(cell(1, 0.0, 0.0, 12.0), cell(2, 20.0, 0.0, 12.0));
        assert!(c.intersecting());
        assert_eq!(c.tangents().len(), 4);
    }

    #[test]
    fn test_point_cases() {
        let small = cell(1, 0.0, 0.0, 0.5);
        let big = cell(2, 30.0, 0.0, 6.0);
        assert_eq!(Couplet::new(small, cell(3, 30.0, 0.0, 1.0)).tangents().len(), 1);

        let pc = Couplet::new(small, big);
        assert_eq!(pc.tangents().len(), 2);
        for t in pc.tangents() {
            assert_relative_eq!(hor_distance_to_line(&big, t), 6.0, epsilon = 1e-9);
        }

        let cp = Couplet::new(big, small);
        assert_eq!(cp.tangents().len(), 2);
        for t in cp.tangents() {
            assert_relative_eq!(hor_distance_to_line(&big, t), 6.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_invert() {
        let c = Couplet::new(cell(1, 0.0, 0.0, 5.0), cell(2, 30.0, 10.0, 5.0));
        let inv = c.invert();
        assert_eq!(inv.a().id(), 2);
        assert_eq!(inv.b().id(), 1);
        assert_relative_eq!(inv.forward_axis().x.value, -c.forward_axis().x.value);
        assert_eq!(inv.invert().tangents(), c.tangents());
        for (t, ti) in c.tangents().iter().zip(inv.tangents()) {
            assert_eq!(t.epa(), ti.epb());
        }
    }
}
