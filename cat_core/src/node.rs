//! Nodes: a cell together with its local connectivity.

use crate::cell::{Cell, CellId};
use crate::config::CatConfig;
use crate::couplet::Couplet;
use crate::experimental::Point3E;
use crate::triplet::Triplet;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    cell: Cell,
    /// Connections leaving this cell
    couplets: Vec<Couplet>,
    /// Triplets centred on this cell that kept at least one joint
    triplets: Vec<Triplet>,
}

impl Node {
    pub fn new(cell: Cell, couplets: Vec<Couplet>) -> Self {
        Self {
            cell,
            couplets,
            triplets: Vec::new(),
        }
    }

    #[inline]
    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    #[inline]
    pub fn id(&self) -> CellId {
        self.cell.id()
    }

    pub fn couplets(&self) -> &[Couplet] {
        &self.couplets
    }

    pub fn triplets(&self) -> &[Triplet] {
        &self.triplets
    }

    pub fn couplet_to(&self, id: CellId) -> Option<&Couplet> {
        self.couplets.iter().find(|c| c.b().id() == id)
    }

    pub fn has_couplet_to(&self, id: CellId) -> bool {
        self.couplet_to(id).is_some()
    }

    /// Build every triplet through this cell and keep those with joints.
    pub fn calculate_triplets(&mut self, config: &CatConfig) {
        let mut triplets = Vec::new();
        for (i, first) in self.couplets.iter().enumerate() {
            for second in &self.couplets[i + 1..] {
                if first.b().id() == second.b().id() {
                    continue;
                }
                let triplet = Triplet::build(first.clone(), second.clone(), config);
                if triplet.has_joints() {
                    triplets.push(triplet);
                }
            }
        }
        self.triplets = triplets;
    }

    /// The triplet `prev → self → next`, oriented that way.
    pub fn triplet_between(&self, prev: CellId, next: CellId) -> Option<Cow<'_, Triplet>> {
        let triplet = self.triplets.iter().find(|t| t.joins(prev, next))?;
        if triplet.a().id() == prev {
            Some(Cow::Borrowed(triplet))
        } else {
            Some(Cow::Owned(triplet.invert()))
        }
    }

    /// Best joint probability over triplets with `prev` as an outer cell,
    /// keyed by the opposite outer cell.
    pub fn continuations_after(&self, prev: CellId) -> impl Iterator<Item = (&Cell, f64)> + '_ {
        self.triplets.iter().filter_map(move |t| {
            let next = t.other_end(prev)?;
            Some((next, t.best_joint().map_or(0.0, |j| j.p)))
        })
    }

    /// Same connectivity listed in the opposite order.
    pub fn invert(&self) -> Self {
        Self {
            cell: self.cell,
            couplets: self.couplets.iter().rev().cloned().collect(),
            triplets: self.triplets.iter().rev().map(Triplet::invert).collect(),
        }
    }

    /// Distinct ways of passing this cell: joint middle points (most probable
    /// first) with one representative per angular sector. Without triplets
    /// the tangency points of the couplets are used. A small cell has a
    /// single side, its centre.
    pub fn side_points(&self, quadrant_angle: f64) -> Vec<Point3E> {
        if self.cell.is_small() {
            return vec![self.cell.as_point()];
        }

        let mut candidates: Vec<(Point3E, f64)> = self
            .triplets
            .iter()
            .flat_map(|t| t.joints().iter().map(|j| (j.epb, j.p)))
            .collect();
        if candidates.is_empty() {
            candidates = self
                .couplets
                .iter()
                .flat_map(|c| c.tangents().iter().map(|t| (*t.epa(), 1.0)))
                .collect();
        }
        candidates.sort_by(|x, y| y.1.total_cmp(&x.1));

        let mut sides: Vec<Point3E> = Vec::new();
        for (point, _) in candidates {
            if !sides
                .iter()
                .any(|kept| self.cell.same_quadrant(kept, &point, quadrant_angle))
            {
                sides.push(point);
            }
        }
        sides
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cell == other.cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experimental::ValueWithError;

    fn cell(id: usize, x: f64, r: f64, sigma: f64) -> Cell {
        Cell::new(
            id,
            Point3E::from_arrays([x, 0.0, 0.0], [sigma, 1.0, sigma]),
            ValueWithError::new(r, sigma),
            true,
            2.0,
        )
    }

    fn middle_node(r: f64, sigma: f64) -> Node {
        let (a, b, c) = (cell(1, 0.0, r, sigma), cell(2, 30.0, r, sigma), cell(3, 60.0, r, sigma));
        let mut node = Node::new(b, vec![Couplet::new(b, a), Couplet::new(b, c)]);
        node.calculate_triplets(&CatConfig::default());
        node
    }

    #[test]
    fn test_calculate_triplets() {
        let node = middle_node(0.0, 3.0);
        assert_eq!(node.triplets().len(), 1);
        assert!(node.triplet_between(1, 3).is_some());
        assert!(node.triplet_between(1, 2).is_none());
        assert_eq!(node.continuations_after(1).map(|(c, _)| c.id()).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_triplet_between_is_oriented() {
        let node = middle_node(10.0, 0.2);
        let forward = node.triplet_between(1, 3).unwrap();
        let backward = node.triplet_between(3, 1).unwrap();
        assert_eq!(forward.a().id(), 1);
        assert_eq!(backward.a().id(), 3);
        assert!(matches!(forward, Cow::Borrowed(_)));
        assert!(matches!(backward, Cow::Owned(_)));
    }

    #[test]
    fn test_side_points() {
        assert_eq!(middle_node(0.0, 3.0).side_points(90.0).len(), 1);

        let sides = middle_node(10.0, 0.2).side_points(90.0);
        assert_eq!(sides.len(), 2);
        assert!(sides[0].z.value * sides[1].z.value < 0.0);
    }

    #[test]
    fn test_end_node_uses_tangency_points() {
        let (a, b) = (cell(1, 0.0, 10.0, 0.2), cell(2, 30.0, 10.0, 0.2));
        let node = Node::new(a, vec![Couplet::new(a, b)]);
        assert!(node.triplets().is_empty());
        assert_eq!(node.side_points(90.0).len(), 2);
    }

    #[test]
    fn test_invert_twice() {
        let node = middle_node(10.0, 0.2);
        let back = node.invert().invert();
        assert_eq!(back, node);
        assert_eq!(back.couplets(), node.couplets());
        assert_eq!(back.triplets()[0].joints(), node.triplets()[0].joints());
    }
}
