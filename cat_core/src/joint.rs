//! Joints: one way a track can pass through three consecutive cells.

use crate::circle::{three_points_circle, Circle};
use crate::experimental::{Point3E, ValueWithError, Vector3E};
use crate::line::Line;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A local path `epa → epb → epc` through the outer, middle and far cell of
/// a triplet, with the bend at `epb` and its score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub epa: Point3E,
    pub epb: Point3E,
    pub epc: Point3E,
    pub kink_phi: ValueWithError,
    pub kink_theta: ValueWithError,
    pub chi2: f64,
    pub ndof: usize,
    pub p: f64,
}

impl Joint {
    /// Joint through three points; the kinks are measured between
    /// `epa → epb` and `epb → epc`. The score starts empty.
    pub fn new(epa: Point3E, epb: Point3E, epc: Point3E) -> Self {
        let v1 = Vector3E::between(&epa, &epb);
        let v2 = Vector3E::between(&epb, &epc);
        Self {
            epa,
            epb,
            epc,
            kink_phi: v1.kink_phi(&v2),
            kink_theta: v1.kink_theta(&v2),
            chi2: 0.0,
            ndof: 0,
            p: 0.0,
        }
    }

    pub fn with_score(self, chi2: f64, ndof: usize, p: f64) -> Self {
        Self { chi2, ndof, p, ..self }
    }

    pub fn first_line(&self) -> Line {
        Line::new(self.epa, self.epb)
    }

    pub fn second_line(&self) -> Line {
        Line::new(self.epb, self.epc)
    }

    /// The same path traversed `epc → epb → epa`. The azimuthal bend
    /// changes sign; the elevation bend does not.
    pub fn invert(&self) -> Self {
        Self {
            epa: self.epc,
            epb: self.epb,
            epc: self.epa,
            kink_phi: -self.kink_phi,
            ..*self
        }
    }

    /// Circle through the three points, `None` for a straight joint.
    pub fn circle(&self) -> Option<Circle> {
        three_points_circle(&self.epa, &self.epb, &self.epc)
    }

    /// Most probable first.
    pub fn by_probability(a: &Joint, b: &Joint) -> Ordering {
        b.p.partial_cmp(&a.p).unwrap_or(Ordering::Equal)
    }
}
