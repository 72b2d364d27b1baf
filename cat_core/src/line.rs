//! Two-point segments: tangent lines between cells and broken-line pieces.

use crate::experimental::{Point3E, ValueWithError, Vector3E};
use serde::{Deserialize, Serialize};

/// A directed segment from `epa` to `epb`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    epa: Point3E,
    epb: Point3E,
    forward_axis: Vector3E,
}

/// Kink score between two consecutive segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinkChi2 {
    /// Phi pull² plus, when requested, theta pull²
    pub chi2: f64,
    /// Phi pull² alone
    pub chi2_phi: f64,
}

impl Line {
    pub fn new(epa: Point3E, epb: Point3E) -> Self {
        let forward_axis = Vector3E::between(&epa, &epb).unit();
        Self {
            epa,
            epb,
            forward_axis,
        }
    }

    #[inline]
    pub fn epa(&self) -> &Point3E {
        &self.epa
    }

    #[inline]
    pub fn epb(&self) -> &Point3E {
        &self.epb
    }

    /// Unit vector from `epa` to `epb`.
    #[inline]
    pub fn forward_axis(&self) -> &Vector3E {
        &self.forward_axis
    }

    pub fn is_valid(&self) -> bool {
        self.epa.is_valid() && self.epb.is_valid() && self.forward_axis.is_valid()
    }

    pub fn length(&self) -> ValueWithError {
        self.epa.distance(&self.epb)
    }

    pub fn phi(&self) -> ValueWithError {
        self.forward_axis.phi()
    }

    pub fn theta(&self) -> ValueWithError {
        self.forward_axis.theta()
    }

    /// Same segment traversed the other way.
    pub fn invert(&self) -> Self {
        Self {
            epa: self.epb,
            epb: self.epa,
            forward_axis: -self.forward_axis,
        }
    }

    pub fn kink_phi(&self, next: &Line) -> ValueWithError {
        self.forward_axis.kink_phi(&next.forward_axis)
    }

    pub fn kink_theta(&self, next: &Line) -> ValueWithError {
        self.forward_axis.kink_theta(&next.forward_axis)
    }

    /// Chi-square of the bend from `self` into `next`.
    pub fn chi2(&self, next: &Line, use_theta_kink: bool) -> KinkChi2 {
        let chi2_phi = self.kink_phi(next).pull().powi(2);
        let chi2 = if use_theta_kink {
            chi2_phi + self.kink_theta(next).pull().powi(2)
        } else {
            chi2_phi
        };
        KinkChi2 { chi2, chi2_phi }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p(x: f64, y: f64, z: f64) -> Point3E {
        Point3E::from_arrays([x, y, z], [0.1, 0.1, 0.1])
    }

    #[test]
    fn test_double_invert_is_identity() {
        let l = Line::new(p(0.0, 1.0, 2.0), p(3.0, 5.0, -4.0));
        assert_eq!(l.invert().invert(), l);
        assert_relative_eq!(l.invert().forward_axis().x.value, -l.forward_axis().x.value);
    }

    #[test]
    fn test_straight_continuation_has_zero_chi2() {
        let a = Line::new(p(0.0, 0.0, 0.0), p(10.0, 1.0, 0.0));
        let b = Line::new(p(10.0, 1.0, 0.0), p(20.0, 2.0, 0.0));
        let k = a.chi2(&b, true);
        assert_relative_eq!(k.chi2, 0.0, epsilon = 1e-12);
        assert_relative_eq!(k.chi2_phi, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bent_continuation_scores_kink() {
        let a = Line::new(p(0.0, 0.0, 0.0), p(10.0, 0.0, 0.0));
        let b = Line::new(p(10.0, 0.0, 0.0), p(20.0, 0.0, 10.0));
        let kink = a.kink_phi(&b);
        assert_relative_eq!(kink.value.to_degrees(), 45.0, epsilon = 1e-9);
        let k = a.chi2(&b, false);
        assert!(k.chi2 > 0.0);
        assert_relative_eq!(k.chi2, k.chi2_phi);
    }
}
