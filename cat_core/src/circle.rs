//! Circles in the drift plane: closed-form and least-squares fits.
//!
//! A track in a uniform field parallel to the wires projects onto a circle
//! in the `x`–`z` plane. Circles here are used to check curvature of joints
//! and clusters; the `y` coordinate of the centre is the mean `y` of the
//! fitted points.

use crate::experimental::{angle_difference, Point3E, ValueWithError, Vector3E};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Determinants below this magnitude mean collinear points.
const DEGENERATE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point3E,
    pub radius: ValueWithError,
}

impl Circle {
    pub fn new(center: Point3E, radius: ValueWithError) -> Self {
        Self { center, radius }
    }

    pub fn is_valid(&self) -> bool {
        self.center.is_valid() && self.radius.is_valid()
    }

    pub fn curvature(&self) -> ValueWithError {
        ValueWithError::exact(1.0) / self.radius
    }

    /// Point on the circle at azimuth `phi` (seen from the centre).
    pub fn position(&self, phi: ValueWithError) -> Point3E {
        let direction = Vector3E::new(phi.cos(), ValueWithError::exact(0.0), phi.sin());
        self.center + direction * self.radius
    }

    /// Azimuth of `p` seen from the centre.
    pub fn phi_of_point(&self, p: &Point3E) -> ValueWithError {
        Vector3E::between(&self.center, p).phi()
    }

    /// Squared pull of the distance of `p` from the circle.
    pub fn chi2_point(&self, p: &Point3E) -> f64 {
        let distance = self.center.hor_distance(p);
        let residual = ValueWithError::new(
            distance.value - self.radius.value,
            distance.error.hypot(self.radius.error),
        );
        residual.pull().powi(2)
    }

    pub fn chi2(&self, points: &[Point3E]) -> f64 {
        points.iter().map(|p| self.chi2_point(p)).sum()
    }

    /// Crossing points with another circle in the drift plane (0, 1 or 2).
    pub fn intersect_circle(&self, other: &Circle) -> Vec<Point3E> {
        let (c1, c2) = (self.center.value(), other.center.value());
        let (r1, r2) = (self.radius.value, other.radius.value);
        let (dx, dz) = (c2.x - c1.x, c2.z - c1.z);
        let d = dx.hypot(dz);
        if d < DEGENERATE || d > r1 + r2 || d < (r1 - r2).abs() {
            return Vec::new();
        }

        let along = (r1 * r1 - r2 * r2 + d * d) / (2.0 * d);
        let h = (r1 * r1 - along * along).max(0.0).sqrt();
        let (ux, uz) = (dx / d, dz / d);
        let (mx, mz) = (c1.x + along * ux, c1.z + along * uz);
        let error = self.radius.error.hypot(other.radius.error);
        let y = self.center.y.midpoint(other.center.y);

        let make = |x: f64, z: f64| {
            Point3E::new(ValueWithError::new(x, error), y, ValueWithError::new(z, error))
        };
        if h < DEGENERATE {
            vec![make(mx, mz)]
        } else {
            vec![make(mx - h * uz, mz + h * ux), make(mx + h * uz, mz - h * ux)]
        }
    }
}

// ============================================================================
// FITS
// ============================================================================

/// Circle through three points of the drift plane.
///
/// Returns `None` when the points are collinear or coincident.
pub fn three_points_circle(a: &Point3E, b: &Point3E, c: &Point3E) -> Option<Circle> {
    // work relative to `a` to keep the squared terms small
    let b = Vector3E::between(a, b);
    let c = Vector3E::between(a, c);
    let d = (b.x * c.z - b.z * c.x) * 2.0;
    if d.value.abs() < DEGENERATE || !d.is_valid() {
        return None;
    }

    let b2 = b.x.square() + b.z.square();
    let c2 = c.x.square() + c.z.square();
    let ux = (c.z * b2 - b.z * c2) / d;
    let uz = (b.x * c2 - c.x * b2) / d;
    let offset = Vector3E::new(ux, ValueWithError::exact(0.0), uz);

    let mut center = *a + offset;
    center.y = ValueWithError::new(
        a.y.value + (b.y.value + c.y.value) / 3.0,
        a.y.error,
    );
    let radius = offset.length();

    let circle = Circle::new(center, radius);
    circle.is_valid().then_some(circle)
}

/// Algebraic (Kåsa) least-squares circle through the drift-plane projection
/// of `points`.
///
/// Minimises `Σ (x² + z² + D·x + E·z + F)²`. Needs at least three
/// non-collinear points.
pub fn best_fit_circle(points: &[Point3E]) -> Option<Circle> {
    if points.len() < 3 {
        return None;
    }

    let n = points.len() as f64;
    let (mean_x, mean_z) = points.iter().fold((0.0, 0.0), |(sx, sz), p| {
        (sx + p.x.value / n, sz + p.z.value / n)
    });

    let mut normal = Matrix3::<f64>::zeros();
    let mut rhs = Vector3::<f64>::zeros();
    for p in points {
        let (x, z) = (p.x.value - mean_x, p.z.value - mean_z);
        let row = Vector3::new(x, z, 1.0);
        normal += row * row.transpose();
        rhs -= row * (x * x + z * z);
    }

    let solution = normal.lu().solve(&rhs)?;
    let (cx, cz) = (-solution[0] / 2.0, -solution[1] / 2.0);
    let r2 = cx * cx + cz * cz - solution[2];
    if r2 <= 0.0 || !r2.is_finite() {
        return None;
    }
    let radius = r2.sqrt();

    // spread of the residual distances sets the error scale
    let residuals: f64 = points
        .iter()
        .map(|p| {
            let d = (p.x.value - mean_x - cx).hypot(p.z.value - mean_z - cz);
            (d - radius).powi(2)
        })
        .sum();
    let point_error = points.iter().map(|p| p.x.error.hypot(p.z.error)).sum::<f64>() / n;
    let error = (residuals / n).sqrt().max(point_error) / n.sqrt();

    let mean_y = points.iter().map(|p| p.y.value).sum::<f64>() / n;
    let y_error = points.iter().map(|p| p.y.error).sum::<f64>() / n;

    Some(Circle::new(
        Point3E::new(
            ValueWithError::new(cx + mean_x, error),
            ValueWithError::new(mean_y, y_error),
            ValueWithError::new(cz + mean_z, error),
        ),
        ValueWithError::new(radius, error),
    ))
}

/// Helix pitch `dy/ds` along `circle`: a linear fit of `y` against the arc
/// length of each point, measured from the first one.
pub fn best_fit_pitch(circle: &Circle, points: &[Point3E]) -> Option<ValueWithError> {
    if points.len() < 2 || !circle.is_valid() {
        return None;
    }

    let mut arcs = Vec::with_capacity(points.len());
    let mut phi = circle.phi_of_point(&points[0]);
    let mut arc = 0.0;
    arcs.push(arc);
    for p in &points[1..] {
        let next = circle.phi_of_point(p);
        arc += angle_difference(phi, next).value * circle.radius.value;
        arcs.push(arc);
        phi = next;
    }

    let n = points.len() as f64;
    let mean_s = arcs.iter().sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.y.value).sum::<f64>() / n;
    let sxx: f64 = arcs.iter().map(|s| (s - mean_s).powi(2)).sum();
    if sxx < DEGENERATE {
        return None;
    }
    let sxy: f64 = arcs
        .iter()
        .zip(points)
        .map(|(s, p)| (s - mean_s) * (p.y.value - mean_y))
        .sum();
    let y_error = points.iter().map(|p| p.y.error).sum::<f64>() / n;

    Some(ValueWithError::new(sxy / sxx, y_error / sxx.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn p(x: f64, y: f64, z: f64) -> Point3E {
        Point3E::from_arrays([x, y, z], [0.2, 1.0, 0.2])
    }

    fn on_circle(cx: f64, cz: f64, r: f64, deg: f64, y: f64) -> Point3E {
        let a = deg.to_radians();
        p(cx + r * a.cos(), y, cz + r * a.sin())
    }

    #[test]
    fn test_three_points_circle_known() {
        let c = three_points_circle(
            &on_circle(10.0, -5.0, 100.0, 10.0, 0.0),
            &on_circle(10.0, -5.0, 100.0, 40.0, 0.0),
            &on_circle(10.0, -5.0, 100.0, 100.0, 0.0),
        )
        .unwrap();
        assert_relative_eq!(c.center.x.value, 10.0, epsilon = 1e-8);
        assert_relative_eq!(c.center.z.value, -5.0, epsilon = 1e-8);
        assert_relative_eq!(c.radius.value, 100.0, epsilon = 1e-8);
    }

    #[test]
    fn test_collinear_points_have_no_circle() {
        assert!(three_points_circle(&p(0.0, 0.0, 0.0), &p(1.0, 0.0, 1.0), &p(2.0, 0.0, 2.0)).is_none());
        assert!(three_points_circle(&p(0.0, 0.0, 0.0), &p(0.0, 0.0, 0.0), &p(2.0, 0.0, 2.0)).is_none());
    }

    #[test]
    fn test_best_fit_circle_recovers_radius() {
        let points: Vec<_> = (0..8)
            .map(|i| on_circle(-20.0, 40.0, 250.0, 15.0 * i as f64, i as f64))
            .collect();
        let c = best_fit_circle(&points).unwrap();
        assert_relative_eq!(c.radius.value, 250.0, epsilon = 1e-6);
        assert_relative_eq!(c.center.x.value, -20.0, epsilon = 1e-6);
        assert_relative_eq!(c.center.z.value, 40.0, epsilon = 1e-6);
        assert!(c.chi2(&points) < 1e-6);
        assert!(best_fit_circle(&points[..2]).is_none());
    }

    #[test]
    fn test_best_fit_pitch() {
        let r = 200.0;
        let points: Vec<_> = (0..5)
            .map(|i| {
                let deg = 10.0 * i as f64;
                on_circle(0.0, 0.0, r, deg, 0.5 * r * deg.to_radians())
            })
            .collect();
        let c = Circle::new(p(0.0, 0.0, 0.0), ValueWithError::new(r, 0.1));
        let pitch = best_fit_pitch(&c, &points).unwrap();
        assert_relative_eq!(pitch.value, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_position_and_phi() {
        let c = Circle::new(p(1.0, 0.0, 1.0), ValueWithError::new(10.0, 0.1));
        let q = c.position(ValueWithError::exact(std::f64::consts::FRAC_PI_2));
        assert_relative_eq!(q.x.value, 1.0, epsilon = 1e-12);
        assert_relative_eq!(q.z.value, 11.0, epsilon = 1e-12);
        assert_relative_eq!(c.phi_of_point(&q).value, std::f64::consts::FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_intersect_circle() {
        let a = Circle::new(p(0.0, 0.0, 0.0), ValueWithError::new(5.0, 0.1));
        let b = Circle::new(p(8.0, 0.0, 0.0), ValueWithError::new(5.0, 0.1));
        let crossings = a.intersect_circle(&b);
        assert_eq!(crossings.len(), 2);
        for q in &crossings {
            assert_relative_eq!(q.x.value, 4.0, epsilon = 1e-12);
            assert_relative_eq!(q.z.value.abs(), 3.0, epsilon = 1e-12);
        }
        let far = Circle::new(p(20.0, 0.0, 0.0), ValueWithError::new(5.0, 0.1));
        assert!(a.intersect_circle(&far).is_empty());
    }

    proptest! {
        #[test]
        fn prop_three_points_lie_on_their_circle(
            r in 10.0f64..1000.0,
            a1 in 0.0f64..100.0, gap1 in 20.0f64..120.0, gap2 in 20.0f64..120.0,
        ) {
            let pa = on_circle(3.0, -7.0, r, a1, 0.0);
            let pb = on_circle(3.0, -7.0, r, a1 + gap1, 1.0);
            let pc = on_circle(3.0, -7.0, r, a1 + gap1 + gap2, 2.0);
            let c = three_points_circle(&pa, &pb, &pc).unwrap();
            prop_assert!(c.chi2(&[pa, pb, pc]) < 1e-6);
        }
    }
}
