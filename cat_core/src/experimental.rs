//! The "EXPERIMENTAL" Layer - Values Carrying Gaussian Errors
//!
//! Every quantity the tracker handles (cell centres, drift radii, angles,
//! separations) is a central value plus an independent Gaussian error.
//! Arithmetic and trigonometry propagate the error to first order:
//!
//!   σ_f = |∂f/∂x| · σ_x      (quadrature sum for several operands)
//!
//! Geometry convention: `y` runs along the wire (vertical), the drift plane
//! is `x`–`z`. Hence `phi = atan2(z, x)` and `theta = atan2(y, |hor|)`.
//!
//! Nothing in this module panics or returns `Result`. Degenerate inputs
//! produce NaN values that callers detect with `is_valid()`.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Below this magnitude a value with zero error counts as exactly zero.
const ZERO_TOLERANCE: f64 = 1e-12;

// ============================================================================
// SCALAR
// ============================================================================

/// A scalar measurement: central value and independent Gaussian error.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueWithError {
    pub value: f64,
    pub error: f64,
}

impl ValueWithError {
    pub const fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }

    /// A value known exactly.
    pub const fn exact(value: f64) -> Self {
        Self { value, error: 0.0 }
    }

    /// The NaN marker produced by degenerate operations.
    pub const fn invalid() -> Self {
        Self {
            value: f64::NAN,
            error: f64::NAN,
        }
    }

    /// True when both value and error are finite numbers.
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.error.is_finite()
    }

    pub fn with_error(self, error: f64) -> Self {
        Self { error, ..self }
    }

    /// Normalised residual `value / error`.
    ///
    /// An exact zero is a perfect match (0), an exact non-zero value is an
    /// infinitely bad one.
    pub fn pull(&self) -> f64 {
        if self.error > 0.0 {
            self.value / self.error
        } else if self.value.abs() < ZERO_TOLERANCE {
            0.0
        } else {
            f64::INFINITY
        }
    }

    pub fn square(self) -> Self {
        Self::new(self.value * self.value, 2.0 * self.value.abs() * self.error)
    }

    /// Square root. At zero the first-order error diverges, so the error
    /// falls back to `sqrt(σ)`.
    pub fn sqrt(self) -> Self {
        let value = self.value.sqrt();
        if value > 0.0 {
            Self::new(value, self.error / (2.0 * value))
        } else {
            Self::new(value, self.error.sqrt())
        }
    }

    pub fn abs(self) -> Self {
        Self::new(self.value.abs(), self.error)
    }

    pub fn sin(self) -> Self {
        Self::new(self.value.sin(), self.value.cos().abs() * self.error)
    }

    pub fn cos(self) -> Self {
        Self::new(self.value.cos(), self.value.sin().abs() * self.error)
    }

    pub fn tan(self) -> Self {
        let value = self.value.tan();
        Self::new(value, (1.0 + value * value) * self.error)
    }

    pub fn asin(self) -> Self {
        Self::new(
            self.value.asin(),
            self.error / (1.0 - self.value * self.value).sqrt(),
        )
    }

    pub fn acos(self) -> Self {
        Self::new(
            self.value.acos(),
            self.error / (1.0 - self.value * self.value).sqrt(),
        )
    }

    /// Four-quadrant arctangent of `y / x`.
    ///
    /// On the `x = 0` axis the gradient is taken from the complementary
    /// angle; at the origin the angle is undefined and gets an error of π.
    pub fn atan2(y: Self, x: Self) -> Self {
        let value = y.value.atan2(x.value);

        let error = if x.value != 0.0 {
            let den = 1.0 + (y.value / x.value).powi(2);
            let num = (y.error / x.value).powi(2)
                + (y.value * x.error / (x.value * x.value)).powi(2);
            num.sqrt() / den
        } else if y.value != 0.0 {
            let den = 1.0 + (x.value / y.value).powi(2);
            let num = (x.error / y.value).powi(2)
                + (x.value * y.error / (y.value * y.value)).powi(2);
            num.sqrt() / den
        } else {
            PI
        };

        Self::new(value, error)
    }

    /// Mean of two independent values.
    pub fn midpoint(self, other: Self) -> Self {
        (self + other) / 2.0
    }
}

impl fmt::Display for ValueWithError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ± {}", self.value, self.error)
    }
}

impl From<f64> for ValueWithError {
    fn from(value: f64) -> Self {
        Self::exact(value)
    }
}

impl Neg for ValueWithError {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.value, self.error)
    }
}

impl Add for ValueWithError {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.value + rhs.value, self.error.hypot(rhs.error))
    }
}

impl Sub for ValueWithError {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.value - rhs.value, self.error.hypot(rhs.error))
    }
}

impl Mul for ValueWithError {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.value * rhs.value,
            (rhs.value * self.error).hypot(self.value * rhs.error),
        )
    }
}

impl Div for ValueWithError {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Self::new(
            self.value / rhs.value,
            (self.error / rhs.value).hypot(self.value * rhs.error / (rhs.value * rhs.value)),
        )
    }
}

impl Add<f64> for ValueWithError {
    type Output = Self;
    fn add(self, rhs: f64) -> Self {
        Self::new(self.value + rhs, self.error)
    }
}

impl Sub<f64> for ValueWithError {
    type Output = Self;
    fn sub(self, rhs: f64) -> Self {
        Self::new(self.value - rhs, self.error)
    }
}

impl Mul<f64> for ValueWithError {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.value * rhs, self.error * rhs.abs())
    }
}

impl Div<f64> for ValueWithError {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self::new(self.value / rhs, self.error / rhs.abs())
    }
}

/// Bring two angles onto the same branch so that their difference is the
/// short way round the circle.
pub fn fix_angles(a1: f64, a2: f64) -> (f64, f64) {
    if (a1 - a2).abs() > PI {
        if a1 < a2 {
            (a1 + 2.0 * PI, a2)
        } else {
            (a1, a2 + 2.0 * PI)
        }
    } else {
        (a1, a2)
    }
}

/// Difference `second - first` of two propagated angles, taken the short way.
pub fn angle_difference(first: ValueWithError, second: ValueWithError) -> ValueWithError {
    let (a1, a2) = fix_angles(first.value, second.value);
    ValueWithError::new(a2 - a1, first.error.hypot(second.error))
}

// ============================================================================
// VECTOR
// ============================================================================

/// A direction or displacement with independent errors per component.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3E {
    pub x: ValueWithError,
    pub y: ValueWithError,
    pub z: ValueWithError,
}

impl Vector3E {
    pub const fn new(x: ValueWithError, y: ValueWithError, z: ValueWithError) -> Self {
        Self { x, y, z }
    }

    /// An exactly known vector.
    pub const fn exact(x: f64, y: f64, z: f64) -> Self {
        Self::new(
            ValueWithError::exact(x),
            ValueWithError::exact(y),
            ValueWithError::exact(z),
        )
    }

    /// Unit vector along the wire.
    pub const fn wire_axis() -> Self {
        Self::exact(0.0, 1.0, 0.0)
    }

    /// Displacement from `from` to `to`.
    pub fn between(from: &Point3E, to: &Point3E) -> Self {
        Self::new(to.x - from.x, to.y - from.y, to.z - from.z)
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_valid() && self.y.is_valid() && self.z.is_valid()
    }

    /// Central values as a plain vector.
    pub fn value(&self) -> Vector3<f64> {
        Vector3::new(self.x.value, self.y.value, self.z.value)
    }

    pub fn length(&self) -> ValueWithError {
        let value = self.value().norm();
        let spread = ((self.x.value * self.x.error).powi(2)
            + (self.y.value * self.y.error).powi(2)
            + (self.z.value * self.z.error).powi(2))
        .sqrt();
        let error = if value > 0.0 {
            spread / value
        } else {
            (self.x.error.powi(2) + self.y.error.powi(2) + self.z.error.powi(2)).sqrt()
        };
        ValueWithError::new(value, error)
    }

    /// Projection on the drift plane (the wire component set to exact zero).
    pub fn hor(&self) -> Self {
        Self::new(self.x, ValueWithError::exact(0.0), self.z)
    }

    /// Direction with the same errors scaled by the central length.
    pub fn unit(&self) -> Self {
        *self / self.length().value
    }

    /// Azimuth in the drift plane.
    pub fn phi(&self) -> ValueWithError {
        ValueWithError::atan2(self.z, self.x)
    }

    /// Elevation with respect to the drift plane.
    pub fn theta(&self) -> ValueWithError {
        ValueWithError::atan2(self.y, self.hor().length())
    }

    /// Propagated azimuthal bend going from `self` to `next`.
    pub fn kink_phi(&self, next: &Vector3E) -> ValueWithError {
        angle_difference(self.phi(), next.phi())
    }

    /// Propagated elevation bend going from `self` to `next`.
    pub fn kink_theta(&self, next: &Vector3E) -> ValueWithError {
        angle_difference(self.theta(), next.theta())
    }

    pub fn dot(&self, other: &Vector3E) -> ValueWithError {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vector3E) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn to_point(&self) -> Point3E {
        Point3E::new(self.x, self.y, self.z)
    }
}

impl Neg for Vector3E {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl Add for Vector3E {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3E {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3E {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Mul<ValueWithError> for Vector3E {
    type Output = Self;
    fn mul(self, rhs: ValueWithError) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f64> for Vector3E {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

// ============================================================================
// POINT
// ============================================================================

/// A measured position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3E {
    pub x: ValueWithError,
    pub y: ValueWithError,
    pub z: ValueWithError,
}

impl Point3E {
    pub const fn new(x: ValueWithError, y: ValueWithError, z: ValueWithError) -> Self {
        Self { x, y, z }
    }

    /// Build from central values and per-axis errors.
    pub fn from_arrays(value: [f64; 3], error: [f64; 3]) -> Self {
        Self::new(
            ValueWithError::new(value[0], error[0]),
            ValueWithError::new(value[1], error[1]),
            ValueWithError::new(value[2], error[2]),
        )
    }

    pub const fn exact(x: f64, y: f64, z: f64) -> Self {
        Self::new(
            ValueWithError::exact(x),
            ValueWithError::exact(y),
            ValueWithError::exact(z),
        )
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_valid() && self.y.is_valid() && self.z.is_valid()
    }

    /// Central values as a plain point.
    pub fn value(&self) -> Point3<f64> {
        Point3::new(self.x.value, self.y.value, self.z.value)
    }

    pub fn to_vector(&self) -> Vector3E {
        Vector3E::new(self.x, self.y, self.z)
    }

    pub fn distance(&self, other: &Point3E) -> ValueWithError {
        Vector3E::between(self, other).length()
    }

    /// Distance projected on the drift plane.
    pub fn hor_distance(&self, other: &Point3E) -> ValueWithError {
        Vector3E::between(self, other).hor().length()
    }

    /// Same point with the drift-plane errors replaced by `error`.
    pub fn with_hor_error(&self, error: f64) -> Self {
        Self::new(self.x.with_error(error), self.y, self.z.with_error(error))
    }

    pub fn midpoint(&self, other: &Point3E) -> Self {
        Self::new(
            self.x.midpoint(other.x),
            self.y.midpoint(other.y),
            self.z.midpoint(other.z),
        )
    }
}

impl Add<Vector3E> for Point3E {
    type Output = Point3E;
    fn add(self, rhs: Vector3E) -> Point3E {
        Point3E::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub<Vector3E> for Point3E {
    type Output = Point3E;
    fn sub(self, rhs: Vector3E) -> Point3E {
        Point3E::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Point3E {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_sum_adds_errors_in_quadrature() {
        let a = ValueWithError::new(1.0, 3.0);
        let b = ValueWithError::new(2.0, 4.0);
        let s = a + b;
        assert_relative_eq!(s.value, 3.0);
        assert_relative_eq!(s.error, 5.0);
        let d = a - b;
        assert_relative_eq!(d.value, -1.0);
        assert_relative_eq!(d.error, 5.0);
    }

    #[test]
    fn test_product_and_ratio() {
        let a = ValueWithError::new(2.0, 0.2);
        let b = ValueWithError::new(4.0, 0.4);
        let p = a * b;
        assert_relative_eq!(p.value, 8.0);
        // relative errors 10% each → sqrt(2) * 10%
        assert_relative_eq!(p.error / p.value, 0.1 * 2f64.sqrt(), epsilon = 1e-12);
        let q = a / b;
        assert_relative_eq!(q.value, 0.5);
        assert_relative_eq!(q.error / q.value, 0.1 * 2f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_division_by_zero_is_invalid_not_panic() {
        let q = ValueWithError::new(1.0, 0.1) / ValueWithError::exact(0.0);
        assert!(!q.is_valid());
        let r = ValueWithError::new(2.0, 0.0).acos();
        assert!(!r.is_valid());
    }

    #[test]
    fn test_atan2_on_axis_and_origin() {
        let on_axis = ValueWithError::atan2(ValueWithError::new(1.0, 0.1), ValueWithError::new(0.0, 0.1));
        assert!(on_axis.is_valid());
        assert_relative_eq!(on_axis.value, PI / 2.0);
        assert_relative_eq!(on_axis.error, 0.1, epsilon = 1e-12);

        let origin = ValueWithError::atan2(ValueWithError::exact(0.0), ValueWithError::exact(0.0));
        assert!(origin.is_valid());
        assert_relative_eq!(origin.error, PI);
    }

    #[test]
    fn test_pull_conventions() {
        assert_eq!(ValueWithError::exact(0.0).pull(), 0.0);
        assert!(ValueWithError::exact(1.0).pull().is_infinite());
        assert_relative_eq!(ValueWithError::new(3.0, 1.5).pull(), 2.0);
    }

    #[test]
    fn test_fix_angles_wraps_short_way() {
        let (a, b) = fix_angles(PI - 0.01, -PI + 0.01);
        assert_relative_eq!(b - a, 0.02, epsilon = 1e-12);
        let (a, b) = fix_angles(0.1, 0.3);
        assert_relative_eq!(b - a, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_kink_phi_across_branch_cut() {
        let v1 = Vector3E::exact(-1.0, 0.0, 0.01);
        let v2 = Vector3E::exact(-1.0, 0.0, -0.01);
        let kink = v1.kink_phi(&v2);
        assert!(kink.value.abs() < 0.03);
    }

    #[test]
    fn test_theta_of_vertical_vector_is_valid() {
        let v = Vector3E::new(
            ValueWithError::new(0.0, 0.1),
            ValueWithError::new(1.0, 0.1),
            ValueWithError::new(0.0, 0.1),
        );
        let theta = v.theta();
        assert!(theta.is_valid());
        assert_relative_eq!(theta.value, PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unit_and_cross() {
        let v = Vector3E::exact(3.0, 0.0, 4.0);
        assert_relative_eq!(v.unit().length().value, 1.0, epsilon = 1e-12);
        let t = v.unit().cross(&Vector3E::wire_axis());
        // forward × wire lies in the drift plane, perpendicular to forward
        assert_relative_eq!(t.y.value, 0.0);
        assert_relative_eq!(t.dot(&v).value, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_point_distances() {
        let a = Point3E::from_arrays([0.0, 0.0, 0.0], [0.1, 0.1, 0.1]);
        let b = Point3E::from_arrays([3.0, 12.0, 4.0], [0.1, 0.1, 0.1]);
        assert_relative_eq!(a.distance(&b).value, 13.0, epsilon = 1e-12);
        assert_relative_eq!(a.hor_distance(&b).value, 5.0, epsilon = 1e-12);
    }

    proptest! {
        #[test]
        fn prop_sum_error_dominates_operands(
            a in -1e3f64..1e3, ea in 0f64..10.0,
            b in -1e3f64..1e3, eb in 0f64..10.0,
        ) {
            let s = ValueWithError::new(a, ea) + ValueWithError::new(b, eb);
            prop_assert!(s.error + 1e-12 >= ea);
            prop_assert!(s.error + 1e-12 >= eb);
        }

        #[test]
        fn prop_atan2_never_invalid_for_finite_input(
            y in -1e3f64..1e3, x in -1e3f64..1e3, e in 0f64..1.0,
        ) {
            let a = ValueWithError::atan2(ValueWithError::new(y, e), ValueWithError::new(x, e));
            prop_assert!(a.is_valid());
            prop_assert!(a.value.abs() <= PI);
        }

        #[test]
        fn prop_angle_difference_is_short(a1 in -PI..PI, a2 in -PI..PI) {
            let d = angle_difference(ValueWithError::exact(a1), ValueWithError::exact(a2));
            prop_assert!(d.value.abs() <= PI + 1e-12);
        }
    }
}
