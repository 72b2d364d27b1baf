//! Chi-square scoring shared by joints and broken lines.

use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Survival probability `P(χ² ≥ chi2)` for `ndof` degrees of freedom.
///
/// Always in `[0, 1]`. A NaN chi2 scores 0, and zero degrees of freedom
/// score 1 for a vanishing chi2 and 0 otherwise.
pub fn probof(chi2: f64, ndof: usize) -> f64 {
    if chi2.is_nan() {
        return 0.0;
    }
    if chi2 <= 0.0 {
        return 1.0;
    }
    if chi2.is_infinite() || ndof == 0 {
        return 0.0;
    }

    match ChiSquared::new(ndof as f64) {
        Ok(dist) => dist.sf(chi2).clamp(0.0, 1.0),
        Err(_) => 0.0,
    }
}
