//! Tracker configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest number of consecutive missing layers a gap link may bridge.
pub const MAX_NOFFLAYERS: usize = 8;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the Clusterizer
///
/// Angles are in degrees, lengths in the units of the hit positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatConfig {
    /// Alternatives with p >= best_p / ratio survive (default: 10000)
    pub ratio: f64,

    /// Largest angular separation of the two tangency points on the middle
    /// cell of a joint (default: 90)
    pub separation_limit: f64,

    /// Angular width of a side sector of a drift circle (default: 90)
    pub quadrant_angle: f64,

    /// Largest azimuthal kink of a joint (default: 20)
    pub phi_limit: f64,

    /// Largest elevation kink of a joint (default: 160)
    pub theta_limit: f64,

    /// Drift radii up to this value make a point-like cell (default: 2.0)
    pub small_radius: f64,

    /// Joints must score strictly above this probability (default: 0)
    pub probmin: f64,

    /// Consecutive missing layers bridged by a gap link, at most
    /// `MAX_NOFFLAYERS` (default: 1)
    pub nofflayers: usize,

    /// Wire pitch of the cell grid (default: 30.0)
    pub cell_distance: f64,

    /// Joints kept per triplet (default: 2)
    pub max_joints: usize,

    /// Broken lines kept per ambiguous window (default: 32)
    pub max_alternatives: usize,

    /// Search steps allowed per ambiguous window (default: 200000)
    pub max_search_steps: usize,

    /// Wall-clock budget per event (default: unlimited)
    pub time_budget: Option<Duration>,

    /// Resolve connected components on the rayon pool (default: false)
    pub parallel: bool,

    /// Never connect cells on opposite sides of the source foil (default: false)
    pub separate_sides: bool,

    /// Add the elevation kink to joint and broken-line chi2 (default: true)
    pub use_theta_kink: bool,
}

impl Default for CatConfig {
    fn default() -> Self {
        Self {
            ratio: 10000.0,
            separation_limit: 90.0,
            quadrant_angle: 90.0,
            phi_limit: 20.0,
            theta_limit: 160.0,
            small_radius: 2.0,
            probmin: 0.0,
            nofflayers: 1,
            cell_distance: 30.0,
            max_joints: 2,
            max_alternatives: 32,
            max_search_steps: 200_000,
            time_budget: None,
            parallel: false,
            separate_sides: false,
            use_theta_kink: true,
        }
    }
}

impl CatConfig {
    /// Check every parameter; the first offending one is reported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ratio.is_finite() || self.ratio < 1.0 {
            return Err(ConfigError::InvalidRatio(self.ratio));
        }

        for (name, value) in [
            ("separation_limit", self.separation_limit),
            ("quadrant_angle", self.quadrant_angle),
            ("phi_limit", self.phi_limit),
            ("theta_limit", self.theta_limit),
        ] {
            if !(value > 0.0 && value <= 360.0) {
                return Err(ConfigError::angle(name, value));
            }
        }

        if !self.small_radius.is_finite() || self.small_radius < 0.0 {
            return Err(ConfigError::InvalidSmallRadius(self.small_radius));
        }
        if !(0.0..1.0).contains(&self.probmin) {
            return Err(ConfigError::InvalidProbMin(self.probmin));
        }
        if !self.cell_distance.is_finite() || self.cell_distance <= 0.0 {
            return Err(ConfigError::InvalidCellDistance(self.cell_distance));
        }

        if self.nofflayers > MAX_NOFFLAYERS {
            return Err(ConfigError::InvalidNoffLayers {
                value: self.nofflayers,
                max: MAX_NOFFLAYERS,
            });
        }

        for (name, value) in [
            ("max_joints", self.max_joints),
            ("max_alternatives", self.max_alternatives),
            ("max_search_steps", self.max_search_steps),
        ] {
            if value == 0 {
                return Err(ConfigError::limit(name, value));
            }
        }

        if let Some(budget) = self.time_budget {
            if budget.is_zero() {
                return Err(ConfigError::InvalidTimeBudget(budget));
            }
        }

        Ok(())
    }
}
