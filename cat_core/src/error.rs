//! Error types for the tracker.
//!
//! Only the setup path can fail. Everything inside an event degrades to
//! dropped joints, invalid values or empty alternative lists.

use thiserror::Error;

/// Rejected configuration, raised once by `Clusterizer::new`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Acceptance ratio must be a finite number >= 1
    #[error("Invalid ratio: {0} (expected a finite value >= 1)")]
    InvalidRatio(f64),

    /// Angular limit outside (0, 360] degrees
    #[error("Invalid {name}: {value} degrees (expected 0 < value <= 360)")]
    InvalidAngle { name: &'static str, value: f64 },

    #[error("Invalid small_radius: {0} (expected a finite value >= 0)")]
    InvalidSmallRadius(f64),

    #[error("Invalid probmin: {0} (expected 0 <= probmin < 1)")]
    InvalidProbMin(f64),

    #[error("Invalid cell_distance: {0} (expected a finite value > 0)")]
    InvalidCellDistance(f64),

    #[error("Invalid nofflayers: {value} (expected at most {max})")]
    InvalidNoffLayers { value: usize, max: usize },

    /// A count limit that must be at least one
    #[error("Invalid {name}: {value} (expected at least 1)")]
    InvalidLimit { name: &'static str, value: usize },

    #[error("Invalid time budget: {0:?}")]
    InvalidTimeBudget(std::time::Duration),
}

impl ConfigError {
    /// Creates an angle error.
    pub fn angle(name: &'static str, value: f64) -> Self {
        Self::InvalidAngle { name, value }
    }

    /// Creates a limit error.
    pub fn limit(name: &'static str, value: usize) -> Self {
        Self::InvalidLimit { name, value }
    }
}
