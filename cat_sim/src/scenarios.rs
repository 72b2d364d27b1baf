//! Reconstruction scenarios.

use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioId {
    /// CAT-001: one straight track, clean chamber
    StraightTrack,

    /// CAT-002: one curved track
    CurvedTrack,

    /// CAT-003: straight track crossing a dead layer
    MissingLayer,

    /// CAT-004: two separated tracks in the same event
    TwoTracks,

    /// CAT-005: inefficiency plus uncorrelated noise hits
    NoisyEvent,

    /// CAT-006: per-event time budget far below the work needed
    TightDeadline,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::StraightTrack,
            ScenarioId::CurvedTrack,
            ScenarioId::MissingLayer,
            ScenarioId::TwoTracks,
            ScenarioId::NoisyEvent,
            ScenarioId::TightDeadline,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::StraightTrack => "straight_track",
            ScenarioId::CurvedTrack => "curved_track",
            ScenarioId::MissingLayer => "missing_layer",
            ScenarioId::TwoTracks => "two_tracks",
            ScenarioId::NoisyEvent => "noisy_event",
            ScenarioId::TightDeadline => "tight_deadline",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::StraightTrack => "One straight track per event, no noise, full efficiency",
            ScenarioId::CurvedTrack => "One circular track per event, bending radius 1.5-3 m",
            ScenarioId::MissingLayer => "Straight track with one dead layer, bridged by gap links",
            ScenarioId::TwoTracks => "Two straight tracks in opposite halves of the chamber",
            ScenarioId::NoisyEvent => "One track, 5% inefficiency and 8 noise hits per event",
            ScenarioId::TightDeadline => "Virtual clock exhausts the budget after two checkpoints",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "straight_track" | "straighttrack" | "cat-001" => Ok(ScenarioId::StraightTrack),
            "curved_track" | "curvedtrack" | "cat-002" => Ok(ScenarioId::CurvedTrack),
            "missing_layer" | "missinglayer" | "cat-003" => Ok(ScenarioId::MissingLayer),
            "two_tracks" | "twotracks" | "cat-004" => Ok(ScenarioId::TwoTracks),
            "noisy_event" | "noisyevent" | "cat-005" => Ok(ScenarioId::NoisyEvent),
            "tight_deadline" | "tightdeadline" | "cat-006" => Ok(ScenarioId::TightDeadline),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
            assert_eq!(id.to_string(), id.name());
            assert!(!id.description().is_empty());
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("CAT-004".parse::<ScenarioId>(), Ok(ScenarioId::TwoTracks));
        assert_eq!("TightDeadline".parse::<ScenarioId>(), Ok(ScenarioId::TightDeadline));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
