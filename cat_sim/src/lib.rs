//! CAT Deterministic Simulation Harness
//!
//! Synthetic wire-chamber events with known truth, fed through the tracker
//! and scored. Everything is reproducible from a single 64-bit seed:
//! - **Hits**: tracks crossed with a wire grid, radii smeared from a seeded RNG
//! - **Time**: a virtual clock, so time budgets expire at fixed checkpoints
//!
//! # Usage
//!
//! ```ignore
//! use cat_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_events(50).run(ScenarioId::TwoTracks);
//! assert!(result.passed);
//! ```

mod clock;
mod oracle;
mod runner;
pub mod scenarios;

pub use clock::SimClock;
pub use oracle::{DetectorGeometry, GroundTruthTrack, Oracle, SimEvent, Trajectory};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
