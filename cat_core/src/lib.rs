//! CAT - Cellular-Automaton Tracker for wire/drift-cell detectors
//!
//! Pattern recognition for detectors where each hit is a drift circle around
//! a wire. The tracker builds local topology bottom-up and leaves the global
//! choice to the caller:
//! 1. **Couplets**: candidate tangent lines between two neighbouring cells
//! 2. **Triplets**: joints through three cells, scored by kink chi2
//! 3. **Clusters**: chains of nodes grown from track ends, with the
//!    ambiguous stretches (left/right, branches, gaps) marked as windows
//! 4. **Broken lines**: every consistent path through each window, ranked by
//!    probability
//!
//! ```ignore
//! use cat_core::{CatConfig, Clusterizer};
//!
//! let clusterizer = Clusterizer::new(CatConfig::default())?;
//! let event = clusterizer.reconstruct(&hits);
//! for candidate in &event.candidates {
//!     println!("{} cells, {} windows", candidate.cluster.len(), candidate.solutions.len());
//! }
//! ```

pub mod experimental;
pub mod probability;
pub mod cell;
pub mod line;
pub mod couplet;
pub mod joint;
pub mod triplet;
pub mod node;
pub mod cluster;
pub mod broken_line;
pub mod ambiguity;
pub mod circle;
pub mod clusterizer;
pub mod config;
pub mod budget;
pub mod diagnostics;
pub mod error;

// Re-export key types for convenience
pub use experimental::{Point3E, ValueWithError, Vector3E};
pub use cell::{Cell, CellArena, CellId, CellSet, Hit};
pub use couplet::Couplet;
pub use joint::Joint;
pub use triplet::Triplet;
pub use node::Node;
pub use cluster::{Cluster, ClusterState};
pub use broken_line::BrokenLine;
pub use ambiguity::WindowSolution;
pub use circle::Circle;
pub use clusterizer::{Adjacency, Clusterizer, EventReconstruction, EventStats, NodeGraph, TrackCandidate};
pub use config::{CatConfig, MAX_NOFFLAYERS};
pub use budget::{Clock, Deadline, SystemClock};
pub use diagnostics::{Diagnose, DiagnosticRecord};
pub use error::ConfigError;
