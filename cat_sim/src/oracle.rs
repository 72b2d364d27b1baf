//! Ground truth oracle for simulation.
//!
//! The Oracle owns the "God's eye view" of one simulated chamber:
//! - The wire grid (layers along x, rows along z, wires along y)
//! - True trajectories, straight or circular in the drift plane
//! - Hit generation with drift-radius smearing, inefficiency and noise

use cat_core::Hit;
use nalgebra::Vector2;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wire error in the drift plane.
const WIRE_ERROR: f64 = 0.1;

/// Rectangular wire grid: layer `i` sits at `x = i * pitch`, row `j` at
/// `z = j * pitch` for `-rows <= j <= rows`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorGeometry {
    pub pitch: f64,
    pub layers: usize,
    pub rows: i32,
}

impl DetectorGeometry {
    pub fn new(pitch: f64, layers: usize, rows: i32) -> Self {
        Self { pitch, layers, rows }
    }

    pub fn layer_x(&self, layer: usize) -> f64 {
        layer as f64 * self.pitch
    }

    /// Nearest row to `z`, if inside the chamber.
    pub fn row_of(&self, z: f64) -> Option<i32> {
        let row = (z / self.pitch).round();
        (row.abs() <= self.rows as f64).then_some(row as i32)
    }

    pub fn wire(&self, layer: usize, row: i32) -> Vector2<f64> {
        Vector2::new(self.layer_x(layer), row as f64 * self.pitch)
    }

    /// Half height of the chamber.
    pub fn half_height(&self) -> f64 {
        self.rows as f64 * self.pitch
    }
}

impl Default for DetectorGeometry {
    fn default() -> Self {
        Self::new(30.0, 12, 6)
    }
}

/// Trajectory projected on the drift plane, with `Vector2 = (x, z)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Trajectory {
    /// Straight line through `origin` along the unit `direction`
    Line {
        origin: Vector2<f64>,
        direction: Vector2<f64>,
    },

    /// Circle arc; `branch` is +1 for the half above the centre, -1 below
    Arc {
        center: Vector2<f64>,
        radius: f64,
        branch: f64,
    },
}

impl Trajectory {
    /// Straight line leaving `start` at `angle` from the x axis.
    pub fn line(start: Vector2<f64>, angle: f64) -> Self {
        Trajectory::Line {
            origin: start,
            direction: Vector2::new(angle.cos(), angle.sin()),
        }
    }

    /// Arc leaving `start` at `angle`, bending towards +z when `bend > 0`.
    pub fn arc(start: Vector2<f64>, angle: f64, radius: f64, bend: f64) -> Self {
        let side = bend.signum();
        let normal = Vector2::new(-angle.sin(), angle.cos());
        Trajectory::Arc {
            center: start + normal * (side * radius),
            radius,
            branch: -side,
        }
    }

    /// Height of the trajectory when it crosses the plane at `x`.
    pub fn z_at(&self, x: f64) -> Option<f64> {
        match *self {
            Trajectory::Line { origin, direction } => {
                if direction.x.abs() < f64::EPSILON {
                    return None;
                }
                Some(origin.y + (x - origin.x) * direction.y / direction.x)
            }
            Trajectory::Arc { center, radius, branch } => {
                let dx = x - center.x;
                let h2 = radius * radius - dx * dx;
                (h2 >= 0.0).then(|| center.y + branch * h2.sqrt())
            }
        }
    }

    /// Distance of closest approach to a wire.
    pub fn distance_to(&self, wire: &Vector2<f64>) -> f64 {
        match *self {
            Trajectory::Line { origin, direction } => {
                let d = wire - origin;
                (d.x * direction.y - d.y * direction.x).abs()
            }
            Trajectory::Arc { center, radius, .. } => ((wire - center).norm() - radius).abs(),
        }
    }
}

/// A ground truth track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthTrack {
    pub id: usize,
    pub trajectory: Trajectory,

    /// Coordinate along the wires at `x = 0`
    pub y0: f64,

    /// dy/dx
    pub slope: f64,
}

impl GroundTruthTrack {
    pub fn y_at(&self, x: f64) -> f64 {
        self.y0 + self.slope * x
    }
}

/// Hits of one event with their truth labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimEvent {
    pub hits: Vec<Hit>,

    /// Producing track per hit id; `None` for noise
    pub truth: Vec<Option<usize>>,

    pub tracks: Vec<GroundTruthTrack>,
}

impl SimEvent {
    /// Hit ids produced by a track.
    pub fn hits_of(&self, track: usize) -> Vec<usize> {
        self.truth
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == Some(track))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn noise_count(&self) -> usize {
        self.truth.iter().filter(|t| t.is_none()).count()
    }
}

/// The Oracle - holds ground truth and generates hits.
pub struct Oracle {
    /// Master seed
    seed: u64,

    /// RNG for smearing, inefficiency and noise
    rng: ChaCha8Rng,

    geometry: DetectorGeometry,

    /// Drift radius smearing standard deviation
    radius_noise_std: f64,

    /// Error on the coordinate along the wire
    y_error: f64,

    /// Probability of losing a hit
    inefficiency: f64,

    /// Uncorrelated hits added per event
    noise_hits: usize,

    /// Layers that never fire
    dead_layers: Vec<usize>,

    tracks: Vec<GroundTruthTrack>,
}

impl Oracle {
    pub fn new(seed: u64, geometry: DetectorGeometry) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            geometry,
            radius_noise_std: 0.2,
            y_error: 5.0,
            inefficiency: 0.0,
            noise_hits: 0,
            dead_layers: Vec::new(),
            tracks: Vec::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn geometry(&self) -> &DetectorGeometry {
        &self.geometry
    }

    pub fn radius_noise(&self) -> f64 {
        self.radius_noise_std
    }

    pub fn set_radius_noise(&mut self, std_dev: f64) {
        self.radius_noise_std = std_dev.max(0.0);
    }

    pub fn set_inefficiency(&mut self, probability: f64) {
        self.inefficiency = probability.clamp(0.0, 1.0);
    }

    pub fn set_noise_hits(&mut self, count: usize) {
        self.noise_hits = count;
    }

    pub fn set_dead_layers(&mut self, layers: Vec<usize>) {
        self.dead_layers = layers;
    }

    /// Adds a track and returns its ID.
    pub fn add_track(&mut self, trajectory: Trajectory, y0: f64, slope: f64) -> usize {
        let id = self.tracks.len();
        self.tracks.push(GroundTruthTrack {
            id,
            trajectory,
            y0,
            slope,
        });
        id
    }

    /// Adds a straight track entering at a random height within `band`
    /// (fractions of the half height) with |angle| up to `max_angle_deg`.
    pub fn add_random_line(&mut self, band: (f64, f64), max_angle_deg: f64) -> usize {
        let z0 = self.random_height(band);
        let angle = self.rng.gen_range(-max_angle_deg..=max_angle_deg).to_radians();
        let slope = self.rng.gen_range(-0.5..=0.5);
        self.add_track(Trajectory::line(Vector2::new(0.0, z0), angle), 0.0, slope)
    }

    /// Adds a circular track with a radius drawn from `radius_range`,
    /// bending up or down at random.
    pub fn add_random_arc(&mut self, band: (f64, f64), radius_range: (f64, f64)) -> usize {
        let z0 = self.random_height(band);
        let radius = self.rng.gen_range(radius_range.0..=radius_range.1);
        let bend = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        // start heading back towards the mid-plane so the arc stays inside
        let angle = -bend * self.rng.gen_range(0.0..=10.0_f64).to_radians();
        let slope = self.rng.gen_range(-0.5..=0.5);
        self.add_track(Trajectory::arc(Vector2::new(0.0, z0), angle, radius, bend), 0.0, slope)
    }

    fn random_height(&mut self, band: (f64, f64)) -> f64 {
        let h = self.geometry.half_height();
        self.rng.gen_range(band.0 * h..=band.1 * h)
    }

    pub fn tracks(&self) -> &[GroundTruthTrack] {
        &self.tracks
    }

    pub fn clear_tracks(&mut self) {
        self.tracks.clear();
    }

    /// Crosses every track with the wire grid and adds noise.
    ///
    /// Each track fires the nearest wire of each layer it crosses. A wire
    /// fired by two tracks keeps the shorter drift radius.
    pub fn generate_event(&mut self) -> SimEvent {
        let geometry = self.geometry;
        let mut fired: HashMap<(usize, i32), (f64, f64, Option<usize>)> = HashMap::new();

        let tracks = self.tracks.clone();
        for track in &tracks {
            for layer in 0..geometry.layers {
                if self.dead_layers.contains(&layer) {
                    continue;
                }
                let x = geometry.layer_x(layer);
                let Some(row) = track.trajectory.z_at(x).and_then(|z| geometry.row_of(z)) else {
                    continue;
                };
                if self.inefficiency > 0.0 && self.rng.gen_bool(self.inefficiency) {
                    continue;
                }

                let wire = geometry.wire(layer, row);
                let radius = self.smear(track.trajectory.distance_to(&wire), self.radius_noise_std);
                let y = self.smear_signed(track.y_at(x), self.y_error);
                let keep = fired.get(&(layer, row)).map_or(true, |(r, _, _)| radius < *r);
                if keep {
                    fired.insert((layer, row), (radius, y, Some(track.id)));
                }
            }
        }

        let mut added = 0;
        let free_wires = geometry.layers * (2 * geometry.rows as usize + 1) - fired.len();
        while added < self.noise_hits.min(free_wires) {
            let layer = self.rng.gen_range(0..geometry.layers);
            let row = self.rng.gen_range(-geometry.rows..=geometry.rows);
            if fired.contains_key(&(layer, row)) {
                continue;
            }
            let radius = self.rng.gen_range(0.0..geometry.pitch / 2.0);
            let y = self.rng.gen_range(-100.0..100.0);
            fired.insert((layer, row), (radius, y, None));
            added += 1;
        }

        // HashMap order is not reproducible; sort wires, then shuffle with
        // the seeded RNG so hit ids carry no geometric order
        let mut wires: Vec<_> = fired.into_iter().collect();
        wires.sort_by_key(|((layer, row), _)| (*layer, *row));
        wires.shuffle(&mut self.rng);

        let mut event = SimEvent {
            tracks,
            ..SimEvent::default()
        };
        for (id, ((layer, row), (radius, y, truth))) in wires.into_iter().enumerate() {
            let wire = geometry.wire(layer, row);
            event.hits.push(Hit {
                id,
                position: [wire.x, y, wire.y],
                position_error: [WIRE_ERROR, self.y_error, WIRE_ERROR],
                radius,
                radius_error: self.radius_noise_std.max(0.05),
                fast: true,
            });
            event.truth.push(truth);
        }
        event
    }

    fn smear(&mut self, value: f64, std_dev: f64) -> f64 {
        self.smear_signed(value, std_dev).max(0.0)
    }

    fn smear_signed(&mut self, value: f64, std_dev: f64) -> f64 {
        match Normal::new(0.0, std_dev) {
            Ok(normal) if std_dev > 0.0 => value + normal.sample(&mut self.rng),
            _ => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn quiet_oracle(seed: u64) -> Oracle {
        let mut oracle = Oracle::new(seed, DetectorGeometry::default());
        oracle.set_radius_noise(0.0);
        oracle
    }

    #[test]
    fn test_straight_track_fires_every_layer() {
        let mut oracle = quiet_oracle(42);
        let id = oracle.add_track(Trajectory::line(Vector2::new(0.0, 9.0), 0.0), 0.0, 0.0);
        let event = oracle.generate_event();

        assert_eq!(event.hits.len(), 12);
        assert_eq!(event.hits_of(id).len(), 12);
        for hit in &event.hits {
            assert_eq!(hit.position[2], 0.0);
            assert!((hit.radius - 9.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_arc_passes_through_start() {
        for bend in [1.0, -1.0] {
            let arc = Trajectory::arc(Vector2::new(0.0, 20.0), 0.1, 500.0, bend);
            assert!((arc.z_at(0.0).unwrap() - 20.0).abs() < 1e-9);
            assert!(arc.distance_to(&Vector2::new(0.0, 20.0)) < 1e-9);
        }
        let up = Trajectory::arc(Vector2::new(0.0, 0.0), 0.0, 500.0, 1.0);
        assert!(up.z_at(100.0).unwrap() > 0.0);
        assert!(up.z_at(1000.0).is_none());
    }

    #[test]
    fn test_line_distance() {
        let line = Trajectory::line(Vector2::new(0.0, 0.0), 45.0_f64.to_radians());
        let d = line.distance_to(&Vector2::new(30.0, 0.0));
        assert!((d - 30.0 / 2.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_full_inefficiency_and_dead_layers() {
        let mut oracle = quiet_oracle(1);
        oracle.add_track(Trajectory::line(Vector2::new(0.0, 5.0), 0.0), 0.0, 0.0);
        oracle.set_dead_layers(vec![3, 4]);
        assert_eq!(oracle.generate_event().hits.len(), 10);

        oracle.set_inefficiency(1.0);
        assert!(oracle.generate_event().hits.is_empty());
    }

    #[test]
    fn test_noise_hits_are_unlabelled() {
        let mut oracle = quiet_oracle(3);
        oracle.add_track(Trajectory::line(Vector2::new(0.0, 5.0), 0.0), 0.0, 0.0);
        oracle.set_noise_hits(7);
        let event = oracle.generate_event();
        assert_eq!(event.hits.len(), 19);
        assert_eq!(event.noise_count(), 7);
        for (id, hit) in event.hits.iter().enumerate() {
            assert_eq!(hit.id, id);
        }
    }

    proptest! {
        #[test]
        fn test_arc_starts_at_its_start(
            z0 in -150.0..150.0f64,
            angle in -0.5..0.5f64,
            radius in 200.0..5000.0f64,
            up in any::<bool>(),
        ) {
            let bend = if up { 1.0 } else { -1.0 };
            let arc = Trajectory::arc(Vector2::new(0.0, z0), angle, radius, bend);
            prop_assert!((arc.z_at(0.0).unwrap() - z0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_deterministic_events() {
        let make = || {
            let mut oracle = Oracle::new(42, DetectorGeometry::default());
            oracle.add_random_line((-0.5, 0.5), 15.0);
            oracle.set_noise_hits(5);
            oracle.generate_event()
        };
        let (e1, e2) = (make(), make());
        assert_eq!(e1.hits, e2.hits);
        assert_eq!(e1.truth, e2.truth);
    }
}
