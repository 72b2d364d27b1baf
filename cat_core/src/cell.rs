//! Cells: one detector hit seen as a drift circle around a wire.
//!
//! Cells live in a flat, read-only [`CellArena`] for the duration of an
//! event. Nothing mutates a cell once the arena is built; ownership during
//! cluster growth is tracked per candidate in a [`CellSet`] over arena slots.

use crate::experimental::{angle_difference, Point3E, ValueWithError, Vector3E};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Identifier assigned by the hit producer.
pub type CellId = usize;

/// A vertical error above this value means the wire coordinate is unknown.
const UNKNOWN_VERTICAL_ERROR: f64 = 1000.0;

// ============================================================================
// INPUT RECORD
// ============================================================================

/// One calibrated hit as delivered by the geometry/calibration stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: CellId,

    /// Wire position [x, y, z]; `y` runs along the wire
    pub position: [f64; 3],

    /// Gaussian errors on `position`
    pub position_error: [f64; 3],

    /// Drift radius (distance of closest approach to the wire)
    pub radius: f64,

    pub radius_error: f64,

    /// Prompt hit (false for delayed hits)
    #[serde(default = "default_fast")]
    pub fast: bool,
}

fn default_fast() -> bool {
    true
}

// ============================================================================
// CELL
// ============================================================================

/// A drift circle: wire position, drift radius and their errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cell {
    id: CellId,
    center: Point3E,
    radius: ValueWithError,
    fast: bool,
    small: bool,
}

impl Cell {
    /// Create a cell. Radii up to `small_radius` make a "small" cell that
    /// is treated as a point; a small prompt cell gets its radius error
    /// widened to cover the whole radius.
    pub fn new(
        id: CellId,
        center: Point3E,
        radius: ValueWithError,
        fast: bool,
        small_radius: f64,
    ) -> Self {
        let small = radius.value <= small_radius;
        let radius = if small && fast {
            radius.with_error(radius.value.max(radius.error))
        } else {
            radius
        };

        Self {
            id,
            center,
            radius,
            fast,
            small,
        }
    }

    pub fn from_hit(hit: &Hit, small_radius: f64) -> Self {
        Self::new(
            hit.id,
            Point3E::from_arrays(hit.position, hit.position_error),
            ValueWithError::new(hit.radius, hit.radius_error),
            hit.fast,
            small_radius,
        )
    }

    #[inline]
    pub fn id(&self) -> CellId {
        self.id
    }

    #[inline]
    pub fn center(&self) -> &Point3E {
        &self.center
    }

    #[inline]
    pub fn radius(&self) -> ValueWithError {
        self.radius
    }

    #[inline]
    pub fn is_fast(&self) -> bool {
        self.fast
    }

    #[inline]
    pub fn is_small(&self) -> bool {
        self.small
    }

    /// The wire coordinate was not measured.
    pub fn unknown_vertical(&self) -> bool {
        self.center.y.value == 0.0 && self.center.y.error > UNKNOWN_VERTICAL_ERROR
    }

    /// Side of the source foil (sign of z).
    pub fn side(&self) -> i8 {
        if self.center.z.value > 0.0 {
            1
        } else {
            -1
        }
    }

    /// The centre as a point whose drift-plane error is the radius error.
    /// This is how small cells enter tangent and joint construction.
    pub fn as_point(&self) -> Point3E {
        self.center.with_hor_error(self.radius.error)
    }

    /// True when the two drift circles overlap in the drift plane.
    pub fn intersect(&self, other: &Cell) -> bool {
        let distance = self.center.hor_distance(&other.center).value;
        distance < self.radius.value + other.radius.value
    }

    /// Azimuth of `p` seen from the cell centre.
    pub fn radial_phi(&self, p: &Point3E) -> ValueWithError {
        Vector3E::between(&self.center, p).phi()
    }

    /// True when `p` and `q` lie in the same angular sector of the circle,
    /// i.e. their radial directions differ by less than half of
    /// `quadrant_angle` (degrees). A small cell has a single sector.
    pub fn same_quadrant(&self, p: &Point3E, q: &Point3E, quadrant_angle: f64) -> bool {
        if self.small {
            return true;
        }
        let delta = angle_difference(self.radial_phi(p), self.radial_phi(q));
        delta.value.abs().to_degrees() < quadrant_angle / 2.0
    }

    /// Point on the circle at `cos` from `forward` towards `sign · transverse`.
    ///
    /// Returns an invalid point when `|cos| > 1` (no such tangent).
    pub fn build_from_cell(
        &self,
        forward: &Vector3E,
        transverse: &Vector3E,
        cos: ValueWithError,
        sign: f64,
    ) -> Point3E {
        let sin = (ValueWithError::exact(1.0) - cos.square()).sqrt();
        let direction = *forward * cos + *transverse * (sin * sign);
        self.center + direction * self.radius
    }

    /// Point on the circle half-way (in azimuth) between `pa` and `pb`,
    /// together with their propagated angular separation.
    pub fn angular_average(&self, pa: &Point3E, pb: &Point3E) -> (Point3E, ValueWithError) {
        let phi_a = self.radial_phi(pa);
        let phi_b = self.radial_phi(pb);
        let separation = angle_difference(phi_a, phi_b);
        let phi = phi_a + separation.value / 2.0;
        let phi = phi.with_error(phi_a.error.hypot(phi_b.error) / 2.0);

        let direction = Vector3E::new(phi.cos(), ValueWithError::exact(0.0), phi.sin());
        let mut point = self.center + direction * self.radius;
        point.y = pa.y.midpoint(pb.y);

        (point, separation)
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Cell {}

// ============================================================================
// ARENA
// ============================================================================

/// Flat, read-only storage of the event's cells.
#[derive(Debug, Clone, Default)]
pub struct CellArena {
    cells: Vec<Cell>,
    slots: HashMap<CellId, usize>,
}

impl CellArena {
    /// Build the arena from calibrated hits. Repeated ids keep the first hit.
    pub fn from_hits(hits: &[Hit], small_radius: f64) -> Self {
        let mut arena = Self::default();
        for hit in hits {
            if arena.slots.contains_key(&hit.id) {
                warn!("Duplicate hit id {} ignored", hit.id);
                continue;
            }
            arena.push(Cell::from_hit(hit, small_radius));
        }
        arena
    }

    pub fn from_cells(cells: impl IntoIterator<Item = Cell>) -> Self {
        let mut arena = Self::default();
        for cell in cells {
            if !arena.slots.contains_key(&cell.id()) {
                arena.push(cell);
            }
        }
        arena
    }

    fn push(&mut self, cell: Cell) {
        self.slots.insert(cell.id(), self.cells.len());
        self.cells.push(cell);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn get(&self, slot: usize) -> Option<&Cell> {
        self.cells.get(slot)
    }

    /// Arena slot of the cell with the given id.
    pub fn slot_of(&self, id: CellId) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    pub fn by_id(&self, id: CellId) -> Option<&Cell> {
        self.slot_of(id).and_then(|slot| self.cells.get(slot))
    }
}

// ============================================================================
// OWNERSHIP SET
// ============================================================================

/// Bitset over arena slots, one per in-progress candidate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CellSet {
    words: Vec<u64>,
}

impl CellSet {
    pub fn with_capacity(slots: usize) -> Self {
        Self {
            words: vec![0; slots.div_ceil(64)],
        }
    }

    /// Insert a slot; returns true if it was not present.
    pub fn insert(&mut self, slot: usize) -> bool {
        let (word, bit) = (slot / 64, slot % 64);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << bit;
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    pub fn remove(&mut self, slot: usize) {
        if let Some(word) = self.words.get_mut(slot / 64) {
            *word &= !(1u64 << (slot % 64));
        }
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.words
            .get(slot / 64)
            .map(|word| word & (1u64 << (slot % 64)) != 0)
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn union_with(&mut self, other: &CellSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            *mine |= theirs;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, word)| {
            (0..64).filter_map(move |bit| (word & (1u64 << bit) != 0).then_some(w * 64 + bit))
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cell(id: CellId, x: f64, z: f64, r: f64) -> Cell {
        Cell::new(
            id,
            Point3E::from_arrays([x, 0.0, z], [0.1, 1.0, 0.1]),
            ValueWithError::new(r, 0.1),
            true,
            2.0,
        )
    }

    #[test]
    fn test_equality_by_id_only() {
        assert_eq!(cell(1, 0.0, 0.0, 5.0), cell(1, 10.0, 10.0, 3.0));
        assert_ne!(cell(1, 0.0, 0.0, 5.0), cell(2, 0.0, 0.0, 5.0));
    }

    #[test]
    fn test_small_fast_cell_radius_error_inflated() {
        let c = cell(1, 0.0, 0.0, 1.5);
        assert!(c.is_small());
        assert_relative_eq!(c.radius().error, 1.5);
        let big = cell(2, 0.0, 0.0, 8.0);
        assert!(!big.is_small());
        assert_relative_eq!(big.radius().error, 0.1);
    }

    #[test]
    fn test_unknown_vertical() {
        let c = Cell::new(
            1,
            Point3E::from_arrays([0.0, 0.0, 0.0], [0.1, 2000.0, 0.1]),
            ValueWithError::new(5.0, 0.1),
            true,
            2.0,
        );
        assert!(c.unknown_vertical());
        assert!(!cell(2, 0.0, 0.0, 5.0).unknown_vertical());
    }

    #[test]
    fn test_intersect() {
        let a = cell(1, 0.0, 0.0, 10.0);
        let b = cell(2, 15.0, 0.0, 10.0);
        let c = cell(3, 30.0, 0.0, 10.0);
        assert!(a.intersect(&b));
        assert!(!a.intersect(&c));
    }

    #[test]
    fn test_build_from_cell_lies_on_circle() {
        let c = cell(1, 5.0, 5.0, 10.0);
        let forward = Vector3E::exact(1.0, 0.0, 0.0);
        let transverse = Vector3E::exact(0.0, 0.0, 1.0);
        let p = c.build_from_cell(&forward, &transverse, ValueWithError::exact(0.6), 1.0);
        assert_relative_eq!(c.center().hor_distance(&p).value, 10.0, epsilon = 1e-9);
        assert_relative_eq!(p.x.value, 11.0, epsilon = 1e-9);
        assert_relative_eq!(p.z.value, 13.0, epsilon = 1e-9);

        let impossible = c.build_from_cell(&forward, &transverse, ValueWithError::exact(1.5), 1.0);
        assert!(!impossible.is_valid());
    }

    #[test]
    fn test_angular_average_and_quadrant() {
        let c = cell(1, 0.0, 0.0, 10.0);
        let pa = Point3E::from_arrays([10.0, 0.0, 0.0], [0.1, 1.0, 0.1]);
        let pb = Point3E::from_arrays([0.0, 2.0, 10.0], [0.1, 1.0, 0.1]);
        let (mid, separation) = c.angular_average(&pa, &pb);
        let s = std::f64::consts::FRAC_1_SQRT_2 * 10.0;
        assert_relative_eq!(mid.x.value, s, epsilon = 1e-9);
        assert_relative_eq!(mid.z.value, s, epsilon = 1e-9);
        assert_relative_eq!(mid.y.value, 1.0, epsilon = 1e-12);
        assert_relative_eq!(separation.value.to_degrees(), 90.0, epsilon = 1e-9);

        assert!(c.same_quadrant(&pa, &mid, 120.0));
        assert!(!c.same_quadrant(&pa, &pb, 90.0));
    }

    #[test]
    fn test_arena_skips_duplicates() {
        let hit = Hit {
            id: 7,
            position: [0.0, 0.0, 0.0],
            position_error: [0.1, 1.0, 0.1],
            radius: 5.0,
            radius_error: 0.2,
            fast: true,
        };
        let arena = CellArena::from_hits(&[hit.clone(), hit], 2.0);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.slot_of(7), Some(0));
        assert!(arena.by_id(8).is_none());
    }

    #[test]
    fn test_cell_set_operations() {
        let mut set = CellSet::with_capacity(10);
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(130));
        assert!(set.contains(130));
        assert_eq!(set.count(), 2);

        let mut other = CellSet::with_capacity(10);
        other.insert(5);
        set.union_with(&other);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 5, 130]);

        set.remove(3);
        assert!(!set.contains(3));
        assert!(!set.is_empty());
    }
}
