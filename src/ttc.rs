//! # Time-To-Collision
//!
//! Closed-form time until two discs moving at constant velocity first touch,
//! plus the scratch map the strategy selector fills once per agent step.

use crate::agent::Body;
use crate::structs::{Point, Vector2D};
use ordered_float::OrderedFloat;

/// Time until the boundaries of disc A and disc B first touch.
///
/// Returns `0.0` when the discs already overlap and `f64::INFINITY` when
/// they never meet (diverging, parallel, or a contact in the past).
///
/// # Arguments
/// * `pos_a`, `vel_a`, `radius_a` - first disc
/// * `pos_b`, `vel_b`, `radius_b` - second disc
pub fn time_to_collision(
    pos_a: Point,
    vel_a: Vector2D,
    radius_a: f64,
    pos_b: Point,
    vel_b: Vector2D,
    radius_b: f64,
) -> f64 {
    let r = radius_a + radius_b;
    let w = pos_b - pos_a;
    let c = w.dot(&w) - r * r;
    if c < 0.0 {
        return 0.0;
    }

    let v = vel_a - vel_b;
    let a = v.dot(&v);
    let b = w.dot(&v);
    let discriminant = b * b - a * c;
    if discriminant <= 0.0 {
        return f64::INFINITY;
    }

    let tau = (b - discriminant.sqrt()) / a;
    if tau < 0.0 {
        f64::INFINITY
    } else {
        tau
    }
}

/// [`time_to_collision`] between two bodies.
pub fn body_time_to_collision(a: &impl Body, b: &impl Body) -> f64 {
    time_to_collision(
        a.position(),
        a.velocity(),
        a.radius(),
        b.position(),
        b.velocity(),
        b.radius(),
    )
}

/// Insertion-ordered id -> TTC map.
///
/// Cleared at the start of each agent step and refilled; the backing storage
/// is reused so steady-state ticks do not allocate. Ties in [`TtcMap::min`]
/// resolve to the entry inserted first.
#[derive(Debug, Clone, Default)]
pub struct TtcMap<K> {
    entries: Vec<(K, f64)>,
}

impl<K: Copy + PartialEq> TtcMap<K> {
    pub fn new() -> Self {
        TtcMap {
            entries: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: K) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    pub fn get(&self, key: K) -> Option<f64> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, t)| *t)
    }

    /// Inserts `key` unless present. Returns whether it was inserted.
    pub fn insert_first(&mut self, key: K, ttc: f64) -> bool {
        if self.contains(key) {
            return false;
        }
        self.entries.push((key, ttc));
        true
    }

    /// Overwrites the value of an existing key. Returns whether it existed.
    pub fn set(&mut self, key: K, ttc: f64) -> bool {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => {
                entry.1 = ttc;
                true
            }
            None => false,
        }
    }

    /// Entry with the smallest TTC, first inserted on ties.
    pub fn min(&self) -> Option<(K, f64)> {
        self.entries
            .iter()
            .copied()
            .min_by_key(|(_, ttc)| OrderedFloat(*ttc))
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, f64)> + '_ {
        self.entries.iter().copied()
    }
}
