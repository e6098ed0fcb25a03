//! # Spatial Proximity Database
//!
//! A locational-query database mapping 3D positions to buckets of a uniform
//! grid over a bounded world volume. Clients allocate a [`Token`] for an item,
//! push the item's position whenever it moves and ask for every item inside a
//! query sphere.
//!
//! Items outside the world volume are kept in a dedicated overflow bin that is
//! only scanned when a query sphere reaches past the world bounds, so
//! positions are never rejected.
//!
//! [`BruteForceDatabase`] implements the same contract with a linear scan and
//! serves as the oracle the grid is tested against.

use crate::error::SimulationError;
use crate::structs::Point;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Lifts a ground-plane point into world space (`x`, `0`, `y`).
pub fn ground_to_world(p: Point) -> Point3<f64> {
    Point3::new(p.x, 0.0, p.y)
}

/// Handle to an item stored in a proximity database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(usize);

/// Common contract of proximity databases.
pub trait ProximityDatabase<T: Copy> {
    /// Registers `item`. It takes part in queries once it has a position.
    fn allocate(&mut self, item: T) -> Token;

    /// Records the new position of the item behind `token`.
    fn update_for_position(&mut self, token: Token, position: Point3<f64>);

    /// Removes the item behind `token`, returning it if the token was live.
    fn remove(&mut self, token: Token) -> Option<T>;

    /// Appends every positioned item strictly closer than `radius` to
    /// `center` onto `results`.
    fn find_neighbors(&self, center: Point3<f64>, radius: f64, results: &mut Vec<T>);

    /// Number of live tokens.
    fn population(&self) -> usize;
}

/// World volume covered by the grid and its subdivision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldBounds {
    pub center: [f64; 3],
    pub dimensions: [f64; 3],
    pub divisions: [usize; 3],
}

impl Default for WorldBounds {
    fn default() -> Self {
        WorldBounds {
            center: [0.0, 0.0, 0.0],
            dimensions: [500.0, 0.0, 500.0],
            divisions: [50, 1, 50],
        }
    }
}

impl WorldBounds {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.divisions.iter().any(|&d| d == 0) {
            return Err(SimulationError::InvalidConfig(
                "world divisions must be at least 1 per axis",
            ));
        }
        if self
            .dimensions
            .iter()
            .chain(self.center.iter())
            .any(|v| !v.is_finite())
        {
            return Err(SimulationError::InvalidConfig(
                "world bounds must be finite",
            ));
        }
        if self.dimensions.iter().any(|&d| d < 0.0) {
            return Err(SimulationError::InvalidConfig(
                "world dimensions must not be negative",
            ));
        }
        if self.ground_area() <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "world must have a positive ground area",
            ));
        }
        Ok(())
    }

    /// Area of the x/z ground rectangle.
    pub fn ground_area(&self) -> f64 {
        self.dimensions[0] * self.dimensions[2]
    }
}

#[derive(Debug, Clone)]
struct GridSlot<T> {
    item: T,
    position: Option<Point3<f64>>,
    bin: Option<usize>,
    index_in_bin: usize,
}

/// Uniform grid over a bounded volume with an overflow bin for everything
/// outside it.
#[derive(Debug, Clone)]
pub struct LocationGrid<T> {
    origin: Point3<f64>,
    size: Vector3<f64>,
    divisions: [usize; 3],
    bins: Vec<Vec<Token>>,
    slots: Vec<Option<GridSlot<T>>>,
    free: Vec<usize>,
    live: usize,
}

impl<T: Copy> LocationGrid<T> {
    pub fn new(bounds: &WorldBounds) -> Result<Self, SimulationError> {
        bounds.validate()?;
        let size = Vector3::from(bounds.dimensions);
        let origin = Point3::from(bounds.center) - size * 0.5;
        let cell_count: usize = bounds.divisions.iter().product();

        Ok(LocationGrid {
            origin,
            size,
            divisions: bounds.divisions,
            // one extra bin for out-of-bounds items
            bins: vec![Vec::new(); cell_count + 1],
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        })
    }

    fn outside_bin(&self) -> usize {
        self.bins.len() - 1
    }

    fn axis_index(&self, axis: usize, coordinate: f64) -> Option<usize> {
        let size = self.size[axis];
        if size <= 0.0 {
            return Some(0);
        }
        let offset = coordinate - self.origin[axis];
        if offset < 0.0 || offset >= size {
            return None;
        }
        let cells = self.divisions[axis];
        Some(((offset / size * cells as f64) as usize).min(cells - 1))
    }

    fn clamped_axis_index(&self, axis: usize, coordinate: f64) -> usize {
        let size = self.size[axis];
        if size <= 0.0 {
            return 0;
        }
        let cells = self.divisions[axis];
        let offset = ((coordinate - self.origin[axis]) / size * cells as f64).floor();
        offset.clamp(0.0, (cells - 1) as f64) as usize
    }

    fn bin_index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (ix * self.divisions[1] + iy) * self.divisions[2] + iz
    }

    fn bin_for(&self, p: &Point3<f64>) -> usize {
        match (
            self.axis_index(0, p.x),
            self.axis_index(1, p.y),
            self.axis_index(2, p.z),
        ) {
            (Some(ix), Some(iy), Some(iz)) => self.bin_index(ix, iy, iz),
            _ => self.outside_bin(),
        }
    }

    fn detach(&mut self, token: Token) {
        let Some(slot) = self.slots[token.0].as_mut() else {
            return;
        };
        let Some(bin) = slot.bin.take() else {
            return;
        };
        let index = slot.index_in_bin;
        let members = &mut self.bins[bin];
        members.swap_remove(index);
        if let Some(&moved) = members.get(index) {
            if let Some(moved_slot) = self.slots[moved.0].as_mut() {
                moved_slot.index_in_bin = index;
            }
        }
    }

    fn attach(&mut self, token: Token, bin: usize) {
        let index = self.bins[bin].len();
        self.bins[bin].push(token);
        if let Some(slot) = self.slots[token.0].as_mut() {
            slot.bin = Some(bin);
            slot.index_in_bin = index;
        }
    }

    fn scan_bin(&self, bin: usize, center: &Point3<f64>, radius_sq: f64, results: &mut Vec<T>) {
        for token in &self.bins[bin] {
            if let Some(GridSlot {
                item,
                position: Some(position),
                ..
            }) = &self.slots[token.0]
            {
                if (position - center).norm_squared() < radius_sq {
                    results.push(*item);
                }
            }
        }
    }
}

impl<T: Copy> ProximityDatabase<T> for LocationGrid<T> {
    fn allocate(&mut self, item: T) -> Token {
        let slot = GridSlot {
            item,
            position: None,
            bin: None,
            index_in_bin: 0,
        };
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                Token(index)
            }
            None => {
                self.slots.push(Some(slot));
                Token(self.slots.len() - 1)
            }
        }
    }

    fn update_for_position(&mut self, token: Token, position: Point3<f64>) {
        let new_bin = self.bin_for(&position);
        let Some(slot) = self.slots.get_mut(token.0).and_then(Option::as_mut) else {
            return;
        };
        slot.position = Some(position);
        if slot.bin == Some(new_bin) {
            return;
        }
        self.detach(token);
        self.attach(token, new_bin);
    }

    fn remove(&mut self, token: Token) -> Option<T> {
        if self.slots.get(token.0).map_or(true, Option::is_none) {
            return None;
        }
        self.detach(token);
        let slot = self.slots[token.0].take()?;
        self.free.push(token.0);
        self.live -= 1;
        Some(slot.item)
    }

    fn find_neighbors(&self, center: Point3<f64>, radius: f64, results: &mut Vec<T>) {
        if radius <= 0.0 {
            return;
        }
        let radius_sq = radius * radius;
        let min = center - Vector3::repeat(radius);
        let max = center + Vector3::repeat(radius);

        let mut reaches_outside = false;
        let mut disjoint = false;
        for axis in 0..3 {
            if self.size[axis] <= 0.0 {
                continue;
            }
            let lo = self.origin[axis];
            let hi = lo + self.size[axis];
            reaches_outside |= min[axis] < lo || max[axis] >= hi;
            disjoint |= max[axis] < lo || min[axis] >= hi;
        }

        if !disjoint {
            let (x0, x1) = (self.clamped_axis_index(0, min.x), self.clamped_axis_index(0, max.x));
            let (y0, y1) = (self.clamped_axis_index(1, min.y), self.clamped_axis_index(1, max.y));
            let (z0, z1) = (self.clamped_axis_index(2, min.z), self.clamped_axis_index(2, max.z));
            for ix in x0..=x1 {
                for iy in y0..=y1 {
                    for iz in z0..=z1 {
                        self.scan_bin(self.bin_index(ix, iy, iz), &center, radius_sq, results);
                    }
                }
            }
        }

        if reaches_outside {
            self.scan_bin(self.outside_bin(), &center, radius_sq, results);
        }
    }

    fn population(&self) -> usize {
        self.live
    }
}

/// Linear-scan database with the same observable behaviour as
/// [`LocationGrid`].
#[derive(Debug, Clone, Default)]
pub struct BruteForceDatabase<T> {
    slots: Vec<Option<(T, Option<Point3<f64>>)>>,
    free: Vec<usize>,
    live: usize,
}

impl<T: Copy> BruteForceDatabase<T> {
    pub fn new() -> Self {
        BruteForceDatabase {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T: Copy> ProximityDatabase<T> for BruteForceDatabase<T> {
    fn allocate(&mut self, item: T) -> Token {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some((item, None));
                Token(index)
            }
            None => {
                self.slots.push(Some((item, None)));
                Token(self.slots.len() - 1)
            }
        }
    }

    fn update_for_position(&mut self, token: Token, position: Point3<f64>) {
        if let Some(Some((_, stored))) = self.slots.get_mut(token.0) {
            *stored = Some(position);
        }
    }

    fn remove(&mut self, token: Token) -> Option<T> {
        let (item, _) = self.slots.get_mut(token.0)?.take()?;
        self.free.push(token.0);
        self.live -= 1;
        Some(item)
    }

    fn find_neighbors(&self, center: Point3<f64>, radius: f64, results: &mut Vec<T>) {
        let radius_sq = radius * radius;
        for (item, position) in self.slots.iter().flatten() {
            if let Some(position) = position {
                if (position - center).norm_squared() < radius_sq {
                    results.push(*item);
                }
            }
        }
    }

    fn population(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn small_bounds() -> WorldBounds {
        WorldBounds {
            center: [0.0, 0.0, 0.0],
            dimensions: [100.0, 0.0, 100.0],
            divisions: [10, 1, 10],
        }
    }

    fn sorted(mut v: Vec<usize>) -> Vec<usize> {
        v.sort_unstable();
        v
    }

    // ==================== Grid Tests ====================

    #[test]
    fn test_grid_finds_neighbors_in_known_layout() {
        let mut grid = LocationGrid::new(&small_bounds()).unwrap();
        let positions = [(1.0, 1.0), (1.5, 1.2), (30.0, 30.0), (2.7, 1.1)];
        for (id, (x, z)) in positions.iter().enumerate() {
            let token = grid.allocate(id);
            grid.update_for_position(token, Point3::new(*x, 0.0, *z));
        }

        let mut found = Vec::new();
        grid.find_neighbors(Point3::new(1.0, 0.0, 1.0), 2.0, &mut found);
        assert_eq!(sorted(found), vec![0, 1, 3]);
        assert_eq!(grid.population(), 4);
    }

    #[test]
    fn test_grid_checks_across_cell_boundaries() {
        let mut grid = LocationGrid::new(&small_bounds()).unwrap();
        // 9.9 and 10.1 live in different cells (cell size 10)
        let a = grid.allocate(0usize);
        grid.update_for_position(a, Point3::new(9.9, 0.0, 5.0));
        let b = grid.allocate(1usize);
        grid.update_for_position(b, Point3::new(10.1, 0.0, 5.0));

        let mut found = Vec::new();
        grid.find_neighbors(Point3::new(9.9, 0.0, 5.0), 0.5, &mut found);
        assert_eq!(sorted(found), vec![0, 1]);
    }

    #[test]
    fn test_grid_radius_is_strict() {
        let mut grid = LocationGrid::new(&small_bounds()).unwrap();
        let t = grid.allocate(7usize);
        grid.update_for_position(t, Point3::new(3.0, 0.0, 0.0));
        let mut found = Vec::new();
        grid.find_neighbors(Point3::new(0.0, 0.0, 0.0), 3.0, &mut found);
        assert!(found.is_empty(), "An item exactly on the query radius is excluded");
    }

    #[test]
    fn test_grid_update_moves_between_cells() {
        let mut grid = LocationGrid::new(&small_bounds()).unwrap();
        let tokens: Vec<Token> = (0..3usize).map(|id| grid.allocate(id)).collect();
        for t in &tokens {
            grid.update_for_position(*t, Point3::new(-40.0, 0.0, -40.0));
        }
        // Move the first item away; the swap-removed slot must stay consistent
        grid.update_for_position(tokens[0], Point3::new(40.0, 0.0, 40.0));
        grid.update_for_position(tokens[2], Point3::new(40.5, 0.0, 40.0));

        let mut near_origin_corner = Vec::new();
        grid.find_neighbors(Point3::new(-40.0, 0.0, -40.0), 1.0, &mut near_origin_corner);
        assert_eq!(near_origin_corner, vec![1]);

        let mut far_corner = Vec::new();
        grid.find_neighbors(Point3::new(40.0, 0.0, 40.0), 1.0, &mut far_corner);
        assert_eq!(sorted(far_corner), vec![0, 2]);
    }

    #[test]
    fn test_grid_out_of_bounds_items_are_found() {
        let mut grid = LocationGrid::new(&small_bounds()).unwrap();
        let inside = grid.allocate(0usize);
        grid.update_for_position(inside, Point3::new(49.5, 0.0, 0.0));
        let outside = grid.allocate(1usize);
        grid.update_for_position(outside, Point3::new(51.0, 0.0, 0.0));

        let mut found = Vec::new();
        grid.find_neighbors(Point3::new(50.0, 0.0, 0.0), 2.0, &mut found);
        assert_eq!(sorted(found), vec![0, 1]);

        let mut far = Vec::new();
        grid.find_neighbors(Point3::new(300.0, 0.0, 0.0), 250.5, &mut far);
        assert_eq!(far, vec![1], "Only the overflow item is within reach");
    }

    #[test]
    fn test_grid_remove_and_reuse_token() {
        let mut grid = LocationGrid::new(&small_bounds()).unwrap();
        let a = grid.allocate(0usize);
        let b = grid.allocate(1usize);
        grid.update_for_position(a, Point3::new(0.0, 0.0, 0.0));
        grid.update_for_position(b, Point3::new(0.5, 0.0, 0.0));

        assert_eq!(grid.remove(a), Some(0));
        assert_eq!(grid.remove(a), None, "Double remove is a no-op");
        assert_eq!(grid.population(), 1);

        let mut found = Vec::new();
        grid.find_neighbors(Point3::new(0.0, 0.0, 0.0), 1.0, &mut found);
        assert_eq!(found, vec![1]);

        let c = grid.allocate(2usize);
        assert_eq!(c, a, "Freed slots are recycled");
    }

    #[test]
    fn test_grid_rejects_zero_divisions() {
        let bounds = WorldBounds {
            divisions: [0, 1, 10],
            ..small_bounds()
        };
        assert!(LocationGrid::<usize>::new(&bounds).is_err());
    }

    // ==================== Equivalence Tests ====================

    #[test]
    fn test_grid_matches_brute_force_on_random_layouts() {
        let mut rng = StdRng::seed_from_u64(7);
        for _round in 0..20 {
            let mut grid = LocationGrid::new(&small_bounds()).unwrap();
            let mut brute = BruteForceDatabase::new();
            let mut tokens = Vec::new();

            for id in 0..200usize {
                // Some items land outside the 100x100 world on purpose
                let p = Point3::new(rng.gen_range(-60.0..60.0), 0.0, rng.gen_range(-60.0..60.0));
                let tg = grid.allocate(id);
                let tb = brute.allocate(id);
                grid.update_for_position(tg, p);
                brute.update_for_position(tb, p);
                tokens.push((tg, tb));
            }

            // Shuffle a third of them around to exercise bin moves
            for (tg, tb) in tokens.iter().step_by(3) {
                let p = Point3::new(rng.gen_range(-60.0..60.0), 0.0, rng.gen_range(-60.0..60.0));
                grid.update_for_position(*tg, p);
                brute.update_for_position(*tb, p);
            }

            for _query in 0..25 {
                let center =
                    Point3::new(rng.gen_range(-70.0..70.0), 0.0, rng.gen_range(-70.0..70.0));
                let radius = rng.gen_range(0.5..25.0);
                let mut from_grid = Vec::new();
                let mut from_brute = Vec::new();
                grid.find_neighbors(center, radius, &mut from_grid);
                brute.find_neighbors(center, radius, &mut from_brute);
                assert_eq!(
                    sorted(from_grid),
                    sorted(from_brute),
                    "Grid and brute force disagree at {:?} r={}",
                    center,
                    radius
                );
            }
            assert_eq!(grid.population(), brute.population());
        }
    }

    #[test]
    fn test_ground_to_world_maps_y_to_z() {
        let p = ground_to_world(Point::new(2.0, -3.0));
        assert_eq!(p, Point3::new(2.0, 0.0, -3.0));
    }
}
