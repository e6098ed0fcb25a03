//! # Waypoints
//!
//! Goal sequences consumed by agents. An agent walks to each point in turn
//! and only counts as arrived at the last one.

use crate::structs::Point;
use std::fmt;

/// Ordered, finite, restartable sequence of goal points.
pub trait WaypointSource: fmt::Debug + Send {
    fn has_next(&self) -> bool;

    /// Next goal, or `None` once exhausted.
    fn next(&mut self) -> Option<Point>;

    /// Rewinds to the first waypoint.
    fn restart(&mut self);

    /// Number of waypoints not yet handed out.
    fn remaining(&self) -> usize;
}

/// Static list of waypoints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WaypointQueue {
    points: Vec<Point>,
    cursor: usize,
}

impl WaypointQueue {
    pub fn new(points: Vec<Point>) -> Self {
        WaypointQueue { points, cursor: 0 }
    }

    pub fn single(goal: Point) -> Self {
        WaypointQueue::new(vec![goal])
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl WaypointSource for WaypointQueue {
    fn has_next(&self) -> bool {
        self.cursor < self.points.len()
    }

    fn next(&mut self) -> Option<Point> {
        let point = self.points.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(point)
    }

    fn restart(&mut self) {
        self.cursor = 0;
    }

    fn remaining(&self) -> usize {
        self.points.len() - self.cursor
    }
}
