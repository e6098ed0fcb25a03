//! # Groups
//!
//! Two halves:
//!
//! - **Detection**: agents that are close, move at similar speeds and head
//!   the same way are linked pairwise; groups are the transitive closure of
//!   those links, built with a disjoint-set forest.
//! - **Perception**: an observer collapses a visible group into one virtual
//!   disc bounded by the group's outermost tangent lines, so it can steer
//!   around the whole cluster instead of threading between its members.

use crate::agent::{AgentSnapshot, TurnBias};
use crate::config::GroupParams;
use crate::geometry::{angle_between, distance_to_line, line_intersection, outer_tangents, signed_angle, TangentSegment};
use crate::proximity::{ground_to_world, ProximityDatabase};
use crate::structs::{Point, Vector2D};

/// Union-find over agent ids with path halving and union by rank.
#[derive(Debug, Clone)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        DisjointSet {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Pairwise link: close together, similar speed, similar goal direction.
pub fn same_group(a: &AgentSnapshot, b: &AgentSnapshot, params: &GroupParams) -> bool {
    if a.position.distance(&b.position) >= params.same_group_distance {
        return false;
    }
    let speed_gap = (a.velocity.magnitude_squared() - b.velocity.magnitude_squared()).abs();
    if speed_gap >= params.same_group_speed * params.same_group_speed {
        return false;
    }
    let dir_a = (a.goal - a.position).normalize();
    let dir_b = (b.goal - b.position).normalize();
    angle_between(dir_a, dir_b) < params.same_group_heading
}

/// Groups of two or more unfinished agents.
///
/// `agents[i].id` must equal `i`; `database` must hold every agent under its
/// id at its snapshot position. Members are listed in ascending id order and
/// groups are ordered by their smallest member.
pub fn detect_groups<D: ProximityDatabase<usize>>(
    agents: &[AgentSnapshot],
    database: &D,
    params: &GroupParams,
) -> Vec<Vec<usize>> {
    let mut sets = DisjointSet::new(agents.len());
    let mut nearby = Vec::new();

    for a in agents.iter().filter(|a| !a.finished) {
        nearby.clear();
        database.find_neighbors(
            ground_to_world(a.position),
            params.same_group_distance,
            &mut nearby,
        );
        for &other in &nearby {
            if other <= a.id {
                continue;
            }
            let Some(b) = agents.get(other) else {
                continue;
            };
            if !b.finished && same_group(a, b, params) {
                sets.union(a.id, b.id);
            }
        }
    }

    let mut group_of_root: Vec<Option<usize>> = vec![None; agents.len()];
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for agent in agents.iter().filter(|a| !a.finished) {
        let root = sets.find(agent.id);
        match group_of_root[root] {
            Some(index) => groups[index].push(agent.id),
            None => {
                group_of_root[root] = Some(groups.len());
                groups.push(vec![agent.id]);
            }
        }
    }
    groups.retain(|group| group.len() >= 2);
    groups
}

/// A group member as seen by one observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupMember {
    pub id: usize,
    pub position: Point,
    pub velocity: Vector2D,
    pub radius: f64,
    pub ttc: f64,
    pub turn_bias: TurnBias,
}

/// Virtual disc synthesised for a visible group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupPerception {
    pub position: Point,
    pub velocity: Vector2D,
    pub radius: f64,
    pub turn_bias: TurnBias,
}

/// Collapses `members` into one virtual disc as seen from `observer`.
///
/// Only members with a finite TTC at least `min_member_distance` away take
/// part. Each contributes its two outer tangents with the observer's disc;
/// the most clockwise and most counter-clockwise of those (measured against
/// `heading` at their far ends) bound the silhouette.
///
/// Returns `None` when fewer than two members contribute, when the
/// silhouette's opening angle falls outside `[min_spread_angle,
/// max_spread_angle]`, or when the construction degenerates.
pub fn perceive_group(
    observer: Point,
    heading: Vector2D,
    radius: f64,
    members: &[GroupMember],
    params: &GroupParams,
) -> Option<GroupPerception> {
    let mut closest: Option<(f64, Point)> = None;
    let mut most_urgent: Option<&GroupMember> = None;
    let mut contributors = 0;
    let mut clockwise: Option<(f64, TangentSegment)> = None;
    let mut counter_clockwise: Option<(f64, TangentSegment)> = None;

    for member in members {
        if !member.ttc.is_finite() {
            continue;
        }
        let distance = observer.distance(&member.position);
        if distance < params.min_member_distance {
            continue;
        }

        if closest.map_or(true, |(best, _)| distance < best) {
            closest = Some((distance, member.position));
        }
        if most_urgent.map_or(true, |best| member.ttc < best.ttc) {
            most_urgent = Some(member);
        }

        let Some(tangents) = outer_tangents(observer, radius, member.position, member.radius) else {
            continue;
        };
        contributors += 1;

        for segment in tangents {
            let angle = signed_angle(heading, segment.second - observer);
            if clockwise.map_or(true, |(best, _)| angle < best) {
                clockwise = Some((angle, segment));
            }
            if counter_clockwise.map_or(true, |(best, _)| angle > best) {
                counter_clockwise = Some((angle, segment));
            }
        }
    }

    if contributors < 2 {
        log::trace!("group not perceived: {} contributing members", contributors);
        return None;
    }
    let ((_, cw), (_, ccw)) = (clockwise?, counter_clockwise?);
    let (_, closest_position) = closest?;
    let urgent = most_urgent?;

    let cw_dir = cw.second - cw.first;
    let ccw_dir = ccw.second - ccw.first;
    let spread = angle_between(cw_dir, ccw_dir);
    if spread < params.min_spread_angle || spread > params.max_spread_angle {
        log::trace!("group not perceived: silhouette spread {:.2} deg", spread);
        return None;
    }

    let edge = cw.line();
    let apex = line_intersection(&edge, &ccw.line())?;
    let bisector = (cw_dir.normalize() + ccw_dir.normalize()).normalize();
    if bisector.is_zero() {
        return None;
    }

    let position = apex + bisector * apex.distance(&closest_position);
    let virtual_radius = distance_to_line(&edge, position)?;
    if !(virtual_radius > 0.0 && virtual_radius.is_finite() && position.is_finite()) {
        return None;
    }

    Some(GroupPerception {
        position,
        velocity: urgent.velocity,
        radius: virtual_radius,
        turn_bias: urgent.turn_bias,
    })
}
