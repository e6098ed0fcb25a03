//! # Behaviour Library
//!
//! Candidate-velocity functions, one per avoidance strategy. All state comes
//! in through arguments; the tuned constants come from [`SteeringParams`].

use crate::agent::TurnBias;
use crate::config::SteeringParams;
use crate::geometry::{bearing_angle, rotate};
use crate::structs::{Point, Vector2D};
use rand::Rng;

/// Preferred-speed velocity straight at the goal.
pub fn seek(position: Point, goal: Point, pref_speed: f64) -> Vector2D {
    (goal - position).normalize() * pref_speed
}

/// Brakes harder the closer the collision is. The scale factor stays in
/// `[0, 1)` and grows monotonically with `ttc`.
pub fn decelerate(ttc: f64, velocity: Vector2D, coefficient: f64) -> Vector2D {
    let decay = (-coefficient * ttc * ttc).exp();
    velocity * (1.0 - decay)
}

/// Rotates `velocity` away from the threat along `dir_to_threat`.
///
/// `inherited` is honoured when set; otherwise the side is derived from the
/// bearing of the threat, with a coin flip when the threat sits dead ahead,
/// dead behind, or exactly on the heading. The turn weight (degrees) grows as
/// `ttc` shrinks. Returns the rotated velocity and the side used.
pub fn change_direction<R: Rng + ?Sized>(
    velocity: Vector2D,
    dir_to_threat: Vector2D,
    ttc: f64,
    time_horizon: f64,
    inherited: TurnBias,
    params: &SteeringParams,
    rng: &mut R,
) -> (Vector2D, TurnBias) {
    let turn = if inherited.is_set() {
        inherited
    } else {
        let bearing = bearing_angle(velocity, dir_to_threat);
        let eps = params.bearing_epsilon;
        let ambiguous = bearing.abs() < eps
            || (bearing - 180.0).abs() < eps
            || (bearing - 360.0).abs() < eps;
        if ambiguous {
            if rng.gen_bool(0.5) {
                TurnBias::CounterClockwise
            } else {
                TurnBias::Clockwise
            }
        } else if bearing < 180.0 {
            TurnBias::CounterClockwise
        } else {
            TurnBias::Clockwise
        }
    };

    let weight = (params.turn_weight_numerator + time_horizon - ttc)
        / (ttc * ttc + params.turn_weight_offset);
    (rotate(velocity, turn.sign() * weight), turn)
}

/// Matches pace with a leader ahead.
///
/// Projects the leader one step ahead, measures the gap along our own
/// heading and picks the speed that closes it (minus contact and personal
/// distance) within the reaction time, bounded to `[follow_min_speed,
/// pref_speed]`.
#[allow(clippy::too_many_arguments)]
pub fn follow(
    radius: f64,
    pref_speed: f64,
    pos_a: Point,
    vel_a: Vector2D,
    pos_b: Point,
    vel_b: Vector2D,
    dt: f64,
    params: &SteeringParams,
) -> Vector2D {
    let leader_next = pos_b + vel_b * dt;
    let heading = vel_a.normalize();
    let gap = heading.dot(&(leader_next - pos_a));
    let following_distance = radius + params.follow_personal_distance;
    let speed = (gap - following_distance) / (dt + params.follow_reaction_time);
    heading * speed.max(params.follow_min_speed).min(pref_speed)
}

/// A threat seen by the force model: position, velocity and TTC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceTarget {
    pub position: Point,
    pub velocity: Vector2D,
    pub ttc: f64,
}

/// Velocity change from a goal spring plus one repulsion per threat with a
/// finite TTC, integrated over `dt`.
pub fn anticipatory_force(
    position: Point,
    velocity: Vector2D,
    goal_velocity: Vector2D,
    time_horizon: f64,
    targets: impl IntoIterator<Item = ForceTarget>,
    dt: f64,
    params: &SteeringParams,
) -> Vector2D {
    let mut acceleration = (goal_velocity - velocity) * params.goal_spring;

    for target in targets {
        let t = target.ttc;
        if !t.is_finite() {
            continue;
        }
        // relative position at the predicted moment of contact
        let avoid = ((position + velocity * t) - (target.position + target.velocity * t)).normalize();
        let magnitude = if (0.0..=time_horizon).contains(&t) {
            (params.force_numerator + time_horizon - t) / (t * t + params.force_offset)
        } else {
            0.0
        };
        acceleration += avoid * magnitude.max(0.0).min(params.max_acceleration);
    }

    acceleration * dt
}
