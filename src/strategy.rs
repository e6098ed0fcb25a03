//! # Strategy Selector
//!
//! The per-agent, per-tick decision procedure:
//!
//! 1. Age the committed strategy; drop it once its duration runs out.
//! 2. Score every neighbour in the front and rear cones by TTC, then add one
//!    virtual agent per visible group, masking that group's members.
//! 3. Without a threat inside the time horizon, seek the goal.
//! 4. Otherwise classify the encounter, keep or commit a strategy from the
//!    proposed set, run it through the behaviour library and clamp the result
//!    to the preferred speed.
//!
//! Commitment is sticky: a strategy outside the new proposed set is kept
//! until its duration expires, and a fresh pick is random among the
//! proposals so two symmetric agents do not deadlock.

use crate::agent::{Agent, AgentSnapshot, Body, Obstacle, TurnBias, VirtualAgentPool};
use crate::behaviours::{anticipatory_force, change_direction, decelerate, follow, seek, ForceTarget};
use crate::config::{GroupParams, SimulationConfig, SteeringParams};
use crate::geometry::{angle_between, bearing_angle, clamp_magnitude};
use crate::groups::{perceive_group, GroupMember};
use crate::proximity::{ground_to_world, ProximityDatabase};
use crate::structs::{Point, Vector2D};
use crate::ttc::{body_time_to_collision, TtcMap};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Relative overshoot of the preferred speed tolerated before a behaviour is
/// considered faulty.
const SPEED_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    None,
    Decelerate,
    ChangeDirection,
    Follow,
    AnticipatoryForce,
}

/// Geometry of the encounter with the most urgent threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encounter {
    Frontal,
    Static,
    /// Moving the same way, threat in front.
    RearAhead,
    /// Moving the same way, threat behind.
    RearBehind,
    Lateral,
}

/// Reference to the most urgent threat of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threat {
    Agent(usize),
    /// Slot in the virtual agent pool.
    Group(usize),
}

/// What an agent can see while stepping.
pub struct Neighborhood<'a, D> {
    /// Indexed by agent id.
    pub agents: &'a [AgentSnapshot],
    pub database: &'a D,
    pub groups: &'a [Vec<usize>],
}

/// Buffers reused across agent steps. Cleared at the start of every step.
#[derive(Debug, Default)]
pub struct StepScratch {
    pub ttc: TtcMap<usize>,
    pub group_ttc: TtcMap<usize>,
    candidates: Vec<usize>,
    members: Vec<GroupMember>,
}

impl StepScratch {
    pub fn new() -> Self {
        StepScratch::default()
    }

    pub fn clear(&mut self) {
        self.ttc.clear();
        self.group_ttc.clear();
        self.candidates.clear();
        self.members.clear();
    }
}

/// Scores every neighbour in the agent's front cone (goal direction,
/// `view_angle`, `neighbor_distance`) and rear cone (the remaining angle,
/// `personal_space`). The first cone to see a neighbour wins.
pub fn detect_neighbors<D: ProximityDatabase<usize>>(
    agent: &Agent,
    view: &Neighborhood<'_, D>,
    scratch: &mut StepScratch,
) {
    let forward = agent.goal - agent.position;
    let params = &agent.params;
    scan_cone(agent, view, params.neighbor_distance, forward, params.view_angle / 2.0, scratch);
    scan_cone(
        agent,
        view,
        params.personal_space,
        -forward,
        (360.0 - params.view_angle) / 2.0,
        scratch,
    );
}

fn scan_cone<D: ProximityDatabase<usize>>(
    agent: &Agent,
    view: &Neighborhood<'_, D>,
    radius: f64,
    forward: Vector2D,
    half_angle: f64,
    scratch: &mut StepScratch,
) {
    scratch.candidates.clear();
    view.database
        .find_neighbors(ground_to_world(agent.position), radius, &mut scratch.candidates);

    for &id in &scratch.candidates {
        if id == agent.id || scratch.ttc.contains(id) {
            continue;
        }
        let Some(other) = view.agents.get(id) else {
            continue;
        };
        if angle_between(forward, other.position - agent.position) < half_angle {
            scratch.ttc.insert_first(id, body_time_to_collision(agent, other));
        }
    }
}

/// Synthesises a virtual agent for every group visible to `agent` and
/// supersedes its members' individual threats.
pub fn detect_group_threats<D: ProximityDatabase<usize>>(
    agent: &Agent,
    view: &Neighborhood<'_, D>,
    params: &GroupParams,
    pool: &mut VirtualAgentPool,
    scratch: &mut StepScratch,
) {
    let heading = agent.goal - agent.position;

    for group in view.groups {
        if group.contains(&agent.id) {
            continue;
        }

        scratch.members.clear();
        for &id in group {
            if let (Some(ttc), Some(other)) = (scratch.ttc.get(id), view.agents.get(id)) {
                scratch.members.push(GroupMember {
                    id,
                    position: other.position,
                    velocity: other.velocity,
                    radius: other.radius,
                    ttc,
                    turn_bias: other.turn_bias,
                });
            }
        }
        if scratch.members.len() < 2 {
            continue;
        }

        let Some(perceived) =
            perceive_group(agent.position, heading, agent.params.radius, &scratch.members, params)
        else {
            continue;
        };
        let Some(slot) = pool.acquire(
            perceived.radius,
            perceived.position,
            perceived.velocity,
            perceived.turn_bias,
        ) else {
            log::warn!(
                "virtual agent pool exhausted ({} slots), agent {} ignores a group of {}",
                pool.capacity(),
                agent.id,
                group.len()
            );
            continue;
        };

        let ttc = pool
            .get(slot)
            .map_or(f64::INFINITY, |stand_in| body_time_to_collision(agent, stand_in));
        scratch.group_ttc.insert_first(slot, ttc);
        for &id in group {
            scratch.ttc.set(id, f64::INFINITY);
        }
        log::trace!(
            "agent {} perceives group {:?} as slot {} (r={:.2}, ttc={:.2})",
            agent.id,
            group,
            slot,
            perceived.radius,
            ttc
        );
    }
}

/// Lowest TTC over neighbours, then groups. A group only wins when strictly
/// more urgent.
pub fn min_threat(scratch: &StepScratch) -> Option<(Threat, f64)> {
    let neighbour = scratch.ttc.min().map(|(id, t)| (Threat::Agent(id), t));
    let group = scratch.group_ttc.min().map(|(slot, t)| (Threat::Group(slot), t));
    match (neighbour, group) {
        (Some(n), Some(g)) if g.1 < n.1 => Some(g),
        (Some(n), _) => Some(n),
        (None, g) => g,
    }
}

/// Classifies the encounter with `threat` for an agent at `position`
/// moving along `heading`.
pub fn classify(
    heading: Vector2D,
    position: Point,
    threat: &impl Body,
    params: &SteeringParams,
) -> Encounter {
    let threat_velocity = threat.velocity();
    if threat_velocity.magnitude() < params.static_speed_threshold {
        return Encounter::Static;
    }

    let velocity_angle = angle_between(heading, threat_velocity);
    if (velocity_angle - 180.0).abs() < params.collision_angle_threshold {
        Encounter::Frontal
    } else if velocity_angle.abs() < params.collision_angle_threshold {
        let bearing = bearing_angle(heading, threat.position() - position);
        if bearing <= 90.0 || bearing > 270.0 {
            Encounter::RearAhead
        } else {
            Encounter::RearBehind
        }
    } else {
        Encounter::Lateral
    }
}

/// Keeps the current strategy if proposed again or still committed;
/// otherwise picks one of `proposed` at random and rearms the duration.
pub fn commit_strategy<R: Rng + ?Sized>(agent: &mut Agent, proposed: &[Strategy], rng: &mut R) {
    debug_assert!(!proposed.is_empty(), "every encounter proposes a strategy");
    if proposed.contains(&agent.strategy) || agent.strategy != Strategy::None {
        return;
    }
    let pick = proposed[rng.gen_range(0..proposed.len())];
    agent.strategy = pick;
    agent.duration = agent.params.strategy_duration;
    log::debug!(
        "agent {} commits to {:?} for {:.2}s",
        agent.id,
        pick,
        agent.duration
    );
}

fn resolve<'a>(
    threat: Threat,
    agents: &'a [AgentSnapshot],
    pool: &'a VirtualAgentPool,
) -> Option<Obstacle<'a>> {
    match threat {
        Threat::Agent(id) => agents.get(id).map(Obstacle::Real),
        Threat::Group(slot) => pool.get(slot).map(Obstacle::Virtual),
    }
}

/// Runs one decision step and stores the new, speed-limited velocity in
/// `agent.velocity`. Returns the threat acted upon, if any.
pub fn steer<D: ProximityDatabase<usize>, R: Rng + ?Sized>(
    agent: &mut Agent,
    view: &Neighborhood<'_, D>,
    config: &SimulationConfig,
    pool: &mut VirtualAgentPool,
    scratch: &mut StepScratch,
    rng: &mut R,
) -> Option<Threat> {
    agent.duration -= config.time_step;
    if agent.duration <= 0.0 {
        if agent.strategy != Strategy::None {
            log::debug!("agent {} drops {:?}", agent.id, agent.strategy);
        }
        agent.reset_strategy();
    }

    scratch.clear();
    detect_neighbors(agent, view, scratch);
    if config.use_groups {
        detect_group_threats(agent, view, &config.grouping, pool, scratch);
    }

    let seek_velocity = seek(agent.position, agent.goal, agent.params.pref_speed);
    let urgent = min_threat(scratch).filter(|(_, ttc)| *ttc < agent.params.time_horizon);

    let (velocity, acted_on) = match urgent {
        Some((threat, ttc)) => match resolve(threat, view.agents, pool) {
            Some(obstacle) => (
                apply_strategy(agent, obstacle, ttc, seek_velocity, view.agents, pool, scratch, config, rng),
                Some(threat),
            ),
            None => (seek_velocity, None),
        },
        None => (seek_velocity, None),
    };

    agent.velocity = limit_speed(agent, velocity, seek_velocity);
    acted_on
}

#[allow(clippy::too_many_arguments)]
fn apply_strategy<R: Rng + ?Sized>(
    agent: &mut Agent,
    obstacle: Obstacle<'_>,
    min_ttc: f64,
    seek_velocity: Vector2D,
    agents: &[AgentSnapshot],
    pool: &VirtualAgentPool,
    scratch: &StepScratch,
    config: &SimulationConfig,
    rng: &mut R,
) -> Vector2D {
    let steering = &config.steering;
    let heading = if agent.velocity.is_zero() {
        seek_velocity
    } else {
        agent.velocity
    };
    let encounter = classify(heading, agent.position, &obstacle, steering);
    commit_strategy(agent, config.strategies.proposed(encounter), rng);
    log::trace!(
        "agent {} vs {} {}: {:?}, ttc {:.2}, strategy {:?}",
        agent.id,
        if obstacle.is_virtual() { "group" } else { "agent" },
        obstacle.id(),
        encounter,
        min_ttc,
        agent.strategy
    );

    let params = agent.params;
    match agent.strategy {
        Strategy::None => seek_velocity,
        Strategy::Decelerate => decelerate(min_ttc, seek_velocity, steering.deceleration_coefficient),
        Strategy::ChangeDirection => {
            let inherited = propagated_turn_bias(agent, &obstacle, encounter);
            let (velocity, turn) = change_direction(
                seek_velocity,
                obstacle.position() - agent.position,
                min_ttc,
                params.time_horizon,
                inherited,
                steering,
                rng,
            );
            agent.turn_bias = turn;
            velocity
        }
        Strategy::Follow => follow(
            params.radius,
            params.pref_speed,
            agent.position,
            seek_velocity,
            obstacle.position(),
            obstacle.velocity(),
            config.time_step,
            steering,
        ),
        Strategy::AnticipatoryForce => {
            let neighbours = scratch.ttc.iter().filter_map(|(id, ttc)| {
                agents.get(id).map(|other| ForceTarget {
                    position: other.position,
                    velocity: other.velocity,
                    ttc,
                })
            });
            let groups = scratch.group_ttc.iter().filter_map(|(slot, ttc)| {
                pool.get(slot).map(|group| ForceTarget {
                    position: group.position,
                    velocity: group.velocity,
                    ttc,
                })
            });
            agent.velocity
                + anticipatory_force(
                    agent.position,
                    agent.velocity,
                    seek_velocity,
                    params.time_horizon,
                    neighbours.chain(groups),
                    config.time_step,
                    steering,
                )
        }
    }
}

/// Side to turn to against `obstacle`.
///
/// Frontal and lateral encounters adopt the obstacle's side when it has one,
/// so two agents meeting head on pass on the same hand instead of drifting
/// the same way. When both sides are set and disagree, the lower id keeps
/// its own and the other one yields.
fn propagated_turn_bias(agent: &Agent, obstacle: &Obstacle<'_>, encounter: Encounter) -> TurnBias {
    let own = agent.turn_bias;
    if !matches!(encounter, Encounter::Frontal | Encounter::Lateral) {
        return own;
    }
    let theirs = obstacle.turn_bias();
    if !theirs.is_set() || theirs == own {
        return own;
    }
    match obstacle {
        Obstacle::Real(other) if own.is_set() && agent.id < other.id => own,
        _ => theirs,
    }
}

/// Clamps to the preferred speed. Any behaviour other than the force model
/// overshooting is a logic error.
fn limit_speed(agent: &Agent, velocity: Vector2D, fallback: Vector2D) -> Vector2D {
    let pref_speed = agent.params.pref_speed;
    if !velocity.is_finite() {
        log::warn!(
            "agent {} produced a non-finite velocity under {:?}, seeking instead",
            agent.id,
            agent.strategy
        );
        return clamp_magnitude(fallback, pref_speed);
    }

    let speed = velocity.magnitude();
    if speed <= pref_speed {
        return velocity;
    }
    if agent.strategy != Strategy::AnticipatoryForce && speed > pref_speed * (1.0 + SPEED_TOLERANCE) {
        log::warn!(
            "agent {} exceeded its preferred speed under {:?}: {:.4} > {:.4}",
            agent.id,
            agent.strategy,
            speed,
            pref_speed
        );
        debug_assert!(
            false,
            "{:?} produced speed {} above preferred speed {}",
            agent.strategy,
            speed,
            pref_speed
        );
    }
    clamp_magnitude(velocity, pref_speed)
}
