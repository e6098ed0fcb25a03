//! # Agents
//!
//! - **Agent**: a simulated pedestrian. Composes motion state, sampled
//!   per-agent parameters, strategy state and travel statistics.
//! - **AgentSnapshot**: the read-only view other agents steer against.
//! - **VirtualAgent**: a pooled disc standing in for a perceived group.
//! - **Body**: what the TTC solver and the behaviours need from either kind.

use crate::config::AgentProfile;
use crate::error::SimulationError;
use crate::proximity::Token;
use crate::recording::AgentReport;
use crate::strategy::Strategy;
use crate::structs::{Point, Vector2D};
use crate::waypoints::WaypointSource;
use rand::Rng;
use rand_distr::StandardNormal;

/// Side an agent keeps turning to while changing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnBias {
    Clockwise,
    #[default]
    Unset,
    CounterClockwise,
}

impl TurnBias {
    /// Rotation sign in the counter-clockwise-positive convention.
    pub fn sign(self) -> f64 {
        match self {
            TurnBias::Clockwise => -1.0,
            TurnBias::Unset => 0.0,
            TurnBias::CounterClockwise => 1.0,
        }
    }

    pub fn is_set(self) -> bool {
        self != TurnBias::Unset
    }
}

/// Capability shared by real and virtual agents.
pub trait Body {
    fn id(&self) -> usize;
    fn position(&self) -> Point;
    fn velocity(&self) -> Vector2D;
    fn radius(&self) -> f64;
    fn is_virtual(&self) -> bool;
}

/// Parameters sampled once per agent at spawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentParams {
    pub radius: f64,
    pub pref_speed: f64,
    pub time_horizon: f64,
    pub neighbor_distance: f64,
    pub view_angle: f64,
    pub personal_space: f64,
    /// Duration a committed strategy is held for.
    pub strategy_duration: f64,
}

impl AgentParams {
    pub fn sample<R: Rng + ?Sized>(profile: &AgentProfile, rng: &mut R) -> Self {
        let pref_speed = match profile.fixed_pref_speed {
            Some(speed) => speed,
            None => {
                let noise: f64 = rng.sample(StandardNormal);
                profile.pref_speed_base + profile.pref_speed_sigma * noise.abs()
            }
        };

        AgentParams {
            radius: profile.radius,
            pref_speed,
            time_horizon: profile.time_horizon.sample(rng),
            neighbor_distance: profile.neighbor_distance.sample(rng),
            view_angle: profile.view_angle,
            personal_space: profile.personal_space,
            strategy_duration: profile.strategy_duration.sample(rng),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TravelStats {
    pub distance: f64,
    pub kinetic_energy: f64,
    pub travel_time: Option<f64>,
}

#[derive(Debug)]
pub struct Agent {
    pub id: usize,
    pub position: Point,
    pub velocity: Vector2D,
    pub goal: Point,
    pub params: AgentParams,
    pub strategy: Strategy,
    /// Time left before the current strategy is dropped.
    pub duration: f64,
    pub turn_bias: TurnBias,
    pub travel: TravelStats,
    waypoints: Box<dyn WaypointSource>,
    token: Token,
    finished: bool,
}

impl Agent {
    /// Creates an agent heading for the first waypoint of `waypoints`.
    pub fn spawn<R: Rng + ?Sized>(
        id: usize,
        position: Point,
        mut waypoints: Box<dyn WaypointSource>,
        token: Token,
        profile: &AgentProfile,
        rng: &mut R,
    ) -> Result<Self, SimulationError> {
        let goal = waypoints
            .next()
            .ok_or(SimulationError::InvalidConfig("every agent needs at least one goal"))?;
        let params = AgentParams::sample(profile, rng);

        Ok(Agent {
            id,
            position,
            velocity: Vector2D::ZERO,
            goal,
            params,
            strategy: Strategy::None,
            duration: params.strategy_duration,
            turn_bias: TurnBias::Unset,
            travel: TravelStats::default(),
            waypoints,
            token,
            finished: false,
        })
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            position: self.position,
            velocity: self.velocity,
            radius: self.params.radius,
            goal: self.goal,
            turn_bias: self.turn_bias,
            finished: self.finished,
        }
    }

    /// Drops the current strategy and rearms its timer.
    pub fn reset_strategy(&mut self) {
        self.strategy = Strategy::None;
        self.duration = self.params.strategy_duration;
        self.turn_bias = TurnBias::Unset;
    }

    /// Skips every waypoint already within `waypoint_radius`, then reports
    /// whether the final goal lies within `goal_radius`.
    pub fn update_goal(&mut self, waypoint_radius: f64, goal_radius: f64) -> bool {
        while self.waypoints.has_next() && self.position.distance(&self.goal) < waypoint_radius {
            match self.waypoints.next() {
                Some(next) => {
                    log::trace!(
                        "agent {} advances to waypoint {} ({} left)",
                        self.id,
                        next,
                        self.waypoints.remaining()
                    );
                    self.goal = next;
                }
                None => break,
            }
        }
        !self.waypoints.has_next()
            && self.position.distance_squared(&self.goal) <= goal_radius * goal_radius
    }

    /// Moves by `velocity * dt` and accumulates the distance covered.
    pub fn integrate(&mut self, dt: f64) {
        if self.velocity.is_zero() {
            return;
        }
        let displacement = self.velocity * dt;
        self.position += displacement;
        self.travel.distance += displacement.magnitude();
    }

    pub fn sample_kinetic_energy(&mut self, mass_half: f64) {
        if !self.velocity.is_zero() {
            self.travel.kinetic_energy += mass_half * self.velocity.magnitude_squared();
        }
    }

    /// Stops the agent for good and returns its travel report.
    pub fn finish(&mut self, time: f64, energy_samples: u64) -> AgentReport {
        self.finished = true;
        self.velocity = Vector2D::ZERO;
        self.travel.travel_time = Some(time);

        let mean_kinetic_energy = if energy_samples > 0 {
            self.travel.kinetic_energy / energy_samples as f64
        } else {
            0.0
        };
        AgentReport {
            id: self.id,
            travel_time: time,
            distance: self.travel.distance,
            mean_kinetic_energy,
        }
    }
}

impl Body for Agent {
    fn id(&self) -> usize {
        self.id
    }

    fn position(&self) -> Point {
        self.position
    }

    fn velocity(&self) -> Vector2D {
        self.velocity
    }

    fn radius(&self) -> f64 {
        self.params.radius
    }

    fn is_virtual(&self) -> bool {
        false
    }
}

/// Read-only state of an agent as seen by the others during a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSnapshot {
    pub id: usize,
    pub position: Point,
    pub velocity: Vector2D,
    pub radius: f64,
    pub goal: Point,
    pub turn_bias: TurnBias,
    pub finished: bool,
}

impl Body for AgentSnapshot {
    fn id(&self) -> usize {
        self.id
    }

    fn position(&self) -> Point {
        self.position
    }

    fn velocity(&self) -> Vector2D {
        self.velocity
    }

    fn radius(&self) -> f64 {
        self.radius
    }

    fn is_virtual(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualAgent {
    /// Slot in the owning pool.
    pub id: usize,
    pub position: Point,
    pub velocity: Vector2D,
    pub radius: f64,
    pub turn_bias: TurnBias,
    pub in_use: bool,
}

impl VirtualAgent {
    fn vacant(id: usize) -> Self {
        VirtualAgent {
            id,
            position: Point::ORIGIN,
            velocity: Vector2D::ZERO,
            radius: 0.0,
            turn_bias: TurnBias::Unset,
            in_use: false,
        }
    }
}

impl Body for VirtualAgent {
    fn id(&self) -> usize {
        self.id
    }

    fn position(&self) -> Point {
        self.position
    }

    fn velocity(&self) -> Vector2D {
        self.velocity
    }

    fn radius(&self) -> f64 {
        self.radius
    }

    fn is_virtual(&self) -> bool {
        true
    }
}

/// Fixed-size pool of virtual agents, released wholesale every tick.
///
/// Every observer that perceives a group takes its own slot, so a tick needs
/// one slot per observer-group pair. Slots are handed out in agent id order:
/// once the pool runs dry, the remaining higher-id observers lose group
/// perception for that tick and a warning is logged. The world sizes its pool
/// to at least the agent count.
#[derive(Debug, Clone)]
pub struct VirtualAgentPool {
    slots: Vec<VirtualAgent>,
}

impl VirtualAgentPool {
    pub fn new(capacity: usize) -> Self {
        VirtualAgentPool {
            slots: (0..capacity).map(VirtualAgent::vacant).collect(),
        }
    }

    /// Activates the first free slot. Returns `None` when the pool is full.
    pub fn acquire(
        &mut self,
        radius: f64,
        position: Point,
        velocity: Vector2D,
        turn_bias: TurnBias,
    ) -> Option<usize> {
        let slot = self.slots.iter_mut().find(|slot| !slot.in_use)?;
        slot.radius = radius;
        slot.position = position;
        slot.velocity = velocity;
        slot.turn_bias = turn_bias;
        slot.in_use = true;
        Some(slot.id)
    }

    /// The virtual agent in `slot`, if active.
    pub fn get(&self, slot: usize) -> Option<&VirtualAgent> {
        self.slots.get(slot).filter(|agent| agent.in_use)
    }

    pub fn release_all(&mut self) {
        for slot in &mut self.slots {
            slot.in_use = false;
        }
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Anything an agent can be threatened by.
#[derive(Debug, Clone, Copy)]
pub enum Obstacle<'a> {
    Real(&'a AgentSnapshot),
    Virtual(&'a VirtualAgent),
}

impl Obstacle<'_> {
    pub fn turn_bias(&self) -> TurnBias {
        match self {
            Obstacle::Real(agent) => agent.turn_bias,
            Obstacle::Virtual(agent) => agent.turn_bias,
        }
    }
}

impl Body for Obstacle<'_> {
    fn id(&self) -> usize {
        match self {
            Obstacle::Real(agent) => agent.id,
            Obstacle::Virtual(agent) => agent.id,
        }
    }

    fn position(&self) -> Point {
        match self {
            Obstacle::Real(agent) => agent.position,
            Obstacle::Virtual(agent) => agent.position,
        }
    }

    fn velocity(&self) -> Vector2D {
        match self {
            Obstacle::Real(agent) => agent.velocity,
            Obstacle::Virtual(agent) => agent.velocity,
        }
    }

    fn radius(&self) -> f64 {
        match self {
            Obstacle::Real(agent) => agent.radius,
            Obstacle::Virtual(agent) => agent.radius,
        }
    }

    fn is_virtual(&self) -> bool {
        matches!(self, Obstacle::Virtual(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UniformRange;
    use crate::proximity::{BruteForceDatabase, ProximityDatabase};
    use crate::waypoints::WaypointQueue;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn spawn_agent(position: Point, route: Vec<Point>) -> Agent {
        let mut db = BruteForceDatabase::new();
        let token = db.allocate(0usize);
        let mut rng = StdRng::seed_from_u64(1);
        Agent::spawn(
            0,
            position,
            Box::new(WaypointQueue::new(route)),
            token,
            &AgentProfile::default(),
            &mut rng,
        )
        .unwrap()
    }

    // ==================== Spawn Tests ====================

    #[test]
    fn test_sampled_params_within_ranges() {
        let profile = AgentProfile::default();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let params = AgentParams::sample(&profile, &mut rng);
            assert!(params.pref_speed >= 3.0, "Speed noise is an absolute value");
            assert!(profile.time_horizon.contains(params.time_horizon));
            assert!(profile.neighbor_distance.contains(params.neighbor_distance));
            assert!(profile.strategy_duration.contains(params.strategy_duration));
            assert_eq!(params.radius, 0.25);
        }
    }

    #[test]
    fn test_fixed_pref_speed_overrides_sampling() {
        let profile = AgentProfile {
            fixed_pref_speed: Some(1.2),
            time_horizon: UniformRange::new(4.0, 4.0),
            ..AgentProfile::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let params = AgentParams::sample(&profile, &mut rng);
        assert_eq!(params.pref_speed, 1.2);
        assert_eq!(params.time_horizon, 4.0);
    }

    #[test]
    fn test_spawn_starts_idle() {
        let agent = spawn_agent(Point::ORIGIN, vec![Point::new(5.0, 0.0)]);
        assert_eq!(agent.goal, Point::new(5.0, 0.0));
        assert_eq!(agent.velocity, Vector2D::ZERO);
        assert_eq!(agent.strategy, Strategy::None);
        assert_eq!(agent.duration, agent.params.strategy_duration);
        assert!(!agent.is_finished());
    }

    #[test]
    fn test_spawn_without_goal_fails() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut db = BruteForceDatabase::new();
        let token = db.allocate(0usize);
        let result = Agent::spawn(
            0,
            Point::ORIGIN,
            Box::new(WaypointQueue::default()),
            token,
            &AgentProfile::default(),
            &mut rng,
        );
        assert!(result.is_err());
    }

    // ==================== Navigation Tests ====================

    #[test]
    fn test_update_goal_walks_waypoints() {
        let mut agent = spawn_agent(
            Point::ORIGIN,
            vec![Point::new(0.5, 0.0), Point::new(0.9, 0.0), Point::new(10.0, 0.0)],
        );
        // Both early waypoints are within the waypoint radius
        assert!(!agent.update_goal(1.0, 0.5));
        assert_eq!(agent.goal, Point::new(10.0, 0.0));
        assert!(!agent.waypoints.has_next());

        agent.position = Point::new(9.6, 0.0);
        assert!(agent.update_goal(1.0, 0.5));
    }

    #[test]
    fn test_integrate_accumulates_distance() {
        let mut agent = spawn_agent(Point::ORIGIN, vec![Point::new(10.0, 0.0)]);
        agent.velocity = Vector2D::new(3.0, 4.0);
        agent.integrate(0.1);
        agent.integrate(0.1);
        assert!((agent.position.x - 0.6).abs() < 1e-12);
        assert!((agent.position.y - 0.8).abs() < 1e-12);
        assert!((agent.travel.distance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_finish_reports_mean_energy() {
        let mut agent = spawn_agent(Point::ORIGIN, vec![Point::new(10.0, 0.0)]);
        agent.velocity = Vector2D::new(1.0, 0.0);
        agent.sample_kinetic_energy(33.0);
        agent.sample_kinetic_energy(33.0);
        agent.velocity = Vector2D::ZERO;
        agent.sample_kinetic_energy(33.0);

        let report = agent.finish(2.5, 3);
        assert_eq!(report.travel_time, 2.5);
        assert!((report.mean_kinetic_energy - 22.0).abs() < 1e-12);
        assert!(agent.is_finished());
        assert_eq!(agent.velocity, Vector2D::ZERO);
    }

    #[test]
    fn test_reset_strategy_clears_bias() {
        let mut agent = spawn_agent(Point::ORIGIN, vec![Point::new(10.0, 0.0)]);
        agent.strategy = Strategy::ChangeDirection;
        agent.turn_bias = TurnBias::Clockwise;
        agent.duration = -0.01;
        agent.reset_strategy();
        assert_eq!(agent.strategy, Strategy::None);
        assert_eq!(agent.turn_bias, TurnBias::Unset);
        assert_eq!(agent.duration, agent.params.strategy_duration);
    }

    // ==================== Virtual Agent Pool Tests ====================

    #[test]
    fn test_pool_exhaustion_and_release() {
        let mut pool = VirtualAgentPool::new(2);
        let a = pool.acquire(1.0, Point::ORIGIN, Vector2D::ZERO, TurnBias::Unset);
        let b = pool.acquire(2.0, Point::new(1.0, 1.0), Vector2D::ZERO, TurnBias::Clockwise);
        assert_eq!((a, b), (Some(0), Some(1)));
        assert!(
            pool.acquire(3.0, Point::ORIGIN, Vector2D::ZERO, TurnBias::Unset).is_none(),
            "A full pool refuses new virtual agents"
        );
        assert_eq!(pool.get(1).map(|v| v.radius), Some(2.0));

        pool.release_all();
        assert_eq!(pool.in_use(), 0);
        assert!(pool.get(0).is_none());
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn test_obstacle_dispatch() {
        let snapshot = spawn_agent(Point::new(1.0, 2.0), vec![Point::ORIGIN]).snapshot();
        let mut pool = VirtualAgentPool::new(1);
        let slot = pool
            .acquire(1.5, Point::new(4.0, 4.0), Vector2D::new(1.0, 0.0), TurnBias::Clockwise)
            .unwrap();

        let real = Obstacle::Real(&snapshot);
        let group = Obstacle::Virtual(pool.get(slot).unwrap());
        assert!(!real.is_virtual());
        assert!(group.is_virtual());
        assert_eq!(real.position(), Point::new(1.0, 2.0));
        assert_eq!(group.radius(), 1.5);
        assert_eq!(group.turn_bias(), TurnBias::Clockwise);
    }
}
