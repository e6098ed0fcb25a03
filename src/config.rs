//! # Simulation Configuration
//!
//! Every tunable of the simulator lives here, grouped into blocks that mirror
//! the subsystems consuming them. All blocks deserialize from JSON with
//! per-field defaults, so a scenario file only has to name what it changes.
//!
//! A [`Scenario`] bundles a configuration with the agents to spawn and is the
//! unit the engine and the CLI load.

use crate::error::SimulationError;
use crate::proximity::WorldBounds;
use crate::strategy::{Encounter, Strategy};
use crate::structs::Point;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;

/// Whether agents read their neighbours from the previous tick's snapshot
/// or from the live, partially updated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOrder {
    /// Every agent sees the world as it stood before the tick began.
    #[default]
    Simultaneous,
    /// Agents are stepped in id order and see earlier agents' new state.
    Sequential,
}

/// Closed interval sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniformRange {
    pub min: f64,
    pub max: f64,
}

impl UniformRange {
    pub const fn new(min: f64, max: f64) -> Self {
        UniformRange { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.min == self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// Per-agent attributes and the ranges they are drawn from at spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    pub radius: f64,
    pub pref_speed_base: f64,
    /// Scale of the `|N(0, 1)|` sample added to `pref_speed_base`.
    pub pref_speed_sigma: f64,
    /// Overrides the sampled preferred speed when set.
    pub fixed_pref_speed: Option<f64>,
    pub time_horizon: UniformRange,
    pub neighbor_distance: UniformRange,
    pub strategy_duration: UniformRange,
    /// Full opening of the front cone, degrees.
    pub view_angle: f64,
    /// Radius of the rear cone.
    pub personal_space: f64,
}

impl Default for AgentProfile {
    fn default() -> Self {
        AgentProfile {
            radius: 0.25,
            pref_speed_base: 3.0,
            pref_speed_sigma: 1.0,
            fixed_pref_speed: None,
            time_horizon: UniformRange::new(3.0, 8.0),
            neighbor_distance: UniformRange::new(8.0, 12.0),
            strategy_duration: UniformRange::new(1.5, 3.0),
            view_angle: 135.0,
            personal_space: 3.0,
        }
    }
}

impl AgentProfile {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.radius > 0.0) {
            return Err(SimulationError::InvalidConfig("agent radius must be positive"));
        }
        match self.fixed_pref_speed {
            Some(speed) if !(speed > 0.0) => {
                return Err(SimulationError::InvalidConfig(
                    "fixed preferred speed must be positive",
                ));
            }
            None if !(self.pref_speed_base > 0.0) => {
                return Err(SimulationError::InvalidConfig(
                    "preferred speed base must be positive",
                ));
            }
            _ => {}
        }
        if !(self.pref_speed_sigma >= 0.0) {
            return Err(SimulationError::InvalidConfig(
                "preferred speed sigma must not be negative",
            ));
        }
        if !self.time_horizon.is_valid() || !(self.time_horizon.min > 0.0) {
            return Err(SimulationError::InvalidConfig(
                "time horizon range must be positive and ordered",
            ));
        }
        if !self.neighbor_distance.is_valid() || !(self.neighbor_distance.min > 0.0) {
            return Err(SimulationError::InvalidConfig(
                "neighbour distance range must be positive and ordered",
            ));
        }
        if !self.strategy_duration.is_valid() || !(self.strategy_duration.min > 0.0) {
            return Err(SimulationError::InvalidConfig(
                "strategy duration range must be positive and ordered",
            ));
        }
        if !(self.view_angle > 0.0 && self.view_angle <= 360.0) {
            return Err(SimulationError::InvalidConfig(
                "view angle must be in (0, 360] degrees",
            ));
        }
        if !(self.personal_space >= 0.0) {
            return Err(SimulationError::InvalidConfig(
                "personal space must not be negative",
            ));
        }
        Ok(())
    }
}

/// Tuned constants of the behaviour library and encounter classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringParams {
    pub deceleration_coefficient: f64,
    pub turn_weight_numerator: f64,
    pub turn_weight_offset: f64,
    pub follow_reaction_time: f64,
    pub follow_personal_distance: f64,
    pub follow_min_speed: f64,
    pub goal_spring: f64,
    pub force_numerator: f64,
    pub force_offset: f64,
    pub max_acceleration: f64,
    /// Degrees around 0 and 180 that count as aligned / head-on.
    pub collision_angle_threshold: f64,
    pub static_speed_threshold: f64,
    /// Degrees around 0, 180 and 360 where the turn side is ambiguous.
    pub bearing_epsilon: f64,
}

impl Default for SteeringParams {
    fn default() -> Self {
        SteeringParams {
            deceleration_coefficient: 0.5,
            turn_weight_numerator: 10.0,
            turn_weight_offset: 0.3,
            follow_reaction_time: 0.5,
            follow_personal_distance: 1.0,
            follow_min_speed: 0.5,
            goal_spring: 40.0,
            force_numerator: 15.0,
            force_offset: 0.1,
            max_acceleration: 350.0,
            collision_angle_threshold: 7.0,
            static_speed_threshold: 0.3,
            bearing_epsilon: 0.02,
        }
    }
}

impl SteeringParams {
    pub fn validate(&self) -> Result<(), SimulationError> {
        let all_finite = [
            self.deceleration_coefficient,
            self.turn_weight_numerator,
            self.turn_weight_offset,
            self.follow_reaction_time,
            self.follow_personal_distance,
            self.follow_min_speed,
            self.goal_spring,
            self.force_numerator,
            self.force_offset,
            self.max_acceleration,
            self.collision_angle_threshold,
            self.static_speed_threshold,
            self.bearing_epsilon,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !all_finite {
            return Err(SimulationError::InvalidConfig(
                "steering parameters must be finite",
            ));
        }
        if self.deceleration_coefficient <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "deceleration coefficient must be positive",
            ));
        }
        if self.turn_weight_offset <= 0.0 || self.force_offset <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "turn and force offsets must be positive",
            ));
        }
        if self.follow_reaction_time < 0.0 || self.follow_min_speed < 0.0 {
            return Err(SimulationError::InvalidConfig(
                "follow parameters must not be negative",
            ));
        }
        if self.max_acceleration < 0.0 {
            return Err(SimulationError::InvalidConfig(
                "max acceleration must not be negative",
            ));
        }
        Ok(())
    }
}

/// Thresholds of the group detector and of group perception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupParams {
    pub same_group_distance: f64,
    /// Compared against the difference of squared speeds, squared.
    pub same_group_speed: f64,
    /// Max angle between goal directions, degrees.
    pub same_group_heading: f64,
    pub min_member_distance: f64,
    pub min_spread_angle: f64,
    pub max_spread_angle: f64,
}

impl Default for GroupParams {
    fn default() -> Self {
        GroupParams {
            same_group_distance: 1.85,
            same_group_speed: 2.0,
            same_group_heading: 10.0,
            min_member_distance: 2.0,
            min_spread_angle: 5.0,
            max_spread_angle: 90.0,
        }
    }
}

impl GroupParams {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.same_group_distance > 0.0)
            || !(self.same_group_speed >= 0.0)
            || !(self.same_group_heading >= 0.0)
        {
            return Err(SimulationError::InvalidConfig(
                "group thresholds must be non-negative and the distance positive",
            ));
        }
        if !(self.min_member_distance >= 0.0) {
            return Err(SimulationError::InvalidConfig(
                "minimum member distance must not be negative",
            ));
        }
        if !(self.min_spread_angle >= 0.0 && self.min_spread_angle <= self.max_spread_angle) {
            return Err(SimulationError::InvalidConfig(
                "group spread angles must be ordered and non-negative",
            ));
        }
        Ok(())
    }
}

/// Candidate strategies proposed for each kind of encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncounterStrategies {
    pub frontal: Vec<Strategy>,
    #[serde(rename = "static")]
    pub static_obstacle: Vec<Strategy>,
    pub rear_ahead: Vec<Strategy>,
    pub rear_behind: Vec<Strategy>,
    pub lateral: Vec<Strategy>,
}

impl Default for EncounterStrategies {
    fn default() -> Self {
        EncounterStrategies {
            frontal: vec![Strategy::ChangeDirection],
            static_obstacle: vec![Strategy::ChangeDirection],
            rear_ahead: vec![Strategy::Follow],
            rear_behind: vec![Strategy::Decelerate, Strategy::Follow],
            lateral: vec![Strategy::ChangeDirection],
        }
    }
}

impl EncounterStrategies {
    pub fn proposed(&self, encounter: Encounter) -> &[Strategy] {
        match encounter {
            Encounter::Frontal => &self.frontal,
            Encounter::Static => &self.static_obstacle,
            Encounter::RearAhead => &self.rear_ahead,
            Encounter::RearBehind => &self.rear_behind,
            Encounter::Lateral => &self.lateral,
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        let sets = [
            &self.frontal,
            &self.static_obstacle,
            &self.rear_ahead,
            &self.rear_behind,
            &self.lateral,
        ];
        if sets.iter().any(|set| set.is_empty()) {
            return Err(SimulationError::InvalidConfig(
                "every encounter needs at least one proposed strategy",
            ));
        }
        if sets.iter().any(|set| set.contains(&Strategy::None)) {
            return Err(SimulationError::InvalidConfig(
                "`none` cannot be proposed as an avoidance strategy",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub time_step: f64,
    pub seed: u64,
    pub update_order: UpdateOrder,
    pub use_groups: bool,
    /// Groups and kinetic energy samples are refreshed every this many ticks.
    pub group_interval_ticks: u64,
    /// Minimum virtual agent slots; the world never uses fewer than one per agent.
    pub virtual_agent_pool_size: usize,
    pub goal_radius: f64,
    pub waypoint_radius: f64,
    pub mass_half: f64,
    pub agent: AgentProfile,
    pub steering: SteeringParams,
    pub grouping: GroupParams,
    pub strategies: EncounterStrategies,
    pub world: WorldBounds,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            time_step: 0.01,
            seed: 0,
            update_order: UpdateOrder::default(),
            use_groups: true,
            group_interval_ticks: 1,
            virtual_agent_pool_size: 64,
            goal_radius: 0.5,
            waypoint_radius: 1.0,
            mass_half: 33.0,
            agent: AgentProfile::default(),
            steering: SteeringParams::default(),
            grouping: GroupParams::default(),
            strategies: EncounterStrategies::default(),
            world: WorldBounds::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SimulationError> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SimulationError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.time_step > 0.0 && self.time_step.is_finite()) {
            return Err(SimulationError::InvalidConfig("time step must be positive"));
        }
        if self.group_interval_ticks == 0 {
            return Err(SimulationError::InvalidConfig(
                "group interval must be at least one tick",
            ));
        }
        if !(self.goal_radius > 0.0) || !(self.waypoint_radius > 0.0) {
            return Err(SimulationError::InvalidConfig(
                "goal and waypoint radii must be positive",
            ));
        }
        if !(self.mass_half >= 0.0) {
            return Err(SimulationError::InvalidConfig("mass must not be negative"));
        }
        self.agent.validate()?;
        self.steering.validate()?;
        self.grouping.validate()?;
        self.strategies.validate()?;
        self.world.validate()?;
        Ok(())
    }

    /// Checks that agents starting at `positions` fit this world.
    ///
    /// Rejects an empty crowd and non-finite starts. Also fails with
    /// [`SimulationError::WorldTooSmall`] when the bodies' combined area
    /// exceeds the walkable ground.
    pub fn validate_spawns(&self, positions: &[Point]) -> Result<(), SimulationError> {
        self.validate()?;
        if positions.is_empty() {
            return Err(SimulationError::EmptyScenario);
        }
        if !positions.iter().all(Point::is_finite) {
            return Err(SimulationError::InvalidConfig("spawn positions must be finite"));
        }

        let radius = self.agent.radius;
        let required = positions.len() as f64 * PI * radius * radius;
        let available = self.world.ground_area();
        if required > available {
            return Err(SimulationError::WorldTooSmall {
                agents: positions.len(),
                required,
                available,
            });
        }
        Ok(())
    }
}

/// Where an agent starts and the goals it visits in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpawn {
    pub position: Point,
    pub goal: Point,
    /// Visited after `goal`; the last entry is the final destination.
    #[serde(default)]
    pub waypoints: Vec<Point>,
}

impl AgentSpawn {
    pub fn new(position: Point, goal: Point) -> Self {
        AgentSpawn {
            position,
            goal,
            waypoints: Vec::new(),
        }
    }

    /// Goal sequence, starting with `goal`.
    pub fn route(&self) -> Vec<Point> {
        std::iter::once(self.goal)
            .chain(self.waypoints.iter().copied())
            .collect()
    }
}

/// A configuration plus the agents it runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: SimulationConfig,
    pub agents: Vec<AgentSpawn>,
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self, SimulationError> {
        let scenario: Scenario = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SimulationError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        let starts: Vec<Point> = self.agents.iter().map(|spawn| spawn.position).collect();
        self.config.validate_spawns(&starts)?;
        let goals_finite = self
            .agents
            .iter()
            .all(|spawn| spawn.goal.is_finite() && spawn.waypoints.iter().all(Point::is_finite));
        if !goals_finite {
            return Err(SimulationError::InvalidConfig("goals must be finite"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // ==================== Defaults ====================

    #[test]
    fn test_default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.time_step, 0.01);
        assert_eq!(config.update_order, UpdateOrder::Simultaneous);
    }

    #[test]
    fn test_default_strategy_sets() {
        let strategies = EncounterStrategies::default();
        assert_eq!(strategies.proposed(Encounter::Frontal), &[Strategy::ChangeDirection]);
        assert_eq!(
            strategies.proposed(Encounter::RearBehind),
            &[Strategy::Decelerate, Strategy::Follow]
        );
        assert_eq!(strategies.proposed(Encounter::RearAhead), &[Strategy::Follow]);
    }

    // ==================== Loading ====================

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = SimulationConfig::from_json_str(
            r#"{"time_step": 0.02, "seed": 9, "update_order": "sequential",
                "agent": {"radius": 0.3}}"#,
        )
        .unwrap();
        assert_eq!(config.time_step, 0.02);
        assert_eq!(config.seed, 9);
        assert_eq!(config.update_order, UpdateOrder::Sequential);
        assert_eq!(config.agent.radius, 0.3);
        assert_eq!(config.agent.view_angle, 135.0, "Unnamed fields keep defaults");
    }

    #[test]
    fn test_strategy_sets_from_json() {
        let config = SimulationConfig::from_json_str(
            r#"{"strategies": {"frontal": ["decelerate", "change_direction"]}}"#,
        )
        .unwrap();
        assert_eq!(
            config.strategies.frontal,
            vec![Strategy::Decelerate, Strategy::ChangeDirection]
        );
        assert_eq!(config.strategies.lateral, vec![Strategy::ChangeDirection]);
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = SimulationConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SimulationError::Serialization(_)));
    }

    // ==================== Validation ====================

    #[test]
    fn test_rejects_non_positive_values() {
        let mut config = SimulationConfig::default();
        config.time_step = 0.0;
        assert!(matches!(config.validate(), Err(SimulationError::InvalidConfig(_))));

        let mut config = SimulationConfig::default();
        config.agent.radius = -1.0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.agent.fixed_pref_speed = Some(0.0);
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.agent.time_horizon = UniformRange::new(0.0, 2.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_range() {
        let mut config = SimulationConfig::default();
        config.agent.neighbor_distance = UniformRange::new(12.0, 8.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_none_in_strategy_set() {
        let mut config = SimulationConfig::default();
        config.strategies.lateral = vec![Strategy::None];
        assert!(config.validate().is_err());
        config.strategies.lateral = Vec::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scenario_requires_agents() {
        let scenario = Scenario::default();
        assert!(matches!(scenario.validate(), Err(SimulationError::EmptyScenario)));
    }

    #[test]
    fn test_scenario_world_too_small() {
        let mut scenario = Scenario::default();
        scenario.config.world = WorldBounds {
            center: [0.0, 0.0, 0.0],
            dimensions: [1.0, 0.0, 1.0],
            divisions: [1, 1, 1],
        };
        scenario.agents = (0..10)
            .map(|i| AgentSpawn::new(Point::new(i as f64, 0.0), Point::new(0.0, 5.0)))
            .collect();
        let err = scenario.validate().unwrap_err();
        assert!(
            matches!(err, SimulationError::WorldTooSmall { agents: 10, .. }),
            "Ten discs of radius 0.25 do not fit in one square unit"
        );
    }

    #[test]
    fn test_scenario_from_json() {
        let scenario = Scenario::from_json_str(
            r#"{"agents": [
                {"position": {"x": 0, "y": 0}, "goal": {"x": 10, "y": 0}},
                {"position": {"x": 0, "y": 5}, "goal": {"x": 5, "y": 5},
                 "waypoints": [{"x": 5, "y": 10}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(scenario.agents.len(), 2);
        assert_eq!(
            scenario.agents[1].route(),
            vec![Point::new(5.0, 5.0), Point::new(5.0, 10.0)]
        );
    }

    #[test]
    fn test_uniform_range_sampling() {
        let mut rng = StdRng::seed_from_u64(3);
        let range = UniformRange::new(1.5, 3.0);
        for _ in 0..100 {
            assert!(range.contains(range.sample(&mut rng)));
        }
        assert_eq!(UniformRange::new(2.0, 2.0).sample(&mut rng), 2.0);
    }
}
