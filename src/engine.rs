//! # Simulation Engine
//!
//! [`SimulationWorld`] owns the agents, the proximity grid, the group cache
//! and the virtual agent pool, and advances them one fixed tick at a time:
//!
//! 1. On the group cadence, rebuild the groups and sample kinetic energy.
//! 2. Snapshot every agent and release the virtual agents of the last tick.
//! 3. Step each active agent: goal check, steer, integrate, goal check.
//! 4. Publish the new positions to the grid, record trajectories and emit
//!    statistics for agents that finished.
//!
//! Under [`UpdateOrder::Simultaneous`] every agent steers against the
//! start-of-tick snapshots and the grid is refreshed once all agents have
//! moved. [`UpdateOrder::Sequential`] publishes each move immediately, so
//! later agents in the tick see earlier ones at their new positions.

use crate::agent::{Agent, AgentSnapshot, VirtualAgentPool};
use crate::config::{Scenario, SimulationConfig, UpdateOrder};
use crate::error::SimulationError;
use crate::groups::detect_groups;
use crate::proximity::{ground_to_world, LocationGrid, ProximityDatabase};
use crate::recording::{
    AgentReport, RunSummary, StatisticsSink, StatsCollector, TrajectoryRecord, TrajectoryRecorder,
};
use crate::strategy::{steer, Neighborhood, StepScratch};
use crate::structs::{Point, Vector2D};
use crate::waypoints::{WaypointQueue, WaypointSource};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Decides how long [`SimulationWorld::run`] keeps going.
pub trait RunController {
    /// Called before every tick; `false` stops the run where it is.
    fn advance(&mut self) -> bool;

    /// `true` ends the run by finishing every active agent in place.
    fn force_finish(&self) -> bool {
        false
    }
}

/// Runs at most `remaining` ticks, then force-finishes the stragglers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedTicks {
    pub remaining: u64,
}

impl FixedTicks {
    pub fn new(ticks: u64) -> Self {
        FixedTicks { remaining: ticks }
    }
}

impl RunController for FixedTicks {
    fn advance(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    fn force_finish(&self) -> bool {
        self.remaining == 0
    }
}

/// Runs until every agent has reached its goal.
#[derive(Debug, Clone, Copy, Default)]
pub struct UntilArrival;

impl RunController for UntilArrival {
    fn advance(&mut self) -> bool {
        true
    }
}

pub struct SimulationWorld {
    config: SimulationConfig,
    agents: Vec<Agent>,
    /// Start-of-tick state of every agent, indexed by id.
    snapshots: Vec<AgentSnapshot>,
    database: LocationGrid<usize>,
    groups: Vec<Vec<usize>>,
    pool: VirtualAgentPool,
    scratch: StepScratch,
    rng: StdRng,
    tick: u64,
    /// Kinetic energy samples taken so far.
    cadence_samples: u64,
    stats: StatsCollector,
    summary: Option<RunSummary>,
    sink: Option<Box<dyn StatisticsSink>>,
    recorder: Option<Box<dyn TrajectoryRecorder>>,
    recording_error: Option<SimulationError>,
}

impl SimulationWorld {
    /// Builds a world from a validated scenario.
    pub fn new(scenario: Scenario) -> Result<Self, SimulationError> {
        scenario.validate()?;
        let routes = scenario
            .agents
            .iter()
            .map(|spawn| {
                let source: Box<dyn WaypointSource> = Box::new(WaypointQueue::new(spawn.route()));
                (spawn.position, source)
            })
            .collect();
        Self::with_routes(scenario.config, routes)
    }

    /// Builds a world from start positions and arbitrary waypoint sources.
    /// Agent ids follow the order of `routes`.
    pub fn with_routes(
        config: SimulationConfig,
        routes: Vec<(Point, Box<dyn WaypointSource>)>,
    ) -> Result<Self, SimulationError> {
        let starts: Vec<Point> = routes.iter().map(|(position, _)| *position).collect();
        config.validate_spawns(&starts)?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut database = LocationGrid::new(&config.world)?;
        let mut agents = Vec::with_capacity(routes.len());
        for (id, (position, route)) in routes.into_iter().enumerate() {
            let token = database.allocate(id);
            database.update_for_position(token, ground_to_world(position));
            agents.push(Agent::spawn(id, position, route, token, &config.agent, &mut rng)?);
        }
        let snapshots = agents.iter().map(Agent::snapshot).collect();

        log::info!(
            "world ready: {} agents, dt {}, {:?} updates, groups {}",
            agents.len(),
            config.time_step,
            config.update_order,
            if config.use_groups { "on" } else { "off" }
        );

        Ok(SimulationWorld {
            pool: VirtualAgentPool::new(config.virtual_agent_pool_size.max(agents.len())),
            config,
            agents,
            snapshots,
            database,
            groups: Vec::new(),
            scratch: StepScratch::new(),
            rng,
            tick: 0,
            cadence_samples: 0,
            stats: StatsCollector::new(),
            summary: None,
            sink: None,
            recorder: None,
            recording_error: None,
        })
    }

    /// Forwards every agent report and the run summary to `sink` as well.
    pub fn set_statistics_sink(&mut self, sink: impl StatisticsSink + 'static) {
        self.sink = Some(Box::new(sink));
    }

    /// Writes the post-step state of every active agent to `recorder`.
    pub fn set_recorder(&mut self, recorder: impl TrajectoryRecorder + 'static) {
        self.recorder = Some(Box::new(recorder));
        self.recording_error = None;
    }

    /// Flushes and detaches the recorder. Reports the first recording
    /// failure of the run, if any.
    pub fn close_recording(&mut self) -> Result<(), SimulationError> {
        let flushed = match self.recorder.take() {
            Some(mut recorder) => recorder.flush(),
            None => Ok(()),
        };
        match self.recording_error.take() {
            Some(error) => Err(error),
            None => flushed,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn time(&self) -> f64 {
        self.tick as f64 * self.config.time_step
    }

    pub fn reports(&self) -> &[AgentReport] {
        self.stats.reports()
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    pub fn positions(&self) -> Vec<Point> {
        self.agents.iter().map(|agent| agent.position).collect()
    }

    pub fn velocities(&self) -> Vec<Vector2D> {
        self.agents.iter().map(|agent| agent.velocity).collect()
    }

    pub fn active_agents(&self) -> usize {
        self.agents.iter().filter(|agent| !agent.is_finished()).count()
    }

    pub fn is_finished(&self) -> bool {
        self.agents.iter().all(Agent::is_finished)
    }

    /// Advances the world by one tick. Returns how many agents finished.
    pub fn step(&mut self) -> usize {
        if self.is_finished() {
            return 0;
        }
        self.tick += 1;
        let time = self.time();
        let waypoint_radius = self.config.waypoint_radius;
        let goal_radius = self.config.goal_radius;
        let sequential = self.config.update_order == UpdateOrder::Sequential;

        self.refresh_snapshots();
        self.pool.release_all();
        if (self.tick - 1) % self.config.group_interval_ticks == 0 {
            if self.config.use_groups {
                self.groups = detect_groups(&self.snapshots, &self.database, &self.config.grouping);
                log::debug!("tick {}: {} groups", self.tick, self.groups.len());
            }
            for agent in self.agents.iter_mut().filter(|agent| !agent.is_finished()) {
                agent.sample_kinetic_energy(self.config.mass_half);
            }
            self.cadence_samples += 1;
        }

        let mut stepped = Vec::with_capacity(self.agents.len());
        let mut finished = Vec::new();
        for index in 0..self.agents.len() {
            if self.agents[index].is_finished() {
                continue;
            }
            stepped.push(index);

            let agent = &mut self.agents[index];
            let arrived = if agent.update_goal(waypoint_radius, goal_radius) {
                true
            } else {
                let view = Neighborhood {
                    agents: &self.snapshots,
                    database: &self.database,
                    groups: &self.groups,
                };
                steer(
                    agent,
                    &view,
                    &self.config,
                    &mut self.pool,
                    &mut self.scratch,
                    &mut self.rng,
                );
                agent.integrate(self.config.time_step);
                agent.update_goal(waypoint_radius, goal_radius)
            };

            if arrived {
                let report = agent.finish(time, self.cadence_samples);
                finished.push(report);
            }
            if sequential {
                let agent = &self.agents[index];
                self.database
                    .update_for_position(agent.token(), ground_to_world(agent.position));
                self.snapshots[index] = agent.snapshot();
            }
        }

        if !sequential {
            for index in &stepped {
                let agent = &self.agents[*index];
                self.database
                    .update_for_position(agent.token(), ground_to_world(agent.position));
            }
        }

        self.record(&stepped);
        for report in &finished {
            self.report(report);
        }
        if self.is_finished() {
            self.emit_summary();
        }
        finished.len()
    }

    /// Ends the run now: every active agent finishes where it stands.
    pub fn force_finish(&mut self) {
        let time = self.time();
        let mut reports = Vec::new();
        for agent in self.agents.iter_mut().filter(|agent| !agent.is_finished()) {
            reports.push(agent.finish(time, self.cadence_samples));
        }
        if !reports.is_empty() {
            log::warn!("force-finishing {} agents at t = {:.2}", reports.len(), time);
        }
        self.refresh_snapshots();
        for report in &reports {
            self.report(report);
        }
        self.emit_summary();
    }

    /// Steps until the controller stops the run or every agent arrives.
    /// Returns the run summary once the run is complete.
    pub fn run(&mut self, controller: &mut impl RunController) -> Option<RunSummary> {
        loop {
            if self.is_finished() {
                break;
            }
            if controller.force_finish() {
                self.force_finish();
                break;
            }
            if !controller.advance() {
                break;
            }
            self.step();
        }
        self.summary
    }

    fn refresh_snapshots(&mut self) {
        for (snapshot, agent) in self.snapshots.iter_mut().zip(&self.agents) {
            *snapshot = agent.snapshot();
        }
    }

    fn record(&mut self, stepped: &[usize]) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        for &index in stepped {
            let agent = &self.agents[index];
            let record = TrajectoryRecord {
                tick: self.tick,
                agent: agent.id,
                position: agent.position,
                velocity: agent.velocity,
            };
            if let Err(e) = recorder.record(&record) {
                log::error!("trajectory recording stopped at tick {}: {}", self.tick, e);
                self.recording_error = Some(e);
                self.recorder = None;
                return;
            }
        }
    }

    fn report(&mut self, report: &AgentReport) {
        log::info!(
            "agent {} finished: {:.2}s, {:.2}m",
            report.id,
            report.travel_time,
            report.distance
        );
        self.stats.agent_finished(report);
        if let Some(sink) = self.sink.as_mut() {
            sink.agent_finished(report);
        }
    }

    fn emit_summary(&mut self) {
        if self.summary.is_some() {
            return;
        }
        let Some(summary) = RunSummary::from_reports(self.stats.reports()) else {
            return;
        };
        log::info!(
            "run finished after {:.2}s: mean travel time {:.2}s, mean distance {:.2}m, mean kinetic energy {:.2}",
            summary.total_time,
            summary.mean_travel_time,
            summary.mean_distance,
            summary.mean_kinetic_energy
        );
        self.stats.run_finished(&summary);
        if let Some(sink) = self.sink.as_mut() {
            sink.run_finished(&summary);
        }
        self.summary = Some(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentProfile, AgentSpawn, UniformRange};
    use crate::proximity::WorldBounds;
    use crate::recording::{Playback, TrajectoryWriter};
    use crate::strategy::Strategy;
    use approx::assert_relative_eq;
    use rand::Rng;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    fn config() -> SimulationConfig {
        SimulationConfig {
            agent: AgentProfile {
                fixed_pref_speed: Some(2.0),
                time_horizon: UniformRange::new(5.0, 5.0),
                neighbor_distance: UniformRange::new(15.0, 15.0),
                strategy_duration: UniformRange::new(0.5, 0.5),
                ..AgentProfile::default()
            },
            ..SimulationConfig::default()
        }
    }

    fn world(config: SimulationConfig, spawns: Vec<AgentSpawn>) -> SimulationWorld {
        SimulationWorld::new(Scenario {
            config,
            agents: spawns,
        })
        .unwrap()
    }

    fn head_on() -> Vec<AgentSpawn> {
        vec![
            AgentSpawn::new(Point::new(-10.0, 0.0), Point::new(10.0, 0.0)),
            AgentSpawn::new(Point::new(10.0, 0.1), Point::new(-10.0, 0.1)),
        ]
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct CountingSink(Arc<Mutex<(usize, usize)>>);

    impl StatisticsSink for CountingSink {
        fn agent_finished(&mut self, _report: &AgentReport) {
            self.0.lock().unwrap().0 += 1;
        }

        fn run_finished(&mut self, _summary: &RunSummary) {
            self.0.lock().unwrap().1 += 1;
        }
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_empty_routes_rejected() {
        let result = SimulationWorld::with_routes(config(), Vec::new());
        assert!(matches!(result, Err(SimulationError::EmptyScenario)));
    }

    #[test]
    fn test_routes_checked_against_world_area() {
        let mut config = config();
        config.world = WorldBounds {
            center: [0.0, 0.0, 0.0],
            dimensions: [1.0, 0.0, 1.0],
            divisions: [1, 1, 1],
        };
        let routes: Vec<(Point, Box<dyn WaypointSource>)> = (0..10)
            .map(|i| {
                let source: Box<dyn WaypointSource> =
                    Box::new(WaypointQueue::single(Point::new(0.0, 5.0)));
                (Point::new(i as f64 * 0.1, 0.0), source)
            })
            .collect();
        let result = SimulationWorld::with_routes(config, routes);
        assert!(
            matches!(result, Err(SimulationError::WorldTooSmall { agents: 10, .. })),
            "Routes get the same capacity check as scenarios"
        );
    }

    #[test]
    fn test_pool_covers_every_agent() {
        let mut config = config();
        config.virtual_agent_pool_size = 1;
        let world = world(config, head_on());
        assert_eq!(
            world.pool.capacity(),
            2,
            "Each observer can hold at least one group in view"
        );
    }

    #[test]
    fn test_same_seed_same_world() {
        let a = world(config(), head_on());
        let b = world(config(), head_on());
        let params_a: Vec<_> = a.agents().iter().map(|agent| agent.params).collect();
        let params_b: Vec<_> = b.agents().iter().map(|agent| agent.params).collect();
        assert_eq!(params_a, params_b);
    }

    // ==================== Stepping Tests ====================

    #[test]
    fn test_lone_agent_reaches_goal_in_time() {
        let mut w = world(
            config(),
            vec![AgentSpawn::new(Point::ORIGIN, Point::new(10.0, 0.0))],
        );
        let bound = (10.0_f64 / 2.0 / 0.01).ceil() as u64;
        while !w.is_finished() && w.tick() <= bound {
            w.step();
        }
        assert!(w.is_finished(), "Agent should arrive within {} ticks", bound);

        let report = w.reports()[0];
        assert_relative_eq!(report.travel_time, w.time(), epsilon = 1e-9);
        assert!(report.distance > 9.4 && report.distance < 9.6);
        assert!(report.mean_kinetic_energy > 0.0);
        assert_eq!(w.step(), 0, "Stepping a finished world is a no-op");
    }

    #[test]
    fn test_speed_never_exceeds_preference() {
        let mut rng = StdRng::seed_from_u64(99);
        let spawns: Vec<AgentSpawn> = (0..16)
            .map(|_| {
                let angle = rng.gen_range(0.0..std::f64::consts::TAU);
                let start = Point::new(8.0 * angle.cos(), 8.0 * angle.sin());
                let goal = Point::new(-start.x, -start.y);
                AgentSpawn::new(start, goal)
            })
            .collect();
        let mut cfg = config();
        cfg.agent.fixed_pref_speed = None;
        let mut w = world(cfg, spawns);

        for _ in 0..600 {
            w.step();
            for agent in w.agents() {
                let speed = agent.velocity.magnitude();
                assert!(
                    speed <= agent.params.pref_speed * (1.0 + 1e-9),
                    "agent {} at speed {} above {}",
                    agent.id,
                    speed,
                    agent.params.pref_speed
                );
            }
        }
    }

    #[test]
    fn test_strategy_held_for_its_duration() {
        let mut w = world(config(), head_on());
        let hold = (0.5_f64 / 0.01) as u64 - 1;
        let mut committed_at: Option<(Strategy, u64)> = None;
        let mut saw_strategy = false;

        for _ in 0..600 {
            w.step();
            let strategy = w.agents()[0].strategy;
            saw_strategy |= strategy != Strategy::None;
            match committed_at {
                Some((current, since)) if current != strategy => {
                    if current != Strategy::None {
                        assert!(
                            w.tick() - since >= hold,
                            "{:?} dropped after {} ticks",
                            current,
                            w.tick() - since
                        );
                    }
                    committed_at = Some((strategy, w.tick()));
                }
                None => committed_at = Some((strategy, w.tick())),
                _ => {}
            }
            if w.is_finished() {
                break;
            }
        }
        assert!(saw_strategy, "A head-on encounter commits to a strategy");
    }

    #[test]
    fn test_grid_tracks_positions_in_both_orders() {
        for order in [UpdateOrder::Simultaneous, UpdateOrder::Sequential] {
            let mut cfg = config();
            cfg.update_order = order;
            let mut w = world(cfg, head_on());
            for _ in 0..50 {
                w.step();
                for agent in w.agents() {
                    let mut found = Vec::new();
                    w.database
                        .find_neighbors(ground_to_world(agent.position), 1e-6, &mut found);
                    assert!(
                        found.contains(&agent.id),
                        "{:?}: agent {} missing from the grid",
                        order,
                        agent.id
                    );
                }
            }
        }
    }

    #[test]
    fn test_simultaneous_agents_steer_on_start_of_tick_state() {
        let mut w = world(config(), head_on());
        w.step();
        // Snapshots are taken before anyone moves
        assert_eq!(w.snapshots[1].position, Point::new(10.0, 0.1));
        assert_eq!(w.snapshots[1].velocity, Vector2D::ZERO);

        let mut cfg = config();
        cfg.update_order = UpdateOrder::Sequential;
        let mut w = world(cfg, head_on());
        w.step();
        assert_eq!(w.snapshots[1].position, w.agents()[1].position);
    }

    #[test]
    fn test_identical_runs_are_reproducible() {
        let run = || {
            let mut w = world(config(), head_on());
            for _ in 0..300 {
                w.step();
            }
            w.positions()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_waypoints_visited_in_order() {
        let mut spawn = AgentSpawn::new(Point::ORIGIN, Point::new(5.0, 0.0));
        spawn.waypoints = vec![Point::new(5.0, 5.0)];
        let mut w = world(config(), vec![spawn]);
        let mut max_x: f64 = 0.0;
        while !w.is_finished() && w.tick() < 2_000 {
            w.step();
            max_x = max_x.max(w.agents()[0].position.x);
        }
        let agent = &w.agents()[0];
        assert!(agent.is_finished());
        assert_eq!(agent.goal, Point::new(5.0, 5.0));
        assert!(agent.position.distance(&Point::new(5.0, 5.0)) <= 0.5 + 1e-9);
        assert!(max_x > 3.5, "The detour through the first waypoint was taken");
    }

    // ==================== Run Control Tests ====================

    #[test]
    fn test_summary_emitted_once() {
        let sink = CountingSink::default();
        let mut w = world(config(), head_on());
        w.set_statistics_sink(sink.clone());
        let summary = w.run(&mut FixedTicks::new(3_000));
        for _ in 0..5 {
            w.step();
        }
        w.force_finish();

        assert!(summary.is_some());
        assert_eq!(*sink.0.lock().unwrap(), (2, 1));
        assert_eq!(summary.map(|s| s.agents), Some(2));
    }

    #[test]
    fn test_fixed_ticks_force_finishes() {
        let mut w = world(
            config(),
            vec![AgentSpawn::new(Point::ORIGIN, Point::new(100.0, 0.0))],
        );
        let summary = w.run(&mut FixedTicks::new(10)).unwrap();
        assert_eq!(w.tick(), 10);
        assert!(w.is_finished());
        assert_relative_eq!(summary.total_time, 0.1, epsilon = 1e-12);
        assert_relative_eq!(summary.mean_distance, 0.2, epsilon = 1e-9);
    }

    // ==================== Recording Tests ====================

    #[test]
    fn test_recorded_run_plays_back() {
        let buffer = SharedBuffer::default();
        let mut w = world(config(), head_on());
        w.set_recorder(TrajectoryWriter::new(buffer.clone()));
        for _ in 0..20 {
            w.step();
        }
        w.close_recording().unwrap();

        let bytes = buffer.0.lock().unwrap().clone();
        let mut playback = Playback::from_reader(io::Cursor::new(bytes)).unwrap();
        assert_eq!(playback.frames().len(), 20);
        while playback.advance().is_some() {}
        assert_eq!(playback.positions(), w.positions().as_slice());
        assert_eq!(playback.velocities(), w.velocities().as_slice());
    }

    #[test]
    fn test_recording_failure_surfaces_on_close() {
        let mut w = world(config(), head_on());
        w.set_recorder(TrajectoryWriter::new(BrokenPipe));
        w.step();
        w.step();
        assert!(w.close_recording().is_err());
        assert!(w.close_recording().is_ok(), "The error is reported once");
    }
}
