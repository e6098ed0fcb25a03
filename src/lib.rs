//! # Anticipatory Crowd
//!
//! A pedestrian crowd simulator built on anticipatory collision avoidance.
//! Each agent predicts the time to collision with its neighbours and with
//! groups it perceives as a single body, then commits to one avoidance
//! strategy for a while instead of reacting afresh every tick.
//!
//! ## Modules
//!
//! - **Geometry**: points, vectors, angles and line/circle helpers.
//! - **Proximity**: a uniform-grid spatial index for neighbour queries.
//! - **TTC**: closed-form disc-disc time to collision.
//! - **Behaviours**: seek, decelerate, change direction, follow and the
//!   anticipatory force model.
//! - **Strategy**: encounter classification and the committed-strategy
//!   state machine.
//! - **Groups**: group detection and the virtual agent an observer sees.
//! - **Engine**: the fixed-step world loop with trajectory recording and
//!   travel statistics.
//!
//! ## Usage
//!
//! Load a [`Scenario`] from JSON, build a [`SimulationWorld`] and call
//! [`SimulationWorld::run`], or drive it tick by tick with
//! [`SimulationWorld::step`]. The `crowd_run` binary wraps this for the
//! command line; the `python` feature exposes the same loop through PyO3.

pub mod agent;
pub mod behaviours;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod groups;
pub mod proximity;
pub mod recording;
pub mod strategy;
pub mod structs;
pub mod ttc;
pub mod waypoints;

#[cfg(feature = "python")]
mod python;

pub use agent::{Agent, AgentSnapshot, Body, TurnBias, VirtualAgent, VirtualAgentPool};
pub use config::{AgentSpawn, Scenario, SimulationConfig, UpdateOrder};
pub use engine::{FixedTicks, RunController, SimulationWorld, UntilArrival};
pub use error::SimulationError;
pub use proximity::{BruteForceDatabase, LocationGrid, ProximityDatabase, WorldBounds};
pub use recording::{
    AgentReport, Playback, RunSummary, StatisticsSink, StatsCollector, TrajectoryReader,
    TrajectoryRecord, TrajectoryRecorder, TrajectoryWriter,
};
pub use strategy::{Encounter, Strategy};
pub use structs::{Line, Point, Vector2D};
pub use ttc::time_to_collision;
pub use waypoints::{WaypointQueue, WaypointSource};
