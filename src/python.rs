//! Python bindings. Built with `--features python`.

use crate::config::Scenario;
use crate::engine::{FixedTicks, SimulationWorld};
use crate::error::SimulationError;
use crate::recording::RunSummary;
use crate::structs::{Point, Vector2D};
use crate::ttc;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::collections::HashMap;

impl From<SimulationError> for PyErr {
    fn from(err: SimulationError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

fn summary_dict(summary: &RunSummary) -> HashMap<&'static str, f64> {
    HashMap::from([
        ("mean_travel_time", summary.mean_travel_time),
        ("mean_distance", summary.mean_distance),
        ("mean_kinetic_energy", summary.mean_kinetic_energy),
        ("total_time", summary.total_time),
        ("agents", summary.agents as f64),
    ])
}

#[pyfunction]
fn time_to_collision(
    pos_a: (f64, f64),
    vel_a: (f64, f64),
    radius_a: f64,
    pos_b: (f64, f64),
    vel_b: (f64, f64),
    radius_b: f64,
) -> f64 {
    ttc::time_to_collision(
        Point::new(pos_a.0, pos_a.1),
        Vector2D::new(vel_a.0, vel_a.1),
        radius_a,
        Point::new(pos_b.0, pos_b.1),
        Vector2D::new(vel_b.0, vel_b.1),
        radius_b,
    )
}

/// A running simulation, stepped from Python.
#[pyclass(unsendable)]
struct Simulation {
    world: SimulationWorld,
}

#[pymethods]
impl Simulation {
    #[new]
    fn new(scenario_json: &str) -> PyResult<Self> {
        let scenario = Scenario::from_json_str(scenario_json)?;
        Ok(Simulation {
            world: SimulationWorld::new(scenario)?,
        })
    }

    #[staticmethod]
    fn from_file(path: &str) -> PyResult<Self> {
        let scenario = Scenario::from_path(path)?;
        Ok(Simulation {
            world: SimulationWorld::new(scenario)?,
        })
    }

    /// Advances one tick; returns how many agents finished during it.
    fn step(&mut self) -> usize {
        self.world.step()
    }

    /// Runs up to `max_ticks` ticks, force-finishing whoever is left.
    fn run(&mut self, max_ticks: u64) -> Option<HashMap<&'static str, f64>> {
        self.world
            .run(&mut FixedTicks::new(max_ticks))
            .as_ref()
            .map(summary_dict)
    }

    fn force_finish(&mut self) {
        self.world.force_finish();
    }

    fn positions(&self) -> Vec<(f64, f64)> {
        self.world.positions().iter().map(|p| (p.x, p.y)).collect()
    }

    fn velocities(&self) -> Vec<(f64, f64)> {
        self.world.velocities().iter().map(|v| (v.x, v.y)).collect()
    }

    fn finished(&self) -> Vec<bool> {
        self.world.agents().iter().map(|a| a.is_finished()).collect()
    }

    fn summary(&self) -> Option<HashMap<&'static str, f64>> {
        self.world.summary().map(summary_dict)
    }

    #[getter]
    fn tick(&self) -> u64 {
        self.world.tick()
    }

    #[getter]
    fn time(&self) -> f64 {
        self.world.time()
    }

    #[getter]
    fn is_done(&self) -> bool {
        self.world.is_finished()
    }
}

#[pymodule]
fn anticipatory_crowd(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<Simulation>()?;
    m.add_function(wrap_pyfunction!(time_to_collision, m)?)?;
    Ok(())
}
