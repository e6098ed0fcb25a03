//! # Recording and Statistics
//!
//! Two sinks hang off the simulation loop:
//!
//! - **Trajectories**: one [`TrajectoryRecord`] per agent per tick, written
//!   as JSON lines. [`TrajectoryReader`] parses the stream back and
//!   [`Playback`] replays it frame by frame.
//! - **Statistics**: one [`AgentReport`] per finished agent and a single
//!   [`RunSummary`] once the run is over.

use crate::error::SimulationError;
use crate::structs::{Point, Vector2D};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;

/// State of one agent after one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub tick: u64,
    pub agent: usize,
    pub position: Point,
    pub velocity: Vector2D,
}

pub trait TrajectoryRecorder: Send {
    fn record(&mut self, record: &TrajectoryRecord) -> Result<(), SimulationError>;

    fn flush(&mut self) -> Result<(), SimulationError> {
        Ok(())
    }
}

/// JSON-lines trajectory writer.
#[derive(Debug)]
pub struct TrajectoryWriter<W: Write> {
    writer: W,
}

impl<W: Write> TrajectoryWriter<W> {
    pub fn new(writer: W) -> Self {
        TrajectoryWriter { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl TrajectoryWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SimulationError> {
        Ok(TrajectoryWriter::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> TrajectoryRecorder for TrajectoryWriter<W> {
    fn record(&mut self, record: &TrajectoryRecord) -> Result<(), SimulationError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SimulationError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Parses a JSON-lines trajectory stream. Blank lines are skipped; ticks
/// must never decrease.
pub struct TrajectoryReader<R> {
    lines: Lines<R>,
    line: usize,
    last_tick: Option<u64>,
}

impl<R: BufRead> TrajectoryReader<R> {
    pub fn new(reader: R) -> Self {
        TrajectoryReader {
            lines: reader.lines(),
            line: 0,
            last_tick: None,
        }
    }
}

impl TrajectoryReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SimulationError> {
        Ok(TrajectoryReader::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> Iterator for TrajectoryReader<R> {
    type Item = Result<TrajectoryRecord, SimulationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }

            let record: TrajectoryRecord = match serde_json::from_str(&text) {
                Ok(record) => record,
                Err(e) => {
                    return Some(Err(SimulationError::MalformedTrajectory {
                        line: self.line,
                        reason: e.to_string(),
                    }))
                }
            };
            if let Some(last) = self.last_tick {
                if record.tick < last {
                    return Some(Err(SimulationError::MalformedTrajectory {
                        line: self.line,
                        reason: format!("tick {} after tick {}", record.tick, last),
                    }));
                }
            }
            self.last_tick = Some(record.tick);
            return Some(Ok(record));
        }
    }
}

/// Every record of one tick, in recorded order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub tick: u64,
    pub records: Vec<TrajectoryRecord>,
}

/// Replays a recorded run onto a set of agent positions.
#[derive(Debug, Clone)]
pub struct Playback {
    frames: Vec<Frame>,
    cursor: usize,
    positions: Vec<Point>,
    velocities: Vec<Vector2D>,
}

impl Playback {
    pub fn from_records<I>(records: I) -> Result<Self, SimulationError>
    where
        I: IntoIterator<Item = Result<TrajectoryRecord, SimulationError>>,
    {
        let mut frames: Vec<Frame> = Vec::new();
        let mut agent_count = 0;
        for record in records {
            let record = record?;
            agent_count = agent_count.max(record.agent + 1);
            match frames.last_mut() {
                Some(frame) if frame.tick == record.tick => frame.records.push(record),
                _ => frames.push(Frame {
                    tick: record.tick,
                    records: vec![record],
                }),
            }
        }

        Ok(Playback {
            frames,
            cursor: 0,
            positions: vec![Point::ORIGIN; agent_count],
            velocities: vec![Vector2D::ZERO; agent_count],
        })
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, SimulationError> {
        Self::from_records(TrajectoryReader::new(reader))
    }

    /// Applies the next frame and returns its tick.
    pub fn advance(&mut self) -> Option<u64> {
        let frame = self.frames.get(self.cursor)?;
        for record in &frame.records {
            self.positions[record.agent] = record.position;
            self.velocities[record.agent] = record.velocity;
        }
        self.cursor += 1;
        Some(frame.tick)
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.positions.fill(Point::ORIGIN);
        self.velocities.fill(Vector2D::ZERO);
    }

    pub fn positions(&self) -> &[Point] {
        &self.positions
    }

    pub fn velocities(&self) -> &[Vector2D] {
        &self.velocities
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.frames.len()
    }
}

/// Travel statistics of one agent, emitted when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub id: usize,
    pub travel_time: f64,
    pub distance: f64,
    pub mean_kinetic_energy: f64,
}

/// Aggregate statistics of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub mean_travel_time: f64,
    pub mean_distance: f64,
    pub mean_kinetic_energy: f64,
    /// Travel time of the last agent to finish.
    pub total_time: f64,
    pub agents: usize,
}

impl RunSummary {
    /// Summary over `reports` in finishing order. `None` when empty.
    pub fn from_reports(reports: &[AgentReport]) -> Option<Self> {
        let last = reports.last()?;
        let n = reports.len() as f64;
        let (time, distance, energy) = reports.iter().fold((0.0, 0.0, 0.0), |acc, r| {
            (
                acc.0 + r.travel_time,
                acc.1 + r.distance,
                acc.2 + r.mean_kinetic_energy,
            )
        });
        Some(RunSummary {
            mean_travel_time: time / n,
            mean_distance: distance / n,
            mean_kinetic_energy: energy / n,
            total_time: last.travel_time,
            agents: reports.len(),
        })
    }
}

pub trait StatisticsSink: Send {
    fn agent_finished(&mut self, report: &AgentReport);

    fn run_finished(&mut self, summary: &RunSummary);
}

/// Keeps every report and the final summary in memory.
#[derive(Debug, Clone, Default)]
pub struct StatsCollector {
    reports: Vec<AgentReport>,
    summary: Option<RunSummary>,
}

impl StatsCollector {
    pub fn new() -> Self {
        StatsCollector::default()
    }

    pub fn reports(&self) -> &[AgentReport] {
        &self.reports
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }
}

impl StatisticsSink for StatsCollector {
    fn agent_finished(&mut self, report: &AgentReport) {
        self.reports.push(*report);
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        self.summary = Some(*summary);
    }
}
