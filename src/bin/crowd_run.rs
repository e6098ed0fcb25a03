use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anticipatory_crowd::{
    FixedTicks, Playback, Scenario, SimulationWorld, TrajectoryReader, TrajectoryWriter,
    UntilArrival,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;

#[derive(Parser, Debug)]
#[command(
    name = "crowd_run",
    version,
    about = "Run anticipatory crowd scenarios and replay their trajectories"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate a scenario file until every agent arrives or the tick limit is hit.
    Run {
        /// Scenario JSON (configuration plus agent spawns).
        #[arg(short, long)]
        scenario: PathBuf,
        /// Force-finish the run after this many ticks.
        #[arg(long)]
        ticks: Option<u64>,
        /// Write per-tick agent states here as JSON lines.
        #[arg(long)]
        trajectories: Option<PathBuf>,
        /// Write the run summary and agent reports here as JSON.
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Override the scenario's random seed.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Replay a recorded trajectory file and print the final positions.
    Replay {
        /// JSON-lines file written by `run --trajectories`.
        trajectories: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            scenario,
            ticks,
            trajectories,
            summary,
            seed,
        } => run_command(scenario, ticks, trajectories, summary, seed),
        Command::Replay { trajectories } => replay_command(trajectories),
    }
}

fn run_command(
    scenario_path: PathBuf,
    ticks: Option<u64>,
    trajectories: Option<PathBuf>,
    summary_path: Option<PathBuf>,
    seed: Option<u64>,
) -> Result<()> {
    let mut scenario = Scenario::from_path(&scenario_path)
        .with_context(|| format!("failed to load scenario {}", scenario_path.display()))?;
    if let Some(seed) = seed {
        scenario.config.seed = seed;
    }

    let mut world = SimulationWorld::new(scenario).context("failed to build the world")?;
    if let Some(path) = &trajectories {
        let writer = TrajectoryWriter::create(path)
            .with_context(|| format!("failed to create trajectory file {}", path.display()))?;
        world.set_recorder(writer);
    }

    let summary = match ticks {
        Some(ticks) => world.run(&mut FixedTicks::new(ticks)),
        None => world.run(&mut UntilArrival),
    };
    world
        .close_recording()
        .context("failed to record trajectories")?;

    let Some(summary) = summary else {
        log::warn!("run stopped before any agent finished");
        return Ok(());
    };
    println!(
        "{} agents, total {:.2}s, mean travel time {:.2}s, mean distance {:.2}m, mean kinetic energy {:.2}",
        summary.agents,
        summary.total_time,
        summary.mean_travel_time,
        summary.mean_distance,
        summary.mean_kinetic_energy
    );

    if let Some(path) = summary_path {
        let file = File::create(&path)
            .with_context(|| format!("failed to create summary file {}", path.display()))?;
        let report = serde_json::json!({
            "summary": summary,
            "agents": world.reports(),
        });
        serde_json::to_writer_pretty(BufWriter::new(file), &report)
            .context("failed to write summary")?;
    }
    Ok(())
}

fn replay_command(path: PathBuf) -> Result<()> {
    let reader = TrajectoryReader::open(&path)
        .with_context(|| format!("failed to open trajectory file {}", path.display()))?;
    let mut playback = Playback::from_records(reader)
        .with_context(|| format!("failed to parse trajectory file {}", path.display()))?;

    let mut last_tick = 0;
    while let Some(tick) = playback.advance() {
        last_tick = tick;
    }
    println!(
        "{} frames, last tick {}",
        playback.frames().len(),
        last_tick
    );
    for (agent, (position, velocity)) in playback
        .positions()
        .iter()
        .zip(playback.velocities())
        .enumerate()
    {
        println!("agent {:>4}: {} {}", agent, position, velocity);
    }
    Ok(())
}
