//! Open-Loop Trajectory Demonstration
//!
//! Solves one reference scenario, plays the optimal controls back through
//! the model and writes both trajectories as JSON for external plotting.
//!
//! ```text
//! cargo run --example open_loop -- rocket-climb-and-translate -o rocket.json
//! RUST_LOG=debug cargo run --example open_loop -- drone-lift --config drone.json
//! ```

use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use planar_core::DynamicsModel;
use planar_planner::{OcpConfig, OcpConfigParams, Scenario, SolveStatistics, TrajectoryOptimizer};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScenarioName {
    RocketClimbAndTranslate,
    RocketVerticalHop,
    DroneLift,
}

/// Solve a planar OCP once and simulate its controls open loop
#[derive(Parser)]
#[command(name = "open_loop", about, long_about = None)]
struct Args {
    /// Scenario to solve
    #[arg(value_enum, default_value = "rocket-climb-and-translate")]
    scenario: ScenarioName,

    /// OCP configuration JSON replacing the scenario preset
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output JSON path
    #[arg(short, long, default_value = "open_loop.json")]
    output: PathBuf,
}

/// Everything a plotting script needs
#[derive(Serialize)]
struct Report {
    scenario: &'static str,
    model: String,
    sampling_time: f64,
    goal: Vec<f64>,
    times: Vec<f64>,
    planned_states: Vec<Vec<f64>>,
    controls: Vec<Vec<f64>>,
    simulated_states: Vec<Vec<f64>>,
    statistics: Option<SolveStatistics>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let report = match args.scenario {
        ScenarioName::RocketClimbAndTranslate => {
            run(Scenario::rocket_climb_and_translate()?, args.config.as_deref())?
        }
        ScenarioName::RocketVerticalHop => {
            run(Scenario::rocket_vertical_hop()?, args.config.as_deref())?
        }
        ScenarioName::DroneLift => run(Scenario::drone_lift()?, args.config.as_deref())?,
    };

    let writer = BufWriter::new(File::create(&args.output)?);
    serde_json::to_writer_pretty(writer, &report)?;
    info!(path = %args.output.display(), "Trajectories written");

    Ok(())
}

fn run<M: DynamicsModel>(
    mut scenario: Scenario<M>,
    config_path: Option<&Path>,
) -> Result<Report, Box<dyn Error>> {
    if let Some(path) = config_path {
        let params: OcpConfigParams = serde_json::from_reader(File::open(path)?)?;
        scenario.config = Arc::new(OcpConfig::try_from(params)?);
        info!(path = %path.display(), "Loaded OCP configuration");
    }

    let mut optimizer = TrajectoryOptimizer::new(Arc::clone(&scenario.model), Arc::clone(&scenario.config))?;
    optimizer.setup()?;

    info!(
        scenario = scenario.name,
        model = scenario.model.name(),
        horizon = scenario.config.horizon(),
        "Solving"
    );
    let u0 = optimizer.solve(&scenario.initial_state, &scenario.goal)?;

    let statistics = optimizer.statistics().cloned();
    if let Some(stats) = &statistics {
        info!(
            iterations = stats.iterations,
            qp_iterations = stats.qp_iterations,
            objective = stats.objective,
            solve_time_ms = stats.solve_time.as_secs_f64() * 1e3,
            first_control = ?u0.as_slice(),
            "Solved"
        );
    }

    let Some(trajectory) = optimizer.trajectory() else {
        return Err("optimizer returned without a trajectory".into());
    };
    let simulated = scenario
        .model
        .simulate_open_loop(&scenario.initial_state, trajectory.controls())?;

    let planned_end = trajectory.terminal_state();
    let simulated_end = &simulated[simulated.len() - 1];
    info!(
        planned_terminal = ?planned_end.as_slice(),
        simulated_terminal = ?simulated_end.as_slice(),
        drift = (planned_end - simulated_end).amax(),
        "Open-loop playback"
    );

    let rows = |vectors: &[nalgebra::DVector<f64>]| -> Vec<Vec<f64>> {
        vectors.iter().map(|v| v.as_slice().to_vec()).collect()
    };

    Ok(Report {
        scenario: scenario.name,
        model: scenario.model.name().to_string(),
        sampling_time: scenario.config.sampling_time(),
        goal: scenario.goal.as_slice().to_vec(),
        times: trajectory.times(scenario.config.sampling_time()),
        planned_states: rows(trajectory.states()),
        controls: rows(trajectory.controls()),
        simulated_states: rows(&simulated),
        statistics,
    })
}
