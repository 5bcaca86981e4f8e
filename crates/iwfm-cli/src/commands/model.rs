//! Model command - query or step the configured scenario

use super::{print_json, Context};
use anyhow::{bail, Context as _, Result};
use clap::{Args, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use iwfm_runtime::model::{ModelHandle, ModelInputs, SimulationClock, TimeSpecs};
use iwfm_runtime::IwfmError;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ModelCommand {
    /// Show the size and simulation period of the scenario
    ///
    /// Opens the model for inquiry only; nothing is simulated.
    Info {
        #[command(flatten)]
        inputs: InputArgs,
    },

    /// Step the simulation
    Run {
        #[command(flatten)]
        inputs: InputArgs,
        /// Stop after this many steps (default: run to the end)
        #[arg(long, short = 'n')]
        steps: Option<u64>,
    },
}

/// Scenario input files, overriding the [model] table of iwfm.toml
#[derive(Args)]
pub struct InputArgs {
    /// Preprocessor main input file
    #[arg(long, requires = "simulation")]
    preprocessor: Option<PathBuf>,
    /// Simulation main input file
    #[arg(long, requires = "preprocessor")]
    simulation: Option<PathBuf>,
}

impl InputArgs {
    fn resolve(self, ctx: &Context) -> Result<ModelInputs> {
        if let (Some(pp), Some(sim)) = (self.preprocessor, self.simulation) {
            return Ok(ModelInputs::new(pp, sim));
        }
        match ctx.settings.model() {
            Some(model) => Ok(model.into()),
            None => bail!(
                "No model configured: pass --preprocessor and --simulation, \
                 or add a [model] table to iwfm.toml"
            ),
        }
    }
}

pub fn run(ctx: &Context, command: ModelCommand) -> Result<()> {
    match command {
        ModelCommand::Info { inputs } => info(ctx, inputs.resolve(ctx)?.for_inquiry(true)),
        ModelCommand::Run { inputs, steps } => simulate(ctx, inputs.resolve(ctx)?.for_inquiry(false), steps),
    }
}

#[derive(Debug, Serialize)]
struct ModelSummary {
    nodes: usize,
    layers: usize,
    subregions: Vec<i32>,
    stream_nodes: usize,
    period: TimeSpecs,
}

fn open(ctx: &Context, inputs: ModelInputs) -> Result<ModelHandle> {
    let binding = ctx.open_binding()?;
    ModelHandle::open(binding, inputs.clone()).with_context(|| {
        format!(
            "Failed to instantiate model from {} and {}",
            inputs.preprocessor.display(),
            inputs.simulation.display()
        )
    })
}

fn info(ctx: &Context, inputs: ModelInputs) -> Result<()> {
    let mut model = open(ctx, inputs)?;
    let summary = ModelSummary {
        nodes: model.node_count()?,
        layers: model.layer_count()?,
        subregions: model.subregion_ids()?,
        stream_nodes: model.stream_node_count()?,
        period: model.time_specs()?,
    };
    model.release()?;

    if ctx.json {
        return print_json(&summary);
    }
    println!("Nodes:        {}", summary.nodes);
    println!("Layers:       {}", summary.layers);
    println!("Subregions:   {} {:?}", summary.subregions.len(), summary.subregions);
    println!("Stream nodes: {}", summary.stream_nodes);
    println!(
        "Period:       {} to {} every {}",
        summary.period.begin, summary.period.end, summary.period.interval
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct RunReport {
    steps: Vec<SimulationClock>,
    completed: bool,
}

fn simulate(ctx: &Context, inputs: ModelInputs, limit: Option<u64>) -> Result<()> {
    let mut model = open(ctx, inputs)?;

    let progress = if ctx.progress && !ctx.json {
        let bar = match limit {
            Some(n) => ProgressBar::new(n),
            None => ProgressBar::new_spinner(),
        };
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {pos} steps {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Some(bar)
    } else {
        None
    };

    let mut steps = Vec::new();
    let mut completed = false;
    while limit.map_or(true, |n| (steps.len() as u64) < n) {
        match model.advance_step() {
            Ok(clock) => {
                if let Some(bar) = &progress {
                    bar.inc(1);
                    if let Some(time) = clock.timestamp {
                        bar.set_message(time.to_string());
                    }
                }
                steps.push(clock);
            }
            Err(IwfmError::SimulationComplete) => {
                completed = true;
                break;
            }
            Err(e) => {
                if let Some(bar) = &progress {
                    bar.abandon();
                }
                return Err(e).with_context(|| format!("Simulation failed after {} steps", steps.len()));
            }
        }
    }
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    model.release()?;

    let report = RunReport { steps, completed };
    if ctx.json {
        return print_json(&report);
    }
    for clock in &report.steps {
        match clock.timestamp {
            Some(time) => println!("{:>6}  {}", clock.step, time),
            None => println!("{:>6}", clock.step),
        }
    }
    if report.completed {
        println!("Simulation complete after {} steps", report.steps.len());
    }
    Ok(())
}
