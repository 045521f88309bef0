//! Command-line driver: run a JSON scenario, print query tables, and
//! save or resume simulation snapshots.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clonesim_core::{
    CellEventKind, CellQuery, EpigeneticRates, MutantDescriptor, Position, Rectangle, Simulation,
    SimulationConfig, StateRates,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "clonesim", about = "Spatial stochastic simulator of clonal evolution")]
struct AppCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a scenario file and print its query tables as JSON.
    Run {
        /// Path of the JSON scenario.
        #[arg(long)]
        scenario: PathBuf,
        /// Override the scenario's RNG seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Save a snapshot of the final state here.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Resume a snapshot, run further, and print its query tables.
    Resume {
        /// Path of a snapshot produced by `run --snapshot`.
        #[arg(long)]
        snapshot: PathBuf,
        /// Additional simulated time to run for.
        #[arg(long)]
        time: f64,
        /// Save the continued state back to this path.
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

/// Scenario file: setup plus one stop condition.
#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    tissue: Option<TissueSpec>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    death_activation_level: Option<u64>,
    #[serde(default)]
    duplicate_internal_cells: Option<bool>,
    #[serde(default)]
    history_delta: Option<f64>,
    mutants: Vec<MutantSpec>,
    placements: Vec<PlacementSpec>,
    #[serde(default)]
    scheduled_mutations: Vec<ScheduledMutationSpec>,
    run: RunSpec,
    #[serde(default)]
    samples: Vec<SampleSpec>,
}

#[derive(Debug, Deserialize)]
struct TissueSpec {
    #[serde(default)]
    name: Option<String>,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct MutantSpec {
    name: String,
    #[serde(default)]
    epigenetic_rates: Option<EpigeneticRatesSpec>,
    #[serde(default)]
    growth_rate: Option<f64>,
    #[serde(default)]
    death_rate: Option<f64>,
    #[serde(default)]
    growth_rates: Option<StateRatesSpec>,
    #[serde(default)]
    death_rates: Option<StateRatesSpec>,
}

#[derive(Debug, Deserialize)]
struct EpigeneticRatesSpec {
    minus_to_plus: f64,
    plus_to_minus: f64,
}

#[derive(Debug, Deserialize)]
struct StateRatesSpec {
    plus: f64,
    minus: f64,
}

#[derive(Debug, Deserialize)]
struct PlacementSpec {
    species: String,
    x: u32,
    y: u32,
}

#[derive(Debug, Deserialize)]
struct ScheduledMutationSpec {
    source: String,
    destination: String,
    time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RunSpec {
    Time { time: f64 },
    Size { species: String, target: u64 },
    Event { event: String, species: String, target: u64 },
}

#[derive(Debug, Deserialize)]
struct SampleSpec {
    name: String,
    lower: [u32; 2],
    upper: [u32; 2],
}

/// Everything printed after a run.
#[derive(Debug, Serialize)]
struct Report {
    seed: u64,
    clock: f64,
    species: Vec<clonesim_core::SpeciesRow>,
    counts: Vec<clonesim_core::CountRow>,
    lineage_graph: Vec<clonesim_core::LineageEdgeRow>,
    firings: Vec<clonesim_core::FiringRow>,
    samples_info: Vec<clonesim_core::SampleInfoRow>,
    cells: usize,
}

fn main() -> Result<()> {
    init_tracing();
    match AppCli::parse().command {
        Command::Run { scenario, seed, snapshot } => run_scenario(&scenario, seed, snapshot.as_deref()),
        Command::Resume { snapshot, time, save } => resume_snapshot(&snapshot, time, save.as_deref()),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn run_scenario(path: &Path, seed_override: Option<u64>, snapshot: Option<&Path>) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    let scenario: Scenario =
        serde_json::from_str(&text).with_context(|| format!("parsing scenario {}", path.display()))?;

    let mut sim = build_simulation(&scenario, seed_override)?;
    info!(seed = sim.seed(), tissue = ?sim.tissue_size(), "scenario loaded");

    execute_run(&mut sim, &scenario.run)?;
    for sample in &scenario.samples {
        let region = Rectangle::new(
            Position::new(sample.lower[0], sample.lower[1]),
            Position::new(sample.upper[0], sample.upper[1]),
        )?;
        sim.sample_cells(&sample.name, region)?;
    }

    if let Some(snapshot_path) = snapshot {
        clonesim_storage::save(&sim, snapshot_path)
            .with_context(|| format!("saving snapshot {}", snapshot_path.display()))?;
    }
    print_report(&sim)
}

fn resume_snapshot(path: &Path, extra_time: f64, save: Option<&Path>) -> Result<()> {
    if extra_time < 0.0 {
        bail!("--time must be non-negative");
    }
    let mut sim = clonesim_storage::load(path)
        .with_context(|| format!("loading snapshot {}", path.display()))?;
    info!(seed = sim.seed(), clock = sim.clock(), "snapshot recovered");

    sim.run_up_to_time(sim.clock() + extra_time)?;
    if let Some(save_path) = save {
        clonesim_storage::save(&sim, save_path)
            .with_context(|| format!("saving snapshot {}", save_path.display()))?;
    }
    print_report(&sim)
}

fn build_simulation(scenario: &Scenario, seed_override: Option<u64>) -> Result<Simulation> {
    let mut config = SimulationConfig::default();
    if let Some(tissue) = &scenario.tissue {
        if let Some(name) = &tissue.name {
            config.tissue_name.clone_from(name);
        }
        config.width = tissue.width;
        config.height = tissue.height;
    }
    config.rng_seed = seed_override.or(scenario.seed);
    if let Some(level) = scenario.death_activation_level {
        config.death_activation_level = level;
    }
    if let Some(internal) = scenario.duplicate_internal_cells {
        config.duplicate_internal_cells = internal;
    }
    if let Some(delta) = scenario.history_delta {
        config.history_delta = delta;
    }

    let mut sim = Simulation::new(config)?;
    for mutant in &scenario.mutants {
        sim.add_mutant(&descriptor_for(mutant)?)?;
    }
    for scheduled in &scenario.scheduled_mutations {
        sim.schedule_mutation(&scheduled.source, &scheduled.destination, scheduled.time)?;
    }
    for placement in &scenario.placements {
        sim.place_cell(&placement.species, placement.x, placement.y)?;
    }
    Ok(sim)
}

fn descriptor_for(spec: &MutantSpec) -> Result<MutantDescriptor> {
    match &spec.epigenetic_rates {
        Some(rates) => {
            let growth = spec
                .growth_rates
                .as_ref()
                .with_context(|| format!("mutant \"{}\" needs per-state growth_rates", spec.name))?;
            let death = spec
                .death_rates
                .as_ref()
                .with_context(|| format!("mutant \"{}\" needs per-state death_rates", spec.name))?;
            Ok(MutantDescriptor::epigenetic(
                spec.name.clone(),
                EpigeneticRates {
                    minus_to_plus: rates.minus_to_plus,
                    plus_to_minus: rates.plus_to_minus,
                },
                StateRates { plus: growth.plus, minus: growth.minus },
                StateRates { plus: death.plus, minus: death.minus },
            ))
        }
        None => {
            let growth = spec
                .growth_rate
                .with_context(|| format!("mutant \"{}\" needs a growth_rate", spec.name))?;
            let death = spec
                .death_rate
                .with_context(|| format!("mutant \"{}\" needs a death_rate", spec.name))?;
            Ok(MutantDescriptor::plain(spec.name.clone(), growth, death))
        }
    }
}

fn execute_run(sim: &mut Simulation, run: &RunSpec) -> Result<()> {
    let report = match run {
        RunSpec::Time { time } => sim.run_up_to_time(*time)?,
        RunSpec::Size { species, target } => sim.run_up_to_size(species, *target)?,
        RunSpec::Event { event, species, target } => {
            let kind: CellEventKind = event.parse()?;
            sim.run_up_to_event(kind, species, *target)?
        }
    };
    info!(outcome = ?report.outcome, events = report.events, clock = report.time, "run returned");
    Ok(())
}

fn print_report(sim: &Simulation) -> Result<()> {
    let report = Report {
        seed: sim.seed(),
        clock: sim.clock(),
        species: sim.get_species()?,
        counts: sim.get_counts()?,
        lineage_graph: sim.get_lineage_graph(),
        firings: sim.get_firings()?,
        samples_info: sim.get_samples_info(),
        cells: sim.get_cells(&CellQuery::all())?.len(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
