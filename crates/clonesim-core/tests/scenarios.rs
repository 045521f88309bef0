//! End-to-end simulation scenarios: growth, scheduled mutations,
//! epigenetic switches, sampling, forests, and cancellation.

use clonesim_core::{
    CellEventKind, CellQuery, EpigeneticRates, MutantDescriptor, Position, Rectangle, RunOutcome,
    Simulation, SimulationConfig, StateRates,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn config(width: u32, height: u32, seed: u64) -> SimulationConfig {
    SimulationConfig {
        width,
        height,
        rng_seed: Some(seed),
        ..SimulationConfig::default()
    }
}

fn rect(x0: u32, y0: u32, x1: u32, y1: u32) -> Rectangle {
    Rectangle::new(Position::new(x0, y0), Position::new(x1, y1)).expect("ordered corners")
}

#[test]
fn single_species_time_run() {
    let mut sim = Simulation::new(config(100, 100, 1)).expect("simulation");
    sim.add_mutant(&MutantDescriptor::plain("A", 0.3, 0.02)).expect("mutant");
    sim.place_cell("A", 50, 50).expect("founder");

    sim.run_up_to_time(30.0).expect("run");
    assert!(sim.clock() >= 30.0);

    let counts = sim.get_counts().expect("counts");
    assert_eq!(counts.len(), 1);
    assert!(counts[0].counts >= 1);
    assert!(counts[0].counts <= 10_000);

    let lineage = sim.get_lineage_graph();
    assert_eq!(lineage.len(), 1);
    assert_eq!(lineage[0].ancestor, "Wild-type");
    assert_eq!(lineage[0].progeny, "A");
    assert_eq!(lineage[0].first_cross, 0.0);

    // death stays latched off at the default-high activation level
    let firings = sim.get_firings().expect("firings");
    let deaths = firings.iter().find(|row| row.event == "death").expect("death row");
    assert_eq!(deaths.fired, 0);

    sim.check_invariants().expect("consistent state");
}

#[test]
fn scheduled_mutation_converts_progeny_after_its_time() {
    let mut sim = Simulation::new(config(200, 200, 2)).expect("simulation");
    sim.add_mutant(&MutantDescriptor::plain("A", 0.2, 0.1)).expect("A");
    sim.add_mutant(&MutantDescriptor::plain("B", 0.3, 0.05)).expect("B");
    sim.schedule_mutation("A", "B", 20.0).expect("schedule");
    sim.place_cell("A", 100, 100).expect("founder");

    sim.run_up_to_time(30.0).expect("run");

    let counts = sim.get_counts().expect("counts");
    let b = counts.iter().find(|row| row.mutant == "B").expect("B row");
    assert!(b.counts >= 1, "the scheduled mutation never fired");

    let lineage = sim.get_lineage_graph();
    let crossing = lineage
        .iter()
        .find(|row| row.ancestor == "A" && row.progeny == "B")
        .expect("A -> B edge");
    assert!(crossing.first_cross >= 20.0);
    assert!(sim.pending_mutations().is_empty(), "the entry is one-shot");

    sim.check_invariants().expect("consistent state");
}

#[test]
fn epigenetic_switches_accumulate_to_the_event_target() {
    let mut sim = Simulation::new(config(300, 300, 3)).expect("simulation");
    sim.add_mutant(&MutantDescriptor::epigenetic(
        "A",
        EpigeneticRates { minus_to_plus: 0.05, plus_to_minus: 0.05 },
        StateRates { plus: 0.2, minus: 0.08 },
        StateRates { plus: 0.1, minus: 0.01 },
    ))
    .expect("mutant");
    sim.place_cell("A+", 150, 150).expect("founder");

    sim.run_up_to_event(CellEventKind::EpigeneticSwitch, "A+", 50)
        .expect("run");

    let firings = sim.get_firings().expect("firings");
    let switched = firings
        .iter()
        .find(|row| row.event == "switch" && row.epistate == "+")
        .expect("switch row");
    assert_eq!(switched.fired, 50);

    let counts = sim.get_counts().expect("counts");
    let minus = counts.iter().find(|row| row.epistate == "-").expect("A- row");
    assert!(minus.counts >= 1);

    // the companion pair absorbs every switch: totals match the tissue
    let total: u64 = counts.iter().map(|row| row.counts).sum();
    assert_eq!(total, sim.tissue().num_of_cells());

    sim.check_invariants().expect("consistent state");
}

#[test]
fn sampling_builds_a_two_sample_forest() {
    let mut sim = Simulation::new(config(200, 200, 4)).expect("simulation");
    sim.set_death_activation_level(100);
    sim.add_mutant(&MutantDescriptor::plain("A", 0.2, 0.01)).expect("mutant");
    sim.place_cell("A", 100, 100).expect("founder");
    sim.run_up_to_size("A", 2_000).expect("growth");

    let first_region = rect(85, 90, 100, 105);
    sim.sample_cells("S1", first_region).expect("first sample");
    sim.run_up_to_time(sim.clock() + 1.0).expect("interlude");
    let second_region = rect(101, 90, 112, 105);
    sim.sample_cells("S2", second_region).expect("second sample");

    let info = sim.get_samples_info();
    assert_eq!(info.len(), 2);
    assert!(info.iter().all(|row| row.tumoural_cells > 0));

    let forest = sim.get_samples_forest().expect("forest");
    let sampled: Vec<u64> = forest.sampled_cells().iter().map(|id| id.0).collect();
    let mut expected: Vec<u64> = sim
        .samples()
        .iter()
        .flat_map(|sample| sample.cell_ids.iter().map(|id| id.0))
        .collect();
    expected.sort_unstable();
    assert_eq!(sampled, expected);

    // every non-root node's parent is itself a node
    let nodes = forest.get_nodes().expect("nodes");
    let ids: std::collections::HashSet<u64> = nodes.iter().map(|node| node.cell_id).collect();
    for node in &nodes {
        if let Some(parent) = node.ancestor {
            assert!(ids.contains(&parent), "dangling parent {parent}");
        }
    }

    // one founder, one tree: a single most recent common ancestor
    let mrca = forest.get_coalescent_cells(None).expect("coalescence");
    assert_eq!(mrca.len(), 1);
    assert!(ids.contains(&mrca[0].cell_id));

    // projecting onto S2 keeps exactly S2's cells as sampled leaves
    let sub = forest.get_subforest_for(&["S2"]).expect("subforest");
    let sub_sampled: Vec<u64> = sub.sampled_cells().iter().map(|id| id.0).collect();
    let mut s2_cells: Vec<u64> = sim.samples()[1].cell_ids.iter().map(|id| id.0).collect();
    s2_cells.sort_unstable();
    assert_eq!(sub_sampled, s2_cells);

    sim.check_invariants().expect("consistent state");
}

#[test]
fn search_sample_finds_a_dense_rectangle() {
    let mut sim = Simulation::new(config(200, 200, 5)).expect("simulation");
    sim.add_mutant(&MutantDescriptor::plain("B", 0.3, 0.0)).expect("mutant");
    sim.place_cell("B", 100, 100).expect("founder");
    sim.run_up_to_size("B", 800).expect("growth");

    let found = sim.search_sample("B", 80, 50, 50).expect("search");
    let inside = sim
        .get_cells(&CellQuery::all().in_region(found).of_mutants(["B"]))
        .expect("recount");
    assert!(inside.len() as u64 > 80, "found rectangle holds only {}", inside.len());

    let err = sim.search_sample("B", 100_000, 50, 50);
    assert!(matches!(err, Err(clonesim_core::SimulationError::NotFound(_))));
}

#[test]
fn cancellation_interrupts_and_resumes_a_long_run() {
    let mut sim = Simulation::new(config(100, 100, 6)).expect("simulation");
    sim.add_mutant(&MutantDescriptor::plain("A", 0.3, 0.0)).expect("mutant");
    sim.place_cell("A", 50, 50).expect("founder");

    let polls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&polls);
    sim.set_cancellation_hook(Box::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        true
    }));

    let report = sim.run_up_to_time(10_000.0).expect("cancelled run");
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(polls.load(Ordering::SeqCst) >= 1);
    assert!(sim.clock() < 10_000.0);
    sim.check_invariants().expect("state survives cancellation");

    sim.clear_cancellation_hook();
    let resumed = sim.run_up_to_time(sim.clock() + 1.0).expect("resumed run");
    assert_eq!(resumed.outcome, RunOutcome::Completed);
}

#[test]
fn homogeneous_growth_duplicates_interior_cells() {
    let run_with = |internal: bool| {
        let mut sim = Simulation::new(SimulationConfig {
            width: 100,
            height: 100,
            rng_seed: Some(7),
            duplicate_internal_cells: internal,
            ..SimulationConfig::default()
        })
        .expect("simulation");
        sim.add_mutant(&MutantDescriptor::plain("A", 0.3, 0.0)).expect("mutant");
        sim.place_cell("A", 50, 50).expect("founder");
        sim.run_up_to_size("A", 400).expect("growth");
        sim.check_invariants().expect("consistent state");
        sim
    };

    // both policies reach the target; homogeneous growth is the one the
    // flag switches on
    let border = run_with(false);
    let homogeneous = run_with(true);
    assert!(!border.duplicate_internal_cells());
    assert!(homogeneous.duplicate_internal_cells());
    assert!(border.get_counts().expect("counts")[0].counts >= 400);
    assert!(homogeneous.get_counts().expect("counts")[0].counts >= 400);
}
