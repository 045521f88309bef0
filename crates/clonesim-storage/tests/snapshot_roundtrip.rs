//! Snapshot round-trip: `save` then `load` is the identity on observable
//! queries, and resumed runs reproduce the original's outputs.

use clonesim_core::{
    CellQuery, EpigeneticRates, MutantDescriptor, Position, Rectangle, Simulation,
    SimulationConfig, StateRates,
};
use tempfile::tempdir;

fn seeded_simulation() -> Simulation {
    let mut sim = Simulation::new(SimulationConfig {
        width: 120,
        height: 120,
        rng_seed: Some(4242),
        history_delta: 1.0,
        ..SimulationConfig::default()
    })
    .expect("simulation");
    sim.set_death_activation_level(50);
    sim.add_mutant(&MutantDescriptor::plain("A", 0.25, 0.01)).expect("A");
    sim.add_mutant(&MutantDescriptor::plain("B", 0.3, 0.02)).expect("B");
    sim.add_mutant(&MutantDescriptor::epigenetic(
        "C",
        EpigeneticRates { minus_to_plus: 0.02, plus_to_minus: 0.02 },
        StateRates { plus: 0.3, minus: 0.1 },
        StateRates { plus: 0.02, minus: 0.01 },
    ))
    .expect("C");
    sim.schedule_mutation("A", "B", 8.0).expect("schedule");
    sim.place_cell("A", 60, 60).expect("first founder");
    sim.place_cell("C+", 30, 30).expect("second founder");
    sim.run_up_to_time(12.0).expect("warm-up");
    sim
}

fn observables(sim: &Simulation) -> (f64, String) {
    let tables = (
        sim.get_species().expect("species"),
        sim.get_counts().expect("counts"),
        sim.get_cells(&CellQuery::all()).expect("cells"),
        sim.get_added_cells().expect("added"),
        sim.get_lineage_graph(),
        sim.get_firings().expect("firings"),
        sim.get_count_history(0.0, f64::INFINITY).expect("count history"),
        sim.get_samples_info(),
    );
    (sim.clock(), format!("{tables:?}"))
}

#[test]
fn load_is_the_identity_on_observable_queries() {
    let sim = seeded_simulation();
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.snapshot");

    clonesim_storage::save(&sim, &path).expect("save");
    let restored = clonesim_storage::load(&path).expect("load");

    assert_eq!(restored.seed(), sim.seed());
    assert_eq!(restored.tissue_size(), sim.tissue_size());
    assert_eq!(restored.pending_mutations(), sim.pending_mutations());
    assert_eq!(observables(&restored), observables(&sim));
    restored.check_invariants().expect("restored state is coherent");
}

#[test]
fn resumed_runs_reproduce_the_original_outputs() {
    let mut original = seeded_simulation();
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.snapshot");
    clonesim_storage::save(&original, &path).expect("save");
    let mut resumed = clonesim_storage::load(&path).expect("load");

    // identical run sequence on both sides of the round-trip
    for sim in [&mut original, &mut resumed] {
        sim.run_up_to_time(18.0).expect("run");
        let region = Rectangle::new(Position::new(55, 55), Position::new(65, 65)).expect("region");
        sim.sample_cells("S1", region).expect("sample");
        sim.run_up_to_size("A", 400).expect("grow");
    }

    assert_eq!(observables(&original), observables(&resumed));

    let forest_a = original.get_samples_forest().expect("forest");
    let forest_b = resumed.get_samples_forest().expect("forest");
    assert_eq!(
        forest_a.get_nodes().expect("nodes"),
        forest_b.get_nodes().expect("nodes")
    );
    assert_eq!(
        forest_a.get_coalescent_cells(None).expect("mrca"),
        forest_b.get_coalescent_cells(None).expect("mrca")
    );
}
