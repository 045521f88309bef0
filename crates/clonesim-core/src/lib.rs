//! Spatial stochastic simulator of clonal evolution on a 2D tissue grid.
//!
//! Cells belonging to *species* (a mutant paired with an epigenetic
//! state) duplicate, die, and switch state at species-specific rates;
//! the engine advances simulated time with a Gillespie-style next-event
//! discipline, records lineage transitions and per-species statistics,
//! drains rectangular samples, and extracts the sampled descendants
//! forest for coalescent queries.

pub mod cell;
pub mod error;
pub mod forest;
pub mod geometry;
pub mod lineage;
pub mod locator;
pub mod mutation;
pub mod query;
pub mod sampling;
pub mod scheduler;
pub mod simulation;
pub mod species;
pub mod statistics;
pub mod tissue;

pub use cell::{CellId, CellInTissue};
pub use error::SimulationError;
pub use forest::SamplesForest;
pub use geometry::{Direction, Position, Rectangle};
pub use lineage::LineageEdge;
pub use mutation::ScheduledMutation;
pub use query::{
    AddedCellRow, CellQuery, CellRow, CountHistoryRow, CountRow, FiringHistoryRow, FiringRow,
    ForestNodeRow, LineageEdgeRow, SampleInfoRow, SpeciesRow,
};
pub use sampling::TissueSample;
pub use scheduler::CellEventKind;
pub use simulation::{
    CancellationHook, RunOutcome, RunReport, Simulation, SimulationConfig, StopCondition,
    CANCELLATION_POLL_EVENTS,
};
pub use species::{
    EpiState, EpigeneticRates, MutantDescriptor, MutantId, RateUpdate, SpeciesId, SpeciesRates,
    StateRates, RESERVED_MUTANT_NAME,
};
pub use statistics::StatisticsRecorder;
pub use tissue::{Tissue, TissueCell};
