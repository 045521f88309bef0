//! Spatial census of live cells per species.
//!
//! Uniform random cell selection must stay O(1) while cells are born,
//! pushed around, killed, switched, and sampled. The locator keeps two
//! indexed sets per species: the full population and the border subset
//! (cells with a wild-type 8-neighbour). Events report the slots they
//! touched and the locator refreshes border membership over the affected
//! 3×3 windows.

use crate::error::SimulationError;
use crate::geometry::Position;
use crate::species::SpeciesId;
use crate::tissue::Tissue;
use clonesim_index::IndexedSet;
use serde::{Deserialize, Serialize};

/// Population and border sets of one species.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeciesCells {
    population: IndexedSet<Position>,
    border: IndexedSet<Position>,
}

impl SpeciesCells {
    /// Positions of every live cell of the species.
    #[must_use]
    pub fn population(&self) -> &IndexedSet<Position> {
        &self.population
    }

    /// Positions of the border cells of the species.
    #[must_use]
    pub fn border(&self) -> &IndexedSet<Position> {
        &self.border
    }
}

/// Per-species census kept consistent with the tissue by the event loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellLocator {
    per_species: Vec<SpeciesCells>,
}

impl CellLocator {
    /// Create an empty locator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the per-species table to cover `count` species.
    pub fn ensure_species(&mut self, count: usize) {
        while self.per_species.len() < count {
            self.per_species.push(SpeciesCells::default());
        }
    }

    /// Census of one species.
    pub fn species(&self, id: SpeciesId) -> Result<&SpeciesCells, SimulationError> {
        self.per_species
            .get(id.0 as usize)
            .ok_or_else(|| SimulationError::internal(format!("locator missing species {}", id.0)))
    }

    fn species_mut(&mut self, id: SpeciesId) -> Result<&mut SpeciesCells, SimulationError> {
        self.per_species
            .get_mut(id.0 as usize)
            .ok_or_else(|| SimulationError::internal(format!("locator missing species {}", id.0)))
    }

    /// Record a newly placed cell. Border status is settled by a later
    /// [`CellLocator::refresh_windows`] over the touched slots.
    pub fn on_place(&mut self, pos: Position, species: SpeciesId) -> Result<(), SimulationError> {
        self.species_mut(species)?.population.insert(pos);
        Ok(())
    }

    /// Record a cleared slot (death or sampling).
    pub fn on_clear(&mut self, pos: Position, species: SpeciesId) -> Result<(), SimulationError> {
        let cells = self.species_mut(species)?;
        cells.population.remove(&pos);
        cells.border.remove(&pos);
        Ok(())
    }

    /// Record a cell shoved from `from` to `to` by a duplication ray.
    pub fn on_shift(&mut self, from: Position, to: Position, species: SpeciesId) -> Result<(), SimulationError> {
        let cells = self.species_mut(species)?;
        cells.population.remove(&from);
        cells.border.remove(&from);
        cells.population.insert(to);
        Ok(())
    }

    /// Record an epigenetic switch: same slot, companion species. The
    /// geometry is untouched, so border membership transfers verbatim.
    pub fn on_switch(&mut self, pos: Position, from: SpeciesId, to: SpeciesId) -> Result<(), SimulationError> {
        let was_border = {
            let cells = self.species_mut(from)?;
            cells.population.remove(&pos);
            cells.border.remove(&pos)
        };
        let cells = self.species_mut(to)?;
        cells.population.insert(pos);
        if was_border {
            cells.border.insert(pos);
        }
        Ok(())
    }

    /// Re-derive border membership for every occupied slot in the 3×3
    /// windows around `centres`.
    pub fn refresh_windows(&mut self, tissue: &Tissue, centres: &[Position]) -> Result<(), SimulationError> {
        let mut pending: Vec<Position> = Vec::with_capacity(centres.len() * 9);
        for centre in centres {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if let Some(pos) = centre.offset(dx, dy) {
                        if tissue.is_valid(pos) {
                            pending.push(pos);
                        }
                    }
                }
            }
        }
        pending.sort_unstable_by_key(|pos| (pos.y, pos.x));
        pending.dedup();

        for pos in pending {
            let Some(cell) = tissue.cell_at(pos) else {
                continue;
            };
            let on_border = tissue.is_border(pos);
            let cells = self.species_mut(cell.species)?;
            if on_border {
                cells.border.insert(pos);
            } else {
                cells.border.remove(&pos);
            }
        }
        Ok(())
    }

    /// Verify census/tissue coherence; used by debug assertions and
    /// tests.
    pub fn assert_consistent_with(&self, tissue: &Tissue) -> Result<(), SimulationError> {
        let mut censused: u64 = 0;
        for (index, cells) in self.per_species.iter().enumerate() {
            censused += cells.population.len() as u64;
            for pos in cells.population.iter() {
                let slot = tissue
                    .cell_at(*pos)
                    .ok_or_else(|| SimulationError::internal(format!("census lists empty slot {pos}")))?;
                if slot.species.0 as usize != index {
                    return Err(SimulationError::internal(format!(
                        "census species mismatch at {pos}"
                    )));
                }
            }
            for pos in cells.border.iter() {
                if !cells.population.contains(pos) {
                    return Err(SimulationError::internal(format!(
                        "border cell {pos} missing from population"
                    )));
                }
                if !tissue.is_border(*pos) {
                    return Err(SimulationError::internal(format!(
                        "stale border membership at {pos}"
                    )));
                }
            }
        }
        if censused != tissue.num_of_cells() {
            return Err(SimulationError::internal(format!(
                "census counts {censused} cells, tissue holds {}",
                tissue.num_of_cells()
            )));
        }
        Ok(())
    }
}
