//! Mutants, species, and the registry that catalogues them.
//!
//! A *mutant* is a named genetic identity; registering it creates one
//! species per epigenetic state: two (`"+"`, `"-"`) when the mutant
//! carries epigenetic switch rates, one (`""`) when it does not. Species
//! own the event rates and the live/cumulative counters the scheduler
//! races over.

use crate::error::SimulationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The reserved mutant name labelling empty tissue slots and founder
/// ancestry.
pub const RESERVED_MUTANT_NAME: &str = "Wild-type";

/// Identifier of a registered mutant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutantId(pub u32);

/// Identifier of a species (a mutant paired with an epigenetic state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpeciesId(pub u32);

impl SpeciesId {
    /// Sentinel species standing for wild-type, the virtual ancestor of
    /// all founders. Never stored in the registry.
    pub const WILD_TYPE: SpeciesId = SpeciesId(u32::MAX);
}

/// Epigenetic state of a species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpiState {
    /// The mutant has no epigenetic promoter.
    None,
    Plus,
    Minus,
}

impl EpiState {
    /// The literal signature used in names and tables.
    #[must_use]
    pub const fn signature(self) -> &'static str {
        match self {
            EpiState::None => "",
            EpiState::Plus => "+",
            EpiState::Minus => "-",
        }
    }

    /// The opposite state for an epigenetic switch; `None` has no
    /// companion.
    #[must_use]
    pub const fn companion(self) -> Option<EpiState> {
        match self {
            EpiState::None => None,
            EpiState::Plus => Some(EpiState::Minus),
            EpiState::Minus => Some(EpiState::Plus),
        }
    }
}

impl fmt::Display for EpiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signature())
    }
}

/// One epigenetic promoter: switch rates in both directions.
///
/// The convention is fixed as
/// `(minus_to_plus, plus_to_minus) = (rates["-+"], rates["+-"])`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpigeneticRates {
    pub minus_to_plus: f64,
    pub plus_to_minus: f64,
}

/// Per-state rate pair used when registering an epigenetic mutant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateRates {
    pub plus: f64,
    pub minus: f64,
}

/// Registration request for a mutant and its derived species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutantDescriptor {
    pub name: String,
    /// Zero promoters for a plain mutant, exactly one for an epigenetic
    /// mutant; more than one is rejected at registration.
    pub promoters: Vec<EpigeneticRates>,
    pub duplication: StateRates,
    pub death: StateRates,
}

impl MutantDescriptor {
    /// A mutant without epigenetic states; only the `plus` slots of the
    /// rate pairs are read.
    #[must_use]
    pub fn plain(name: impl Into<String>, duplication: f64, death: f64) -> Self {
        Self {
            name: name.into(),
            promoters: Vec::new(),
            duplication: StateRates { plus: duplication, minus: duplication },
            death: StateRates { plus: death, minus: death },
        }
    }

    /// A mutant with one epigenetic promoter and per-state rates.
    #[must_use]
    pub fn epigenetic(
        name: impl Into<String>,
        switch: EpigeneticRates,
        duplication: StateRates,
        death: StateRates,
    ) -> Self {
        Self {
            name: name.into(),
            promoters: vec![switch],
            duplication,
            death,
        }
    }
}

/// A registered mutant and the species derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutant {
    pub id: MutantId,
    pub name: String,
    pub epigenetic_rates: Option<EpigeneticRates>,
    pub species: Vec<SpeciesId>,
}

/// Live and cumulative per-species event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesCounters {
    pub current_cells: u64,
    pub duplications: u64,
    pub deaths: u64,
    pub switches: u64,
}

/// A mutant in one epigenetic state, with its rates and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Species {
    pub id: SpeciesId,
    pub mutant: MutantId,
    /// Display name: mutant name plus signature, e.g. `"A+"`.
    pub name: String,
    pub epistate: EpiState,
    pub duplication_rate: f64,
    pub death_rate: f64,
    /// Present only for species with a non-empty signature.
    pub switch_rate: Option<f64>,
    pub counters: SpeciesCounters,
    /// Latched once `current_cells` first reaches the simulation's death
    /// activation level; death propensity stays zero until then.
    pub death_enabled: bool,
}

impl Species {
    /// Latch death activation if the live count has reached `level`.
    pub(crate) fn note_population(&mut self, level: u64) {
        if !self.death_enabled && self.counters.current_cells >= level {
            self.death_enabled = true;
        }
    }

    /// Cumulative firing count for one event kind.
    #[must_use]
    pub fn fired(&self, kind: crate::scheduler::CellEventKind) -> u64 {
        use crate::scheduler::CellEventKind;
        match kind {
            CellEventKind::Duplication => self.counters.duplications,
            CellEventKind::Death => self.counters.deaths,
            CellEventKind::EpigeneticSwitch => self.counters.switches,
        }
    }
}

/// Read-back of a species' current rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeciesRates {
    pub duplication: f64,
    pub death: f64,
    /// Absent for species without an epigenetic promoter.
    pub switch: Option<f64>,
}

/// Partial rate update applied to one species.
///
/// Validation is atomic: nothing changes unless every named rate is
/// admissible for the species.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateUpdate {
    pub duplication: Option<f64>,
    pub death: Option<f64>,
    pub switch: Option<f64>,
}

/// Ordered catalogue of mutants and species.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeciesRegistry {
    mutants: Vec<Mutant>,
    species: Vec<Species>,
    mutants_by_name: HashMap<String, MutantId>,
    species_by_name: HashMap<String, SpeciesId>,
}

impl SpeciesRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mutant, creating its derived species.
    ///
    /// Rejects the reserved name, duplicate names, negative rates, and
    /// multi-promoter configurations.
    pub fn register(&mut self, descriptor: &MutantDescriptor) -> Result<MutantId, SimulationError> {
        if descriptor.name.is_empty() {
            return Err(SimulationError::precondition("mutant name must be non-empty"));
        }
        if descriptor.name == RESERVED_MUTANT_NAME {
            return Err(SimulationError::precondition(format!(
                "\"{RESERVED_MUTANT_NAME}\" is a reserved mutant name"
            )));
        }
        if self.mutants_by_name.contains_key(&descriptor.name) {
            return Err(SimulationError::precondition(format!(
                "mutant \"{}\" is already registered",
                descriptor.name
            )));
        }
        if descriptor.promoters.len() > 1 {
            return Err(SimulationError::precondition(format!(
                "mutant \"{}\" declares {} epigenetic promoters; at most one is supported",
                descriptor.name,
                descriptor.promoters.len()
            )));
        }
        let rates = [
            descriptor.duplication.plus,
            descriptor.duplication.minus,
            descriptor.death.plus,
            descriptor.death.minus,
        ];
        if rates.iter().any(|rate| !rate.is_finite() || *rate < 0.0) {
            return Err(SimulationError::precondition(format!(
                "mutant \"{}\" has a negative or non-finite event rate",
                descriptor.name
            )));
        }
        if let Some(switch) = descriptor.promoters.first() {
            if switch.minus_to_plus < 0.0
                || switch.plus_to_minus < 0.0
                || !switch.minus_to_plus.is_finite()
                || !switch.plus_to_minus.is_finite()
            {
                return Err(SimulationError::precondition(format!(
                    "mutant \"{}\" has a negative or non-finite switch rate",
                    descriptor.name
                )));
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let mutant_id = MutantId(self.mutants.len() as u32);
        let mut species_ids = Vec::new();
        match descriptor.promoters.first() {
            Some(switch) => {
                species_ids.push(self.push_species(
                    mutant_id,
                    &descriptor.name,
                    EpiState::Plus,
                    descriptor.duplication.plus,
                    descriptor.death.plus,
                    Some(switch.plus_to_minus),
                ));
                species_ids.push(self.push_species(
                    mutant_id,
                    &descriptor.name,
                    EpiState::Minus,
                    descriptor.duplication.minus,
                    descriptor.death.minus,
                    Some(switch.minus_to_plus),
                ));
            }
            None => {
                species_ids.push(self.push_species(
                    mutant_id,
                    &descriptor.name,
                    EpiState::None,
                    descriptor.duplication.plus,
                    descriptor.death.plus,
                    None,
                ));
            }
        }

        self.mutants.push(Mutant {
            id: mutant_id,
            name: descriptor.name.clone(),
            epigenetic_rates: descriptor.promoters.first().copied(),
            species: species_ids,
        });
        self.mutants_by_name.insert(descriptor.name.clone(), mutant_id);
        Ok(mutant_id)
    }

    fn push_species(
        &mut self,
        mutant: MutantId,
        mutant_name: &str,
        epistate: EpiState,
        duplication_rate: f64,
        death_rate: f64,
        switch_rate: Option<f64>,
    ) -> SpeciesId {
        #[allow(clippy::cast_possible_truncation)]
        let id = SpeciesId(self.species.len() as u32);
        let name = format!("{mutant_name}{}", epistate.signature());
        self.species.push(Species {
            id,
            mutant,
            name: name.clone(),
            epistate,
            duplication_rate,
            death_rate,
            switch_rate,
            counters: SpeciesCounters::default(),
            death_enabled: false,
        });
        self.species_by_name.insert(name, id);
        id
    }

    /// Number of registered species.
    #[must_use]
    pub fn num_of_species(&self) -> usize {
        self.species.len()
    }

    /// Species in registration (id) order.
    #[must_use]
    pub fn species(&self) -> &[Species] {
        &self.species
    }

    /// Mutants in registration order.
    #[must_use]
    pub fn mutants(&self) -> &[Mutant] {
        &self.mutants
    }

    /// Borrow a species by id.
    pub fn species_by_id(&self, id: SpeciesId) -> Result<&Species, SimulationError> {
        self.species
            .get(id.0 as usize)
            .ok_or_else(|| SimulationError::internal(format!("unknown species id {}", id.0)))
    }

    pub(crate) fn species_by_id_mut(&mut self, id: SpeciesId) -> Result<&mut Species, SimulationError> {
        self.species
            .get_mut(id.0 as usize)
            .ok_or_else(|| SimulationError::internal(format!("unknown species id {}", id.0)))
    }

    /// Borrow a mutant by id.
    pub fn mutant_by_id(&self, id: MutantId) -> Result<&Mutant, SimulationError> {
        self.mutants
            .get(id.0 as usize)
            .ok_or_else(|| SimulationError::internal(format!("unknown mutant id {}", id.0)))
    }

    /// Resolve a species by its display name (e.g. `"A+"`).
    pub fn find_species(&self, name: &str) -> Result<SpeciesId, SimulationError> {
        self.species_by_name
            .get(name)
            .copied()
            .ok_or_else(|| SimulationError::not_found(format!("species \"{name}\"")))
    }

    /// Resolve a mutant by name.
    pub fn find_mutant(&self, name: &str) -> Result<MutantId, SimulationError> {
        self.mutants_by_name
            .get(name)
            .copied()
            .ok_or_else(|| SimulationError::not_found(format!("mutant \"{name}\"")))
    }

    /// The species of `mutant` whose epigenetic state is `epistate`.
    pub fn species_of(&self, mutant: MutantId, epistate: EpiState) -> Result<SpeciesId, SimulationError> {
        let record = self.mutant_by_id(mutant)?;
        record
            .species
            .iter()
            .copied()
            .find(|id| self.species[id.0 as usize].epistate == epistate)
            .ok_or_else(|| {
                SimulationError::precondition(format!(
                    "mutant \"{}\" has no species with signature \"{}\"",
                    record.name,
                    epistate.signature()
                ))
            })
    }

    /// The companion species (same mutant, opposite signature).
    pub fn companion_of(&self, species: SpeciesId) -> Result<SpeciesId, SimulationError> {
        let record = self.species_by_id(species)?;
        let companion_state = record.epistate.companion().ok_or_else(|| {
            SimulationError::precondition(format!(
                "species \"{}\" has no epigenetic companion",
                record.name
            ))
        })?;
        self.species_of(record.mutant, companion_state)
    }

    /// Display name of a species id, resolving the wild-type sentinel.
    #[must_use]
    pub fn display_name(&self, id: SpeciesId) -> String {
        if id == SpeciesId::WILD_TYPE {
            return RESERVED_MUTANT_NAME.to_string();
        }
        self.species
            .get(id.0 as usize)
            .map_or_else(|| format!("species#{}", id.0), |s| s.name.clone())
    }

    /// Update the rates of one species; validation is atomic.
    pub fn update_rates(&mut self, species: SpeciesId, update: &RateUpdate) -> Result<(), SimulationError> {
        let record = self.species_by_id(species)?;
        for (label, value) in [
            ("growth", update.duplication),
            ("death", update.death),
            ("switch", update.switch),
        ] {
            if let Some(rate) = value {
                if !rate.is_finite() || rate < 0.0 {
                    return Err(SimulationError::precondition(format!(
                        "{label} rate for species \"{}\" must be non-negative",
                        record.name
                    )));
                }
            }
        }
        if update.switch.is_some() && record.epistate == EpiState::None {
            return Err(SimulationError::precondition(format!(
                "species \"{}\" has no epigenetic promoter to update",
                record.name
            )));
        }

        let record = self.species_by_id_mut(species)?;
        if let Some(rate) = update.duplication {
            record.duplication_rate = rate;
        }
        if let Some(rate) = update.death {
            record.death_rate = rate;
        }
        if let Some(rate) = update.switch {
            record.switch_rate = Some(rate);
        }
        Ok(())
    }

    /// Re-evaluate death activation against a (possibly lowered) level.
    pub(crate) fn relatch_death_activation(&mut self, level: u64) {
        for species in &mut self.species {
            species.note_population(level);
        }
    }
}
