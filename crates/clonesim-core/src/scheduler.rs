//! Next-event selection: the exponential race over species propensities.

use crate::error::SimulationError;
use crate::species::{EpiState, SpeciesRegistry, SpeciesId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three cell event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellEventKind {
    Duplication,
    Death,
    EpigeneticSwitch,
}

impl CellEventKind {
    /// Every kind, in table order.
    pub const ALL: [CellEventKind; 3] = [
        CellEventKind::Duplication,
        CellEventKind::Death,
        CellEventKind::EpigeneticSwitch,
    ];

    /// The literal event name used in tables and the CLI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CellEventKind::Duplication => "growth",
            CellEventKind::Death => "death",
            CellEventKind::EpigeneticSwitch => "switch",
        }
    }
}

impl fmt::Display for CellEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CellEventKind {
    type Err = SimulationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "growth" => Ok(CellEventKind::Duplication),
            "death" => Ok(CellEventKind::Death),
            "switch" => Ok(CellEventKind::EpigeneticSwitch),
            other => Err(SimulationError::precondition(format!(
                "event \"{other}\" is not supported; supported events are \"growth\", \"death\", and \"switch\""
            ))),
        }
    }
}

/// Outcome of one race: the event to apply and the waiting time that
/// elapsed before it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventChoice {
    pub species: SpeciesId,
    pub kind: CellEventKind,
    pub waiting_time: f64,
}

fn propensity(species: &crate::species::Species, kind: CellEventKind) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let population = species.counters.current_cells as f64;
    match kind {
        CellEventKind::Duplication => species.duplication_rate * population,
        // death stays gated until the activation level has been reached once
        CellEventKind::Death => {
            if species.death_enabled {
                species.death_rate * population
            } else {
                0.0
            }
        }
        CellEventKind::EpigeneticSwitch => {
            if species.epistate == EpiState::None {
                0.0
            } else {
                species.switch_rate.unwrap_or(0.0) * population
            }
        }
    }
}

/// Run the exponential race across all `(species, event)` propensities.
///
/// Returns `None` when the total propensity is zero (the run has
/// exhausted itself). The waiting time is `-ln(u)/Λ` with `u ∈ (0, 1]`;
/// the winning pair is found by a cumulative scan of `u₂·Λ`, which is
/// linear in the species count — a handful of rows in practice.
pub fn draw_next_event<R: Rng>(registry: &SpeciesRegistry, rng: &mut R) -> Option<EventChoice> {
    let mut total = 0.0_f64;
    for species in registry.species() {
        for kind in CellEventKind::ALL {
            total += propensity(species, kind);
        }
    }
    if total <= 0.0 {
        return None;
    }

    let uniform: f64 = 1.0 - rng.random::<f64>();
    let waiting_time = -uniform.ln() / total;

    let mut target = rng.random::<f64>() * total;
    let mut winner = None;
    'race: for species in registry.species() {
        for kind in CellEventKind::ALL {
            let lambda = propensity(species, kind);
            if lambda <= 0.0 {
                continue;
            }
            winner = Some((species.id, kind));
            if target <= lambda {
                break 'race;
            }
            target -= lambda;
        }
    }

    // float round-off can leave a sliver of target after the scan; the
    // last positive row absorbs it
    winner.map(|(species, kind)| EventChoice { species, kind, waiting_time })
}
