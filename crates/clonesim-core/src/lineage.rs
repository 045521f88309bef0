//! First-occurrence recorder for species-to-species transitions.

use crate::species::SpeciesId;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One recorded transition with its first occurrence time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineageEdge {
    /// `SpeciesId::WILD_TYPE` labels founder arrivals.
    pub ancestor: SpeciesId,
    pub progeny: SpeciesId,
    pub first_cross: f64,
}

/// The lineage graph: at most one edge per ordered species pair, first
/// time wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineageGraph {
    edges: HashMap<(SpeciesId, SpeciesId), f64>,
}

impl LineageGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition; later occurrences of the same pair are
    /// ignored.
    pub fn record(&mut self, ancestor: SpeciesId, progeny: SpeciesId, time: f64) {
        self.edges.entry((ancestor, progeny)).or_insert(time);
    }

    /// Number of recorded edges.
    #[must_use]
    pub fn num_of_edges(&self) -> usize {
        self.edges.len()
    }

    /// Edges sorted by `(time, ancestor, progeny)`.
    #[must_use]
    pub fn sorted_edges(&self) -> Vec<LineageEdge> {
        let mut edges: Vec<LineageEdge> = self
            .edges
            .iter()
            .map(|(&(ancestor, progeny), &first_cross)| LineageEdge { ancestor, progeny, first_cross })
            .collect();
        edges.sort_by_key(|edge| (OrderedFloat(edge.first_cross), edge.ancestor, edge.progeny));
        edges
    }
}
