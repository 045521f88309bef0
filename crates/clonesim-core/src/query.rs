//! Tabular query rows.
//!
//! Queries return plain row structs; the embedding decides how to render
//! them (data frames, JSON, terminal tables). Column names follow the
//! reserved literals: epigenetic signatures `""`/`"+"`/`"-"`, event names
//! `"growth"`/`"death"`/`"switch"`, and the `"Wild-type"` ancestor.

use crate::geometry::Rectangle;
use serde::{Deserialize, Serialize};

/// Row of the `species` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesRow {
    pub mutant: String,
    pub epistate: String,
    pub growth_rate: f64,
    pub death_rate: f64,
    /// Absent for species without an epigenetic promoter.
    pub switch_rate: Option<f64>,
}

/// Row of the `counts` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountRow {
    pub mutant: String,
    pub epistate: String,
    pub counts: u64,
}

/// Row of the `cells` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRow {
    pub cell_id: u64,
    pub mutant: String,
    pub epistate: String,
    pub position_x: u32,
    pub position_y: u32,
}

/// Row of the `added_cells` table (founders and forced mutations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedCellRow {
    pub mutant: String,
    pub epistate: String,
    pub position_x: u32,
    pub position_y: u32,
    pub time: f64,
}

/// Row of the `lineage_graph` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEdgeRow {
    pub ancestor: String,
    pub progeny: String,
    pub first_cross: f64,
}

/// Row of the `firings` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringRow {
    pub event: String,
    pub mutant: String,
    pub epistate: String,
    pub fired: u64,
}

/// Row of the `firing_history` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringHistoryRow {
    pub event: String,
    pub mutant: String,
    pub epistate: String,
    pub fired: u64,
    pub time: f64,
}

/// Row of the `count_history` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountHistoryRow {
    pub mutant: String,
    pub epistate: String,
    pub count: u64,
    pub time: f64,
}

/// Row of the `samples_info` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInfoRow {
    pub name: String,
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
    pub tumoural_cells: u64,
    pub time: f64,
}

/// Row of the `forest_nodes` table; also the node view returned by
/// forest queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestNodeRow {
    pub cell_id: u64,
    /// Absent for roots (founder cells).
    pub ancestor: Option<u64>,
    pub mutant: String,
    pub epistate: String,
    /// Name of the containing sample; present only on leaves.
    pub sample: Option<String>,
    pub birth_time: f64,
}

/// Unified live-cell query: an optional rectangle plus optional mutant
/// and signature filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellQuery {
    /// Restrict to this rectangle (clipped to the tissue); whole tissue
    /// when absent.
    pub region: Option<Rectangle>,
    /// Restrict to these mutant names; any mutant when absent.
    pub mutants: Option<Vec<String>>,
    /// Restrict to these epigenetic signatures (`""`, `"+"`, `"-"`); any
    /// signature when absent.
    pub epistates: Option<Vec<String>>,
}

impl CellQuery {
    /// Query every live cell in the tissue.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict the query to a rectangle.
    #[must_use]
    pub fn in_region(mut self, region: Rectangle) -> Self {
        self.region = Some(region);
        self
    }

    /// Restrict the query to a set of mutant names.
    #[must_use]
    pub fn of_mutants<I, S>(mut self, mutants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutants = Some(mutants.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict the query to a set of epigenetic signatures.
    #[must_use]
    pub fn of_epistates<I, S>(mut self, epistates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.epistates = Some(epistates.into_iter().map(Into::into).collect());
        self
    }
}
