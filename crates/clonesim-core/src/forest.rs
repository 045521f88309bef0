//! The sampled descendants forest.
//!
//! Nodes are cells that were sampled or are ancestors of sampled cells,
//! stored as flat arrays (`nodes`, `parent_index`, `depth`) with a side
//! table mapping sampled nodes to their sample names. The forest owns
//! copies of everything it needs; it never reads the live simulation
//! after construction.

use crate::cell::{CellId, CellLedger, CellRecord};
use crate::error::SimulationError;
use crate::query::{ForestNodeRow, SampleInfoRow};
use crate::sampling::TissueSample;
use crate::species::{EpiState, SpeciesRegistry, SpeciesId};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Species descriptor carried by the forest for node labelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForestSpecies {
    pub id: SpeciesId,
    pub mutant: String,
    pub epistate: EpiState,
}

/// Row of the forest's species catalogue.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SpeciesInfoRow {
    pub mutant: String,
    pub epistate: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ForestNode {
    cell_id: CellId,
    parent: Option<CellId>,
    species: SpeciesId,
    birth_time: f64,
}

/// Ancestry forest of sampled cells.
#[derive(Debug, Clone)]
pub struct SamplesForest {
    nodes: Vec<ForestNode>,
    index: HashMap<CellId, usize>,
    parent_index: Vec<Option<usize>>,
    depth: Vec<u32>,
    /// Sample name per sampled node index.
    sample_of: HashMap<usize, String>,
    samples: Vec<TissueSample>,
    species: Vec<ForestSpecies>,
    species_index: HashMap<SpeciesId, usize>,
}

impl SamplesForest {
    /// Build the forest from the simulation's ancestry ledger and sample
    /// records.
    pub(crate) fn build(
        ledger: &CellLedger,
        samples: &[TissueSample],
        registry: &SpeciesRegistry,
    ) -> Result<Self, SimulationError> {
        let mut catalog = Vec::with_capacity(registry.num_of_species());
        for species in registry.species() {
            catalog.push(ForestSpecies {
                id: species.id,
                mutant: registry.mutant_by_id(species.mutant)?.name.clone(),
                epistate: species.epistate,
            });
        }

        let mut leaf_samples: HashMap<CellId, String> = HashMap::new();
        for sample in samples {
            for cell_id in &sample.cell_ids {
                leaf_samples.insert(*cell_id, sample.name.clone());
            }
        }

        let mut records: BTreeMap<CellId, CellRecord> = BTreeMap::new();
        let mut stack: Vec<CellId> = leaf_samples.keys().copied().collect();
        while let Some(cell_id) = stack.pop() {
            if records.contains_key(&cell_id) {
                continue;
            }
            let record = ledger.get(cell_id)?;
            records.insert(cell_id, record);
            if let Some(parent) = record.parent {
                stack.push(parent);
            }
        }

        Self::assemble(records, &leaf_samples, samples.to_vec(), catalog)
    }

    fn assemble(
        records: BTreeMap<CellId, CellRecord>,
        leaf_samples: &HashMap<CellId, String>,
        samples: Vec<TissueSample>,
        catalog: Vec<ForestSpecies>,
    ) -> Result<Self, SimulationError> {
        let mut nodes = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());
        let mut parent_index = Vec::with_capacity(records.len());
        let mut depth = Vec::with_capacity(records.len());

        // ascending iteration guarantees parents precede children: a
        // parent's id is always smaller than its progeny's
        for (cell_id, record) in &records {
            let parent_at = match record.parent {
                Some(parent) => Some(*index.get(&parent).ok_or_else(|| {
                    SimulationError::internal(format!("forest parent {} missing for cell {}", parent.0, cell_id.0))
                })?),
                None => None,
            };
            index.insert(*cell_id, nodes.len());
            let node_depth = parent_at.map_or(0, |at| depth[at] + 1);
            depth.push(node_depth);
            parent_index.push(parent_at);
            nodes.push(ForestNode {
                cell_id: *cell_id,
                parent: record.parent,
                species: record.species,
                birth_time: record.birth_time,
            });
        }

        let mut sample_of = HashMap::with_capacity(leaf_samples.len());
        for (cell_id, name) in leaf_samples {
            if let Some(at) = index.get(cell_id) {
                sample_of.insert(*at, name.clone());
            }
        }

        let referenced: HashSet<SpeciesId> = nodes.iter().map(|node| node.species).collect();
        let species: Vec<ForestSpecies> = catalog
            .into_iter()
            .filter(|entry| referenced.contains(&entry.id))
            .collect();
        let species_index = species
            .iter()
            .enumerate()
            .map(|(at, entry)| (entry.id, at))
            .collect();

        Ok(Self {
            nodes,
            index,
            parent_index,
            depth,
            sample_of,
            samples,
            species,
            species_index,
        })
    }

    /// Number of nodes in the forest.
    #[must_use]
    pub fn num_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn species_label(&self, id: SpeciesId) -> Result<(String, String), SimulationError> {
        let at = self
            .species_index
            .get(&id)
            .ok_or_else(|| SimulationError::internal(format!("forest misses species {}", id.0)))?;
        let entry = &self.species[*at];
        Ok((entry.mutant.clone(), entry.epistate.signature().to_string()))
    }

    fn row(&self, at: usize) -> Result<ForestNodeRow, SimulationError> {
        let node = &self.nodes[at];
        let (mutant, epistate) = self.species_label(node.species)?;
        Ok(ForestNodeRow {
            cell_id: node.cell_id.0,
            ancestor: node.parent.map(|parent| parent.0),
            mutant,
            epistate,
            sample: self.sample_of.get(&at).cloned(),
            birth_time: node.birth_time,
        })
    }

    /// All nodes, ordered by cell id.
    pub fn get_nodes(&self) -> Result<Vec<ForestNodeRow>, SimulationError> {
        (0..self.nodes.len()).map(|at| self.row(at)).collect()
    }

    /// One node by cell id.
    pub fn get_node(&self, cell_id: CellId) -> Result<ForestNodeRow, SimulationError> {
        let at = self.node_index(cell_id)?;
        self.row(at)
    }

    fn node_index(&self, cell_id: CellId) -> Result<usize, SimulationError> {
        self.index
            .get(&cell_id)
            .copied()
            .ok_or_else(|| SimulationError::not_found(format!("cell {} is not part of the forest", cell_id.0)))
    }

    fn parent_of(&self, at: usize) -> Result<usize, SimulationError> {
        self.parent_index[at]
            .ok_or_else(|| SimulationError::internal("walked past a forest root".to_string()))
    }

    fn root_of(&self, mut at: usize) -> Result<usize, SimulationError> {
        while let Some(parent) = self.parent_index[at] {
            at = parent;
        }
        Ok(at)
    }

    fn mrca_of_pair(&self, mut a: usize, mut b: usize) -> Result<usize, SimulationError> {
        while self.depth[a] > self.depth[b] {
            a = self.parent_of(a)?;
        }
        while self.depth[b] > self.depth[a] {
            b = self.parent_of(b)?;
        }
        while a != b {
            a = self.parent_of(a)?;
            b = self.parent_of(b)?;
        }
        Ok(a)
    }

    /// Most recent common ancestors of `cell_ids` (all sampled cells when
    /// absent), one per tree that contains any of them.
    pub fn get_coalescent_cells(
        &self,
        cell_ids: Option<&[CellId]>,
    ) -> Result<Vec<ForestNodeRow>, SimulationError> {
        let mut targets: Vec<usize> = match cell_ids {
            Some(ids) => ids
                .iter()
                .map(|id| self.node_index(*id))
                .collect::<Result<_, _>>()?,
            None => self.sample_of.keys().copied().collect(),
        };
        targets.sort_unstable();
        targets.dedup();

        let mut per_tree: BTreeMap<usize, usize> = BTreeMap::new();
        for target in targets {
            let root = self.root_of(target)?;
            match per_tree.get_mut(&root) {
                Some(ancestor) => *ancestor = self.mrca_of_pair(*ancestor, target)?,
                None => {
                    per_tree.insert(root, target);
                }
            }
        }

        let mut ancestors: Vec<usize> = per_tree.into_values().collect();
        ancestors.sort_unstable();
        ancestors.into_iter().map(|at| self.row(at)).collect()
    }

    /// Project the forest onto a subset of its samples.
    pub fn get_subforest_for<S: AsRef<str>>(&self, sample_names: &[S]) -> Result<Self, SimulationError> {
        let mut wanted: Vec<&str> = Vec::with_capacity(sample_names.len());
        for name in sample_names {
            let name = name.as_ref();
            if !self.samples.iter().any(|sample| sample.name == name) {
                return Err(SimulationError::not_found(format!("sample \"{name}\"")));
            }
            wanted.push(name);
        }

        let samples_subset: Vec<TissueSample> = self
            .samples
            .iter()
            .filter(|sample| wanted.contains(&sample.name.as_str()))
            .cloned()
            .collect();

        let mut leaf_samples: HashMap<CellId, String> = HashMap::new();
        for sample in &samples_subset {
            for cell_id in &sample.cell_ids {
                leaf_samples.insert(*cell_id, sample.name.clone());
            }
        }

        let mut records: BTreeMap<CellId, CellRecord> = BTreeMap::new();
        let mut stack: Vec<CellId> = leaf_samples.keys().copied().collect();
        while let Some(cell_id) = stack.pop() {
            if records.contains_key(&cell_id) {
                continue;
            }
            let node = &self.nodes[self.node_index(cell_id)?];
            records.insert(
                cell_id,
                CellRecord {
                    species: node.species,
                    parent: node.parent,
                    birth_time: node.birth_time,
                },
            );
            if let Some(parent) = node.parent {
                stack.push(parent);
            }
        }

        Self::assemble(records, &leaf_samples, samples_subset, self.species.clone())
    }

    /// Information about the samples whose cells lead the forest.
    #[must_use]
    pub fn get_samples_info(&self) -> Vec<SampleInfoRow> {
        self.samples
            .iter()
            .map(|sample| SampleInfoRow {
                name: sample.name.clone(),
                xmin: sample.region.lower().x,
                ymin: sample.region.lower().y,
                xmax: sample.region.upper().x,
                ymax: sample.region.upper().y,
                tumoural_cells: sample.cell_ids.len() as u64,
                time: sample.time,
            })
            .collect()
    }

    /// The species represented among the forest's nodes.
    #[must_use]
    pub fn get_species_info(&self) -> Vec<SpeciesInfoRow> {
        self.species
            .iter()
            .map(|entry| SpeciesInfoRow {
                mutant: entry.mutant.clone(),
                epistate: entry.epistate.signature().to_string(),
            })
            .collect()
    }

    /// Cell ids of the sampled nodes.
    #[must_use]
    pub fn sampled_cells(&self) -> Vec<CellId> {
        let mut ids: Vec<CellId> = self
            .sample_of
            .keys()
            .map(|&at| self.nodes[at].cell_id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
