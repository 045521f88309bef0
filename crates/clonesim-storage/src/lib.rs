//! Snapshot persistence for simulations.
//!
//! A snapshot is a versioned binary container: a fixed header holding
//! `(magic, version, seed)` followed by a `postcard`-encoded payload of
//! the full simulation state (tissue, registry with counters and rates,
//! pending scheduled mutations, lineage edges, statistics history,
//! samples, ancestry ledger, and the RNG state). A `save`/`load` cycle
//! round-trips the state: resumed runs reproduce the outputs the
//! original simulation would have produced.

use clonesim_core::Simulation;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Leading bytes of every snapshot file.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"CSNP";
/// Current container version.
pub const SNAPSHOT_VERSION: u16 = 1;

const HEADER_LEN: usize = SNAPSHOT_MAGIC.len() + 2 + 8;

/// Errors surfaced by snapshot save/load.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The simulation state could not be encoded.
    #[error("snapshot encoding failed: {0}")]
    Encode(postcard::Error),

    /// The snapshot cannot be deserialized: wrong magic, unsupported
    /// version, truncation, or a payload that does not decode.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Serialize `simulation` into a snapshot byte buffer.
pub fn to_bytes(simulation: &Simulation) -> Result<Vec<u8>, SnapshotError> {
    let payload = postcard::to_allocvec(simulation).map_err(SnapshotError::Encode)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&simulation.seed().to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Deserialize a simulation from snapshot bytes.
pub fn from_bytes(bytes: &[u8]) -> Result<Simulation, SnapshotError> {
    if bytes.len() < HEADER_LEN {
        return Err(SnapshotError::Corrupt(format!(
            "{} bytes is shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }
    let (magic, rest) = bytes.split_at(SNAPSHOT_MAGIC.len());
    if magic != SNAPSHOT_MAGIC {
        return Err(SnapshotError::Corrupt("unrecognized magic bytes".to_string()));
    }
    let (version_bytes, rest) = rest.split_at(2);
    let version = u16::from_le_bytes([version_bytes[0], version_bytes[1]]);
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::Corrupt(format!(
            "unsupported snapshot version {version} (expected {SNAPSHOT_VERSION})"
        )));
    }
    let (seed_bytes, payload) = rest.split_at(8);
    let mut seed = [0u8; 8];
    seed.copy_from_slice(seed_bytes);
    let header_seed = u64::from_le_bytes(seed);

    let simulation: Simulation = postcard::from_bytes(payload)
        .map_err(|err| SnapshotError::Corrupt(format!("payload does not decode: {err}")))?;
    if simulation.seed() != header_seed {
        return Err(SnapshotError::Corrupt(format!(
            "header seed {header_seed} disagrees with payload seed {}",
            simulation.seed()
        )));
    }
    debug!(seed = header_seed, time = simulation.clock(), "decoded snapshot");
    Ok(simulation)
}

/// Save `simulation` to a snapshot file at `path`.
pub fn save(simulation: &Simulation, path: &Path) -> Result<(), SnapshotError> {
    let bytes = to_bytes(simulation)?;
    fs::write(path, &bytes)?;
    info!(
        path = %path.display(),
        bytes = bytes.len(),
        time = simulation.clock(),
        "saved simulation snapshot"
    );
    Ok(())
}

/// Load a simulation from the snapshot file at `path`.
pub fn load(path: &Path) -> Result<Simulation, SnapshotError> {
    let bytes = fs::read(path)?;
    from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clonesim_core::{MutantDescriptor, SimulationConfig};

    fn small_simulation() -> Simulation {
        let mut sim = Simulation::new(SimulationConfig {
            width: 40,
            height: 40,
            rng_seed: Some(77),
            ..SimulationConfig::default()
        })
        .expect("simulation");
        sim.add_mutant(&MutantDescriptor::plain("A", 0.3, 0.0)).expect("mutant");
        sim.place_cell("A", 20, 20).expect("founder");
        sim
    }

    #[test]
    fn header_layout_is_stable() {
        let sim = small_simulation();
        let bytes = to_bytes(&sim).expect("encode");
        assert_eq!(&bytes[..4], b"CSNP");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), SNAPSHOT_VERSION);
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&bytes[6..14]);
        assert_eq!(u64::from_le_bytes(seed), 77);
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let sim = small_simulation();
        let mut bytes = to_bytes(&sim).expect("encode");
        bytes[0] = b'X';
        assert!(matches!(from_bytes(&bytes), Err(SnapshotError::Corrupt(_))));
    }

    #[test]
    fn unsupported_version_is_corrupt() {
        let sim = small_simulation();
        let mut bytes = to_bytes(&sim).expect("encode");
        bytes[4] = 0xFF;
        assert!(matches!(from_bytes(&bytes), Err(SnapshotError::Corrupt(_))));
    }

    #[test]
    fn truncation_is_corrupt() {
        let sim = small_simulation();
        let bytes = to_bytes(&sim).expect("encode");
        assert!(matches!(from_bytes(&bytes[..10]), Err(SnapshotError::Corrupt(_))));
        let almost = &bytes[..bytes.len() - 3];
        assert!(matches!(from_bytes(almost), Err(SnapshotError::Corrupt(_))));
    }
}
