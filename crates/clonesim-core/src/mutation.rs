//! Scheduled mutant-to-mutant mutations.
//!
//! Each entry is one-shot: once the simulated clock passes its time, the
//! next duplication of a cell belonging to the source mutant redirects
//! the child to the destination mutant (matching epigenetic state) and
//! consumes the entry. Entries sharing a source fire in time order.

use crate::species::MutantId;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// One pending mutation record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMutation {
    pub time: f64,
    pub source: MutantId,
    pub destination: MutantId,
    /// Insertion sequence; breaks ties between entries scheduled for the
    /// same instant.
    seq: u64,
}

/// Time-ordered queue of scheduled mutations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationSchedule {
    entries: Vec<ScheduledMutation>,
    next_seq: u64,
}

impl MutationSchedule {
    /// Create an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a mutation from `source` to `destination` at `time`.
    pub fn schedule(&mut self, time: f64, source: MutantId, destination: MutantId) {
        let entry = ScheduledMutation { time, source, destination, seq: self.next_seq };
        self.next_seq += 1;
        let at = self
            .entries
            .partition_point(|other| (OrderedFloat(other.time), other.seq) <= (OrderedFloat(time), entry.seq));
        self.entries.insert(at, entry);
    }

    /// Consume the earliest due entry for `source`, if any.
    pub fn take_due(&mut self, now: f64, source: MutantId) -> Option<ScheduledMutation> {
        let at = self
            .entries
            .iter()
            .position(|entry| entry.time <= now && entry.source == source)?;
        Some(self.entries.remove(at))
    }

    /// Pending entries in firing order.
    #[must_use]
    pub fn pending(&self) -> &[ScheduledMutation] {
        &self.entries
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
