//! Time-series recorder for per-species counters.
//!
//! A non-zero `history_delta` makes the recorder append a snapshot of
//! every species' counters whenever the simulated clock has advanced by
//! at least that much since the previous snapshot. Window queries are
//! inclusive and the live counters are always available as the final
//! point.

use crate::species::{SpeciesCounters, SpeciesRegistry, SpeciesId};
use serde::{Deserialize, Serialize};

/// Counter snapshot of one species at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeciesSample {
    pub species: SpeciesId,
    pub counters: SpeciesCounters,
}

/// Counters of every species at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub time: f64,
    pub samples: Vec<SpeciesSample>,
}

/// The statistics recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsRecorder {
    history_delta: f64,
    last_sample_time: f64,
    points: Vec<HistoryPoint>,
}

impl Default for StatisticsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsRecorder {
    /// Recorder with periodic sampling disabled (`Δh = 0`).
    #[must_use]
    pub fn new() -> Self {
        Self {
            history_delta: 0.0,
            last_sample_time: 0.0,
            points: Vec::new(),
        }
    }

    /// Current sampling delta.
    #[must_use]
    pub const fn history_delta(&self) -> f64 {
        self.history_delta
    }

    /// Change the sampling delta; takes effect from the next event.
    pub fn set_history_delta(&mut self, delta: f64) {
        self.history_delta = delta.max(0.0);
    }

    /// Record a snapshot if the clock has moved `Δh` past the previous
    /// one.
    pub fn maybe_record(&mut self, time: f64, registry: &SpeciesRegistry) {
        if self.history_delta <= 0.0 {
            return;
        }
        if time < self.last_sample_time + self.history_delta {
            return;
        }
        self.points.push(Self::snapshot(time, registry));
        self.last_sample_time = time;
    }

    fn snapshot(time: f64, registry: &SpeciesRegistry) -> HistoryPoint {
        HistoryPoint {
            time,
            samples: registry
                .species()
                .iter()
                .map(|species| SpeciesSample { species: species.id, counters: species.counters })
                .collect(),
        }
    }

    /// Recorded points, oldest first.
    #[must_use]
    pub fn points(&self) -> &[HistoryPoint] {
        &self.points
    }

    /// Points whose time lies in the inclusive `[min_time, max_time]`
    /// window, with the live counters appended as the final point when
    /// the current clock falls inside the window and past every recorded
    /// point.
    #[must_use]
    pub fn window(
        &self,
        min_time: f64,
        max_time: f64,
        now: f64,
        registry: &SpeciesRegistry,
    ) -> Vec<HistoryPoint> {
        let mut rows: Vec<HistoryPoint> = self
            .points
            .iter()
            .filter(|point| point.time >= min_time && point.time <= max_time)
            .cloned()
            .collect();
        let newest_recorded = rows.last().map(|point| point.time);
        if now >= min_time && now <= max_time && newest_recorded.is_none_or(|t| now > t) {
            rows.push(Self::snapshot(now, registry));
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species::MutantDescriptor;

    fn registry() -> SpeciesRegistry {
        let mut registry = SpeciesRegistry::new();
        registry.register(&MutantDescriptor::plain("A", 0.2, 0.0)).unwrap();
        registry
    }

    #[test]
    fn zero_delta_records_nothing_but_exposes_the_live_point() {
        let registry = registry();
        let mut recorder = StatisticsRecorder::new();
        recorder.maybe_record(1.0, &registry);
        recorder.maybe_record(100.0, &registry);
        assert!(recorder.points().is_empty());

        let rows = recorder.window(0.0, f64::INFINITY, 42.0, &registry);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time, 42.0);
    }

    #[test]
    fn snapshots_follow_the_delta() {
        let mut registry = registry();
        let id = registry.find_species("A").unwrap();
        let mut recorder = StatisticsRecorder::new();
        recorder.set_history_delta(10.0);

        recorder.maybe_record(4.0, &registry);
        assert!(recorder.points().is_empty());

        registry.species_by_id_mut(id).unwrap().counters.current_cells = 3;
        recorder.maybe_record(10.0, &registry);
        recorder.maybe_record(12.0, &registry);
        registry.species_by_id_mut(id).unwrap().counters.current_cells = 7;
        recorder.maybe_record(25.0, &registry);

        let points = recorder.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].time, 10.0);
        assert_eq!(points[0].samples[0].counters.current_cells, 3);
        assert_eq!(points[1].time, 25.0);
        assert_eq!(points[1].samples[0].counters.current_cells, 7);
    }

    #[test]
    fn window_is_inclusive_and_appends_the_live_tail() {
        let registry = registry();
        let mut recorder = StatisticsRecorder::new();
        recorder.set_history_delta(5.0);
        for time in [5.0, 10.0, 15.0, 20.0] {
            recorder.maybe_record(time, &registry);
        }

        let rows = recorder.window(10.0, 15.0, 22.0, &registry);
        assert_eq!(rows.iter().map(|p| p.time).collect::<Vec<_>>(), vec![10.0, 15.0]);

        let with_tail = recorder.window(10.0, f64::INFINITY, 22.0, &registry);
        assert_eq!(with_tail.last().unwrap().time, 22.0);
    }
}
