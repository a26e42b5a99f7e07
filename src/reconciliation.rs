// ⚖️ Reconciliation Engine - Cross-source comparison of locations and tallies
//
// One run walks a fixed sequence:
//   Loaded → LocationsChecked → TalliesChecked → Reported
// No step may be skipped and Reported is terminal. The engine never aborts
// on messy data; everything it notices becomes a Finding and the run keeps
// going. A run always completes and yields a (possibly empty) finding set.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::findings::{Finding, FindingCategory, FindingLog, Severity};
use crate::fuzzy::{FuzzyMap, MapKey};
use crate::identity::Identity;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    /// A phase was called out of order. The sequence is fixed.
    #[error("cannot {attempted} while in state {state}")]
    OutOfOrder {
        attempted: &'static str,
        state: &'static str,
    },

    /// The run was already reported; a new engine is needed for a new run.
    #[error("run already reported")]
    Terminal,
}

// ============================================================================
// RUN STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Loaded,
    LocationsChecked,
    TalliesChecked,
    Reported,
}

impl RunState {
    fn name(&self) -> &'static str {
        match self {
            RunState::Loaded => "loaded",
            RunState::LocationsChecked => "locations_checked",
            RunState::TalliesChecked => "tallies_checked",
            RunState::Reported => "reported",
        }
    }
}

// ============================================================================
// TALLY SHEET
// ============================================================================

/// One side of a tally comparison: per-location computed sums, plus the
/// total the source itself declared where it printed one.
pub struct TallySheet {
    pub source: String,
    entries: FuzzyMap<SheetEntry>,
}

#[derive(Debug, Clone)]
struct SheetEntry {
    computed: u64,
    declared: Option<u64>,
}

impl TallySheet {
    pub fn new(source: &str) -> Self {
        TallySheet {
            source: source.to_string(),
            entries: FuzzyMap::new(),
        }
    }

    /// Record a location's summed votes. `declared` is the source's own
    /// printed grand total, when it has one.
    pub fn add_location(
        &mut self,
        location: &Identity,
        computed: u64,
        declared: Option<u64>,
    ) {
        self.entries.insert(
            MapKey::Single(location.clone()),
            SheetEntry { computed, declared },
        );
    }

    /// Accumulating variant of `add_location`: totals add up, a declared
    /// total joins (or adds to) whatever was declared before. Used when
    /// several tapes cover one location.
    pub fn accumulate_location(
        &mut self,
        location: &Identity,
        computed: u64,
        declared: Option<u64>,
    ) {
        if let Some(entry) = self.entries.get_mut(location.text()) {
            entry.computed += computed;
            entry.declared = match (entry.declared, declared) {
                (Some(a), Some(b)) => Some(a + b),
                (a, b) => a.or(b),
            };
            return;
        }
        self.add_location(location, computed, declared);
    }

    pub fn computed_for(&self, location: &str) -> Option<u64> {
        self.entries.search(location, true).map(|(_, e)| e.computed)
    }

    pub fn locations(&self) -> impl Iterator<Item = &MapKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&MapKey, &SheetEntry)> {
        self.entries.iter()
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub min_severity: Severity,
    pub info_count: usize,
    pub warning_count: usize,
    pub error_count: usize,
    pub findings: Vec<Finding>,
}

impl ReconciliationReport {
    pub fn summary(&self) -> String {
        format!(
            "Run {}: {} error(s), {} warning(s), {} info",
            self.run_id, self.error_count, self.warning_count, self.info_count
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    state: RunState,
    log: FindingLog,
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            state: RunState::Loaded,
            log: FindingLog::new(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Loaders record their own findings (collisions, invalid counts)
    /// into the run's log through this.
    pub fn log_mut(&mut self) -> &mut FindingLog {
        &mut self.log
    }

    fn advance(
        &mut self,
        expected: RunState,
        next: RunState,
        attempted: &'static str,
    ) -> Result<(), EngineError> {
        if self.state == RunState::Reported {
            return Err(EngineError::Terminal);
        }
        if self.state != expected {
            return Err(EngineError::OutOfOrder {
                attempted,
                state: self.state.name(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Compare location sets: everything the authoritative source knows
    /// that the observed source never mentioned.
    ///
    /// Compound keys on the authoritative side are skipped (they are
    /// already-merged multi-location entries, not missing in isolation);
    /// compound keys on the observed side count for each of their parts.
    /// Each missing location becomes an Info finding.
    pub fn check_locations(
        &mut self,
        authoritative: &[MapKey],
        auth_name: &str,
        observed: &[MapKey],
        observed_name: &str,
    ) -> Result<Vec<Identity>, EngineError> {
        self.advance(
            RunState::Loaded,
            RunState::LocationsChecked,
            "check_locations",
        )?;

        let mut missing = Vec::new();
        for key in authoritative {
            let id = match key {
                MapKey::Single(id) => id,
                MapKey::Pair(_, _) => continue,
            };
            let found = observed.iter().any(|o| match o {
                MapKey::Single(oid) => {
                    oid == id || oid.matches(id.text()) || id.matches(oid.text())
                }
                MapKey::Pair(a, b) => {
                    a == id || b == id || a.matches(id.text()) || b.matches(id.text())
                }
            });
            if !found {
                self.log.info(
                    FindingCategory::MissingCounterpart,
                    observed_name,
                    format!(
                        "Location {id} from {auth_name} has no counterpart in {observed_name}"
                    ),
                );
                missing.push(id.clone());
            }
        }
        Ok(missing)
    }

    /// Compare per-location totals between two sheets, and check each
    /// sheet's declared totals against its own computed sums.
    ///
    /// Cross-source disagreement is a Warning (both totals + delta).
    /// A source disagreeing with itself is an Error.
    pub fn check_tallies(
        &mut self,
        authoritative: &TallySheet,
        observed: &TallySheet,
    ) -> Result<(), EngineError> {
        self.advance(
            RunState::LocationsChecked,
            RunState::TalliesChecked,
            "check_tallies",
        )?;

        for (key, entry) in authoritative.iter() {
            let id = match key {
                MapKey::Single(id) => id,
                MapKey::Pair(_, _) => continue,
            };
            let Some(other) = observed.computed_for(id.text()) else {
                continue; // absence was already reported by check_locations
            };
            if entry.computed != other {
                let delta = entry.computed.abs_diff(other);
                self.log.warning(
                    FindingCategory::TotalMismatch,
                    &observed.source,
                    format!(
                        "Location {id}: {} reports {} but {} reports {other} (delta {delta})",
                        authoritative.source, entry.computed, observed.source
                    ),
                );
            }
        }

        for sheet in [authoritative, observed] {
            for (key, entry) in sheet.iter() {
                let Some(declared) = entry.declared else {
                    continue;
                };
                if declared != entry.computed {
                    self.log.error(
                        FindingCategory::InconsistentTotal,
                        &sheet.source,
                        format!(
                            "Location {key}: declared total {declared} != sum of parts {}",
                            entry.computed
                        ),
                    );
                }
            }
        }
        Ok(())
    }

    /// Findings at or above a severity. Queryable at any point in the run.
    pub fn findings(&self, min: Severity) -> impl Iterator<Item = &Finding> {
        self.log.at_or_above(min)
    }

    /// Close the run and produce the report. Terminal: the engine refuses
    /// everything afterwards.
    pub fn report(&mut self, min: Severity) -> Result<ReconciliationReport, EngineError> {
        self.advance(RunState::TalliesChecked, RunState::Reported, "report")?;

        let counts = self.log.counts();
        Ok(ReconciliationReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            min_severity: min,
            info_count: counts.get(&Severity::Info).copied().unwrap_or(0),
            warning_count: counts.get(&Severity::Warning).copied().unwrap_or(0),
            error_count: counts.get(&Severity::Error).copied().unwrap_or(0),
            findings: self.log.at_or_above(min).cloned().collect(),
        })
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn id(label: &str) -> Identity {
        Identity::new(label).unwrap()
    }

    fn singles(labels: &[&str]) -> Vec<MapKey> {
        labels.iter().map(|l| MapKey::Single(id(l))).collect()
    }

    #[test]
    fn test_missing_location_yields_one_info_finding() {
        let mut engine = ReconciliationEngine::new();
        let authoritative = singles(&["01A", "01B", "02A"]);
        let observed = singles(&["01A", "02A"]);

        let missing = engine
            .check_locations(&authoritative, "sos", &observed, "tapes")
            .unwrap();

        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].text(), "01B");

        let findings: Vec<_> = engine.findings(Severity::Info).collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, FindingCategory::MissingCounterpart);
        assert!(findings[0].messages.iter().any(|m| m.contains("01B")));
    }

    #[test]
    fn test_compound_keys_are_not_missing() {
        let mut engine = ReconciliationEngine::new();
        let mut authoritative = singles(&["01A"]);
        authoritative.push(MapKey::Pair(id("SS15A"), id("SS15B")));
        let observed = singles(&["01A"]);

        let missing = engine
            .check_locations(&authoritative, "sos", &observed, "tapes")
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_observed_pair_covers_its_parts() {
        let mut engine = ReconciliationEngine::new();
        let authoritative = singles(&["SS15A", "SS15B"]);
        let observed = vec![MapKey::Pair(id("SS15A"), id("SS15B"))];

        let missing = engine
            .check_locations(&authoritative, "sos", &observed, "tapes")
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_total_mismatch_is_a_warning_with_delta() {
        let mut engine = ReconciliationEngine::new();
        engine
            .check_locations(&singles(&["01A"]), "sos", &singles(&["01A"]), "tapes")
            .unwrap();

        let loc = id("01A");
        let mut sos = TallySheet::new("sos");
        sos.add_location(&loc, 150, None);
        let mut tapes = TallySheet::new("tapes");
        tapes.add_location(&loc, 148, None);

        engine.check_tallies(&sos, &tapes).unwrap();

        let findings: Vec<_> = engine.findings(Severity::Warning).collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, FindingCategory::TotalMismatch);
        assert!(findings[0].messages.iter().any(|m| m.contains("delta 2")));
    }

    #[test]
    fn test_matching_totals_yield_nothing() {
        let mut engine = ReconciliationEngine::new();
        engine
            .check_locations(&singles(&["01A"]), "sos", &singles(&["01A"]), "tapes")
            .unwrap();

        let loc = id("01A");
        let mut sos = TallySheet::new("sos");
        sos.add_location(&loc, 150, None);
        let mut tapes = TallySheet::new("tapes");
        tapes.add_location(&loc, 150, None);

        engine.check_tallies(&sos, &tapes).unwrap();
        assert_eq!(engine.findings(Severity::Warning).count(), 0);
    }

    #[test]
    fn test_declared_total_disagreement_is_an_error() {
        let mut engine = ReconciliationEngine::new();
        engine
            .check_locations(&singles(&["01A"]), "sos", &singles(&["01A"]), "tapes")
            .unwrap();

        let loc = id("01A");
        let mut sos = TallySheet::new("sos");
        sos.add_location(&loc, 150, None);
        let mut tapes = TallySheet::new("tapes");
        // tape printed "Total Votes 152" but its candidate rows sum to 150
        tapes.add_location(&loc, 150, Some(152));

        engine.check_tallies(&sos, &tapes).unwrap();

        let errors: Vec<_> = engine.findings(Severity::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, FindingCategory::InconsistentTotal);
    }

    #[test]
    fn test_phases_cannot_be_skipped() {
        let mut engine = ReconciliationEngine::new();
        let sheet_a = TallySheet::new("a");
        let sheet_b = TallySheet::new("b");

        let err = engine.check_tallies(&sheet_a, &sheet_b).unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrder { .. }));

        let err = engine.report(Severity::Info).unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrder { .. }));
    }

    #[test]
    fn test_reported_is_terminal() {
        let mut engine = ReconciliationEngine::new();
        engine
            .check_locations(&singles(&["01A"]), "a", &singles(&["01A"]), "b")
            .unwrap();
        let sheet_a = TallySheet::new("a");
        let sheet_b = TallySheet::new("b");
        engine.check_tallies(&sheet_a, &sheet_b).unwrap();

        let report = engine.report(Severity::Info).unwrap();
        assert_eq!(report.error_count, 0);
        assert_eq!(engine.state(), RunState::Reported);

        assert!(matches!(
            engine.report(Severity::Info),
            Err(EngineError::Terminal)
        ));
        assert!(matches!(
            engine.check_locations(&[], "a", &[], "b"),
            Err(EngineError::Terminal)
        ));
    }
}
