// 🏫 Precinct Entity - Polling locations with turnout figures
//
// Precinct names are the worst-behaved labels in the whole pipeline:
// "01A", "01-A", "SS15A-SS15B ICP 1"... The registry resolves them all
// through fuzzy identities and reports collisions instead of silently
// merging distinct precincts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::findings::{FindingCategory, FindingLog};
use crate::fuzzy::{FuzzyMap, MapKey};
use crate::identity::{Identity, IdentityError, IdentityRegistry};
use crate::records::PrecinctRecord;

// ============================================================================
// PRECINCT ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Precinct {
    pub name: Identity,
    pub county: Identity,
    pub total_voters: u64,
    pub ballots_cast: u64,
    pub voter_turnout: f64,
    pub percent_reporting: f64,
    pub election_date: Option<NaiveDate>,
    pub timestamp: DateTime<Utc>,
}

impl Precinct {
    pub fn from_record(
        record: &PrecinctRecord,
        identities: &mut IdentityRegistry,
    ) -> Result<Self, IdentityError> {
        Ok(Precinct {
            name: identities.resolve(&record.name, None)?,
            county: identities.resolve(&record.county, None)?,
            total_voters: record.total_voters,
            ballots_cast: record.ballots_cast,
            voter_turnout: record.voter_turnout,
            percent_reporting: record.percent_reporting,
            election_date: record.election_date,
            timestamp: record.timestamp,
        })
    }

    /// "<county>:<name>" key, unique within an election.
    pub fn key(&self) -> String {
        format!("{}:{}", self.county, self.name)
    }

    /// Internal consistency of this precinct's own declared figures.
    /// Problems become findings; nothing aborts.
    pub fn validate(&self, source: &str, log: &mut FindingLog) {
        if self.ballots_cast > self.total_voters {
            log.error(
                FindingCategory::InconsistentTotal,
                source,
                format!(
                    "Precinct {}: ballots cast {} exceeds registered voters {}",
                    self.name, self.ballots_cast, self.total_voters
                ),
            );
        }
        if self.total_voters > 0 {
            let computed = self.ballots_cast as f64 / self.total_voters as f64 * 100.0;
            // Declared turnout off by more than a rounding step
            if (computed - self.voter_turnout).abs() > 0.5 {
                log.warning(
                    FindingCategory::InconsistentTotal,
                    source,
                    format!(
                        "Precinct {}: declared turnout {:.2}% but {} of {} is {:.2}%",
                        self.name,
                        self.voter_turnout,
                        self.ballots_cast,
                        self.total_voters,
                        computed
                    ),
                );
            }
        }
    }
}

// ============================================================================
// PRECINCT REGISTRY
// ============================================================================

/// All precincts seen by one run, keyed fuzzily by name.
pub struct PrecinctRegistry {
    precincts: FuzzyMap<Precinct>,
}

impl PrecinctRegistry {
    pub fn new() -> Self {
        PrecinctRegistry {
            precincts: FuzzyMap::new(),
        }
    }

    /// Add a precinct. A fuzzy hit on an existing name is a collision:
    /// recorded as a finding, then the newer data overwrites the older
    /// (later insertion wins, matching FuzzyMap semantics).
    pub fn add(
        &mut self,
        precinct: Precinct,
        source: &str,
        log: &mut FindingLog,
    ) -> Identity {
        let name = precinct.name.clone();
        if let Some((existing_key, existing)) = self.precincts.search(name.text(), true) {
            if existing.key() != precinct.key() {
                log.error(
                    FindingCategory::Collision,
                    source,
                    format!(
                        "Precinct collision: '{}' resolves to existing '{existing_key}'",
                        precinct.name
                    ),
                );
            } else {
                log.info(
                    FindingCategory::DuplicateSource,
                    source,
                    format!("Precinct {} reported more than once", precinct.name),
                );
            }
        }
        self.precincts
            .insert(MapKey::Single(name.clone()), precinct);
        name
    }

    pub fn search(&self, name: &str) -> Option<&Precinct> {
        self.precincts.search(name, true).map(|(_, p)| p)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.precincts.contains(name)
    }

    /// The location key set, for cross-source comparison.
    pub fn locations(&self) -> Vec<MapKey> {
        self.precincts.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Precinct)> {
        self.precincts.iter()
    }

    pub fn len(&self) -> usize {
        self.precincts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precincts.is_empty()
    }
}

impl Default for PrecinctRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
