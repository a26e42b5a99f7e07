// 🏁 Race Entity - A single seat in an election
//
// "Ga Senate 1" and "Georgia Senate (Perdue)" are the same seat; the
// registry makes that true. Each race carries its candidates, the sources
// that reported it (who do we blame for this data), and a hierarchical
// tally addressed by candidate × source × precinct × vote-type.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::records::VoteType;

use crate::findings::{FindingCategory, FindingLog};
use crate::fuzzy::{FuzzyMap, MapKey};
use crate::identity::{Identity, IdentityError, IdentityRegistry};
use crate::tally::{HierarchicalTally, Step};

// ============================================================================
// RACE ENTITY
// ============================================================================

#[derive(Serialize)]
pub struct Race {
    /// Scope of the seat: statewide, county-wide, a district number.
    pub district: Identity,
    pub seat: Identity,
    /// Files/URLs this race's data came from.
    pub sources: BTreeSet<String>,
    /// Candidate roster. Values are the declared per-candidate totals
    /// where the source provided one.
    pub candidates: FuzzyMap<Option<u64>>,
    /// Ballot-level buckets with no candidate (undervotes, overvotes).
    pub ballot_buckets: HashMap<VoteType, u64>,
    /// candidate × source × precinct × vote-type
    pub votes: HierarchicalTally,
}

impl Race {
    pub fn new(district: Identity, seat: Identity) -> Self {
        Race {
            district,
            seat,
            sources: BTreeSet::new(),
            candidates: FuzzyMap::new(),
            ballot_buckets: HashMap::new(),
            votes: HierarchicalTally::new(),
        }
    }

    /// Accumulate an undervote/overvote bucket total.
    pub fn add_bucket(&mut self, vote_type: VoteType, count: u64) {
        *self.ballot_buckets.entry(vote_type).or_insert(0) += count;
    }

    /// Record votes for one (candidate, source, precinct, vote-type) cell,
    /// accumulating across repeated reports from the same source. The
    /// vote-type component is an identity so sources without a vote-type
    /// breakdown (tapes) can tally under their own bucket.
    pub fn add_votes(
        &mut self,
        candidate: &Identity,
        source: &Identity,
        precinct: &Identity,
        vote_type: &Identity,
        count: u64,
    ) {
        self.votes.add_to(
            &[
                candidate.clone(),
                source.clone(),
                precinct.clone(),
                vote_type.clone(),
            ],
            count,
        );
    }

    /// Sum for a candidate across one source, every precinct and vote-type.
    pub fn candidate_total(&self, candidate: &Identity, source: &Identity) -> u64 {
        self.votes.tally(&[
            Step::from(candidate),
            Step::from(source),
            Step::Wildcard,
            Step::Wildcard,
        ])
    }

    /// Sum for one precinct across every candidate and vote-type, for one
    /// source.
    pub fn precinct_total(&self, source: &Identity, precinct: &Identity) -> u64 {
        self.votes.tally(&[
            Step::Wildcard,
            Step::from(source),
            Step::from(precinct),
            Step::Wildcard,
        ])
    }
}

// ============================================================================
// RACE REGISTRY
// ============================================================================

/// All races for one run, keyed fuzzily by seat.
pub struct RaceRegistry {
    races: FuzzyMap<Race>,
}

impl RaceRegistry {
    pub fn new() -> Self {
        RaceRegistry { races: FuzzyMap::new() }
    }

    /// Get-or-create a race by seat label. An existing fuzzy match merges:
    /// candidates and sources accumulate, the first district wins. A
    /// collision between seats that are meant to be distinct is reported
    /// by callers that check `contains` first.
    pub fn add(
        &mut self,
        district: &str,
        seat: &str,
        source: Option<&str>,
        identities: &mut IdentityRegistry,
    ) -> Result<Identity, IdentityError> {
        let district_id = identities.resolve(district, None)?;
        let seat_id = identities.resolve(seat, None)?;
        let (key, race) = self
            .races
            .build(seat_id.text(), || Race::new(district_id, seat_id.clone()))?;
        if let Some(src) = source {
            race.sources.insert(src.to_string());
        }
        Ok(key)
    }

    /// Register a candidate under a race, recording a collision finding
    /// when the candidate label fuzzy-merges with an existing one that
    /// carried a different declared total.
    pub fn add_candidate(
        &mut self,
        seat: &str,
        candidate: &str,
        declared_total: Option<u64>,
        source: &str,
        log: &mut FindingLog,
    ) -> Result<Option<Identity>, IdentityError> {
        let Some(race) = self.get_mut(seat) else {
            return Ok(None);
        };
        if let Some((existing, prior)) = race.candidates.search(candidate, true) {
            let totals_differ =
                matches!((prior, declared_total), (Some(a), Some(b)) if *a != b);
            if totals_differ {
                log.warning(
                    FindingCategory::Collision,
                    source,
                    format!(
                        "Candidate '{candidate}' merges into '{existing}' with a different declared total"
                    ),
                );
            }
        }
        // No declared total keeps whatever the entry already holds.
        let id = match declared_total {
            Some(_) => race.candidates.add(candidate, declared_total, None, true)?,
            None => race.candidates.build(candidate, || None)?.0,
        };
        Ok(Some(id))
    }

    pub fn get(&self, seat: &str) -> Option<&Race> {
        self.races.search(seat, true).map(|(_, r)| r)
    }

    pub fn get_mut(&mut self, seat: &str) -> Option<&mut Race> {
        self.races.get_mut(seat)
    }

    /// Find a candidate, optionally constrained to one race. Returns the
    /// (candidate, seat) pair whose candidate label is the best match,
    /// longest label winning across races.
    pub fn find_candidate(
        &self,
        candidate: &str,
        race: Option<&str>,
    ) -> Option<(Identity, Identity)> {
        let mut best: Option<(Identity, Identity)> = None;
        let mut consider = |race: &Race| {
            if let Some((key, _)) = race.candidates.search(candidate, true) {
                if let Some(id) = key.identity() {
                    let better = best
                        .as_ref()
                        .map_or(true, |(b, _)| id.text().len() > b.text().len());
                    if better {
                        best = Some((id.clone(), race.seat.clone()));
                    }
                }
            }
        };
        match race {
            Some(seat) => {
                if let Some(r) = self.get(seat) {
                    consider(r);
                }
            }
            None => {
                for (_, r) in self.races.iter() {
                    consider(r);
                }
            }
        }
        best
    }

    pub fn contains(&self, seat: &str) -> bool {
        self.races.contains(seat)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Race)> {
        self.races.iter()
    }

    pub fn len(&self) -> usize {
        self.races.len()
    }

    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }
}

impl Default for RaceRegistry {
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

    fn setup() -> (IdentityRegistry, RaceRegistry) {
        let mut identities = IdentityRegistry::new();
        let mut races = RaceRegistry::new();
        races
            .add("ga", "Ga Senate 1", Some("sos.xml"), &mut identities)
            .unwrap();
        races
            .add("ga", "el presidente", None, &mut identities)
            .unwrap();
        (identities, races)
    }

    #[test]
    fn test_add_merges_on_fuzzy_seat() {
        let (mut identities, mut races) = setup();
        // "Ga Senate 1" appears as a whole phrase inside the longer label
        races
            .add("ga", "Ga Senate 1 (Perdue)", Some("tape.xlsx"), &mut identities)
            .unwrap();

        assert_eq!(races.len(), 2);
        let race = races.get("Ga Senate 1").unwrap();
        assert_eq!(race.sources.len(), 2);
    }

    #[test]
    fn test_find_candidate_across_races() {
        let (mut identities, mut races) = setup();
        let mut log = FindingLog::new();
        races
            .add_candidate("Ga Senate 1", "Perduped", Some(100), "t", &mut log)
            .unwrap();
        races
            .add_candidate("el presidente", "Frump", Some(200), "t", &mut log)
            .unwrap();

        let (cand, seat) = races.find_candidate("Frump", None).unwrap();
        assert_eq!(cand.text(), "Frump");
        assert!(seat.matches("el presidente"));

        let scoped = races.find_candidate("Perduped", Some("Ga Senate 1"));
        assert!(scoped.is_some());
        assert!(races.find_candidate("Nobody", None).is_none());
        let _ = identities;
    }

    #[test]
    fn test_votes_roll_up() {
        let (mut identities, mut races) = setup();
        let cand = identities.resolve("Perdue", None).unwrap();
        let sos = identities.resolve("sos", None).unwrap();
        let p1 = identities.resolve("01A", None).unwrap();
        let p2 = identities.resolve("01B", None).unwrap();
        let day_of = identities.resolve("day_of", None).unwrap();
        let absentee = identities.resolve("absentee", None).unwrap();

        let race = races.get_mut("Ga Senate 1").unwrap();
        race.add_votes(&cand, &sos, &p1, &day_of, 100);
        race.add_votes(&cand, &sos, &p1, &absentee, 50);
        race.add_votes(&cand, &sos, &p2, &day_of, 25);

        assert_eq!(race.candidate_total(&cand, &sos), 175);
        assert_eq!(race.precinct_total(&sos, &p1), 150);
    }
}
