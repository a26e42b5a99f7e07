// 🔎 Audit Run - Wires records through registries into the engine
// load sources → resolve identities → check locations → check tallies → report
//
// This is the one place that knows about every registry. Each run owns its
// own instances; two audits never share identity tables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::entities::{CountyRegistry, Precinct, PrecinctRegistry, RaceRegistry};
use crate::findings::{FindingCategory, Severity};
use crate::fuzzy::{FuzzyMap, MapKey};
use crate::identity::{Identity, IdentityError, IdentityRegistry};
use crate::parser::LoadedBatch;
use crate::reconciliation::{
    EngineError, ReconciliationEngine, ReconciliationReport, TallySheet,
};
use crate::records::{
    ElectionResultRecord, RecordError, TabulatorRecord, VoteType, VoterRollRecord,
};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Vote-type classification failed: the fixed enumeration is missing
    /// something. Configuration problem, so the run stops.
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

// ============================================================================
// ALIAS CONFIG
// ============================================================================

/// Optional alias table seeding the identity registry before loading, so
/// known spelling variants resolve to the intended label from the start.
///
/// ```toml
/// [[alias]]
/// label = "Joe Biden"
/// pattern = '.*\b(biden|joseph)\b.*'
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AliasConfig {
    #[serde(default, rename = "alias")]
    pub aliases: Vec<AliasEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AliasEntry {
    pub label: String,
    pub pattern: Option<String>,
}

impl AliasConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing alias config")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&text)
    }
}

// ============================================================================
// AUDIT
// ============================================================================

pub struct Audit {
    pub identities: IdentityRegistry,
    pub counties: CountyRegistry,
    pub precincts: PrecinctRegistry,
    pub races: RaceRegistry,
    pub engine: ReconciliationEngine,
    /// Locations observed on tapes; compound entries stay compound.
    tape_locations: FuzzyMap<()>,
    /// Per-location tape totals, built while loading.
    tape_sheet: TallySheet,
    rolls: Vec<VoterRollRecord>,
}

impl Audit {
    pub fn new() -> Self {
        Audit {
            identities: IdentityRegistry::new(),
            counties: CountyRegistry::with_defaults(),
            precincts: PrecinctRegistry::new(),
            races: RaceRegistry::new(),
            engine: ReconciliationEngine::new(),
            tape_locations: FuzzyMap::new(),
            tape_sheet: TallySheet::new("tabulator tapes"),
            rolls: Vec::new(),
        }
    }

    /// Pre-seed the identity registry from an alias table.
    pub fn seed_aliases(&mut self, config: &AliasConfig) -> Result<(), AuditError> {
        for entry in &config.aliases {
            self.identities
                .resolve(&entry.label, entry.pattern.as_deref())?;
        }
        Ok(())
    }

    /// Load everything a directory sweep produced.
    pub fn load_batch(&mut self, batch: &LoadedBatch) -> Result<(), AuditError> {
        for record in &batch.officials {
            self.load_official(record)?;
        }
        for tape in &batch.tapes {
            self.load_tape(tape)?;
        }
        self.rolls.extend(batch.rolls.iter().cloned());
        Ok(())
    }

    /// Load one official XML export: precincts, contests, candidate votes.
    pub fn load_official(&mut self, record: &ElectionResultRecord) -> Result<(), AuditError> {
        let source = record.source.as_str();
        let sos = self.identities.resolve("sos", None)?;

        for precinct_record in &record.precincts {
            let precinct = Precinct::from_record(precinct_record, &mut self.identities)?;
            precinct.validate(source, self.engine.log_mut());
            self.precincts.add(precinct, source, self.engine.log_mut());
        }

        for contest in &record.contests {
            if self.races.contains(&contest.name) {
                self.engine.log_mut().error(
                    FindingCategory::Collision,
                    source,
                    format!("Collision Contest[{}]", contest.name),
                );
            }
            self.races
                .add(&record.region, &contest.name, Some(source), &mut self.identities)?;

            // Contest-level buckets: undervotes / overvotes
            for bucket in &contest.ballot_buckets {
                let vote_type = VoteType::classify(&bucket.label)?;
                if let Some(race) = self.races.get_mut(&contest.name) {
                    race.add_bucket(vote_type, bucket.votes);
                }
            }

            for choice in &contest.choices {
                let candidate = self
                    .races
                    .add_candidate(
                        &contest.name,
                        &choice.name,
                        Some(choice.total_votes),
                        source,
                        self.engine.log_mut(),
                    )?
                    .ok_or_else(|| {
                        // races.add above guarantees the race exists
                        IdentityError::IdentityConflict(contest.name.clone())
                    })?;

                // Internal consistency: declared candidate total vs the sum
                // of its own vote-type parts.
                let parts: u64 = choice.vote_types.iter().map(|vt| vt.votes).sum();
                if parts != choice.total_votes {
                    self.engine.log_mut().error(
                        FindingCategory::InconsistentTotal,
                        source,
                        format!(
                            "Choice '{}' in '{}': declared total {} != sum of vote types {parts}",
                            choice.name, contest.name, choice.total_votes
                        ),
                    );
                }

                for vt in &choice.vote_types {
                    let vote_type = VoteType::classify(&vt.label)?;
                    // The recognition pattern stays in the classifier;
                    // attaching it here would let unrelated labels
                    // ("Dayton") alias onto the vote-type identity.
                    let vt_id = self.identities.resolve(vote_type.as_str(), None)?;

                    // And again one level down: vote-type total vs its
                    // per-precinct parts.
                    let precinct_sum: u64 = vt.precincts.iter().map(|p| p.votes).sum();
                    if !vt.precincts.is_empty() && precinct_sum != vt.votes {
                        self.engine.log_mut().error(
                            FindingCategory::InconsistentTotal,
                            source,
                            format!(
                                "Choice '{}' {}: declared {} != precinct sum {precinct_sum}",
                                choice.name, vt.label, vt.votes
                            ),
                        );
                    }

                    for pv in &vt.precincts {
                        let precinct_id = self.identities.resolve(&pv.name, None)?;
                        if let Some(race) = self.races.get_mut(&contest.name) {
                            race.add_votes(&candidate, &sos, &precinct_id, &vt_id, pv.votes);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Load one tabulator receipt: locations, races, candidate counts.
    pub fn load_tape(&mut self, tape: &TabulatorRecord) -> Result<(), AuditError> {
        let source = tape.source_file.as_str();
        let tape_src = self.identities.resolve("tape", None)?;
        let scanned = self.identities.resolve("scanned", None)?;
        let total_row = Identity::new("Total Votes")?;

        // Resolve the location key: single, compound, or (rarely) wider
        let location_ids: Vec<Identity> = tape
            .locations
            .iter()
            .map(|l| self.identities.resolve(l, None))
            .collect::<Result<_, _>>()?;
        let (map_key, tally_loc) = match location_ids.as_slice() {
            [] => {
                self.engine.log_mut().warning(
                    FindingCategory::MissingCounterpart,
                    source,
                    format!("Tape {} has no location", tape.key()),
                );
                return Ok(());
            }
            [only] => (MapKey::Single(only.clone()), only.clone()),
            [a, b] => (
                MapKey::Pair(a.clone(), b.clone()),
                Identity::literal(&tape.locations.join("-")),
            ),
            [a, b, rest @ ..] => {
                self.engine.log_mut().warning(
                    FindingCategory::Collision,
                    source,
                    format!(
                        "Tape {} covers {} locations; keeping the first two",
                        tape.key(),
                        rest.len() + 2
                    ),
                );
                (
                    MapKey::Pair(a.clone(), b.clone()),
                    Identity::literal(&tape.locations.join("-")),
                )
            }
        };
        self.tape_locations.insert(map_key, ());

        let mut computed = 0u64;
        let mut declared: Option<u64> = None;

        for race in &tape.races {
            self.races
                .add("unknown", &race.name, Some(source), &mut self.identities)?;
            for entry in &race.entries {
                if total_row.matches(&entry.label) {
                    declared = Some(declared.unwrap_or(0) + entry.votes);
                    continue;
                }
                computed += entry.votes;
                let candidate = self
                    .races
                    .add_candidate(&race.name, &entry.label, None, source, self.engine.log_mut())?;
                if let (Some(candidate), Some(r)) = (candidate, self.races.get_mut(&race.name)) {
                    r.add_votes(&candidate, &tape_src, &tally_loc, &scanned, entry.votes);
                }
            }
        }

        self.tape_sheet
            .accumulate_location(&tally_loc, computed, declared);
        Ok(())
    }

    /// Cross-check voter-roll registration counts against the official
    /// precinct figures. Runs with the tally phase.
    fn check_rolls(&mut self) {
        for roll in &self.rolls {
            let Some(precinct) = self.precincts.search(&roll.precinct) else {
                self.engine.log_mut().info(
                    FindingCategory::MissingCounterpart,
                    "voter roll",
                    format!(
                        "Roll precinct {} has no counterpart in official results",
                        roll.precinct
                    ),
                );
                continue;
            };
            if precinct.total_voters != roll.registered_voters {
                let delta = precinct.total_voters.abs_diff(roll.registered_voters);
                self.engine.log_mut().warning(
                    FindingCategory::TotalMismatch,
                    "voter roll",
                    format!(
                        "Precinct {}: official registration {} vs roll {} (delta {delta})",
                        precinct.name, precinct.total_voters, roll.registered_voters
                    ),
                );
            }
        }
    }

    /// Run the full comparison and close out the engine.
    pub fn reconcile(&mut self, min: Severity) -> Result<ReconciliationReport, AuditError> {
        let authoritative = self.precincts.locations();
        let observed: Vec<MapKey> = self.tape_locations.keys().cloned().collect();
        self.engine.check_locations(
            &authoritative,
            "official results",
            &observed,
            "tabulator tapes",
        )?;

        // Official side: per precinct, candidate votes summed over every
        // race and vote-type.
        let sos = self.identities.resolve("sos", None)?;
        let mut sos_sheet = TallySheet::new("official results");
        for key in &authoritative {
            let Some(id) = key.identity() else { continue };
            let total: u64 = self
                .races
                .iter()
                .map(|(_, race)| race.precinct_total(&sos, id))
                .sum();
            sos_sheet.add_location(id, total, None);
        }

        self.check_rolls();
        self.engine.check_tallies(&sos_sheet, &self.tape_sheet)?;
        Ok(self.engine.report(min)?)
    }
}

impl Default for Audit {
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
    use crate::records::{
        ChoiceRecord, ContestRecord, PrecinctRecord, PrecinctVotes, TapeEntry, TapeRace,
        VoteTypeCount,
    };
    use chrono::Utc;

    fn precinct(name: &str, voters: u64, cast: u64) -> PrecinctRecord {
        PrecinctRecord {
            name: name.into(),
            county: "Fulton".into(),
            total_voters: voters,
            ballots_cast: cast,
            voter_turnout: if voters > 0 {
                cast as f64 / voters as f64 * 100.0
            } else {
                0.0
            },
            percent_reporting: 100.0,
            election_date: None,
            timestamp: Utc::now(),
        }
    }

    fn vtc(label: &str, votes: u64, precincts: &[(&str, u64)]) -> VoteTypeCount {
        VoteTypeCount {
            label: label.into(),
            votes,
            precincts: precincts
                .iter()
                .map(|(name, votes)| PrecinctVotes {
                    name: (*name).into(),
                    votes: *votes,
                })
                .collect(),
        }
    }

    fn official() -> ElectionResultRecord {
        ElectionResultRecord {
            election_name: "General".into(),
            election_date: None,
            region: "Fulton".into(),
            timestamp: Utc::now(),
            precincts: vec![
                precinct("01A", 1000, 700),
                precinct("01B", 800, 500),
                precinct("02A", 600, 400),
            ],
            contests: vec![ContestRecord {
                name: "President of the US".into(),
                key: 1,
                precincts_reported: 3,
                ballot_buckets: vec![vtc("Undervotes", 5, &[])],
                choices: vec![
                    ChoiceRecord {
                        name: "Trump".into(),
                        total_votes: 150,
                        vote_types: vec![vtc(
                            "Election Day Votes",
                            150,
                            &[("01A", 100), ("01B", 30), ("02A", 20)],
                        )],
                    },
                    ChoiceRecord {
                        name: "Biden".into(),
                        total_votes: 120,
                        vote_types: vec![vtc(
                            "Election Day Votes",
                            120,
                            &[("01A", 50), ("01B", 40), ("02A", 30)],
                        )],
                    },
                ],
            }],
            source: "fulton.xml".into(),
        }
    }

    fn tape(location: &str, trump: u64, biden: u64, total: u64) -> TabulatorRecord {
        TabulatorRecord {
            name: format!("ICP {location}"),
            id: "100".into(),
            locations: vec![location.into()],
            total_scanned: Some(trump + biden),
            protective_counter: None,
            races: vec![TapeRace {
                name: "President of the US".into(),
                entries: vec![
                    TapeEntry { row: 2, label: "Trump".into(), votes: trump },
                    TapeEntry { row: 3, label: "Biden".into(), votes: biden },
                    TapeEntry { row: 4, label: "Total Votes".into(), votes: total },
                ],
            }],
            source_file: "tapes.csv".into(),
            column: 1,
            fingerprint: "print".into(),
        }
    }

    #[test]
    fn test_missing_location_scenario() {
        let mut audit = Audit::new();
        audit.load_official(&official()).unwrap();
        // Tapes for 01A and 02A only; 01B went missing
        audit.load_tape(&tape("01A", 100, 50, 150)).unwrap();
        audit.load_tape(&tape("02A", 20, 30, 50)).unwrap();

        let report = audit.reconcile(Severity::Info).unwrap();
        let missing: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.category == FindingCategory::MissingCounterpart)
            .collect();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].messages.iter().any(|m| m.contains("01B")));
    }

    #[test]
    fn test_tally_delta_scenario() {
        let mut audit = Audit::new();
        audit.load_official(&official()).unwrap();
        // Official says 01A totals 150; this tape says 148
        audit.load_tape(&tape("01A", 100, 48, 148)).unwrap();
        audit.load_tape(&tape("01B", 30, 40, 70)).unwrap();
        audit.load_tape(&tape("02A", 20, 30, 50)).unwrap();

        let report = audit.reconcile(Severity::Warning).unwrap();
        let mismatches: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.category == FindingCategory::TotalMismatch)
            .collect();
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].messages.iter().any(|m| m.contains("delta 2")));
    }

    #[test]
    fn test_declared_total_mismatch_is_error() {
        let mut audit = Audit::new();
        audit.load_official(&official()).unwrap();
        // Candidate rows sum 150 but the tape printed Total Votes 152
        audit.load_tape(&tape("01A", 100, 50, 152)).unwrap();
        audit.load_tape(&tape("01B", 30, 40, 70)).unwrap();
        audit.load_tape(&tape("02A", 20, 30, 50)).unwrap();

        let report = audit.reconcile(Severity::Error).unwrap();
        assert!(report
            .findings
            .iter()
            .any(|f| f.category == FindingCategory::InconsistentTotal));
    }

    #[test]
    fn test_clean_run_has_no_findings() {
        let mut audit = Audit::new();
        audit.load_official(&official()).unwrap();
        audit.load_tape(&tape("01A", 100, 50, 150)).unwrap();
        audit.load_tape(&tape("01B", 30, 40, 70)).unwrap();
        audit.load_tape(&tape("02A", 20, 30, 50)).unwrap();

        let report = audit.reconcile(Severity::Info).unwrap();
        assert_eq!(report.error_count, 0, "{:?}", report.findings);
        assert_eq!(report.warning_count, 0, "{:?}", report.findings);
        assert_eq!(report.info_count, 0, "{:?}", report.findings);
    }

    #[test]
    fn test_compound_tape_location() {
        let mut audit = Audit::new();
        audit.load_official(&official()).unwrap();
        let mut t = tape("01A", 100, 50, 150);
        t.locations = vec!["SS15A".into(), "SS15B".into()];
        audit.load_tape(&t).unwrap();

        // The compound location never matches 01A/01B/02A, so all three
        // official precincts are missing counterparts.
        let report = audit.reconcile(Severity::Info).unwrap();
        let missing = report
            .findings
            .iter()
            .filter(|f| f.category == FindingCategory::MissingCounterpart)
            .flat_map(|f| f.messages.iter())
            .count();
        assert_eq!(missing, 3);
    }

    #[test]
    fn test_candidate_fuzzy_merge_across_sources() {
        let mut audit = Audit::new();
        audit.load_official(&official()).unwrap();
        let mut t = tape("01A", 100, 50, 150);
        // The tape spells the race and candidate differently
        t.races[0].name = "President of the US (Rep/Dem)".into();
        t.races[0].entries[0].label = "Donald Trump".into();
        audit.load_tape(&t).unwrap();

        // Still one race, and the tape's "Donald Trump" landed on the
        // existing "Trump" candidate.
        assert_eq!(audit.races.len(), 1);
        let (cand, _) = audit.races.find_candidate("Donald Trump", None).unwrap();
        assert_eq!(cand.text(), "Trump");
    }

    #[test]
    fn test_roll_mismatch_is_warning() {
        let mut audit = Audit::new();
        audit.load_official(&official()).unwrap();
        audit.load_tape(&tape("01A", 100, 50, 150)).unwrap();
        audit.load_tape(&tape("01B", 30, 40, 70)).unwrap();
        audit.load_tape(&tape("02A", 20, 30, 50)).unwrap();
        audit.rolls.push(VoterRollRecord {
            county: "Fulton".into(),
            precinct: "01A".into(),
            registered_voters: 990, // official says 1000
        });

        let report = audit.reconcile(Severity::Warning).unwrap();
        assert!(report
            .findings
            .iter()
            .any(|f| f.category == FindingCategory::TotalMismatch
                && f.messages.iter().any(|m| m.contains("delta 10"))));
    }

    #[test]
    fn test_alias_config_seeds_identities() {
        let config = AliasConfig::from_toml(
            r#"
[[alias]]
label = "Joe Biden"
pattern = '.*\b(biden|joseph)\b.*'

[[alias]]
label = "Write-in"
"#,
        )
        .unwrap();
        let mut audit = Audit::new();
        audit.seed_aliases(&config).unwrap();

        let found = audit.identities.search("Joseph R. Biden", true).unwrap();
        assert_eq!(found.text(), "Joe Biden");
    }
}
