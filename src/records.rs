// 📄 Ingestion records - Plain data handed to the core by the loaders
// One struct per source shape, no behavior beyond classification helpers

use chrono::{DateTime, NaiveDate, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum RecordError {
    /// A vote-type label matched nothing in the fixed enumeration. This is
    /// a configuration problem (the enumeration is incomplete), not a data
    /// problem, so it is a hard failure.
    #[error("unknown vote type: '{0}'")]
    UnknownVoteType(String),
}

// ============================================================================
// VOTE TYPE
// ============================================================================

/// How a vote was cast, or which non-candidate bucket a count belongs to.
///
/// Fixed enumeration. Sources spell these freely ("Election Day Votes",
/// "Advanced Voting Votes", "Absentee by Mail Votes"...); classification
/// runs each label against the recognition pattern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    DayOf,
    Advanced,
    Absentee,
    Provisional,
    /// Ballot with no vote recorded for the race.
    Under,
    /// Ballot with too many votes recorded for the race.
    Over,
}

impl VoteType {
    pub const ALL: [VoteType; 6] = [
        VoteType::DayOf,
        VoteType::Advanced,
        VoteType::Absentee,
        VoteType::Provisional,
        VoteType::Under,
        VoteType::Over,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::DayOf => "day_of",
            VoteType::Advanced => "advanced",
            VoteType::Absentee => "absentee",
            VoteType::Provisional => "provisional",
            VoteType::Under => "under",
            VoteType::Over => "over",
        }
    }

    /// Recognition pattern for free-text labels, matched over the whole
    /// label, case-insensitively.
    pub fn pattern(&self) -> &'static str {
        match self {
            VoteType::DayOf => r"(election.)?day.*",
            VoteType::Advanced => r"advanced.voting.*",
            VoteType::Absentee => r"absentee.*",
            VoteType::Provisional => r"provisional.*",
            VoteType::Under => r"under.*",
            VoteType::Over => r"over.*",
        }
    }

    /// True for per-candidate ways of voting; false for the under/over
    /// ballot-level buckets.
    pub fn is_candidate_bucket(&self) -> bool {
        !matches!(self, VoteType::Under | VoteType::Over)
    }

    /// Classify a free-text vote-type label against the enumeration.
    pub fn classify(label: &str) -> Result<VoteType, RecordError> {
        let table = pattern_table();
        let candidate = label.trim();
        for (vote_type, re) in table {
            if re.is_match(candidate) {
                return Ok(*vote_type);
            }
        }
        Err(RecordError::UnknownVoteType(candidate.to_string()))
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn pattern_table() -> &'static [(VoteType, Regex)] {
    static TABLE: OnceLock<Vec<(VoteType, Regex)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        VoteType::ALL
            .iter()
            .map(|vt| {
                let re = RegexBuilder::new(&format!("^(?:{})$", vt.pattern()))
                    .case_insensitive(true)
                    .build()
                    .expect("vote type patterns are static");
                (*vt, re)
            })
            .collect()
    })
}

// ============================================================================
// OFFICIAL RESULT RECORDS (tabulated XML export)
// ============================================================================

/// Per-precinct turnout line from the official export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecinctRecord {
    pub name: String,
    pub county: String,
    pub total_voters: u64,
    pub ballots_cast: u64,
    pub voter_turnout: f64,
    pub percent_reporting: f64,
    pub election_date: Option<NaiveDate>,
    pub timestamp: DateTime<Utc>,
}

/// Votes for one precinct within a vote-type breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecinctVotes {
    pub name: String,
    pub votes: u64,
}

/// One vote-type breakdown: label as printed, total, per-precinct counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteTypeCount {
    pub label: String,
    pub votes: u64,
    pub precincts: Vec<PrecinctVotes>,
}

/// One candidate line within a contest, with per-vote-type breakdowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceRecord {
    pub name: String,
    pub total_votes: u64,
    pub vote_types: Vec<VoteTypeCount>,
}

/// A contest (race) from the official export.
///
/// `ballot_buckets` holds the contest-level breakdowns that carry no
/// candidate (undervotes, overvotes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestRecord {
    pub name: String,
    pub key: i64,
    pub precincts_reported: u64,
    pub ballot_buckets: Vec<VoteTypeCount>,
    pub choices: Vec<ChoiceRecord>,
}

/// Everything one official XML export says.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionResultRecord {
    pub election_name: String,
    pub election_date: Option<NaiveDate>,
    pub region: String,
    pub timestamp: DateTime<Utc>,
    pub precincts: Vec<PrecinctRecord>,
    pub contests: Vec<ContestRecord>,
    /// Where this came from (file path), for findings and blame.
    pub source: String,
}

impl ElectionResultRecord {
    /// "2020-11-03:General Election:Fulton" style key.
    pub fn key(&self) -> String {
        let date = self
            .election_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".into());
        format!("{}:{}:{}", date, self.election_name, self.region)
    }
}

// ============================================================================
// TABULATOR RECORDS (receipt tapes)
// ============================================================================

/// One labeled count row from a tape ("5:Trump" → 123).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeEntry {
    pub row: u32,
    pub label: String,
    pub votes: u64,
}

/// One race block on a tape: the race header row plus its count rows,
/// in printed order. The "Total Votes" row stays in `entries`; the
/// consistency check pulls it out by identity match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeRace {
    pub name: String,
    pub entries: Vec<TapeEntry>,
}

/// A scanned tabulator receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabulatorRecord {
    pub name: String,
    pub id: String,
    /// Location labels. A composite location ("SS15A-SS15B") arrives
    /// already split into its parts.
    pub locations: Vec<String>,
    pub total_scanned: Option<u64>,
    pub protective_counter: Option<u64>,
    pub races: Vec<TapeRace>,
    /// Provenance: source file, column within it, content fingerprint.
    pub source_file: String,
    pub column: u32,
    pub fingerprint: String,
}

impl TabulatorRecord {
    /// Stable key: "<id>:<name>".
    pub fn key(&self) -> String {
        format!("{}:{}", self.id, self.name)
    }
}

/// Split a composite location label on whitespace and hyphens.
///
/// "SS15A-SS15B" → ["SS15A", "SS15B"]; "01A" → ["01A"].
pub fn split_locations(label: &str) -> Vec<String> {
    label
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}

// ============================================================================
// VOTER ROLL RECORDS
// ============================================================================

/// Registered-voter count for one precinct, aggregated from a roll extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterRollRecord {
    pub county: String,
    pub precinct: String,
    pub registered_voters: u64,
}

// ============================================================================
// TESTS
// ============================================================================
