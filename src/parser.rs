// 🏗️ Loader Framework - One loader per source shape
// Official XML exports, tabulator receipt tapes, voter-roll extracts
//
// Loaders turn files into the plain records in `records`; they never touch
// the registries. Anything odd they find (unparseable counts, rescanned
// files) becomes a finding, and loading continues.

use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::findings::{FindingCategory, FindingLog};
use crate::records::{
    split_locations, ChoiceRecord, ContestRecord, ElectionResultRecord, PrecinctRecord,
    PrecinctVotes, TabulatorRecord, TapeEntry, TapeRace, VoteTypeCount, VoterRollRecord,
};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Which kind of source a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    /// Official tabulated results export (ElectionResult XML).
    OfficialXml,
    /// Scanned tabulator receipt tape (spreadsheet, column per machine).
    TabulatorTape,
    /// Voter-roll extract (delimited text).
    VoterRoll,
}

impl SourceType {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceType::OfficialXml => "Official results (XML)",
            SourceType::TabulatorTape => "Tabulator tape",
            SourceType::VoterRoll => "Voter roll",
        }
    }

    /// Short code for internal use
    pub fn code(&self) -> &str {
        match self {
            SourceType::OfficialXml => "sos",
            SourceType::TabulatorTape => "tape",
            SourceType::VoterRoll => "roll",
        }
    }
}

/// What a loader produced.
#[derive(Debug)]
pub enum LoadedSource {
    Official(ElectionResultRecord),
    Tapes(Vec<TabulatorRecord>),
    Rolls(Vec<VoterRollRecord>),
}

/// Loader seam: one implementation per source shape.
pub trait SourceLoader: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Parse one file into records. Data-quality problems become findings;
    /// only unreadable files and broken structure are hard errors.
    fn load(&self, path: &Path, log: &mut FindingLog) -> Result<LoadedSource>;
}

/// Detect which source a file is, by extension then content sniffing.
pub fn detect_source(path: &Path) -> Result<SourceType> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "xml" => Ok(SourceType::OfficialXml),
        "xlsx" | "xls" => Ok(SourceType::TabulatorTape),
        "csv" | "txt" | "tsv" => {
            let head = read_head(path, 4096)?;
            let first_line = head.lines().next().unwrap_or("").to_lowercase();
            if first_line.contains("tabulator") {
                Ok(SourceType::TabulatorTape)
            } else {
                Ok(SourceType::VoterRoll)
            }
        }
        other => bail!(
            "cannot detect source type of {} (extension '{other}')",
            path.display()
        ),
    }
}

/// Loader instance for a detected source type.
pub fn get_loader(source_type: SourceType) -> Box<dyn SourceLoader> {
    match source_type {
        SourceType::OfficialXml => Box::new(OfficialXmlLoader::new()),
        SourceType::TabulatorTape => Box::new(TapeLoader::new()),
        SourceType::VoterRoll => Box::new(VoterRollLoader::new()),
    }
}

fn read_head(path: &Path, limit: usize) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let take = bytes.len().min(limit);
    Ok(String::from_utf8_lossy(&bytes[..take]).into_owned())
}

/// Strip thousands separators and parse an integer count.
fn parse_count(raw: &str) -> Option<u64> {
    let cleaned: String = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches('%').parse().ok()
}

/// Best-effort timestamp parsing across the formats the exports use.
/// Trailing timezone words ("EST") are dropped; times are taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = raw.trim();
    let cleaned = match cleaned.rsplit_once(' ') {
        Some((head, tail)) if tail.chars().all(|c| c.is_ascii_alphabetic()) => head,
        _ => cleaned,
    };
    for fmt in [
        "%m/%d/%Y %I:%M:%S %p",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(cleaned, fmt) {
            return Some(dt.and_utc());
        }
    }
    None
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = raw.trim();
    for fmt in ["%m/%d/%Y", "%Y-%m-%d", "%B %d, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(cleaned, fmt) {
            return Some(d);
        }
    }
    None
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// OFFICIAL XML LOADER
// ============================================================================

// Serde mirror of the export schema. Counts stay as strings here; they are
// parsed (and complained about) during conversion so one bad attribute
// doesn't sink the whole file.

#[derive(Debug, Deserialize)]
struct XmlElectionResult {
    #[serde(rename = "Timestamp", default)]
    timestamp: String,
    #[serde(rename = "ElectionName", default)]
    election_name: String,
    #[serde(rename = "ElectionDate", default)]
    election_date: String,
    #[serde(rename = "Region", default)]
    region: String,
    #[serde(rename = "VoterTurnout")]
    voter_turnout: Option<XmlVoterTurnout>,
    #[serde(rename = "Contest", default)]
    contests: Vec<XmlContest>,
}

#[derive(Debug, Deserialize)]
struct XmlVoterTurnout {
    #[serde(rename = "Precincts")]
    precincts: Option<XmlPrecincts>,
}

#[derive(Debug, Deserialize)]
struct XmlPrecincts {
    #[serde(rename = "Precinct", default)]
    precincts: Vec<XmlPrecinct>,
}

#[derive(Debug, Deserialize)]
struct XmlPrecinct {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@totalVoters", default)]
    total_voters: String,
    #[serde(rename = "@ballotsCast", default)]
    ballots_cast: String,
    #[serde(rename = "@voterTurnout", default)]
    voter_turnout: String,
    #[serde(rename = "@percentReporting", default)]
    percent_reporting: String,
}

#[derive(Debug, Deserialize)]
struct XmlContest {
    #[serde(rename = "@key", default)]
    key: String,
    #[serde(rename = "@text")]
    text: String,
    #[serde(rename = "@precinctsReported", default)]
    precincts_reported: String,
    #[serde(rename = "VoteType", default)]
    vote_types: Vec<XmlVoteType>,
    #[serde(rename = "Choice", default)]
    choices: Vec<XmlChoice>,
}

#[derive(Debug, Deserialize)]
struct XmlChoice {
    #[serde(rename = "@text")]
    text: String,
    #[serde(rename = "@totalVotes", default)]
    total_votes: String,
    #[serde(rename = "VoteType", default)]
    vote_types: Vec<XmlVoteType>,
}

#[derive(Debug, Deserialize)]
struct XmlVoteType {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@votes", default)]
    votes: String,
    #[serde(rename = "Precinct", default)]
    precincts: Vec<XmlPrecinctVotes>,
}

#[derive(Debug, Deserialize)]
struct XmlPrecinctVotes {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@votes", default)]
    votes: String,
}

pub struct OfficialXmlLoader;

impl OfficialXmlLoader {
    pub fn new() -> Self {
        OfficialXmlLoader
    }

    /// Parse export XML from a string. Exposed for tests and callers that
    /// already hold the bytes.
    pub fn parse_str(
        &self,
        xml: &str,
        source: &str,
        log: &mut FindingLog,
    ) -> Result<ElectionResultRecord> {
        let raw: XmlElectionResult = quick_xml::de::from_str(xml)
            .with_context(|| format!("parsing ElectionResult XML from {source}"))?;

        let timestamp = parse_timestamp(&raw.timestamp).unwrap_or_else(Utc::now);
        let election_date = parse_date(&raw.election_date);

        fn count_or_flag(
            raw_value: &str,
            what: &str,
            source: &str,
            log: &mut FindingLog,
        ) -> u64 {
            match parse_count(raw_value) {
                Some(v) => v,
                None if raw_value.trim().is_empty() => 0,
                None => {
                    log.error(
                        FindingCategory::InvalidCount,
                        source,
                        format!("Invalid count '{raw_value}' in {what}"),
                    );
                    0
                }
            }
        }

        fn convert_vote_types(
            vts: &[XmlVoteType],
            context: &str,
            source: &str,
            log: &mut FindingLog,
        ) -> Vec<VoteTypeCount> {
            vts.iter()
                .map(|vt| VoteTypeCount {
                    label: vt.name.trim().to_string(),
                    votes: count_or_flag(&vt.votes, context, source, log),
                    precincts: vt
                        .precincts
                        .iter()
                        .filter_map(|pv| {
                            let votes = parse_count(&pv.votes)?;
                            Some(PrecinctVotes {
                                name: pv.name.trim().to_string(),
                                votes,
                            })
                        })
                        .collect(),
                })
                .collect()
        }

        let mut precincts = Vec::new();
        if let Some(turnout) = &raw.voter_turnout {
            if let Some(list) = &turnout.precincts {
                for p in &list.precincts {
                    let what = format!("precinct {}", p.name);
                    precincts.push(PrecinctRecord {
                        name: p.name.trim().to_string(),
                        county: raw.region.trim().to_string(),
                        total_voters: count_or_flag(&p.total_voters, &what, source, log),
                        ballots_cast: count_or_flag(&p.ballots_cast, &what, source, log),
                        voter_turnout: parse_float(&p.voter_turnout).unwrap_or(0.0),
                        percent_reporting: parse_float(&p.percent_reporting).unwrap_or(0.0),
                        election_date,
                        timestamp,
                    });
                }
            }
        }

        let mut contests = Vec::new();
        for c in &raw.contests {
            let ballot_buckets =
                convert_vote_types(&c.vote_types, &format!("contest {}", c.text), source, log);
            let choices = c
                .choices
                .iter()
                .map(|ch| ChoiceRecord {
                    name: ch.text.trim().to_string(),
                    total_votes: count_or_flag(
                        &ch.total_votes,
                        &format!("choice {}", ch.text),
                        source,
                        log,
                    ),
                    vote_types: convert_vote_types(
                        &ch.vote_types,
                        &format!("choice {}", ch.text),
                        source,
                        log,
                    ),
                })
                .collect();
            contests.push(ContestRecord {
                name: c.text.trim().to_string(),
                key: c.key.trim().parse().unwrap_or(0),
                precincts_reported: parse_count(&c.precincts_reported).unwrap_or(0),
                ballot_buckets,
                choices,
            });
        }

        Ok(ElectionResultRecord {
            election_name: raw.election_name.trim().to_string(),
            election_date,
            region: raw.region.trim().to_string(),
            timestamp,
            precincts,
            contests,
            source: source.to_string(),
        })
    }
}

impl SourceLoader for OfficialXmlLoader {
    fn source_type(&self) -> SourceType {
        SourceType::OfficialXml
    }

    fn load(&self, path: &Path, log: &mut FindingLog) -> Result<LoadedSource> {
        let xml = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let record = self.parse_str(&xml, &path.display().to_string(), log)?;
        Ok(LoadedSource::Official(record))
    }
}

// ============================================================================
// TABULATOR TAPE LOADER
// ============================================================================

/// Receipt tapes arrive as a grid: first column holds row labels, every
/// further column is one tabulator. Fixed rows (name, id, location, total
/// scanned, protective counter) are pulled out by pattern; what remains is
/// the race/candidate ladder in printed order.
pub struct TapeLoader {
    name_row: Regex,
    id_row: Regex,
    location_row: Regex,
    scanned_row: Regex,
    counter_row: Regex,
}

impl TapeLoader {
    pub fn new() -> Self {
        let fixed = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("static tape row patterns compile")
        };
        TapeLoader {
            name_row: fixed(r".*\bName\b.*"),
            id_row: fixed(r".*\bID\b.*"),
            location_row: fixed(r".*\bLocation\b.*"),
            scanned_row: fixed(r".*\bTotal Scanned\b.*"),
            counter_row: fixed(r".*\bCounter\b.*"),
        }
    }

    /// Parse a whole tape grid (rows of cells) into one record per column.
    pub fn parse_grid(
        &self,
        grid: &[Vec<String>],
        file: &str,
        print: &str,
        log: &mut FindingLog,
    ) -> Vec<TabulatorRecord> {
        let width = grid.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut records = Vec::new();

        for col in 1..width {
            let cell = |row: usize| -> &str {
                grid.get(row)
                    .and_then(|r| r.get(col))
                    .map(|s| s.as_str())
                    .unwrap_or("")
            };

            // Fixed rows first
            let mut name = String::new();
            let mut id = String::new();
            let mut location = String::new();
            let mut total_scanned = None;
            let mut protective_counter = None;
            let mut ladder: Vec<(u32, &str, &str)> = Vec::new();

            for (row, cells) in grid.iter().enumerate() {
                let label = cells.first().map(|s| s.trim()).unwrap_or("");
                if label.is_empty() {
                    continue;
                }
                let value = cell(row);
                if self.name_row.is_match(label) && name.is_empty() {
                    name = value.trim().to_string();
                } else if self.id_row.is_match(label) && id.is_empty() {
                    id = value.trim().to_string();
                } else if self.location_row.is_match(label) && location.is_empty() {
                    location = value.trim().to_string();
                } else if self.scanned_row.is_match(label) && total_scanned.is_none() {
                    total_scanned = parse_count(value);
                } else if self.counter_row.is_match(label) && protective_counter.is_none() {
                    protective_counter = parse_count(value);
                } else {
                    ladder.push((row as u32 + 1, label, value));
                }
            }

            // A column with no machine name is padding, not a tabulator
            if name.is_empty() && id.is_empty() {
                continue;
            }

            let races = self.parse_races(&ladder, file, log);
            records.push(TabulatorRecord {
                name,
                id,
                locations: split_locations(&location),
                total_scanned,
                protective_counter,
                races,
                source_file: file.to_string(),
                column: col as u32,
                fingerprint: print.to_string(),
            });
        }
        records
    }

    /// The race/candidate ladder: race header rows carry no count, every
    /// row under them is a candidate (or the printed "Total Votes" line).
    fn parse_races(
        &self,
        ladder: &[(u32, &str, &str)],
        file: &str,
        log: &mut FindingLog,
    ) -> Vec<TapeRace> {
        let mut races: Vec<TapeRace> = Vec::new();

        for &(row, label, value) in ladder {
            if value.trim().is_empty() {
                races.push(TapeRace {
                    name: label.to_string(),
                    entries: Vec::new(),
                });
                continue;
            }
            let Some(race) = races.last_mut() else {
                // Count rows before the first race header: nothing to
                // attach them to.
                continue;
            };
            match parse_count(value) {
                Some(votes) => race.entries.push(TapeEntry {
                    row,
                    label: label.to_string(),
                    votes,
                }),
                None => log.error(
                    FindingCategory::InvalidCount,
                    file,
                    format!(
                        "Found invalid vote count in {file} row {row} race '{}' candidate '{label}' = '{value}'",
                        race.name
                    ),
                ),
            }
        }
        races
    }

    fn load_csv(&self, path: &Path, log: &mut FindingLog) -> Result<Vec<TabulatorRecord>> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let print = fingerprint(&bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());

        let mut grid = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("reading {}", path.display()))?;
            grid.push(record.iter().map(|c| c.to_string()).collect());
        }
        Ok(self.parse_grid(&grid, &path.display().to_string(), &print, log))
    }

    fn load_xlsx(&self, path: &Path, log: &mut FindingLog) -> Result<Vec<TabulatorRecord>> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let print = fingerprint(&bytes);

        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("opening workbook {}", path.display()))?;
        let range = workbook
            .worksheet_range_at(0)
            .context("workbook has no sheets")?
            .with_context(|| format!("reading first sheet of {}", path.display()))?;

        let grid: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();
        Ok(self.parse_grid(&grid, &path.display().to_string(), &print, log))
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) if n.fract() == 0.0 => format!("{}", *n as i64),
        Data::Float(n) => n.to_string(),
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#{e:?}"),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

impl SourceLoader for TapeLoader {
    fn source_type(&self) -> SourceType {
        SourceType::TabulatorTape
    }

    fn load(&self, path: &Path, log: &mut FindingLog) -> Result<LoadedSource> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let tapes = match ext.as_str() {
            "xlsx" | "xls" => self.load_xlsx(path, log)?,
            _ => self.load_csv(path, log)?,
        };
        Ok(LoadedSource::Tapes(tapes))
    }
}

// ============================================================================
// VOTER ROLL LOADER
// ============================================================================

/// Guess the delimiter of a text extract from its first line. Rolls show
/// up tab-, comma-, pipe-, semicolon- and even colon-separated.
pub fn guess_separator(line: &str) -> u8 {
    let guesses: [u8; 5] = [b'\t', b',', b'|', b';', b':'];
    let mut best = guesses[0];
    let mut best_count = 0;
    for &candidate in &guesses {
        let count = line.bytes().filter(|&b| b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

pub struct VoterRollLoader;

impl VoterRollLoader {
    pub fn new() -> Self {
        VoterRollLoader
    }

    /// Aggregate a roll extract into registered-voter counts per
    /// (county, precinct). Exposed for tests.
    pub fn parse_str(&self, data: &str, source: &str) -> Result<Vec<VoterRollRecord>> {
        let first_line = data.lines().next().unwrap_or("");
        let separator = guess_separator(first_line);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(separator)
            .flexible(true)
            .from_reader(data.as_bytes());

        let headers = reader
            .headers()
            .with_context(|| format!("reading headers of {source}"))?
            .clone();
        let find_col = |needle: &str| {
            headers
                .iter()
                .position(|h| h.to_lowercase().contains(needle))
        };
        let county_col = find_col("county");
        let precinct_col = find_col("precinct")
            .with_context(|| format!("{source} has no precinct column"))?;

        // (county, precinct) → registered voters, insertion-ordered
        let mut keys: Vec<(String, String)> = Vec::new();
        let mut counts: std::collections::HashMap<(String, String), u64> =
            std::collections::HashMap::new();

        for record in reader.records() {
            let record = record.with_context(|| format!("reading {source}"))?;
            let precinct = record.get(precinct_col).unwrap_or("").trim().to_string();
            if precinct.is_empty() {
                continue;
            }
            let county = county_col
                .and_then(|c| record.get(c))
                .unwrap_or("")
                .trim()
                .to_string();
            let key = (county, precinct);
            match counts.get_mut(&key) {
                Some(n) => *n += 1,
                None => {
                    counts.insert(key.clone(), 1);
                    keys.push(key);
                }
            }
        }

        Ok(keys
            .into_iter()
            .map(|key| {
                let registered_voters = counts[&key];
                VoterRollRecord {
                    county: key.0,
                    precinct: key.1,
                    registered_voters,
                }
            })
            .collect())
    }
}

impl SourceLoader for VoterRollLoader {
    fn source_type(&self) -> SourceType {
        SourceType::VoterRoll
    }

    fn load(&self, path: &Path, _log: &mut FindingLog) -> Result<LoadedSource> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let rolls = self.parse_str(&data, &path.display().to_string())?;
        Ok(LoadedSource::Rolls(rolls))
    }
}

// ============================================================================
// DIRECTORY LOADING
// ============================================================================

/// Everything loaded from a directory sweep.
#[derive(Debug, Default)]
pub struct LoadedBatch {
    pub officials: Vec<ElectionResultRecord>,
    pub tapes: Vec<TabulatorRecord>,
    pub rolls: Vec<VoterRollRecord>,
}

/// Load every recognizable file under `dir` (non-recursive, sorted order).
///
/// Tape files with identical content fingerprints are loaded once; the
/// duplicate is recorded as a finding. Receipts get rescanned under new
/// names and counting one twice is exactly the kind of error this tool
/// exists to catch.
pub fn load_dir(dir: &Path, log: &mut FindingLog) -> Result<LoadedBatch> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut batch = LoadedBatch::default();
    let mut seen_prints: std::collections::HashMap<String, String> =
        std::collections::HashMap::new();

    for path in paths {
        let source_type = match detect_source(&path) {
            Ok(st) => st,
            Err(err) => {
                tracing::debug!("skipping {}: {err}", path.display());
                continue;
            }
        };
        let loader = get_loader(source_type);
        match loader.load(&path, log)? {
            LoadedSource::Official(record) => batch.officials.push(record),
            LoadedSource::Tapes(tapes) => {
                for tape in tapes {
                    if let Some(original) =
                        seen_prints.get(&format!("{}:{}", tape.fingerprint, tape.column))
                    {
                        log.warning(
                            FindingCategory::DuplicateSource,
                            &tape.source_file,
                            format!(
                                "Tape {} is a rescan of {original}; skipping",
                                tape.key()
                            ),
                        );
                        continue;
                    }
                    seen_prints.insert(
                        format!("{}:{}", tape.fingerprint, tape.column),
                        tape.source_file.clone(),
                    );
                    batch.tapes.push(tape);
                }
            }
            LoadedSource::Rolls(rolls) => batch.rolls.extend(rolls),
        }
    }

    tracing::info!(
        officials = batch.officials.len(),
        tapes = batch.tapes.len(),
        roll_precincts = batch.rolls.len(),
        "loaded {}",
        dir.display()
    );
    Ok(batch)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::Severity;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ElectionResult>
  <Timestamp>11/9/2020 5:01:11 PM</Timestamp>
  <ElectionName>November 3, 2020 General Election</ElectionName>
  <ElectionDate>11/3/2020</ElectionDate>
  <Region>Chattahoochee</Region>
  <VoterTurnout totalVoters="1872" ballotsCast="1244" voterTurnout="66.45">
    <Precincts>
      <Precinct name="01A" totalVoters="1000" ballotsCast="700" voterTurnout="70.0" percentReporting="100.0"/>
      <Precinct name="01B" totalVoters="872" ballotsCast="544" voterTurnout="62.39" percentReporting="100.0"/>
    </Precincts>
  </VoterTurnout>
  <Contest key="2" text="President of the US" precinctsReported="2">
    <VoteType name="Undervotes" votes="3">
      <Precinct name="01A" votes="2"/>
      <Precinct name="01B" votes="1"/>
    </VoteType>
    <Choice text="Donald J. Trump (I) (Rep)" totalVotes="900">
      <VoteType name="Election Day Votes" votes="600">
        <Precinct name="01A" votes="400"/>
        <Precinct name="01B" votes="200"/>
      </VoteType>
      <VoteType name="Absentee by Mail Votes" votes="300">
        <Precinct name="01A" votes="150"/>
        <Precinct name="01B" votes="150"/>
      </VoteType>
    </Choice>
    <Choice text="Joseph R. Biden (Dem)" totalVotes="341">
      <VoteType name="Election Day Votes" votes="341">
        <Precinct name="01A" votes="148"/>
        <Precinct name="01B" votes="193"/>
      </VoteType>
    </Choice>
  </Contest>
</ElectionResult>"#;

    #[test]
    fn test_parse_official_xml() {
        let mut log = FindingLog::new();
        let loader = OfficialXmlLoader::new();
        let record = loader.parse_str(SAMPLE_XML, "test.xml", &mut log).unwrap();

        assert_eq!(record.region, "Chattahoochee");
        assert_eq!(record.precincts.len(), 2);
        assert_eq!(record.precincts[0].name, "01A");
        assert_eq!(record.precincts[0].total_voters, 1000);
        assert_eq!(record.contests.len(), 1);

        let contest = &record.contests[0];
        assert_eq!(contest.name, "President of the US");
        assert_eq!(contest.ballot_buckets.len(), 1);
        assert_eq!(contest.choices.len(), 2);
        assert_eq!(contest.choices[0].total_votes, 900);
        assert_eq!(contest.choices[0].vote_types[0].precincts[0].votes, 400);
        assert!(log.is_empty());
    }

    #[test]
    fn test_parse_xml_election_date() {
        let mut log = FindingLog::new();
        let loader = OfficialXmlLoader::new();
        let record = loader.parse_str(SAMPLE_XML, "test.xml", &mut log).unwrap();
        assert_eq!(
            record.election_date,
            NaiveDate::from_ymd_opt(2020, 11, 3)
        );
    }

    const SAMPLE_TAPE: &str = "\
Tabulator Name,ICP 1,ICP 2
Tabulator ID,100,101
Voting Location,01A,SS15A-SS15B
Protective Counter,450,220
Total Scanned,430,210
President of the US,,
Trump,250,120
Biden,170,85
Jorgensen,8,3
Write-in,2,2
Total Votes,430,210
";

    fn tape_grid(csv_text: &str) -> Vec<Vec<String>> {
        csv_text
            .lines()
            .map(|l| l.split(',').map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_parse_tape_columns() {
        let mut log = FindingLog::new();
        let loader = TapeLoader::new();
        let tapes = loader.parse_grid(&tape_grid(SAMPLE_TAPE), "tapes.csv", "print", &mut log);

        assert_eq!(tapes.len(), 2);
        assert_eq!(tapes[0].name, "ICP 1");
        assert_eq!(tapes[0].id, "100");
        assert_eq!(tapes[0].locations, vec!["01A"]);
        assert_eq!(tapes[0].total_scanned, Some(430));
        assert_eq!(tapes[0].protective_counter, Some(450));
        assert_eq!(tapes[0].key(), "100:ICP 1");

        // Composite location splits into parts
        assert_eq!(tapes[1].locations, vec!["SS15A", "SS15B"]);

        let race = &tapes[0].races[0];
        assert_eq!(race.name, "President of the US");
        assert_eq!(race.entries.len(), 5); // 4 candidates + Total Votes row
        assert_eq!(race.entries[0].label, "Trump");
        assert_eq!(race.entries[0].votes, 250);
        assert!(log.is_empty());
    }

    #[test]
    fn test_invalid_count_becomes_finding() {
        let tape = "\
Tabulator Name,ICP 1
Tabulator ID,100
Voting Location,01A
President of the US,
Trump,=SUM(B2:B9)
Biden,170
";
        let mut log = FindingLog::new();
        let loader = TapeLoader::new();
        let tapes = loader.parse_grid(&tape_grid(tape), "bad.csv", "print", &mut log);

        assert_eq!(tapes.len(), 1);
        // the bad row is dropped, the good one survives
        assert_eq!(tapes[0].races[0].entries.len(), 1);
        assert!(log.any_at_or_above(Severity::Error));
    }

    #[test]
    fn test_guess_separator() {
        assert_eq!(guess_separator("a,b,c"), b',');
        assert_eq!(guess_separator("a\tb\tc"), b'\t');
        assert_eq!(guess_separator("a|b|c,d"), b'|');
        assert_eq!(guess_separator("COUNTY:PRECINCT:VOTER"), b':');
    }

    #[test]
    fn test_voter_roll_aggregation() {
        let roll = "\
County,Precinct Name,Voter ID,Status
Fulton,01A,0001,A
Fulton,01A,0002,A
Fulton,01B,0003,A
Cobb,SS15A,0004,I
";
        let loader = VoterRollLoader::new();
        let rolls = loader.parse_str(roll, "roll.csv").unwrap();

        assert_eq!(rolls.len(), 3);
        assert_eq!(rolls[0].county, "Fulton");
        assert_eq!(rolls[0].precinct, "01A");
        assert_eq!(rolls[0].registered_voters, 2);
        assert_eq!(rolls[2].precinct, "SS15A");
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("11/9/2020 5:01:11 PM").is_some());
        assert!(parse_timestamp("11/9/2020 5:01:11 PM EST").is_some());
        assert!(parse_timestamp("2020-11-09T17:01:11").is_some());
        assert!(parse_timestamp("whenever").is_none());
    }

    #[test]
    fn test_detect_source_by_extension() {
        assert_eq!(
            detect_source(Path::new("results.xml")).ok(),
            Some(SourceType::OfficialXml)
        );
        assert_eq!(
            detect_source(Path::new("tapes.xlsx")).ok(),
            Some(SourceType::TabulatorTape)
        );
    }
}
