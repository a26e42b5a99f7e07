// 💾 Persistence - Imported results and findings in SQLite + WAL
//
// Import once, audit many times. Every row carries an idempotency hash so
// re-importing the same files never duplicates data, and a run id so
// findings stay attributable to the run that produced them.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::findings::{Finding, Severity};
use crate::records::{ElectionResultRecord, TabulatorRecord};

// ============================================================================
// SETUP
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS precincts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            county TEXT NOT NULL,
            total_voters INTEGER NOT NULL,
            ballots_cast INTEGER NOT NULL,
            voter_turnout REAL NOT NULL,
            percent_reporting REAL NOT NULL,
            election_date TEXT,
            reported_at TEXT NOT NULL,
            source_file TEXT NOT NULL,
            run_id TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS candidate_votes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            contest TEXT NOT NULL,
            candidate TEXT NOT NULL,
            source TEXT NOT NULL,
            precinct TEXT NOT NULL,
            vote_type TEXT NOT NULL,
            votes INTEGER NOT NULL,
            source_file TEXT NOT NULL,
            run_id TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tapes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            tabulator_id TEXT NOT NULL,
            location TEXT NOT NULL,
            total_scanned INTEGER,
            protective_counter INTEGER,
            source_file TEXT NOT NULL,
            column_number INTEGER NOT NULL,
            fingerprint TEXT NOT NULL,
            run_id TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS findings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            severity TEXT NOT NULL,
            category TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            source TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_precinct_name ON precincts(name)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_votes_contest ON candidate_votes(contest)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_votes_precinct ON candidate_votes(precinct)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_findings_run ON findings(run_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_findings_severity ON findings(severity)",
        [],
    )?;

    Ok(())
}

fn idempotency_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// INSERTS
// ============================================================================

/// Insert one official export: precinct turnout rows plus every
/// per-precinct candidate count. Duplicate rows (same hash) are skipped.
/// Returns (inserted, duplicates).
pub fn insert_official(
    conn: &Connection,
    record: &ElectionResultRecord,
    run_id: Uuid,
) -> Result<(usize, usize)> {
    let run = run_id.to_string();
    let mut inserted = 0;
    let mut duplicates = 0;

    for p in &record.precincts {
        let hash = idempotency_hash(&[
            "precinct",
            &p.name,
            &p.county,
            &p.total_voters.to_string(),
            &p.ballots_cast.to_string(),
            &record.source,
        ]);
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO precincts (
                    idempotency_hash, name, county, total_voters, ballots_cast,
                    voter_turnout, percent_reporting, election_date, reported_at,
                    source_file, run_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    hash,
                    p.name,
                    p.county,
                    p.total_voters as i64,
                    p.ballots_cast as i64,
                    p.voter_turnout,
                    p.percent_reporting,
                    p.election_date.map(|d| d.to_string()),
                    p.timestamp.to_rfc3339(),
                    record.source,
                    run,
                ],
            )
            .context("inserting precinct")?;
        if changed == 1 {
            inserted += 1;
        } else {
            duplicates += 1;
        }
    }

    for contest in &record.contests {
        for choice in &contest.choices {
            for vt in &choice.vote_types {
                for pv in &vt.precincts {
                    let hash = idempotency_hash(&[
                        "vote",
                        &contest.name,
                        &choice.name,
                        &vt.label,
                        &pv.name,
                        &pv.votes.to_string(),
                        &record.source,
                    ]);
                    let changed = conn
                        .execute(
                            "INSERT OR IGNORE INTO candidate_votes (
                                idempotency_hash, contest, candidate, source, precinct,
                                vote_type, votes, source_file, run_id
                            ) VALUES (?1, ?2, ?3, 'sos', ?4, ?5, ?6, ?7, ?8)",
                            params![
                                hash,
                                contest.name,
                                choice.name,
                                pv.name,
                                vt.label,
                                pv.votes as i64,
                                record.source,
                                run,
                            ],
                        )
                        .context("inserting candidate votes")?;
                    if changed == 1 {
                        inserted += 1;
                    } else {
                        duplicates += 1;
                    }
                }
            }
        }
    }

    Ok((inserted, duplicates))
}

/// Insert tabulator receipts and their count rows.
pub fn insert_tapes(
    conn: &Connection,
    tapes: &[TabulatorRecord],
    run_id: Uuid,
) -> Result<(usize, usize)> {
    let run = run_id.to_string();
    let mut inserted = 0;
    let mut duplicates = 0;

    for tape in tapes {
        let location = tape.locations.join("-");
        let hash = idempotency_hash(&[
            "tape",
            &tape.fingerprint,
            &tape.column.to_string(),
            &tape.key(),
        ]);
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO tapes (
                    idempotency_hash, name, tabulator_id, location, total_scanned,
                    protective_counter, source_file, column_number, fingerprint, run_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    hash,
                    tape.name,
                    tape.id,
                    location,
                    tape.total_scanned.map(|v| v as i64),
                    tape.protective_counter.map(|v| v as i64),
                    tape.source_file,
                    tape.column,
                    tape.fingerprint,
                    run,
                ],
            )
            .context("inserting tape")?;
        if changed == 1 {
            inserted += 1;
        } else {
            duplicates += 1;
        }

        for race in &tape.races {
            for entry in &race.entries {
                let hash = idempotency_hash(&[
                    "tape_vote",
                    &tape.fingerprint,
                    &tape.column.to_string(),
                    &race.name,
                    &entry.row.to_string(),
                    &entry.label,
                ]);
                let changed = conn
                    .execute(
                        "INSERT OR IGNORE INTO candidate_votes (
                            idempotency_hash, contest, candidate, source, precinct,
                            vote_type, votes, source_file, run_id
                        ) VALUES (?1, ?2, ?3, 'tape', ?4, 'scanned', ?5, ?6, ?7)",
                        params![
                            hash,
                            race.name,
                            entry.label,
                            location,
                            entry.votes as i64,
                            tape.source_file,
                            run,
                        ],
                    )
                    .context("inserting tape votes")?;
                if changed == 1 {
                    inserted += 1;
                } else {
                    duplicates += 1;
                }
            }
        }
    }

    Ok((inserted, duplicates))
}

/// Persist a run's findings (one row per message).
pub fn insert_findings(conn: &Connection, findings: &[Finding], run_id: Uuid) -> Result<usize> {
    let run = run_id.to_string();
    let mut count = 0;
    for finding in findings {
        for message in &finding.messages {
            conn.execute(
                "INSERT INTO findings (run_id, severity, category, recorded_at, source, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run,
                    finding.severity.as_str(),
                    finding.category.as_str(),
                    finding.timestamp.to_rfc3339(),
                    finding.source,
                    message,
                ],
            )
            .context("inserting finding")?;
            count += 1;
        }
    }
    Ok(count)
}

// ============================================================================
// QUERIES
// ============================================================================

/// Row counts across the main tables.
#[derive(Debug, Clone, Serialize)]
pub struct TableCounts {
    pub precincts: i64,
    pub candidate_votes: i64,
    pub tapes: i64,
    pub findings: i64,
}

pub fn verify_counts(conn: &Connection) -> Result<TableCounts> {
    let count = |table: &str| -> Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .with_context(|| format!("counting {table}"))
    };
    Ok(TableCounts {
        precincts: count("precincts")?,
        candidate_votes: count("candidate_votes")?,
        tapes: count("tapes")?,
        findings: count("findings")?,
    })
}

/// A persisted finding message, one row per message.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFinding {
    pub id: i64,
    pub run_id: String,
    pub severity: String,
    pub category: String,
    pub recorded_at: String,
    pub source: String,
    pub message: String,
}

/// Findings at or above a severity, newest run first.
pub fn get_findings(conn: &Connection, min: Severity) -> Result<Vec<StoredFinding>> {
    let severities: Vec<&str> = match min {
        Severity::Info => vec!["info", "warning", "error"],
        Severity::Warning => vec!["warning", "error"],
        Severity::Error => vec!["error"],
    };
    let placeholders = severities
        .iter()
        .enumerate()
        .map(|(i, _)| format!("?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");

    let mut stmt = conn.prepare(&format!(
        "SELECT id, run_id, severity, category, recorded_at, source, message
         FROM findings WHERE severity IN ({placeholders})
         ORDER BY recorded_at DESC, id DESC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(severities.iter()), |row| {
            Ok(StoredFinding {
                id: row.get(0)?,
                run_id: row.get(1)?,
                severity: row.get(2)?,
                category: row.get(3)?,
                recorded_at: row.get(4)?,
                source: row.get(5)?,
                message: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Per-severity message counts across all runs.
pub fn get_finding_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT severity, COUNT(*) FROM findings GROUP BY severity ORDER BY severity",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Most recent reported run, if any.
pub fn latest_run_id(conn: &Connection) -> Result<Option<String>> {
    let run: Option<String> = conn
        .query_row(
            "SELECT run_id FROM findings ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .ok();
    Ok(run)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{FindingCategory, FindingLog};
    use chrono::Utc;
    use crate::records::{
        ChoiceRecord, ContestRecord, PrecinctRecord, PrecinctVotes, TabulatorRecord, TapeEntry,
        TapeRace, VoteTypeCount,
    };

    fn sample_official() -> ElectionResultRecord {
        ElectionResultRecord {
            election_name: "General".into(),
            election_date: None,
            region: "Fulton".into(),
            timestamp: Utc::now(),
            precincts: vec![PrecinctRecord {
                name: "01A".into(),
                county: "Fulton".into(),
                total_voters: 1000,
                ballots_cast: 700,
                voter_turnout: 70.0,
                percent_reporting: 100.0,
                election_date: None,
                timestamp: Utc::now(),
            }],
            contests: vec![ContestRecord {
                name: "President".into(),
                key: 1,
                precincts_reported: 1,
                ballot_buckets: vec![],
                choices: vec![ChoiceRecord {
                    name: "Trump".into(),
                    total_votes: 100,
                    vote_types: vec![VoteTypeCount {
                        label: "Election Day Votes".into(),
                        votes: 100,
                        precincts: vec![PrecinctVotes {
                            name: "01A".into(),
                            votes: 100,
                        }],
                    }],
                }],
            }],
            source: "fulton.xml".into(),
        }
    }

    fn sample_tape() -> TabulatorRecord {
        TabulatorRecord {
            name: "ICP 1".into(),
            id: "100".into(),
            locations: vec!["01A".into()],
            total_scanned: Some(100),
            protective_counter: None,
            races: vec![TapeRace {
                name: "President".into(),
                entries: vec![TapeEntry {
                    row: 2,
                    label: "Trump".into(),
                    votes: 100,
                }],
            }],
            source_file: "tapes.csv".into(),
            column: 1,
            fingerprint: "print".into(),
        }
    }

    #[test]
    fn test_insert_and_count() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let run = Uuid::new_v4();
        let (inserted, duplicates) = insert_official(&conn, &sample_official(), run).unwrap();
        assert_eq!(inserted, 2); // 1 precinct + 1 vote row
        assert_eq!(duplicates, 0);

        let (inserted, _) = insert_tapes(&conn, &[sample_tape()], run).unwrap();
        assert_eq!(inserted, 2); // tape + 1 vote row

        let counts = verify_counts(&conn).unwrap();
        assert_eq!(counts.precincts, 1);
        assert_eq!(counts.candidate_votes, 2);
        assert_eq!(counts.tapes, 1);
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let record = sample_official();
        insert_official(&conn, &record, Uuid::new_v4()).unwrap();
        let (inserted, duplicates) = insert_official(&conn, &record, Uuid::new_v4()).unwrap();

        assert_eq!(inserted, 0);
        assert_eq!(duplicates, 2);
        assert_eq!(verify_counts(&conn).unwrap().precincts, 1);
    }

    #[test]
    fn test_findings_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut log = FindingLog::new();
        log.warning(FindingCategory::TotalMismatch, "tapes", "150 != 148".into());
        log.info(
            FindingCategory::MissingCounterpart,
            "tapes",
            "01B missing".into(),
        );

        let findings: Vec<Finding> = log.iter().cloned().collect();
        let run = Uuid::new_v4();
        let count = insert_findings(&conn, &findings, run).unwrap();
        assert_eq!(count, 2);

        let warnings = get_findings(&conn, Severity::Warning).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, "warning");
        assert_eq!(warnings[0].run_id, run.to_string());

        let all = get_findings(&conn, Severity::Info).unwrap();
        assert_eq!(all.len(), 2);

        assert_eq!(latest_run_id(&conn).unwrap(), Some(run.to_string()));
    }
}
