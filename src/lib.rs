// Tally Audit - Core Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod identity;       // Canonical labels + per-run registry
pub mod fuzzy;          // Identity-keyed map with pattern lookup
pub mod tally;          // Hierarchical vote accumulator
pub mod findings;       // Severity-graded finding log
pub mod records;        // Plain ingestion records + VoteType
pub mod reconciliation; // Cross-source comparison engine
pub mod entities;       // Precinct / Race / County registries
pub mod parser;         // Source detection + loaders
pub mod audit;          // Full-run orchestration
pub mod db;             // SQLite persistence
pub mod report;         // Findings report writer

// Re-export commonly used types
pub use identity::{Identity, IdentityError, IdentityRegistry};
pub use fuzzy::{FuzzyMap, FuzzyMapError, KeyQuery, MapKey};
pub use tally::{HierarchicalTally, Step};
pub use findings::{Finding, FindingCategory, FindingLog, Severity};
pub use records::{
    ContestRecord, ElectionResultRecord, PrecinctRecord, RecordError, TabulatorRecord,
    VoteType, VoterRollRecord,
};
pub use reconciliation::{
    EngineError, ReconciliationEngine, ReconciliationReport, RunState, TallySheet,
};
pub use entities::{
    County, CountyRegistry, Precinct, PrecinctRegistry, Race, RaceRegistry,
};
pub use parser::{
    detect_source, get_loader, load_dir, LoadedBatch, LoadedSource, OfficialXmlLoader,
    SourceLoader, SourceType, TapeLoader, VoterRollLoader,
};
pub use audit::{AliasConfig, Audit, AuditError};
pub use db::{
    get_finding_counts, get_findings, insert_findings, insert_official, insert_tapes,
    latest_run_id, setup_database, verify_counts, StoredFinding, TableCounts,
};
pub use report::{render_summary, write_report};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
