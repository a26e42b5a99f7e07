// 📋 Findings - Recorded reconciliation discrepancies
// Append-only log, grouped by (severity, category, timestamp, source)
//
// Reconciliation is best-effort: data-quality problems become findings and
// the run keeps going. Nothing here ever aborts.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SEVERITY
// ============================================================================

/// Ordered severity. Reports filter on "at or above".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" | "i" => Ok(Severity::Info),
            "warning" | "warn" | "w" => Ok(Severity::Warning),
            "error" | "err" | "e" => Ok(Severity::Error),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

// ============================================================================
// CATEGORY
// ============================================================================

/// Why a finding was recorded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    /// Two distinct inputs resolved to the same identity.
    Collision,
    /// An entity present in one source is absent from another.
    MissingCounterpart,
    /// Cross-source totals disagree for the same entity.
    TotalMismatch,
    /// A declared total disagrees with the sum of its own parts.
    InconsistentTotal,
    /// A vote count field failed to parse as an integer.
    InvalidCount,
    /// The same receipt appears to have been ingested twice.
    DuplicateSource,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::Collision => "collision",
            FindingCategory::MissingCounterpart => "missing counterpart",
            FindingCategory::TotalMismatch => "total mismatch",
            FindingCategory::InconsistentTotal => "inconsistent total",
            FindingCategory::InvalidCount => "invalid count",
            FindingCategory::DuplicateSource => "duplicate source",
        }
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FINDING
// ============================================================================

/// One recorded discrepancy group. Messages recorded in the same second,
/// for the same severity, category and source, share a Finding.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: FindingCategory,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub messages: BTreeSet<String>,
}

impl Finding {
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} ({}): {} message(s)",
            self.severity,
            self.category,
            self.source,
            self.messages.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FindingKey {
    severity: Severity,
    category: FindingCategory,
    timestamp: DateTime<Utc>,
    source: String,
}

// ============================================================================
// FINDING LOG
// ============================================================================

/// Append-only collection of findings for one reconciliation run.
pub struct FindingLog {
    findings: Vec<Finding>,
    index: HashMap<FindingKey, usize>,
}

impl FindingLog {
    pub fn new() -> Self {
        FindingLog {
            findings: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Record a message, unioning it into the finding that shares its
    /// (severity, category, timestamp, source) key. Timestamps are
    /// truncated to whole seconds so a burst of related messages groups
    /// into one finding.
    pub fn record(
        &mut self,
        severity: Severity,
        category: FindingCategory,
        source: &str,
        message: String,
    ) {
        match severity {
            Severity::Error => tracing::error!(source, %category, "{message}"),
            Severity::Warning => tracing::warn!(source, %category, "{message}"),
            Severity::Info => tracing::info!(source, %category, "{message}"),
        }

        let key = FindingKey {
            severity,
            category,
            timestamp: Utc::now().trunc_subsecs(0),
            source: source.to_string(),
        };
        if let Some(&idx) = self.index.get(&key) {
            self.findings[idx].messages.insert(message);
            return;
        }
        let finding = Finding {
            severity: key.severity,
            category: key.category,
            timestamp: key.timestamp,
            source: key.source.clone(),
            messages: BTreeSet::from([message]),
        };
        self.index.insert(key, self.findings.len());
        self.findings.push(finding);
    }

    pub fn info(&mut self, category: FindingCategory, source: &str, message: String) {
        self.record(Severity::Info, category, source, message);
    }

    pub fn warning(&mut self, category: FindingCategory, source: &str, message: String) {
        self.record(Severity::Warning, category, source, message);
    }

    pub fn error(&mut self, category: FindingCategory, source: &str, message: String) {
        self.record(Severity::Error, category, source, message);
    }

    /// Findings at or above a minimum severity, in recording order.
    pub fn at_or_above(&self, min: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity >= min)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter()
    }

    /// Total messages per severity.
    pub fn counts(&self) -> HashMap<Severity, usize> {
        let mut counts = HashMap::new();
        for finding in &self.findings {
            *counts.entry(finding.severity).or_insert(0) += finding.messages.len();
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// True when anything at or above the given severity was recorded.
    pub fn any_at_or_above(&self, min: Severity) -> bool {
        self.at_or_above(min).next().is_some()
    }
}

impl Default for FindingLog {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
