// 📤 Report writer - Findings to CSV or JSON
// One row per message in CSV; the full run report in JSON.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;

use crate::reconciliation::ReconciliationReport;

/// Write the report in the format the output path's extension asks for.
/// `.json` gets the whole structured run report; anything else gets the
/// flat CSV of finding messages.
pub fn write_report(report: &ReconciliationReport, path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => write_json(report, path),
        _ => write_csv(report, path),
    }
}

/// Flat CSV: severity, category, recorded_at, source, message.
pub fn write_csv(report: &ReconciliationReport, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(["severity", "category", "recorded_at", "source", "message"])?;
    for finding in &report.findings {
        let recorded = finding.timestamp.to_rfc3339();
        for message in &finding.messages {
            writer.write_record([
                finding.severity.as_str(),
                finding.category.as_str(),
                recorded.as_str(),
                finding.source.as_str(),
                message.as_str(),
            ])?;
        }
    }
    writer.flush().context("flushing report")?;
    Ok(())
}

/// Structured JSON of the whole run report.
pub fn write_json(report: &ReconciliationReport, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Console summary, one line per severity plus the run line.
pub fn render_summary(report: &ReconciliationReport) -> String {
    let mut out = String::new();
    out.push_str(&report.summary());
    out.push('\n');
    for finding in &report.findings {
        out.push_str(&format!(
            "  [{}] {} ({}): {} message(s)\n",
            finding.severity,
            finding.category,
            finding.source,
            finding.messages.len()
        ));
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{FindingCategory, FindingLog, Severity};
    use crate::reconciliation::ReconciliationReport;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_report() -> ReconciliationReport {
        let mut log = FindingLog::new();
        log.warning(
            FindingCategory::TotalMismatch,
            "tapes",
            "Location 01A: 150 vs 148 (delta 2)".into(),
        );
        log.info(
            FindingCategory::MissingCounterpart,
            "tapes",
            "Location 01B missing".into(),
        );
        ReconciliationReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            min_severity: Severity::Info,
            info_count: 1,
            warning_count: 1,
            error_count: 0,
            findings: log.iter().cloned().collect(),
        }
    }

    #[test]
    fn test_csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        write_csv(&sample_report(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3); // header + 2 messages
        assert!(lines[0].starts_with("severity,category"));
        assert!(text.contains("delta 2"));
    }

    #[test]
    fn test_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = sample_report();
        write_report(&report, &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["warning_count"], 1);
        assert_eq!(value["findings"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_summary_mentions_counts() {
        let summary = render_summary(&sample_report());
        assert!(summary.contains("1 warning(s)"));
        assert!(summary.contains("total mismatch"));
    }
}
