// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use tally_audit::{
    db, load_dir, parser, report, AliasConfig, Audit, FindingLog, LoadedBatch, LoadedSource,
    Severity,
};

#[derive(Parser)]
#[command(
    name = "tally-audit",
    version,
    about = "Reconciles election results across official exports, tabulator tapes and voter rolls"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import source files into the local SQLite database
    Import {
        /// Election results XML file or directory
        #[arg(short = 'x', long, default_value = ".")]
        results_xml: PathBuf,

        /// Directory of tabulator receipts (defaults to the results dir)
        #[arg(short = 't', long)]
        tabulator_dir: Option<PathBuf>,

        /// Database path
        #[arg(long, default_value = "tally-audit.db")]
        database: PathBuf,
    },

    /// Validate official results against tabulator receipts and rolls
    Validate {
        /// Election results XML file or directory
        #[arg(short = 'x', long, default_value = ".")]
        results_xml: PathBuf,

        /// Directory of tabulator receipts (defaults to the results dir)
        #[arg(short = 't', long)]
        tabulator_dir: Option<PathBuf>,

        /// Alias table (TOML) seeding identity resolution
        #[arg(short = 'f', long)]
        fields_toml: Option<PathBuf>,

        /// Report output path (.csv or .json)
        #[arg(short = 'o', long, default_value = "./report.csv")]
        output: PathBuf,

        /// Report errors, but not warnings
        #[arg(short = 'e', long)]
        errors: bool,

        /// Report warnings, but not info
        #[arg(short = 'w', long)]
        warnings: bool,

        /// Report info and up
        #[arg(short = 'i', long)]
        info: bool,

        /// Set report level specifically (info|warning|error)
        #[arg(short = 'r', long)]
        report_level: Option<String>,

        /// Also persist the run's findings into this database
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Browse stored findings in the terminal
    Browse {
        /// Database path
        #[arg(long, default_value = "tally-audit.db")]
        database: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Import {
            results_xml,
            tabulator_dir,
            database,
        } => run_import(&results_xml, tabulator_dir.as_deref(), &database),
        Command::Validate {
            results_xml,
            tabulator_dir,
            fields_toml,
            output,
            errors,
            warnings,
            info,
            report_level,
            database,
        } => {
            let min = min_severity(errors, warnings, info, report_level.as_deref())?;
            run_validate(
                &results_xml,
                tabulator_dir.as_deref(),
                fields_toml.as_deref(),
                &output,
                min,
                database.as_deref(),
            )
        }
        Command::Browse { database } => run_browse(&database),
    }
}

fn min_severity(
    errors: bool,
    warnings: bool,
    info: bool,
    report_level: Option<&str>,
) -> Result<Severity> {
    if let Some(level) = report_level {
        return level
            .parse::<Severity>()
            .map_err(|e| anyhow::anyhow!(e));
    }
    Ok(if errors {
        Severity::Error
    } else if warnings {
        Severity::Warning
    } else if info {
        Severity::Info
    } else {
        Severity::Info
    })
}

/// Load the results path (file or directory), then any separate tape dir.
fn load_sources(
    results_xml: &Path,
    tabulator_dir: Option<&Path>,
    log: &mut FindingLog,
) -> Result<LoadedBatch> {
    let mut batch = if results_xml.is_dir() {
        load_dir(results_xml, log)?
    } else {
        let mut single = LoadedBatch::default();
        let source_type = parser::detect_source(results_xml)?;
        match parser::get_loader(source_type).load(results_xml, log)? {
            LoadedSource::Official(record) => single.officials.push(record),
            LoadedSource::Tapes(tapes) => single.tapes.extend(tapes),
            LoadedSource::Rolls(rolls) => single.rolls.extend(rolls),
        }
        single
    };

    if let Some(tab_dir) = tabulator_dir {
        if !results_xml.is_dir() || tab_dir != results_xml {
            let extra = load_dir(tab_dir, log)?;
            batch.officials.extend(extra.officials);
            batch.tapes.extend(extra.tapes);
            batch.rolls.extend(extra.rolls);
        }
    }
    Ok(batch)
}

fn run_import(
    results_xml: &Path,
    tabulator_dir: Option<&Path>,
    database: &Path,
) -> Result<()> {
    println!("🗄️  Importing election sources → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading sources...");
    let mut log = FindingLog::new();
    let batch = load_sources(results_xml, tabulator_dir, &mut log)?;
    println!(
        "✓ Loaded {} official export(s), {} tape(s), {} roll precinct(s)",
        batch.officials.len(),
        batch.tapes.len(),
        batch.rolls.len()
    );

    println!("\n🔧 Setting up database...");
    let conn = Connection::open(database)
        .with_context(|| format!("opening {}", database.display()))?;
    db::setup_database(&conn)?;
    println!("✓ Database initialized with WAL mode");

    println!("\n💾 Inserting records...");
    let run_id = Uuid::new_v4();
    let mut inserted = 0;
    let mut duplicates = 0;
    for record in &batch.officials {
        let (i, d) = db::insert_official(&conn, record, run_id)?;
        inserted += i;
        duplicates += d;
    }
    let (i, d) = db::insert_tapes(&conn, &batch.tapes, run_id)?;
    inserted += i;
    duplicates += d;
    println!("✓ Inserted {inserted} rows ({duplicates} duplicates skipped)");

    let loader_findings: Vec<_> = log.iter().cloned().collect();
    if !loader_findings.is_empty() {
        let count = db::insert_findings(&conn, &loader_findings, run_id)?;
        println!("⚠️  {count} loader finding(s) recorded");
    }

    println!("\n🔍 Verifying database...");
    let counts = db::verify_counts(&conn)?;
    println!(
        "✓ Database contains {} precincts, {} vote rows, {} tapes",
        counts.precincts, counts.candidate_votes, counts.tapes
    );

    Ok(())
}

fn run_validate(
    results_xml: &Path,
    tabulator_dir: Option<&Path>,
    fields_toml: Option<&Path>,
    output: &Path,
    min: Severity,
    database: Option<&Path>,
) -> Result<()> {
    println!("⚖️  Validating official results against receipts");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut audit = Audit::new();

    if let Some(path) = fields_toml {
        let config = AliasConfig::from_file(path)?;
        audit.seed_aliases(&config)?;
        println!("✓ Seeded {} alias entries", config.aliases.len());
    }

    println!("\n📂 Loading sources...");
    let batch = load_sources(results_xml, tabulator_dir, audit.engine.log_mut())?;
    println!(
        "✓ Loaded {} official export(s), {} tape(s), {} roll precinct(s)",
        batch.officials.len(),
        batch.tapes.len(),
        batch.rolls.len()
    );

    audit.load_batch(&batch)?;
    println!(
        "✓ Resolved {} precincts, {} races, {} identities",
        audit.precincts.len(),
        audit.races.len(),
        audit.identities.len()
    );

    println!("\n⚖️  Reconciling...");
    let run_report = audit.reconcile(min)?;
    println!("{}", report::render_summary(&run_report));

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    report::write_report(&run_report, output)?;
    println!("✓ Report written to {}", output.display());

    if let Some(db_path) = database {
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening {}", db_path.display()))?;
        db::setup_database(&conn)?;
        let count = db::insert_findings(&conn, &run_report.findings, run_report.run_id)?;
        println!("✓ Persisted {count} finding message(s) to {}", db_path.display());
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_browse(database: &Path) -> Result<()> {
    if !database.exists() {
        eprintln!("❌ Database not found!");
        eprintln!("   Run: tally-audit import");
        eprintln!("   or:  tally-audit validate --database {}", database.display());
        std::process::exit(1);
    }

    let conn = Connection::open(database)
        .with_context(|| format!("opening {}", database.display()))?;

    println!("📊 Loading findings...");
    let findings = db::get_findings(&conn, Severity::Info)?;
    let counts = db::verify_counts(&conn)?;
    println!("✓ Loaded {} finding(s)\n", findings.len());
    println!("Starting UI... (Press 'q' to quit)\n");

    let mut app = ui::App::new(findings, counts);
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_browse(_database: &Path) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API server: cargo run --bin tally-server --features server");
    std::process::exit(1);
}
