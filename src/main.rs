//! scopusdb - Scopus metadata ingestion
//!
//! Loads Scopus search exports, reference tables and faculty rosters into a
//! relational store.
//!
//! ## Usage
//!
//! ### Full run from config.json
//! ```bash
//! scopusdb populate
//! ```
//!
//! ### Single export directory
//! ```bash
//! scopusdb papers data/Tehran --dataset Tehran
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scopusdb::batch::{self, CommitPolicy};
use scopusdb::config::{Backend, Config, DatabaseConfig};
use scopusdb::context::ResolutionContext;
use scopusdb::faculty::{self, ReconcileSummary};
use scopusdb::populate;
use scopusdb::reference::{self, ImportSummary};
use scopusdb::scopus::ScopusClient;
use scopusdb::store::{MemoryStore, SqliteStore, Store};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Scopus metadata ingestion - entity resolution and upsert
#[derive(Parser)]
#[command(name = "scopusdb")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every enabled stage of the populate config
    Populate,

    /// Import one directory of Scopus search exports
    Papers {
        /// Directory holding the export files
        dir: PathBuf,

        /// Dataset name used in problem report file names (default: directory name)
        #[arg(long)]
        dataset: Option<String>,

        /// Problem report directory (default: from config)
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Commit after every paper instead of once per file
        #[arg(long)]
        per_record: bool,
    },

    /// Import a reference table
    Import {
        #[command(subcommand)]
        table: ImportTable,
    },

    /// Faculty roster operations
    Faculty {
        #[command(subcommand)]
        action: FacultyAction,
    },

    /// Download Scopus search pages for a configured institution
    Fetch {
        /// Institution Scopus ID (must be listed in the config)
        institution: u64,

        /// First publication year
        #[arg(long)]
        from: i32,

        /// Last publication year (default: open)
        #[arg(long)]
        to: Option<i32>,

        /// Output directory (default: data directory / institution name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print table row counts
    Stats,
}

#[derive(Subcommand)]
enum ImportTable {
    /// Countries (name, domain, region, sub_region)
    Countries { path: PathBuf },
    /// ASJC subjects (asjc, top, middle, low)
    Subjects { path: PathBuf },
    /// Journal or conference list
    Sources {
        path: PathBuf,
        /// Source type for rows without one
        #[arg(long, default_value = reference::JOURNAL)]
        kind: String,
    },
    /// Yearly source metrics
    Metrics {
        path: PathBuf,
        #[arg(long)]
        year: i32,
    },
}

#[derive(Subcommand)]
enum FacultyAction {
    /// Attach roster departments, profiles and names to known authors
    Reconcile {
        /// Institution Scopus ID
        institution: u64,
        /// Roster CSV (default: from config)
        #[arg(long)]
        roster: Option<PathBuf>,
        /// Department list CSV (default: from config)
        #[arg(long)]
        departments: Option<PathBuf>,
    },
    /// Suggest Scopus IDs for roster rows without one
    Match {
        /// Institution Scopus ID
        institution: u64,
        /// Roster CSV (default: from config)
        #[arg(long)]
        roster: Option<PathBuf>,
        /// Output CSV (default: data directory / {name}_scp.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Minimum fuzzy score, 0-100 (default: from config)
        #[arg(long)]
        cutoff: Option<u8>,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.log_json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    let started = Instant::now();

    match cli.command {
        Commands::Populate => run_populate(&config)?,
        Commands::Papers {
            dir,
            dataset,
            log_dir,
            per_record,
        } => run_papers(&config, &dir, dataset, log_dir, per_record)?,
        Commands::Import { table } => run_import(&config, table)?,
        Commands::Faculty { action } => run_faculty(&config, action)?,
        Commands::Fetch {
            institution,
            from,
            to,
            output,
        } => run_fetch(&config, institution, from, to, output).await?,
        Commands::Stats => run_stats(&config)?,
    }

    println!("Op. Time: {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}

fn open_store(database: &DatabaseConfig) -> Result<Box<dyn Store>> {
    let store: Box<dyn Store> = match database.backend {
        Backend::Sqlite => Box::new(
            SqliteStore::open(&database.path)
                .with_context(|| format!("Failed to open {}", database.path.display()))?,
        ),
        Backend::Memory => Box::new(
            MemoryStore::open(&database.path)
                .with_context(|| format!("Failed to load {}", database.path.display()))?,
        ),
    };
    Ok(store)
}

// ============================================================================
// Ingestion
// ============================================================================

fn run_populate(config: &Config) -> Result<()> {
    let mut store = open_store(&config.database)?;
    let mut ctx = ResolutionContext::new(store.as_mut());

    let summary = populate::run(&mut ctx, &config.populate).context("Populate failed")?;

    for (table, result) in &summary.imports {
        print_import(table, result);
    }
    for (dataset, result) in &summary.papers {
        println!(
            "@ papers for {}: {} papers from {} files, {} problems",
            dataset, result.papers, result.files, result.problems
        );
        if let Some(report) = &result.report {
            println!("  Problem report: {}", report.display());
        }
    }
    for (institution, result) in &summary.faculties {
        print_reconcile(*institution, result);
    }
    Ok(())
}

fn run_papers(
    config: &Config,
    dir: &Path,
    dataset: Option<String>,
    log_dir: Option<PathBuf>,
    per_record: bool,
) -> Result<()> {
    let dataset = dataset.unwrap_or_else(|| {
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "papers".to_string())
    });
    let log_dir = log_dir.unwrap_or_else(|| config.populate.log_path());
    let policy = if per_record {
        CommitPolicy::PerRecord
    } else {
        config.populate.commit_policy
    };

    let mut store = open_store(&config.database)?;
    let mut ctx = ResolutionContext::new(store.as_mut());

    println!("@ papers for: {}", dir.display());
    let summary = batch::process_directory(&mut ctx, dir, &dataset, &log_dir, policy)
        .with_context(|| format!("Failed to process {}", dir.display()))?;

    println!(
        "Imported {} papers from {} files ({} failed files, {} problems)",
        summary.papers, summary.files, summary.failed_files, summary.problems
    );
    if let Some(report) = summary.report {
        println!("Problem report: {}", report.display());
    }
    Ok(())
}

fn run_import(config: &Config, table: ImportTable) -> Result<()> {
    let mut store = open_store(&config.database)?;
    let mut ctx = ResolutionContext::new(store.as_mut());

    let (label, result) = match table {
        ImportTable::Countries { path } => ("countries", reference::import_countries(&mut ctx, &path)),
        ImportTable::Subjects { path } => ("subjects", reference::import_subjects(&mut ctx, &path)),
        ImportTable::Sources { path, kind } => {
            ("sources", reference::import_sources(&mut ctx, &path, &kind))
        }
        ImportTable::Metrics { path, year } => {
            ("metrics", reference::import_metrics(&mut ctx, &path, year))
        }
    };
    let result = result.with_context(|| format!("Failed to import {}", label))?;
    ctx.flush()?;

    print_import(label, &result);
    Ok(())
}

fn print_import(table: &str, result: &ImportSummary) {
    println!(
        "@ {}: {} rows, {} imported, {} skipped, {} failed",
        table, result.rows, result.imported, result.skipped, result.failed
    );
}

// ============================================================================
// Faculty
// ============================================================================

fn run_faculty(config: &Config, action: FacultyAction) -> Result<()> {
    let populate = &config.populate;
    let mut store = open_store(&config.database)?;
    let mut ctx = ResolutionContext::new(store.as_mut());

    match action {
        FacultyAction::Reconcile {
            institution,
            roster,
            departments,
        } => {
            let configured = populate.institution(institution);
            let roster = roster
                .or_else(|| configured.and_then(|i| i.faculties.as_ref()).map(|p| populate.data_path(p)))
                .context("No roster given or configured")?;
            let departments = departments
                .or_else(|| configured.and_then(|i| i.departments.as_ref()).map(|p| populate.data_path(p)))
                .context("No department list given or configured")?;

            let summary = faculty::reconcile(&mut ctx, &roster, &departments, institution)
                .context("Reconciliation failed")?;
            ctx.commit()?;
            ctx.flush()?;
            print_reconcile(institution, &summary);
        }
        FacultyAction::Match {
            institution,
            roster,
            output,
            cutoff,
        } => {
            let configured = populate.institution(institution);
            let roster = roster
                .or_else(|| configured.and_then(|i| i.faculties.as_ref()).map(|p| populate.data_path(p)))
                .context("No roster given or configured")?;
            let cutoff = cutoff
                .or_else(|| configured.map(|i| i.fuzzy_match_cutoff))
                .unwrap_or(faculty::DEFAULT_CUTOFF);
            let output = output.unwrap_or_else(|| {
                let name = configured.map_or_else(|| institution.to_string(), |i| i.name.clone());
                populate.data_path(Path::new(&format!("{}_scp.csv", name)))
            });

            let summary = faculty::match_roster(
                &ctx,
                &roster,
                institution,
                cutoff,
                populate.low_tier,
                &output,
            )
            .context("Roster matching failed")?;
            println!(
                "Matched {} / {} rows ({} already known, {} unmatched)",
                summary.matched, summary.rows, summary.already_known, summary.unmatched
            );
            println!("Saved to {}", output.display());
        }
    }
    Ok(())
}

fn print_reconcile(institution: u64, result: &ReconcileSummary) {
    println!(
        "@ faculties of {}: {} updated, {} skipped, {} departments created",
        institution, result.updated, result.skipped, result.departments_created
    );
}

// ============================================================================
// Fetch & Stats
// ============================================================================

async fn run_fetch(
    config: &Config,
    institution: u64,
    from: i32,
    to: Option<i32>,
    output: Option<PathBuf>,
) -> Result<()> {
    let scopus = &config.scopus;
    let configured = config
        .populate
        .institution(institution)
        .with_context(|| format!("Institution {} is not configured", institution))?;
    let api_key = scopus
        .api_key
        .clone()
        .context("Scopus API key missing (config or SCOPUS_API_KEY)")?;

    let query = configured.search_query(from, to)?;
    let output = output.unwrap_or_else(|| config.populate.data_path(Path::new(&configured.name)));

    let client = ScopusClient::new(
        &scopus.base_url,
        api_key,
        scopus.inst_token.clone(),
        scopus.max_workers,
    )?;
    info!(institution, query = %query.to_query_string(), "Fetching");

    let saved = client
        .download(&query, &configured.name, scopus.max_pages, &output)
        .await
        .context("Scopus download failed")?;
    println!("Saved {} pages to {}", saved.len(), output.display());
    Ok(())
}

fn run_stats(config: &Config) -> Result<()> {
    let store = open_store(&config.database)?;
    let counts = store.counts()?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}
