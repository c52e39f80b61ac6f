//! Reference-table imports: countries, ASJC subjects, source lists and
//! yearly source metrics.
//!
//! Every importer reads a CSV file, resolves each row through the matching
//! resolver and commits once at the end. Rows that fail to resolve are
//! logged and skipped without affecting the rest of the file.

use crate::context::ResolutionContext;
use crate::error::Result;
use crate::record::{Record, DEFAULT_SENTINELS};
use crate::resolve::country::find_country;
use crate::resolve::source::{import_metric_row, import_source_row};
use crate::resolve::{resolve_country, resolve_subject};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Source kind of the journal list
pub const JOURNAL: &str = "Journal";

/// Source kind of the conference proceedings list
pub const CONFERENCE_PROCEEDING: &str = "Conference Proceeding";

/// Outcome of one reference import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows: usize,
    /// Rows that produced a new or updated entity
    pub imported: usize,
    /// Rows without a key or describing an existing entity
    pub skipped: usize,
    pub failed: usize,
}

/// Read a reference CSV file into normalized records
pub fn read_table(path: &Path) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for row in reader.records() {
        rows.push(Record::from_csv(&headers, &row?).normalize_nulls(DEFAULT_SENTINELS));
    }
    Ok(rows)
}

fn import_rows<'a, F>(
    ctx: &mut ResolutionContext<'a>,
    path: &Path,
    table: &str,
    mut import: F,
) -> Result<ImportSummary>
where
    F: FnMut(&mut ResolutionContext<'a>, &Record) -> Result<bool>,
{
    info!(table, "Importing {:?}", path);
    let rows = read_table(path)?;
    let mut summary = ImportSummary::default();

    for (index, row) in rows.iter().enumerate() {
        summary.rows += 1;
        let savepoint = ctx.savepoint();
        match import(ctx, row) {
            Ok(true) => summary.imported += 1,
            Ok(false) => summary.skipped += 1,
            Err(e) => {
                // csv line numbers count the header
                warn!(table, line = index + 2, error = %e, "Row skipped");
                ctx.restore(savepoint);
                summary.failed += 1;
            }
        }
    }

    ctx.commit()?;
    info!(
        table,
        imported = summary.imported,
        skipped = summary.skipped,
        failed = summary.failed,
        "Import finished"
    );
    Ok(summary)
}

/// Import a country table (`name, domain, region, sub_region`)
pub fn import_countries(ctx: &mut ResolutionContext<'_>, path: &Path) -> Result<ImportSummary> {
    import_rows(ctx, path, "countries", |ctx, row| {
        let existed = match row.field("name") {
            Some(name) => find_country(ctx, name)?.is_some(),
            None => true,
        };
        Ok(resolve_country(ctx, row)?.is_some() && !existed)
    })
}

/// Import an ASJC subject table (`asjc, top, middle, low`)
pub fn import_subjects(ctx: &mut ResolutionContext<'_>, path: &Path) -> Result<ImportSummary> {
    import_rows(ctx, path, "subjects", |ctx, row| {
        let before = ctx.staged().subjects.len();
        resolve_subject(ctx, row)?;
        Ok(ctx.staged().subjects.len() > before)
    })
}

/// Import a journal or conference list. `default_kind` applies to rows
/// without a `type` column.
pub fn import_sources(
    ctx: &mut ResolutionContext<'_>,
    path: &Path,
    default_kind: &str,
) -> Result<ImportSummary> {
    import_rows(ctx, path, "sources", |ctx, row| {
        Ok(import_source_row(ctx, row, Some(default_kind))?.is_some())
    })
}

/// Import the yearly metrics table for `year`
pub fn import_metrics(ctx: &mut ResolutionContext<'_>, path: &Path, year: i32) -> Result<ImportSummary> {
    import_rows(ctx, path, "metrics", |ctx, row| {
        Ok(import_metric_row(ctx, row, year)?.is_some())
    })
}
