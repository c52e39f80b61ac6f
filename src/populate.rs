//! End-to-end population run driven by the `populate` config section.
//!
//! Stages run in dependency order: countries, subjects, journals,
//! conference proceedings, metrics, paper exports, faculty rosters. Each
//! stage is skipped unless its `process` flag is set.

use crate::batch::{process_directory, BatchSummary};
use crate::config::PopulateConfig;
use crate::context::ResolutionContext;
use crate::error::Result;
use crate::faculty::{reconcile, ReconcileSummary};
use crate::reference::{
    import_countries, import_metrics, import_sources, import_subjects, ImportSummary,
    CONFERENCE_PROCEEDING, JOURNAL,
};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Results of every stage that ran
#[derive(Debug, Clone, Default, Serialize)]
pub struct PopulateSummary {
    /// Reference imports, labelled by table
    pub imports: Vec<(String, ImportSummary)>,
    /// Paper export directories, labelled by dataset
    pub papers: Vec<(String, BatchSummary)>,
    /// Roster reconciliations, by institution Scopus ID
    pub faculties: Vec<(u64, ReconcileSummary)>,
}

/// Run every enabled stage against `ctx`
pub fn run(ctx: &mut ResolutionContext<'_>, config: &PopulateConfig) -> Result<PopulateSummary> {
    let started = Instant::now();
    let mut summary = PopulateSummary::default();

    if let Some(dataset) = config.countries.as_ref().filter(|d| d.process) {
        let result = import_countries(ctx, &config.data_path(&dataset.path))?;
        summary.imports.push(("countries".to_string(), result));
    }
    if let Some(dataset) = config.subjects.as_ref().filter(|d| d.process) {
        let result = import_subjects(ctx, &config.data_path(&dataset.path))?;
        summary.imports.push(("subjects".to_string(), result));
    }
    if let Some(dataset) = config.journals.as_ref().filter(|d| d.process) {
        let result = import_sources(ctx, &config.data_path(&dataset.path), JOURNAL)?;
        summary.imports.push(("journals".to_string(), result));
    }
    if let Some(dataset) = config.conferences.as_ref().filter(|d| d.process) {
        let result =
            import_sources(ctx, &config.data_path(&dataset.path), CONFERENCE_PROCEEDING)?;
        summary.imports.push(("conferences".to_string(), result));
    }
    for item in config.metrics.iter().filter(|m| m.process) {
        let result = import_metrics(ctx, &config.data_path(&item.path), item.year)?;
        summary.imports.push((format!("metrics {}", item.year), result));
    }

    for dataset in config.papers.iter().filter(|d| d.process) {
        let name = dataset_name(&dataset.path);
        let result = process_directory(
            ctx,
            &config.data_path(&dataset.path),
            &name,
            &config.log_path(),
            config.commit_policy,
        )?;
        summary.papers.push((name, result));
    }

    for institution in config.institutions.iter().filter(|i| i.process) {
        let (Some(roster), Some(departments)) = (&institution.faculties, &institution.departments)
        else {
            warn!(
                institution = institution.id_scp,
                "Roster or department list not configured, skipped"
            );
            continue;
        };
        let result = reconcile(
            ctx,
            &config.data_path(roster),
            &config.data_path(departments),
            institution.id_scp,
        )?;
        ctx.commit()?;
        summary.faculties.push((institution.id_scp, result));
    }

    ctx.flush()?;
    info!(elapsed_secs = started.elapsed().as_secs(), "Populate finished");
    Ok(summary)
}

fn dataset_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
