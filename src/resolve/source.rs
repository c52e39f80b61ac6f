//! Source (journal, conference proceeding, book series) resolution and
//! source list imports.

use super::country::find_country;
use super::subject::subject_codes;
use crate::context::ResolutionContext;
use crate::error::Result;
use crate::model::{Source, SourceMetric, NOT_AVAILABLE};
use crate::record::{strip, Record, ISSN_CHARS};
use tracing::debug;

/// CSV metric columns and the names they are stored under
pub const METRIC_TYPES: &[(&str, &str)] = &[
    ("citescore", "CiteScore"),
    ("percentile", "Percentile"),
    ("snip", "SNIP"),
    ("sjr", "SJR"),
    ("citations", "Citations"),
    ("documents", "Documents"),
    ("percent_cited", "Percent Cited"),
];

fn stripped(value: Option<&str>, accepted: &str, max_len: usize) -> Option<String> {
    value
        .map(|v| strip(v, accepted, max_len))
        .filter(|v| !v.is_empty())
}

/// Fill the country from another source of the same publisher
fn backfill_country(ctx: &ResolutionContext<'_>, source: &mut Source) -> Result<()> {
    if source.country.is_some() {
        return Ok(());
    }
    if let Some(publisher) = source.publisher.as_deref() {
        source.country = ctx.publisher_country(publisher)?;
        if let Some(country) = &source.country {
            debug!(id_scp = source.id_scp, country = %country, "Country inferred from publisher");
        }
    }
    Ok(())
}

/// Resolve the source of a paper record by `source-id`.
///
/// Records without a usable source id yield `None`.
pub fn resolve_source(ctx: &mut ResolutionContext<'_>, record: &Record) -> Result<Option<Source>> {
    let Some(id_scp) = record.parse::<u64>("source-id") else {
        return Ok(None);
    };

    if let Some(source) = ctx.source(id_scp)? {
        return Ok(Some(source));
    }

    let mut source = Source::new(
        id_scp,
        record
            .text("prism:publicationName")
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
    );
    source.kind = record.text("prism:aggregationType");
    source.issn = stripped(record.field("prism:issn"), ISSN_CHARS, 8);
    source.e_issn = stripped(record.field("prism:eIssn"), ISSN_CHARS, 8);
    source.isbn = stripped(record.field("prism:isbn"), ISSN_CHARS, 13);
    source.publisher = record.text("dc:publisher");
    backfill_country(ctx, &mut source)?;

    debug!(id_scp, title = %source.title, "Creating source");
    ctx.stage_source(source.clone());
    Ok(Some(source))
}

/// Import one row of a journal or conference list.
///
/// Returns the created source; rows for existing sources and rows without a
/// usable id yield `None`.
pub fn import_source_row(
    ctx: &mut ResolutionContext<'_>,
    row: &Record,
    default_kind: Option<&str>,
) -> Result<Option<Source>> {
    let Some(id_scp) = row.parse::<u64>("id_scp") else {
        return Ok(None);
    };
    if ctx.source(id_scp)?.is_some() {
        return Ok(None);
    }

    let mut source = Source::new(
        id_scp,
        row.text("title").unwrap_or_else(|| NOT_AVAILABLE.to_string()),
    );
    source.kind = row.text("type").or_else(|| default_kind.map(str::to_string));
    source.issn = stripped(row.field("issn"), ISSN_CHARS, 8);
    source.e_issn = stripped(row.field("e_issn"), ISSN_CHARS, 8);
    source.publisher = row.text("publisher");

    if let Some(name) = row.field("country") {
        source.country = find_country(ctx, name)?.map(|c| c.name);
    }
    if let Some(raw) = row.field("asjc") {
        source.subjects = subject_codes(ctx, raw)?;
    }

    ctx.stage_source(source.clone());
    Ok(Some(source))
}

/// Import one row of a yearly metrics table, creating the source when
/// needed and adding metrics not yet recorded for `year`.
///
/// Returns the staged source, or `None` when the row has no usable id or
/// changes nothing.
pub fn import_metric_row(
    ctx: &mut ResolutionContext<'_>,
    row: &Record,
    year: i32,
) -> Result<Option<Source>> {
    let Some(id_scp) = row.parse::<u64>("id_scp") else {
        return Ok(None);
    };

    let existing = ctx.source(id_scp)?;
    let mut source = match existing.clone() {
        Some(source) => source,
        None => {
            let mut source = Source::new(
                id_scp,
                row.text("title").unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            );
            source.kind = row.text("type");
            source.issn = stripped(row.field("issn"), ISSN_CHARS, 8);
            source.e_issn = stripped(row.field("e_issn"), ISSN_CHARS, 8);
            source
        }
    };

    if source.publisher.is_none() {
        source.publisher = row.text("publisher");
    }
    backfill_country(ctx, &mut source)?;

    if source.subjects.is_empty() {
        if let Some(raw) = row.field("asjc") {
            source.subjects = subject_codes(ctx, raw)?;
        }
    }

    for (column, kind) in METRIC_TYPES {
        let Some(value) = row.parse::<f64>(column) else {
            continue;
        };
        if source.metric(kind, year).is_none() {
            source.metrics.push(SourceMetric {
                kind: kind.to_string(),
                value,
                year,
            });
        }
    }

    if existing.as_ref() == Some(&source) {
        return Ok(None);
    }
    ctx.stage_source(source.clone());
    Ok(Some(source))
}
