//! Paper assembly from a Scopus search entry.

use super::{resolve_authors, resolve_fund, resolve_keywords, resolve_source};
use crate::context::ResolutionContext;
use crate::error::{IngestError, OptionExt, Result};
use crate::model::{Paper, PaperAuthor, NOT_AVAILABLE};
use crate::record::{parse_flag, strip, Record, PAPER_SENTINELS};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info};

const TITLE_MAX_LEN: usize = 512;
const VOLUME_MAX_LEN: usize = 45;

/// Parse `dc:identifier` (`SCOPUS_ID:123`) into the numeric id
pub fn parse_scopus_id(identifier: &str) -> Result<u64> {
    identifier
        .split_once(':')
        .map_or(identifier, |(_, id)| id)
        .trim()
        .parse()
        .map_err(|_| IngestError::Parse(format!("invalid Scopus identifier: {identifier}")))
}

/// URL of the link tagged `scopus`
fn scopus_url(record: &Record) -> Option<String> {
    record
        .records("link")
        .iter()
        .find(|link| link.field("@ref") == Some("scopus"))
        .and_then(|link| link.text("@href"))
}

/// Assemble one paper record into a fully linked [`Paper`] and stage it.
///
/// The paper is looked up by Scopus id, then by DOI when the titles agree.
/// A DOI owned by a paper with a different title is dropped from the new
/// paper. Source, fund, keywords and authors are only resolved when the
/// paper does not carry them yet; `total_author` always reflects the linked
/// authors.
pub fn assemble_paper(
    ctx: &mut ResolutionContext<'_>,
    record: &Record,
    retrieval_time: NaiveDateTime,
) -> Result<Paper> {
    let record = record.normalize_nulls(PAPER_SENTINELS);

    let id_scp = parse_scopus_id(record.field("dc:identifier").ok_or_missing("dc:identifier")?)?;
    let title = strip(
        record.field("dc:title").unwrap_or(NOT_AVAILABLE),
        "",
        TITLE_MAX_LEN,
    );
    let mut doi = record.text("prism:doi");

    let mut existing = ctx.paper(id_scp)?;
    if existing.is_none() {
        if let Some(d) = doi.as_deref() {
            match ctx.paper_by_doi(d)? {
                Some(other) if other.title == title => existing = Some(other),
                Some(other) => {
                    info!(
                        id_scp,
                        other = other.id_scp,
                        doi = d,
                        "DOI shared by papers with different titles, storing without DOI"
                    );
                    doi = None;
                }
                None => {}
            }
        }
    }

    let mut paper = match existing {
        Some(paper) => paper,
        None => {
            debug!(id_scp, "Creating paper");
            Paper {
                id_scp,
                eid: record
                    .text("eid")
                    .unwrap_or_else(|| format!("2-s2.0-{id_scp}")),
                title,
                kind: record
                    .text("subtype")
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                type_description: record
                    .text("subtypeDescription")
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                abstract_text: record.text("dc:description"),
                total_author: 0,
                open_access: record.field("openaccess").is_some_and(parse_flag),
                cited_cnt: record.parse("citedby-count"),
                url: scopus_url(&record),
                article_no: record.text("article-number"),
                doi,
                volume: record
                    .field("prism:volume")
                    .map(|v| strip(v, "", VOLUME_MAX_LEN)),
                issue: record.text("prism:issueIdentifier"),
                date: record
                    .field("prism:coverDate")
                    .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok()),
                page_range: record.text("prism:pageRange"),
                retrieval_time,
                source: None,
                fund: None,
                keywords: Vec::new(),
                authors: Vec::new(),
            }
        }
    };

    if paper.source.is_none() {
        paper.source = resolve_source(ctx, &record)?.map(|s| s.id_scp);
    }
    if paper.fund.is_none() {
        paper.fund = resolve_fund(ctx, &record)?.map(|f| f.key());
    }
    if paper.keywords.is_empty() {
        paper.keywords = resolve_keywords(ctx, &record)?
            .into_iter()
            .map(|k| k.keyword)
            .collect();
    }
    if paper.authors.is_empty() {
        paper.authors = resolve_authors(ctx, &record)?
            .into_iter()
            .map(|(author_no, author)| PaperAuthor {
                author_no,
                author: author.id_scp,
            })
            .collect();
    }
    // the reported author-count is not trusted
    paper.total_author = u32::try_from(paper.authors.len()).unwrap_or(u32::MAX);

    ctx.stage_paper(paper.clone());
    Ok(paper)
}
