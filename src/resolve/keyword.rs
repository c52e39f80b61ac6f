//! Author keyword resolution.

use crate::context::ResolutionContext;
use crate::error::Result;
use crate::model::Keyword;
use crate::record::Record;
use std::collections::HashSet;

/// Separator of the `authkeywords` field
pub const KEYWORD_SEPARATOR: char = '|';

/// Split, trim and de-duplicate keywords case-insensitively, keeping the
/// first-seen casing.
pub fn dedup_keywords(raw: &str, separator: char) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(separator)
        .map(str::trim)
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Resolve the `authkeywords` of a paper record
pub fn resolve_keywords(ctx: &mut ResolutionContext<'_>, record: &Record) -> Result<Vec<Keyword>> {
    let Some(raw) = record.field("authkeywords") else {
        return Ok(Vec::new());
    };

    let mut keywords = Vec::new();
    for text in dedup_keywords(raw, KEYWORD_SEPARATOR) {
        let keyword = match ctx.keyword(&text)? {
            Some(existing) => existing,
            None => {
                let keyword = Keyword { keyword: text };
                ctx.stage_keyword(keyword.clone());
                keyword
            }
        };
        keywords.push(keyword);
    }
    Ok(keywords)
}
