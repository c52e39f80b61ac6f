//! Institution and department resolution from paper affiliations.
//!
//! Every institution carries an "Undefined" department that authors are
//! linked to until a roster places them.

use super::country::find_country;
use crate::context::ResolutionContext;
use crate::error::Result;
use crate::model::{Department, Institution, NOT_AVAILABLE};
use crate::record::Record;
use tracing::debug;

/// Resolve the institution with Scopus affiliation id `afid` from the
/// paper's `affiliation` list, together with its "Undefined" department.
///
/// Lookup order is staged, then store, then creation. Institutions lacking
/// the placeholder department receive one. Returns `None` when the paper
/// has no affiliation entry for `afid`.
pub fn resolve_affiliation(
    ctx: &mut ResolutionContext<'_>,
    record: &Record,
    afid: u64,
) -> Result<Option<(Institution, Department)>> {
    let Some(affiliation) = record
        .records("affiliation")
        .iter()
        .find(|a| a.parse::<u64>("afid") == Some(afid))
    else {
        return Ok(None);
    };

    let mut institution = match ctx.institution(afid)? {
        Some(institution) => institution,
        None => {
            let mut institution = Institution::new(
                afid,
                affiliation
                    .text("affilname")
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            );
            institution.city = affiliation.text("affiliation-city");
            if let Some(name) = affiliation.field("affiliation-country") {
                institution.country = find_country(ctx, name)?.map(|c| c.name);
            }
            debug!(id_scp = afid, name = %institution.name, "Creating institution");
            ctx.stage_institution(institution.clone());
            institution
        }
    };

    if institution.undefined_department().is_none() {
        institution.ensure_undefined_department();
        ctx.stage_institution(institution.clone());
    }

    let Some(department) = institution.undefined_department().cloned() else {
        return Ok(None);
    };
    Ok(Some((institution, department)))
}
