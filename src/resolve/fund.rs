//! Funding agency resolution.

use crate::context::ResolutionContext;
use crate::error::Result;
use crate::model::{Fund, FundKey, NOT_AVAILABLE};
use crate::record::Record;

/// Resolve the fund of a paper record.
///
/// Missing `fund-no` or `fund-sponsor` components are substituted with
/// [`NOT_AVAILABLE`] so the pair stays a usable unique key. When both are
/// missing there is no key and no fund.
pub fn resolve_fund(ctx: &mut ResolutionContext<'_>, record: &Record) -> Result<Option<Fund>> {
    let id_scp = record
        .text("fund-no")
        .filter(|v| v != "undefined")
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let agency = record
        .text("fund-sponsor")
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    if id_scp == NOT_AVAILABLE && agency == NOT_AVAILABLE {
        return Ok(None);
    }

    let key = FundKey { id_scp, agency };
    if let Some(fund) = ctx.fund(&key)? {
        return Ok(Some(fund));
    }

    let fund = Fund {
        id_scp: key.id_scp,
        agency: key.agency,
        agency_acronym: record.text("fund-acr"),
    };
    ctx.stage_fund(fund.clone());
    Ok(Some(fund))
}
