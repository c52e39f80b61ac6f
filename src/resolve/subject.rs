//! ASJC subject resolution.

use crate::context::ResolutionContext;
use crate::error::{IngestError, OptionExt, Result};
use crate::model::Subject;
use crate::record::Record;

/// Resolve an ASJC table row (`asjc, top, middle, low`).
///
/// Rows without a code yield `None`.
pub fn resolve_subject(ctx: &mut ResolutionContext<'_>, row: &Record) -> Result<Option<Subject>> {
    let Some(raw) = row.field("asjc") else {
        return Ok(None);
    };
    let asjc: u32 = raw
        .trim()
        .parse()
        .map_err(|_| IngestError::Parse(format!("invalid ASJC code: {raw}")))?;

    if let Some(subject) = ctx.subject(asjc)? {
        return Ok(Some(subject));
    }

    let subject = Subject {
        asjc,
        top: row.text("top").ok_or_missing("top")?,
        middle: row.text("middle").ok_or_missing("middle")?,
        low: row.text("low").ok_or_missing("low")?,
    };
    ctx.stage_subject(subject.clone());
    Ok(Some(subject))
}

/// Parse a `;`-separated list of ASJC codes, keeping only known subjects.
/// Duplicates and unparsable codes are dropped.
pub fn subject_codes(ctx: &mut ResolutionContext<'_>, raw: &str) -> Result<Vec<u32>> {
    let mut codes = Vec::new();
    for code in raw.split(';').map(str::trim).filter(|c| !c.is_empty()) {
        let Ok(asjc) = code.parse::<u32>() else {
            continue;
        };
        if codes.contains(&asjc) {
            continue;
        }
        if ctx.subject(asjc)?.is_some() {
            codes.push(asjc);
        }
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use crate::store::MemoryStore;

    fn row(asjc: &str, low: &str) -> Record {
        Record::new()
            .with_field("asjc", FieldValue::Scalar(asjc.into()))
            .with_field("top", FieldValue::Scalar("Physical Sciences".into()))
            .with_field("middle", FieldValue::Scalar("Computer Science".into()))
            .with_field("low", FieldValue::Scalar(low.into()))
    }

    #[test]
    fn test_resolve_subject_once() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);

        resolve_subject(&mut ctx, &row("1702", "Artificial Intelligence"))?;
        let again = resolve_subject(&mut ctx, &row("1702", "Other"))?.expect("subject");
        assert_eq!(again.low, "Artificial Intelligence");
        assert_eq!(ctx.staged().subjects.len(), 1);

        assert!(resolve_subject(&mut ctx, &row("abc", "x")).is_err());
        Ok(())
    }

    #[test]
    fn test_subject_codes() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);
        resolve_subject(&mut ctx, &row("1702", "Artificial Intelligence"))?;
        resolve_subject(&mut ctx, &row("1712", "Software"))?;

        let codes = subject_codes(&mut ctx, "1712; 1702;1702; 9999; x;")?;
        assert_eq!(codes, vec![1712, 1702]);
        Ok(())
    }
}
