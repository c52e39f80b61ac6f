//! Country resolution with name aliases.

use crate::context::ResolutionContext;
use crate::error::{OptionExt, Result};
use crate::model::Country;
use crate::record::Record;
use tracing::debug;

/// Name variants folded to the canonical country name
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("Russian Federation", "Russia"),
    ("USA", "United States"),
    ("Great Britain", "United Kingdom"),
    ("Vietnam", "Viet Nam"),
    ("Zweden", "Sweden"),
    ("Czech Republic", "Czechia"),
];

/// Fold a known name variant to its canonical form
pub fn canonical_country_name(name: &str) -> &str {
    let name = name.trim();
    COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |(_, canonical)| canonical)
}

/// Look a country up by any of its name variants
pub fn find_country(ctx: &ResolutionContext<'_>, name: &str) -> Result<Option<Country>> {
    let name = canonical_country_name(name);
    if name.is_empty() {
        return Ok(None);
    }
    ctx.country(name)
}

/// Resolve a country table row (`name, domain, region, sub_region`).
///
/// Returns `None` for rows without a name. Existing countries are returned
/// untouched.
pub fn resolve_country(ctx: &mut ResolutionContext<'_>, row: &Record) -> Result<Option<Country>> {
    let Some(raw_name) = row.field("name") else {
        return Ok(None);
    };
    let name = canonical_country_name(raw_name).to_string();

    if let Some(country) = ctx.country(&name)? {
        return Ok(Some(country));
    }

    let country = Country {
        domain: row.text("domain").ok_or_missing("domain")?,
        region: row.text("region").ok_or_missing("region")?,
        sub_region: row.text("sub_region"),
        name,
    };
    debug!(name = %country.name, "Creating country");
    ctx.stage_country(country.clone());
    Ok(Some(country))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldValue, DEFAULT_SENTINELS};
    use crate::store::MemoryStore;

    fn row(name: &str, domain: &str) -> Record {
        Record::new()
            .with_field("name", FieldValue::Scalar(name.into()))
            .with_field("domain", FieldValue::Scalar(domain.into()))
            .with_field("region", FieldValue::Scalar("Europe".into()))
            .with_field("sub_region", FieldValue::Scalar("-".into()))
            .normalize_nulls(DEFAULT_SENTINELS)
    }

    #[test]
    fn test_aliases() {
        assert_eq!(canonical_country_name("USA"), "United States");
        assert_eq!(canonical_country_name(" Russian Federation "), "Russia");
        assert_eq!(canonical_country_name("Iran"), "Iran");
    }

    #[test]
    fn test_resolve_country_folds_aliases() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);

        let created = resolve_country(&mut ctx, &row("Czech Republic", "CZ"))?;
        let created = created.expect("country");
        assert_eq!(created.name, "Czechia");
        assert_eq!(created.sub_region, None);

        let again = resolve_country(&mut ctx, &row("Czechia", "XX"))?.expect("country");
        assert_eq!(again.domain, "CZ");
        assert_eq!(ctx.staged().countries.len(), 1);
        assert!(find_country(&ctx, "Czech Republic")?.is_some());
        Ok(())
    }

    #[test]
    fn test_missing_domain_is_an_error() {
        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);
        let r = row("Iran", "-");
        assert!(resolve_country(&mut ctx, &r).is_err());
    }
}
