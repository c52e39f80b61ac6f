//! Author resolution from the `author` list of a paper record.

use super::institution::resolve_affiliation;
use crate::context::ResolutionContext;
use crate::error::Result;
use crate::model::Author;
use crate::record::Record;
use tracing::debug;

/// Base URL of Scopus author profiles
pub const SCOPUS_PROFILE_URL: &str = "https://www.scopus.com/authid/detail.uri?authorId=";

/// Profile type of the Scopus profile link
pub const SCOPUS_PROFILE: &str = "Scopus Profile";

/// Resolve every author of a paper record.
///
/// Entries without a usable `authid` are skipped, as are ids repeated
/// within the paper. The position comes from `@seq` and defaults to 0.
/// Every affiliation of an entry links its "Undefined" department to the
/// author.
pub fn resolve_authors(
    ctx: &mut ResolutionContext<'_>,
    record: &Record,
) -> Result<Vec<(u32, Author)>> {
    let mut authors: Vec<(u32, Author)> = Vec::new();

    for entry in record.records("author") {
        let Some(id_scp) = entry.parse::<u64>("authid") else {
            continue;
        };
        if authors.iter().any(|(_, a)| a.id_scp == id_scp) {
            debug!(id_scp, "Repeated author entry skipped");
            continue;
        }
        let author_no = entry.parse::<u32>("@seq").unwrap_or(0);

        let (mut author, mut changed) = match ctx.author(id_scp)? {
            Some(author) => (author, false),
            None => {
                let mut author = Author::new(
                    id_scp,
                    entry.text("given-name"),
                    entry.text("surname"),
                    entry.text("initials"),
                );
                author.add_profile(format!("{SCOPUS_PROFILE_URL}{id_scp}"), SCOPUS_PROFILE);
                (author, true)
            }
        };

        for afid in entry.fields("afid") {
            let Ok(afid) = afid.trim().parse::<u64>() else {
                continue;
            };
            if let Some((institution, department)) = resolve_affiliation(ctx, record, afid)? {
                changed |= author.link_department(institution.department_ref(department.id));
            }
        }

        if changed {
            ctx.stage_author(author.clone());
        }
        authors.push((author_no, author));
    }

    Ok(authors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn paper() -> Record {
        Record::from_json(json!({
            "author": [
                {"@seq": "1", "authid": "57001", "given-name": "Ali", "surname": "Rezaei",
                 "initials": "A.", "afid": [{"$": "60001"}, {"$": "60002"}]},
                {"@seq": "2", "authid": "57002", "surname": "Karimi", "afid": {"$": "60001"}},
                {"@seq": "3", "authid": "57001", "afid": [{"$": "60001"}]},
                {"@seq": "4", "given-name": "No Id"},
                {"authid": "57003"}
            ],
            "affiliation": [
                {"afid": "60001", "affilname": "University of Tehran"},
                {"afid": "60002", "affilname": "Sharif University of Technology"}
            ]
        }))
        .expect("object")
    }

    #[test]
    fn test_resolve_authors() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);

        let authors = resolve_authors(&mut ctx, &paper())?;
        let positions: Vec<_> = authors.iter().map(|(no, a)| (*no, a.id_scp)).collect();
        assert_eq!(positions, vec![(1, 57001), (2, 57002), (0, 57003)]);

        let (_, first) = &authors[0];
        assert_eq!(first.departments.len(), 2);
        assert_eq!(first.first.as_deref(), Some("Ali"));
        assert_eq!(
            first.profiles[0].address,
            "https://www.scopus.com/authid/detail.uri?authorId=57001"
        );
        assert_eq!(ctx.staged().institutions.len(), 2);
        assert_eq!(ctx.staged().authors.len(), 3);
        Ok(())
    }

    #[test]
    fn test_second_pass_does_not_duplicate_links() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);
        resolve_authors(&mut ctx, &paper())?;
        ctx.commit()?;

        let authors = resolve_authors(&mut ctx, &paper())?;
        assert_eq!(authors[0].1.departments.len(), 2);
        assert_eq!(authors[0].1.profiles.len(), 1);
        assert!(ctx.staged().authors.is_empty());
        Ok(())
    }
}
