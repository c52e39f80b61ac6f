//! Faculty rosters: fuzzy author matching and department reconciliation.
//!
//! Authors created from papers are only linked to their institutions'
//! "Undefined" department. A roster import attaches the real departments,
//! preferred names and contact profiles, and unlinks the placeholder.

use crate::context::ResolutionContext;
use crate::error::{IngestError, Result};
use crate::model::{Author, DepartmentRef};
use crate::record::{Record, ROSTER_SENTINELS};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Default minimum partial-ratio score for fuzzy name tiers
pub const DEFAULT_CUTOFF: u8 = 90;

const GOOGLE_SCHOLAR_URL: &str = "https://scholar.google.com/citations?user=";

/// Best similarity (0-100) between the shorter string and any equally long
/// window of the longer one, or the two whole strings. Case-insensitive.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0;
    }

    let needle: String = short.iter().collect();
    let haystack: String = long.iter().collect();
    let best = long
        .windows(short.len())
        .map(|window| {
            let window: String = window.iter().collect();
            strsim::normalized_levenshtein(&needle, &window)
        })
        .fold(strsim::normalized_levenshtein(&needle, &haystack), f64::max);
    (best * 100.0).round() as u8
}

/// Confidence of a faculty match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        };
        f.write_str(label)
    }
}

/// What the lowest, fully fuzzy tier compares the query last name against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowTierComparison {
    /// Both query names against the candidate's first name
    #[default]
    FirstNameTwice,
    /// Query first against candidate first, query last against candidate last
    FirstAndLast,
}

/// Matched Scopus author ids, empty with no confidence when nothing matched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacultyMatch {
    pub ids: Vec<u64>,
    pub confidence: Option<Confidence>,
}

fn same(a: Option<&str>, b: &str) -> bool {
    a.is_some_and(|a| !b.trim().is_empty() && a.trim().to_lowercase() == b.trim().to_lowercase())
}

fn first_of(author: &Author) -> &str {
    author.first.as_deref().unwrap_or("")
}

fn last_of(author: &Author) -> &str {
    author.last.as_deref().unwrap_or("")
}

/// Lowercased first letter of a name
fn first_letter(value: &str) -> Option<String> {
    value
        .chars()
        .find(|c| c.is_alphabetic())
        .map(|c| c.to_lowercase().collect())
}

/// Initials without dots and spaces, lowercased: `"M."` and `"m"` are equal,
/// `"M. R."` is `"mr"`
fn normalize_initials(initials: &str) -> String {
    initials
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Match a roster row against candidate authors.
///
/// Tiers are tried in decreasing confidence and the first tier with any
/// match wins:
/// 1. exact first and last name (`High`)
/// 2. exact last name, first name initial equals the whole of `initials` (`Medium`)
/// 3. exact last name, fuzzy first name (`Medium`)
/// 4. fuzzy first and last name (`Low`), see [`LowTierComparison`]
pub fn match_faculty(
    candidates: &[Author],
    first: &str,
    last: &str,
    initials: &str,
    cutoff: u8,
    low_tier: LowTierComparison,
) -> FacultyMatch {
    let initials = normalize_initials(initials);

    let tiers: [(Confidence, Box<dyn Fn(&Author) -> bool + '_>); 4] = [
        (
            Confidence::High,
            Box::new(|a| same(a.first.as_deref(), first) && same(a.last.as_deref(), last)),
        ),
        (
            Confidence::Medium,
            Box::new(|a| {
                same(a.last.as_deref(), last)
                    && !initials.is_empty()
                    && first_letter(first_of(a)).as_deref() == Some(initials.as_str())
            }),
        ),
        (
            Confidence::Medium,
            Box::new(|a| same(a.last.as_deref(), last) && partial_ratio(first, first_of(a)) >= cutoff),
        ),
        (
            Confidence::Low,
            Box::new(|a| {
                let other = match low_tier {
                    LowTierComparison::FirstNameTwice => first_of(a),
                    LowTierComparison::FirstAndLast => last_of(a),
                };
                partial_ratio(first, first_of(a)) >= cutoff && partial_ratio(last, other) >= cutoff
            }),
        ),
    ];

    for (confidence, matches) in &tiers {
        let mut ids: Vec<u64> = Vec::new();
        for author in candidates.iter().filter(|a| matches(a)) {
            if !ids.contains(&author.id_scp) {
                ids.push(author.id_scp);
            }
        }
        if !ids.is_empty() {
            return FacultyMatch {
                ids,
                confidence: Some(*confidence),
            };
        }
    }
    FacultyMatch::default()
}

/// Read a CSV file into normalized records plus its header row
fn read_roster(path: &Path) -> Result<(csv::StringRecord, Vec<Record>)> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for row in reader.records() {
        rows.push(Record::from_csv(&headers, &row?).normalize_nulls(ROSTER_SENTINELS));
    }
    Ok((headers, rows))
}

/// Outcome of a roster matching run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RosterMatchSummary {
    pub rows: usize,
    pub already_known: usize,
    pub matched: usize,
    pub unmatched: usize,
}

/// Fill `Scopus ID` and `Scopus ID Confidence` for roster rows lacking an id
/// and write the augmented roster to `export_path`.
pub fn match_roster(
    ctx: &ResolutionContext<'_>,
    roster_path: &Path,
    institution: u64,
    cutoff: u8,
    low_tier: LowTierComparison,
    export_path: &Path,
) -> Result<RosterMatchSummary> {
    const ID_COLUMN: &str = "Scopus ID";
    const CONFIDENCE_COLUMN: &str = "Scopus ID Confidence";

    let candidates = ctx.institution_authors(institution)?;
    if candidates.is_empty() {
        return Err(IngestError::MissingField(format!(
            "no authors linked to institution {institution}"
        )));
    }
    info!(institution, candidates = candidates.len(), "Matching roster {:?}", roster_path);

    let (headers, rows) = read_roster(roster_path)?;
    let mut columns: Vec<String> = headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    for column in [ID_COLUMN, CONFIDENCE_COLUMN] {
        if !columns.iter().any(|c| c == column) {
            columns.push(column.to_string());
        }
    }

    if let Some(parent) = export_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().from_path(export_path)?;
    writer.write_record(&columns)?;

    let mut summary = RosterMatchSummary::default();
    for row in &rows {
        summary.rows += 1;
        let mut values: HashMap<&str, String> = columns
            .iter()
            .map(|c| (c.as_str(), row.text(c).unwrap_or_default()))
            .collect();

        if row.field(ID_COLUMN).is_some() {
            summary.already_known += 1;
        } else {
            let first = row.text("First En").unwrap_or_default();
            let last = row.text("Last En").unwrap_or_default();
            let initials = row
                .text("Initials En")
                .unwrap_or_else(|| first.chars().take(1).collect());

            let found = match_faculty(&candidates, &first, &last, &initials, cutoff, low_tier);
            match found.confidence {
                Some(confidence) => {
                    let ids: Vec<String> = found.ids.iter().map(u64::to_string).collect();
                    debug!(first = %first, last = %last, %confidence, "Faculty matched");
                    values.insert(ID_COLUMN, ids.join(", "));
                    values.insert(CONFIDENCE_COLUMN, confidence.to_string());
                    summary.matched += 1;
                }
                None => summary.unmatched += 1,
            }
        }

        let record: Vec<&str> = columns
            .iter()
            .map(|c| values.get(c.as_str()).map_or("", String::as_str))
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(
        matched = summary.matched,
        unmatched = summary.unmatched,
        "Saved roster matches to {:?}",
        export_path
    );
    Ok(summary)
}

/// Department list entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartmentInfo {
    pub name: String,
    pub kind: Option<String>,
}

/// Read a department list (`Department Abbreviation, Department En, Type`)
pub fn read_department_list(path: &Path) -> Result<HashMap<String, DepartmentInfo>> {
    let (_, rows) = read_roster(path)?;
    let mut departments = HashMap::new();
    for row in rows {
        let Some(abbreviation) = row.text("Department Abbreviation") else {
            continue;
        };
        let name = row
            .text("Department En")
            .unwrap_or_else(|| abbreviation.clone());
        departments.insert(
            abbreviation,
            DepartmentInfo {
                name,
                kind: row.text("Type"),
            },
        );
    }
    Ok(departments)
}

/// Outcome of a reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub updated: usize,
    pub skipped: usize,
    pub departments_created: usize,
}

fn apply_roster_details(author: &mut Author, row: &Record) -> Result<()> {
    author.id_gsc = row.text("Google Scholar ID");
    author.id_institution = row.text("Institution ID");
    if let Some(v) = row.text("First En") {
        author.first_pref = Some(v);
    }
    if let Some(v) = row.text("Middle En") {
        author.middle_pref = Some(v);
    }
    if let Some(v) = row.text("Last En") {
        author.last_pref = Some(v);
    }
    if let Some(v) = row.text("Initials En") {
        author.initials_pref = Some(v);
    }
    author.first_fa = row.text("First Fa");
    author.last_fa = row.text("Last Fa");
    if let Some(sex) = row.text("Sex").filter(|s| s == "M" || s == "F") {
        author.sex = Some(sex.to_lowercase());
    }
    author.kind = Some("Faculty".to_string());
    author.rank = row.text("Rank");

    if let Some(raw) = row.field("Google Scholar Retrieval Time") {
        let timestamp: i64 = raw
            .trim()
            .parse()
            .map_err(|_| IngestError::Parse(format!("invalid retrieval time: {raw}")))?;
        author.retrieval_time_gsc = DateTime::from_timestamp(timestamp, 0).map(|dt| dt.naive_utc());
        author.h_index_gsc = row.parse("Google Scholar h-index");
        author.i10_index_gsc = row.parse("Google Scholar i10-index");
    }

    if let Some(emails) = row.field("Email") {
        for email in emails.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            author.add_profile(email, "Email");
        }
    }
    if let Some(phone) = row.text("Phone (Office)") {
        author.add_profile(phone, "Phone (Office)");
    }
    if let Some(website) = row.text("Personal Website") {
        author.add_profile(website, "Personal Website");
    }
    if let Some(gsc) = row.text("Google Scholar ID") {
        author.add_profile(format!("{GOOGLE_SCHOLAR_URL}{gsc}"), "Google Scholar");
    }
    Ok(())
}

/// Update faculty members of an institution from its roster.
///
/// Rows need a `Scopus ID` (the first of a comma-separated list is used)
/// and at least one department abbreviation. Missing departments are
/// created from the department list; the "Undefined" department of the
/// institution is unlinked from every reconciled author.
pub fn reconcile(
    ctx: &mut ResolutionContext<'_>,
    roster_path: &Path,
    departments_path: &Path,
    institution_id: u64,
) -> Result<ReconcileSummary> {
    let department_list = read_department_list(departments_path)?;
    let mut summary = ReconcileSummary::default();

    let Some(mut institution) = ctx.institution(institution_id)? else {
        warn!(institution = institution_id, "Institution not found, roster skipped");
        return Ok(summary);
    };
    let undefined: Option<DepartmentRef> = institution
        .undefined_department()
        .map(|d| institution.department_ref(d.id));

    let (_, rows) = read_roster(roster_path)?;
    for row in rows {
        let id_scp = row
            .field("Scopus ID")
            .and_then(|ids| ids.split(',').next())
            .and_then(|id| id.trim().parse::<u64>().ok());
        let departments = row.field("Departments");
        let (Some(id_scp), Some(departments)) = (id_scp, departments) else {
            summary.skipped += 1;
            continue;
        };
        let Some(mut author) = ctx.author(id_scp)? else {
            debug!(id_scp, "Faculty not among known authors");
            summary.skipped += 1;
            continue;
        };

        apply_roster_details(&mut author, &row)?;

        for abbreviation in departments.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let id = match institution.department_by_abbreviation(abbreviation) {
                Some(dept) => dept.id,
                None => {
                    let info = department_list.get(abbreviation);
                    if info.is_none() {
                        warn!(abbreviation, "Department missing from department list");
                    }
                    summary.departments_created += 1;
                    institution.add_department(
                        info.map_or_else(|| abbreviation.to_string(), |i| i.name.clone()),
                        Some(abbreviation.to_string()),
                        info.and_then(|i| i.kind.clone()),
                    )
                }
            };
            author.link_department(institution.department_ref(id));
        }

        if let Some(undefined) = undefined {
            author.unlink_department(undefined);
        }

        ctx.stage_author(author);
        summary.updated += 1;
    }

    if summary.departments_created > 0 {
        ctx.stage_institution(institution);
    }
    info!(
        institution = institution_id,
        updated = summary.updated,
        skipped = summary.skipped,
        departments = summary.departments_created,
        "Roster reconciled"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Institution;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    fn author(id: u64, first: &str, last: &str) -> Author {
        Author::new(id, Some(first.into()), Some(last.into()), None)
    }

    #[test]
    fn test_partial_ratio() {
        assert_eq!(partial_ratio("Ali", "ali"), 100);
        assert_eq!(partial_ratio("Mohammad", "Mohammadreza"), 100);
        assert!(partial_ratio("Mohammad", "Mohamad") >= 85);
        assert!(partial_ratio("Ali", "Zahra") < 50);
        assert_eq!(partial_ratio("", "Ali"), 0);
    }

    #[test]
    fn test_exact_tier_wins() {
        let candidates = vec![author(1, "Ali", "Rezaei"), author(2, "Alireza", "Rezaei")];
        let found = match_faculty(&candidates, "Ali", "Rezaei", "A", 80, LowTierComparison::default());
        assert_eq!(found.ids, vec![1]);
        assert_eq!(found.confidence, Some(Confidence::High));
    }

    #[test]
    fn test_initials_and_fuzzy_tiers() {
        let candidates = vec![author(1, "M.", "Karimi"), author(2, "Sara", "Ahmadi")];
        let found = match_faculty(&candidates, "Mohammad", "Karimi", "M.", 90, LowTierComparison::default());
        assert_eq!(found.ids, vec![1]);
        assert_eq!(found.confidence, Some(Confidence::Medium));

        let candidates = vec![author(3, "Mohamad", "Karimi")];
        let found = match_faculty(&candidates, "Mohammad", "Karimi", "", 85, LowTierComparison::default());
        assert_eq!(found.confidence, Some(Confidence::Medium));

        let found = match_faculty(&candidates, "Zahra", "Karimi", "Z", 85, LowTierComparison::default());
        assert_eq!(found, FacultyMatch::default());
    }

    #[test]
    fn test_initials_compare_whole_string() {
        let candidates = vec![author(1, "M.", "Karimi")];
        let found = match_faculty(&candidates, "Mohammad", "Karimi", "M. R.", 90, LowTierComparison::default());
        assert_eq!(found, FacultyMatch::default());

        let found = match_faculty(&candidates, "Mohammad", "Karimi", " m ", 90, LowTierComparison::default());
        assert_eq!(found.ids, vec![1]);
    }

    #[test]
    fn test_exact_tier_folds_non_ascii_case() {
        let candidates = vec![author(7, "Émile", "Öztürk")];
        let found = match_faculty(&candidates, "émile", "ÖZTÜRK", "", 90, LowTierComparison::default());
        assert_eq!(found.ids, vec![7]);
        assert_eq!(found.confidence, Some(Confidence::High));
    }

    #[test]
    fn test_low_tier_variants() {
        let candidates = vec![author(4, "Reza", "Tehrani")];
        // last name spelled differently, so only the fuzzy tier can match
        let first_twice = match_faculty(&candidates, "Reza", "Rezaei", "", 80, LowTierComparison::FirstNameTwice);
        assert_eq!(first_twice.ids, vec![4]);
        assert_eq!(first_twice.confidence, Some(Confidence::Low));

        let first_and_last = match_faculty(&candidates, "Reza", "Rezaei", "", 80, LowTierComparison::FirstAndLast);
        assert!(first_and_last.ids.is_empty());

        let first_and_last = match_faculty(&candidates, "Reza", "Tehranii", "", 80, LowTierComparison::FirstAndLast);
        assert_eq!(first_and_last.confidence, Some(Confidence::Low));
    }

    fn seeded_store() -> Result<MemoryStore> {
        let mut store = MemoryStore::new();
        {
            let mut ctx = ResolutionContext::new(&mut store);
            let institution = Institution::new(60001, "University of Tehran");
            let undefined = institution.department_ref(institution.departments[0].id);
            for (id, first, last) in [(1, "Ali", "Rezaei"), (2, "Sara", "Ahmadi")] {
                let mut a = author(id, first, last);
                a.link_department(undefined);
                ctx.stage_author(a);
            }
            ctx.stage_institution(institution);
            ctx.commit()?;
        }
        Ok(store)
    }

    #[test]
    fn test_match_roster_writes_export() -> Result<()> {
        let dir = TempDir::new()?;
        let roster = dir.path().join("roster.csv");
        std::fs::write(
            &roster,
            "Institution ID,First En,Last En,Initials En,Scopus ID\n\
             t1,Ali,Rezaei,---,\n\
             t2,Sara,Ahmadi,,999\n\
             t3,Nobody,Known,N,\n",
        )?;
        let export = dir.path().join("out").join("Tehran_scp.csv");

        let mut store = seeded_store()?;
        let ctx = ResolutionContext::new(&mut store);
        let summary = match_roster(&ctx, &roster, 60001, 90, LowTierComparison::default(), &export)?;
        assert_eq!(summary, RosterMatchSummary { rows: 3, already_known: 1, matched: 1, unmatched: 1 });

        let mut reader = csv::Reader::from_path(&export)?;
        let headers = reader.headers()?.clone();
        assert_eq!(headers.get(5), Some("Scopus ID Confidence"));
        let rows: Vec<csv::StringRecord> = reader.records().collect::<std::result::Result<_, _>>()?;
        assert_eq!(rows[0].get(4), Some("1"));
        assert_eq!(rows[0].get(5), Some("High"));
        assert_eq!(rows[1].get(4), Some("999"));
        assert_eq!(rows[2].get(4), Some(""));
        Ok(())
    }

    #[test]
    fn test_reconcile_replaces_undefined_department() -> Result<()> {
        let dir = TempDir::new()?;
        let roster = dir.path().join("faculty.csv");
        let departments = dir.path().join("departments.csv");
        std::fs::write(
            &roster,
            "Scopus ID,Departments,Google Scholar ID,Institution ID,First En,Middle En,Last En,\
             Initials En,First Fa,Last Fa,Sex,Rank,Google Scholar Retrieval Time,\
             Google Scholar h-index,Google Scholar i10-index,Email,Phone (Office),Personal Website\n\
             \"1, 77\",\"CE,EE\",gsc1,t1,Ali,,Rezaei,A.,علی,رضایی,M,Professor,1572500000,12,20,\
             \"ali@ut.ac.ir, a.rezaei@ut.ac.ir\",---,https://ut.ac.ir/~ali\n\
             ,CE,,t2,Sara,,Ahmadi,,,,F,,,,,,,\n\
             404,CE,,t3,Ghost,,User,,,,,,,,,,,\n",
        )?;
        std::fs::write(
            &departments,
            "Department Abbreviation,Department En,Type\n\
             CE,Computer Engineering,Department\n\
             EE,Electrical Engineering,Department\n",
        )?;

        let mut store = seeded_store()?;
        let mut ctx = ResolutionContext::new(&mut store);
        let summary = reconcile(&mut ctx, &roster, &departments, 60001)?;
        assert_eq!(summary, ReconcileSummary { updated: 1, skipped: 2, departments_created: 2 });
        ctx.commit()?;

        let institution = ctx.institution(60001)?.expect("institution");
        assert_eq!(institution.departments.len(), 3);
        let ce = institution.department_by_abbreviation("CE").expect("CE");
        assert_eq!(ce.name, "Computer Engineering");

        let ali = ctx.author(1)?.expect("author");
        assert_eq!(ali.departments.len(), 2);
        assert!(ali.departments.iter().all(|d| d.department != institution.departments[0].id));
        assert_eq!(ali.sex.as_deref(), Some("m"));
        assert_eq!(ali.kind.as_deref(), Some("Faculty"));
        assert_eq!(ali.h_index_gsc, Some(12));
        let kinds: Vec<&str> = ali.profiles.iter().map(|p| p.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Email", "Email", "Personal Website", "Google Scholar"]);

        // the placeholder stays for authors the roster did not cover
        let sara = ctx.author(2)?.expect("author");
        assert_eq!(sara.departments.len(), 1);
        Ok(())
    }

    #[test]
    fn test_reconcile_unknown_institution() -> Result<()> {
        let dir = TempDir::new()?;
        let roster = dir.path().join("faculty.csv");
        let departments = dir.path().join("departments.csv");
        std::fs::write(&roster, "Scopus ID,Departments\n1,CE\n")?;
        std::fs::write(&departments, "Department Abbreviation,Department En,Type\n")?;

        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);
        assert_eq!(reconcile(&mut ctx, &roster, &departments, 1)?, ReconcileSummary::default());
        Ok(())
    }
}
