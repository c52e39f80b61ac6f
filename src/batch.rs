//! File and batch driver for Scopus search exports.
//!
//! Every entry of a file is inspected first. Entries with major issues are
//! skipped and reported; the rest go through the paper assembler. Failures
//! of a single entry never abort the file.

use crate::context::ResolutionContext;
use crate::error::{IngestError, Result};
use crate::model::Paper;
use crate::record::{FieldValue, Record};
use crate::resolve::assemble_paper;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// First-level keys every entry is expected to carry
pub const FIRST_LEVEL_KEYS: &[&str] = &[
    "source-id",
    "prism:publicationName",
    "prism:coverDate",
    "dc:identifier",
    "eid",
    "dc:title",
    "subtype",
    "author-count",
    "openaccess",
    "citedby-count",
    "link",
    "author",
    "affiliation",
];

const AUTHOR_KEYS: &[&str] = &["authid", "@seq", "afid"];
const AFFILIATION_KEYS: &[&str] = &["afid", "affilname"];

/// Issues that are safely defaulted during assembly
const MINOR_ISSUES: &[&str] = &[
    "eid",
    "dc:title",
    "subtype",
    "author-count",
    "openaccess",
    "citedby-count",
    "source-id",
    "prism:publicationName",
    "author:afid",
];

/// A problem found while inspecting an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// A first-level key is absent
    MissingKey(&'static str),
    /// No link is tagged `scopus`
    MissingPaperUrl,
    /// An author entry lacks a key
    Author(&'static str),
    /// An affiliation entry lacks a key
    Affiliation(&'static str),
    /// `author-count` carries no value
    EmptyAuthorCount,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey(key) => write!(f, "{key}"),
            Self::MissingPaperUrl => write!(f, "paper url"),
            Self::Author(key) => write!(f, "author:{key}"),
            Self::Affiliation(key) => write!(f, "affiliation:{key}"),
            Self::EmptyAuthorCount => write!(f, "author-count"),
        }
    }
}

impl Serialize for Issue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Issue {
    pub fn is_minor(&self) -> bool {
        MINOR_ISSUES.contains(&self.to_string().as_str())
    }
}

/// Inspect an entry for missing keys
pub fn inspect(entry: &Record) -> Vec<Issue> {
    let mut issues: Vec<Issue> = FIRST_LEVEL_KEYS
        .iter()
        .filter(|key| !entry.has(key))
        .map(|key| Issue::MissingKey(*key))
        .collect();

    if entry.has("link")
        && entry
            .records("link")
            .iter()
            .all(|link| link.field("@ref") != Some("scopus"))
    {
        issues.push(Issue::MissingPaperUrl);
    }

    for author in entry.records("author") {
        for key in AUTHOR_KEYS {
            if !author.has(key) {
                issues.push(Issue::Author(*key));
            }
        }
    }
    for affiliation in entry.records("affiliation") {
        for key in AFFILIATION_KEYS {
            if !affiliation.has(key) {
                issues.push(Issue::Affiliation(*key));
            }
        }
    }

    if entry.has("author-count") {
        let has_count = matches!(entry.get("author-count"), Some(FieldValue::Wrapped(n)) if !n.is_empty());
        if !has_count {
            issues.push(Issue::EmptyAuthorCount);
        }
    }

    issues
}

/// Rebuild a missing `dc:identifier` from `eid` (`2-s2.0-{id}`)
pub fn repair_identifier(entry: Record) -> Option<Record> {
    let id_scp: u64 = entry
        .field("eid")?
        .trim()
        .strip_prefix("2-s2.0-")?
        .parse()
        .ok()?;
    Some(entry.with_field(
        "dc:identifier",
        FieldValue::Scalar(format!("SCOPUS_ID:{id_scp}")),
    ))
}

/// How often staged entities are written to the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commit after every assembled paper
    PerRecord,
    /// Commit once per file; a failing record rolls back to a savepoint
    #[default]
    PerFile,
}

/// One skipped or failed entry
#[derive(Debug, Clone, Serialize)]
pub struct BadPaper {
    #[serde(rename = "#")]
    pub index: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_scp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl BadPaper {
    fn new(index: usize) -> Self {
        Self {
            index,
            issues: Vec::new(),
            id_scp: None,
            error_type: None,
            error_msg: None,
        }
    }
}

/// Problems found in one file
#[derive(Debug, Clone, Serialize)]
pub struct ProblemReport {
    pub file: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub papers: Vec<BadPaper>,
    /// Set when the whole file failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn record_failure(bad_papers: &mut Vec<BadPaper>, index: usize, id_scp: Option<&str>, e: &IngestError) {
    if bad_papers.last().map(|b| b.index) != Some(index) {
        let mut bad = BadPaper::new(index);
        bad.id_scp = id_scp.map(str::to_string);
        bad_papers.push(bad);
    }
    if let Some(bad) = bad_papers.last_mut() {
        bad.error_type = Some(e.kind().to_string());
        bad.error_msg = Some(e.to_string());
    }
}

/// Read the `search-results.entry` list of an export file
fn read_entries(path: &Path) -> Result<Vec<serde_json::Value>> {
    let content = std::fs::read_to_string(path)?;
    let mut data: serde_json::Value = serde_json::from_str(&content)?;
    match data.pointer_mut("/search-results/entry").map(serde_json::Value::take) {
        Some(serde_json::Value::Array(entries)) => Ok(entries),
        _ => Err(IngestError::MissingField("search-results.entry".to_string())),
    }
}

/// Process one export file.
///
/// Returns the problem report (if anything was skipped or failed) and the
/// assembled papers. With [`CommitPolicy::PerFile`] the staged entities are
/// committed once at the end.
pub fn process_file(
    ctx: &mut ResolutionContext<'_>,
    path: &Path,
    retrieval_time: NaiveDateTime,
    policy: CommitPolicy,
) -> Result<(Option<ProblemReport>, Vec<Paper>)> {
    let entries = read_entries(path)?;
    let mut papers = Vec::new();
    let mut bad_papers: Vec<BadPaper> = Vec::new();

    for (index, raw) in entries.into_iter().enumerate() {
        let mut entry = match Record::from_json(raw) {
            Ok(entry) => entry,
            Err(e) => {
                record_failure(&mut bad_papers, index, None, &e);
                continue;
            }
        };

        let mut issues = inspect(&entry);
        if !issues.is_empty() {
            let mut bad = BadPaper::new(index);
            bad.issues = issues.clone();

            if issues.contains(&Issue::MissingKey("dc:identifier")) {
                if issues.contains(&Issue::MissingKey("eid")) {
                    bad_papers.push(bad);
                    continue;
                }
                match repair_identifier(entry) {
                    Some(repaired) => entry = repaired,
                    None => {
                        bad_papers.push(bad);
                        continue;
                    }
                }
                issues.retain(|i| *i != Issue::MissingKey("dc:identifier"));
            }

            bad.id_scp = entry.text("dc:identifier");
            bad_papers.push(bad);

            issues.retain(|i| !i.is_minor());
            if !issues.is_empty() {
                debug!(index, issues = ?issues, "Entry skipped");
                continue;
            }
        }

        let identifier = entry.text("dc:identifier");
        let savepoint = (policy == CommitPolicy::PerFile).then(|| ctx.savepoint());

        let result = assemble_paper(ctx, &entry, retrieval_time).and_then(|paper| {
            if policy == CommitPolicy::PerRecord {
                ctx.commit()?;
            }
            Ok(paper)
        });

        match result {
            Ok(paper) => papers.push(paper),
            Err(e) => {
                error!(
                    id_scp = identifier.as_deref().unwrap_or("unknown"),
                    error_type = e.kind(),
                    error = %e,
                    "Failed to assemble paper"
                );
                match savepoint {
                    Some(savepoint) => ctx.restore(savepoint),
                    None => ctx.discard(),
                }
                record_failure(&mut bad_papers, index, identifier.as_deref(), &e);
            }
        }
    }

    if policy == CommitPolicy::PerFile {
        ctx.commit()?;
    }

    let report = (!bad_papers.is_empty()).then(|| ProblemReport {
        file: path.display().to_string(),
        papers: bad_papers,
        error: None,
    });
    Ok((report, papers))
}

/// Parse the retrieval time from the trailing `_{unix_timestamp}` of a file
/// name such as `Tehran_0_1572500000.json`
pub fn retrieval_time_from_path(path: &Path) -> Result<NaiveDateTime> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| IngestError::Parse(format!("invalid file name: {}", path.display())))?;
    let timestamp: i64 = stem
        .rsplit('_')
        .next()
        .and_then(|ts| ts.parse().ok())
        .ok_or_else(|| IngestError::Parse(format!("no timestamp in file name: {stem}")))?;
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| IngestError::Parse(format!("timestamp out of range: {timestamp}")))
}

/// Export files of a directory, sorted by name
pub fn export_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "json" || e == "txt")
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Outcome of a directory run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub files: usize,
    pub papers: usize,
    pub problems: usize,
    pub failed_files: usize,
    pub report: Option<PathBuf>,
}

/// Write problem reports to `bad_papers_{dataset}_{unix_ts}.json`
pub fn write_problem_reports(
    reports: &[ProblemReport],
    log_dir: &Path,
    dataset: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(format!("bad_papers_{}_{}.json", dataset, Utc::now().timestamp()));
    let content = serde_json::to_string_pretty(reports)?;
    std::fs::write(&path, content)?;
    info!("Saved problem report to {:?}", path);
    Ok(path)
}

/// Process every export file of `dir`
pub fn process_directory(
    ctx: &mut ResolutionContext<'_>,
    dir: &Path,
    dataset: &str,
    log_dir: &Path,
    policy: CommitPolicy,
) -> Result<BatchSummary> {
    let files = export_files(dir)?;
    info!(dataset, files = files.len(), "Processing export directory {:?}", dir);

    let mut summary = BatchSummary::default();
    let mut reports = Vec::new();

    for file in &files {
        summary.files += 1;
        let outcome = retrieval_time_from_path(file)
            .and_then(|retrieval_time| process_file(ctx, file, retrieval_time, policy));

        match outcome {
            Ok((report, papers)) => {
                debug!(file = %file.display(), papers = papers.len(), "File processed");
                summary.papers += papers.len();
                if let Some(report) = report {
                    summary.problems += report.papers.len();
                    reports.push(report);
                }
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "File failed");
                ctx.discard();
                summary.failed_files += 1;
                reports.push(ProblemReport {
                    file: file.display().to_string(),
                    papers: Vec::new(),
                    error: Some(e.to_string()),
                });
            }
        }
    }

    ctx.flush()?;
    if !reports.is_empty() {
        summary.report = Some(write_problem_reports(&reports, log_dir, dataset)?);
    }

    info!(
        dataset,
        files = summary.files,
        papers = summary.papers,
        problems = summary.problems,
        "Export directory done"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::paper::parse_scopus_id;
    use crate::store::{MemoryStore, SqliteStore, Store};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn entry(id: u64) -> Value {
        json!({
            "source-id": "21100",
            "prism:publicationName": "Scientometrics",
            "prism:coverDate": "2019-06-01",
            "dc:identifier": format!("SCOPUS_ID:{id}"),
            "eid": format!("2-s2.0-{id}"),
            "dc:title": format!("Paper {id}"),
            "subtype": "ar",
            "author-count": {"@limit": "100", "$": "1"},
            "openaccess": "0",
            "citedby-count": "0",
            "link": [{"@ref": "scopus", "@href": "https://www.scopus.com/x"}],
            "author": [{"@seq": "1", "authid": "57001", "afid": [{"$": "60001"}]}],
            "affiliation": [{"afid": "60001", "affilname": "University of Tehran"}]
        })
    }

    fn without(mut value: Value, key: &str) -> Value {
        if let Some(map) = value.as_object_mut() {
            map.remove(key);
        }
        value
    }

    fn write_export(dir: &Path, name: &str, entries: Vec<Value>) -> Result<PathBuf> {
        let path = dir.join(name);
        let data = json!({"search-results": {"entry": entries}});
        std::fs::write(&path, serde_json::to_string(&data)?)?;
        Ok(path)
    }

    #[test]
    fn test_inspect_complete_entry() -> Result<()> {
        let record = Record::from_json(entry(1))?;
        assert!(inspect(&record).is_empty());
        Ok(())
    }

    #[test]
    fn test_inspect_reports_nested_issues() -> Result<()> {
        let mut value = entry(1);
        value["link"] = json!([{"@ref": "self", "@href": "x"}]);
        value["author"] = json!([{"authid": "1"}]);
        value["affiliation"] = json!([{"afid": "60001"}]);
        value["author-count"] = json!({"@limit": "100", "$": ""});
        let issues: Vec<String> = inspect(&Record::from_json(value)?)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            issues,
            vec![
                "paper url",
                "author:@seq",
                "author:afid",
                "affiliation:affilname",
                "author-count"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_issue_classification() {
        assert!(Issue::MissingKey("openaccess").is_minor());
        assert!(Issue::Author("afid").is_minor());
        assert!(Issue::EmptyAuthorCount.is_minor());
        assert!(!Issue::MissingKey("author").is_minor());
        assert!(!Issue::MissingPaperUrl.is_minor());
        assert!(!Issue::Affiliation("affilname").is_minor());
    }

    #[test]
    fn test_repair_identifier() -> Result<()> {
        let record = Record::from_json(json!({"eid": "2-s2.0-85070000001"}))?;
        let repaired = repair_identifier(record).expect("repairable");
        assert_eq!(repaired.field("dc:identifier"), Some("SCOPUS_ID:85070000001"));
        assert_eq!(parse_scopus_id(repaired.field("dc:identifier").unwrap_or(""))?, 85070000001);

        let broken = Record::from_json(json!({"eid": "garbage"}))?;
        assert!(repair_identifier(broken).is_none());
        Ok(())
    }

    #[test]
    fn test_retrieval_time_from_path() -> Result<()> {
        let time = retrieval_time_from_path(Path::new("data/Tehran_3_1572500000.json"))?;
        assert_eq!(time.to_string(), "2019-10-31 05:33:20");
        assert!(retrieval_time_from_path(Path::new("data/Tehran.json")).is_err());
        Ok(())
    }

    #[test]
    fn test_process_file_skips_and_reports() -> Result<()> {
        let dir = TempDir::new()?;
        let repaired = without(entry(2), "dc:identifier");
        let major = without(entry(3), "affiliation");
        let minor = without(entry(4), "openaccess");

        let path = write_export(
            dir.path(),
            "Tehran_0_1572500000.json",
            vec![entry(1), repaired, major, minor, json!("not an object")],
        )?;

        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);
        let retrieval_time = retrieval_time_from_path(&path)?;
        let (report, papers) = process_file(&mut ctx, &path, retrieval_time, CommitPolicy::PerFile)?;

        let ids: Vec<u64> = papers.iter().map(|p| p.id_scp).collect();
        assert_eq!(ids, vec![1, 2, 4]);
        let report = report.expect("report");
        let indexes: Vec<usize> = report.papers.iter().map(|b| b.index).collect();
        assert_eq!(indexes, vec![1, 2, 3, 4]);
        assert_eq!(report.papers[1].id_scp.as_deref(), Some("SCOPUS_ID:3"));
        assert_eq!(report.papers[3].error_type.as_deref(), Some("Parse"));
        assert!(ctx.staged().is_empty());
        assert_eq!(ctx.counts()?.papers, 3);
        Ok(())
    }

    #[test]
    fn test_per_record_commit_isolates_failures() -> Result<()> {
        let dir = TempDir::new()?;
        // the third entry carries an unparsable identifier
        let mut bad = entry(3);
        bad["dc:identifier"] = json!("SCOPUS_ID:abc");
        let path = write_export(dir.path(), "X_0_1572500000.json", vec![entry(1), entry(2), bad])?;

        let mut store = MemoryStore::new();
        {
            let mut ctx = ResolutionContext::new(&mut store);
            let (report, papers) =
                process_file(&mut ctx, &path, retrieval_time_from_path(&path)?, CommitPolicy::PerRecord)?;
            assert_eq!(papers.len(), 2);
            let report = report.expect("report");
            assert_eq!(report.papers.len(), 1);
            assert_eq!(report.papers[0].error_type.as_deref(), Some("Parse"));
        }
        assert_eq!(store.counts()?.papers, 2);
        Ok(())
    }

    #[test]
    fn test_process_directory_writes_report() -> Result<()> {
        let data = TempDir::new()?;
        let logs = TempDir::new()?;
        let broken = without(entry(5), "author");
        write_export(data.path(), "Tehran_0_1572500000.json", vec![entry(1), broken])?;
        write_export(data.path(), "Tehran_1_1572500001.txt", vec![entry(2)])?;
        std::fs::write(data.path().join("Tehran_2_1572500002.json"), "{not json")?;
        std::fs::write(data.path().join("notes.md"), "ignored")?;

        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);
        let summary =
            process_directory(&mut ctx, data.path(), "Tehran", logs.path(), CommitPolicy::PerFile)?;

        assert_eq!(summary.files, 3);
        assert_eq!(summary.papers, 2);
        assert_eq!(summary.problems, 1);
        assert_eq!(summary.failed_files, 1);
        let report = summary.report.expect("report path");
        let name = report.file_name().and_then(|n| n.to_str()).unwrap_or("");
        assert!(name.starts_with("bad_papers_Tehran_"));

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&report)?)?;
        assert_eq!(written.as_array().map(Vec::len), Some(2));
        assert_eq!(ctx.counts()?.papers, 2);
        Ok(())
    }

    #[test]
    fn test_sqlite_reprocessing_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        let mut first = entry(1);
        first["prism:doi"] = json!("10.1/x");
        first["authkeywords"] = json!("Étude | Graphs");
        let mut collision = entry(2);
        collision["prism:doi"] = json!("10.1/x");
        let path = write_export(dir.path(), "Tehran_0_1572500000.json", vec![first, collision])?;

        let mut second = entry(3);
        second["authkeywords"] = json!("étude | GRAPHS");
        let later = write_export(dir.path(), "Tehran_1_1572500001.json", vec![second])?;

        let mut store = SqliteStore::open_in_memory()?;
        let counts = {
            let mut ctx = ResolutionContext::new(&mut store);
            for file in [&path, &later] {
                process_file(&mut ctx, file, retrieval_time_from_path(file)?, CommitPolicy::PerFile)?;
            }
            let counts = ctx.counts()?;
            process_file(&mut ctx, &path, retrieval_time_from_path(&path)?, CommitPolicy::PerFile)?;
            assert_eq!(ctx.counts()?, counts);
            counts
        };

        assert_eq!(counts.papers, 3);
        assert_eq!(counts.keywords, 2);
        assert_eq!(counts.authors, 1);
        assert_eq!(counts.institutions, 1);
        assert_eq!(counts.departments, 1);

        let kept = store.paper(1)?.expect("paper 1");
        assert_eq!(kept.doi.as_deref(), Some("10.1/x"));
        assert_eq!(kept.keywords, vec!["Étude".to_string(), "Graphs".to_string()]);
        assert_eq!(kept.authors.len(), 1);
        assert_eq!(store.paper(2)?.and_then(|p| p.doi), None);
        assert_eq!(store.paper(3)?.map(|p| p.keywords.len()), Some(2));
        assert_eq!(store.keyword("ÉTUDE")?.map(|k| k.keyword), Some("Étude".to_string()));
        assert_eq!(store.institution_authors(60001)?.len(), 1);
        Ok(())
    }
}
