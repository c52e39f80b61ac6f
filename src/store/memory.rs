//! In-memory store with optional JSON snapshot persistence.

use super::{ChangeSet, Store, StoreCounts};
use crate::error::{IngestError, Result};
use crate::model::{
    keyword_key, Author, Country, Fund, FundKey, Institution, Keyword, Paper, Source, Subject,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// On-disk layout of a snapshot. Maps are flattened to lists because some
/// natural keys are not strings.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    countries: Vec<Country>,
    #[serde(default)]
    subjects: Vec<Subject>,
    #[serde(default)]
    sources: Vec<Source>,
    #[serde(default)]
    funds: Vec<Fund>,
    #[serde(default)]
    keywords: Vec<Keyword>,
    #[serde(default)]
    institutions: Vec<Institution>,
    #[serde(default)]
    authors: Vec<Author>,
    #[serde(default)]
    papers: Vec<Paper>,
}

/// Store keeping every table in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: ChangeSet,
    doi_index: HashMap<String, u64>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an empty store without persistence
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a JSON snapshot.
    ///
    /// A missing file yields an empty store; the file is written on [`Store::flush`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self {
            path: Some(path.clone()),
            ..Default::default()
        };

        if !path.exists() {
            debug!("Snapshot not found, starting empty: {:?}", path);
            return Ok(store);
        }

        let content = std::fs::read_to_string(&path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        store.load(snapshot);
        info!("Loaded snapshot from {:?}", path);
        Ok(store)
    }

    /// Snapshot file path, if persistent
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load(&mut self, snapshot: Snapshot) {
        let t = &mut self.tables;
        t.countries = snapshot.countries.into_iter().map(|c| (c.name.clone(), c)).collect();
        t.subjects = snapshot.subjects.into_iter().map(|s| (s.asjc, s)).collect();
        t.sources = snapshot.sources.into_iter().map(|s| (s.id_scp, s)).collect();
        t.funds = snapshot.funds.into_iter().map(|f| (f.key(), f)).collect();
        t.keywords = snapshot.keywords.into_iter().map(|k| (k.key(), k)).collect();
        t.institutions = snapshot.institutions.into_iter().map(|i| (i.id_scp, i)).collect();
        t.authors = snapshot.authors.into_iter().map(|a| (a.id_scp, a)).collect();
        t.papers = snapshot.papers.into_iter().map(|p| (p.id_scp, p)).collect();
        self.doi_index = t
            .papers
            .values()
            .filter_map(|p| p.doi.clone().map(|doi| (doi, p.id_scp)))
            .collect();
    }

    fn snapshot(&self) -> Snapshot {
        let t = &self.tables;
        Snapshot {
            countries: t.countries.values().cloned().collect(),
            subjects: t.subjects.values().cloned().collect(),
            sources: t.sources.values().cloned().collect(),
            funds: t.funds.values().cloned().collect(),
            keywords: t.keywords.values().cloned().collect(),
            institutions: t.institutions.values().cloned().collect(),
            authors: t.authors.values().cloned().collect(),
            papers: t.papers.values().cloned().collect(),
        }
    }

    /// Reject change sets that would break a unique column
    fn check_constraints(&self, changes: &ChangeSet) -> Result<()> {
        let mut staged_dois: HashMap<&str, u64> = HashMap::new();
        for paper in changes.papers.values() {
            let Some(doi) = paper.doi.as_deref() else {
                continue;
            };
            let owner = staged_dois.insert(doi, paper.id_scp).or_else(|| {
                self.doi_index
                    .get(doi)
                    .copied()
                    .filter(|id| !changes.papers.contains_key(id))
            });
            if let Some(owner) = owner.filter(|id| *id != paper.id_scp) {
                return Err(IngestError::Constraint(format!(
                    "paper {} reuses DOI {} of paper {}",
                    paper.id_scp, doi, owner
                )));
            }
        }

        for author in changes.authors.values() {
            let Some(gsc) = author.id_gsc.as_deref() else {
                continue;
            };
            let clash = self
                .tables
                .authors
                .values()
                .filter(|a| !changes.authors.contains_key(&a.id_scp))
                .chain(changes.authors.values())
                .find(|a| a.id_scp != author.id_scp && a.id_gsc.as_deref() == Some(gsc));
            if let Some(other) = clash {
                return Err(IngestError::Constraint(format!(
                    "author {} reuses Google Scholar id {} of author {}",
                    author.id_scp, gsc, other.id_scp
                )));
            }
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn country(&self, name: &str) -> Result<Option<Country>> {
        Ok(self.tables.countries.get(name).cloned())
    }

    fn subject(&self, asjc: u32) -> Result<Option<Subject>> {
        Ok(self.tables.subjects.get(&asjc).cloned())
    }

    fn subjects(&self) -> Result<Vec<Subject>> {
        Ok(self.tables.subjects.values().cloned().collect())
    }

    fn source(&self, id_scp: u64) -> Result<Option<Source>> {
        Ok(self.tables.sources.get(&id_scp).cloned())
    }

    fn publisher_country(&self, publisher: &str) -> Result<Option<String>> {
        Ok(self
            .tables
            .sources
            .values()
            .filter(|s| s.publisher.as_deref() == Some(publisher))
            .find_map(|s| s.country.clone()))
    }

    fn fund(&self, key: &FundKey) -> Result<Option<Fund>> {
        Ok(self.tables.funds.get(key).cloned())
    }

    fn keyword(&self, keyword: &str) -> Result<Option<Keyword>> {
        Ok(self.tables.keywords.get(&keyword_key(keyword)).cloned())
    }

    fn institution(&self, id_scp: u64) -> Result<Option<Institution>> {
        Ok(self.tables.institutions.get(&id_scp).cloned())
    }

    fn author(&self, id_scp: u64) -> Result<Option<Author>> {
        Ok(self.tables.authors.get(&id_scp).cloned())
    }

    fn institution_authors(&self, institution: u64) -> Result<Vec<Author>> {
        Ok(self
            .tables
            .authors
            .values()
            .filter(|a| a.is_affiliated_with(institution))
            .cloned()
            .collect())
    }

    fn paper(&self, id_scp: u64) -> Result<Option<Paper>> {
        Ok(self.tables.papers.get(&id_scp).cloned())
    }

    fn paper_by_doi(&self, doi: &str) -> Result<Option<Paper>> {
        Ok(self
            .doi_index
            .get(doi)
            .and_then(|id| self.tables.papers.get(id))
            .cloned())
    }

    fn counts(&self) -> Result<StoreCounts> {
        let t = &self.tables;
        Ok(StoreCounts {
            countries: t.countries.len(),
            subjects: t.subjects.len(),
            sources: t.sources.len(),
            funds: t.funds.len(),
            keywords: t.keywords.len(),
            institutions: t.institutions.len(),
            departments: t.institutions.values().map(|i| i.departments.len()).sum(),
            authors: t.authors.len(),
            papers: t.papers.len(),
        })
    }

    fn apply(&mut self, changes: ChangeSet) -> Result<()> {
        self.check_constraints(&changes)?;

        let t = &mut self.tables;
        t.countries.extend(changes.countries);
        t.subjects.extend(changes.subjects);
        t.sources.extend(changes.sources);
        t.funds.extend(changes.funds);
        t.keywords.extend(changes.keywords);
        t.institutions.extend(changes.institutions);
        t.authors.extend(changes.authors);
        for (id, paper) in changes.papers {
            if let Some(old_doi) = t.papers.get(&id).and_then(|p| p.doi.clone()) {
                self.doi_index.remove(&old_doi);
            }
            if let Some(doi) = paper.doi.clone() {
                self.doi_index.insert(doi, id);
            }
            t.papers.insert(id, paper);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, content)?;
        info!("Saved snapshot to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn paper(id: u64, doi: Option<&str>) -> Paper {
        Paper {
            id_scp: id,
            eid: format!("2-s2.0-{id}"),
            title: "T".to_string(),
            kind: "ar".to_string(),
            type_description: "Article".to_string(),
            abstract_text: None,
            total_author: 0,
            open_access: false,
            cited_cnt: None,
            url: None,
            article_no: None,
            doi: doi.map(str::to_string),
            volume: None,
            issue: None,
            date: None,
            page_range: None,
            retrieval_time: NaiveDate::from_ymd_opt(2020, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .expect("valid date"),
            source: None,
            fund: None,
            keywords: Vec::new(),
            authors: Vec::new(),
        }
    }

    #[test]
    fn test_apply_and_lookup() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut changes = ChangeSet::default();
        changes.papers.insert(1, paper(1, Some("10.1/x")));
        changes
            .keywords
            .insert("ai".into(), Keyword { keyword: "AI".into() });
        store.apply(changes)?;

        assert!(store.paper(1)?.is_some());
        assert_eq!(store.paper_by_doi("10.1/x")?.map(|p| p.id_scp), Some(1));
        assert_eq!(store.keyword("ai")?.map(|k| k.keyword), Some("AI".to_string()));
        assert_eq!(store.counts()?.papers, 1);
        Ok(())
    }

    #[test]
    fn test_duplicate_doi_is_rejected() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut first = ChangeSet::default();
        first.papers.insert(1, paper(1, Some("10.1/x")));
        store.apply(first)?;

        let mut second = ChangeSet::default();
        second.papers.insert(2, paper(2, Some("10.1/x")));
        let err = store.apply(second).expect_err("duplicate DOI");
        assert!(matches!(err, IngestError::Constraint(_)));
        assert!(store.paper(2)?.is_none());
        Ok(())
    }

    #[test]
    fn test_snapshot_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("store.json");

        let mut store = MemoryStore::open(&path)?;
        let mut changes = ChangeSet::default();
        changes.papers.insert(5, paper(5, Some("10.5/y")));
        store.apply(changes)?;
        store.flush()?;

        let reopened = MemoryStore::open(&path)?;
        assert_eq!(reopened.paper_by_doi("10.5/y")?.map(|p| p.id_scp), Some(5));
        Ok(())
    }
}
