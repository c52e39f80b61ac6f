//! Batch-scoped unit of work.
//!
//! A [`ResolutionContext`] carries the store handle plus every entity created
//! or modified since the last commit. Resolvers look up staged entities first,
//! then the store, so one multi-author paper never creates the same
//! institution twice.

use crate::error::Result;
use crate::model::{
    keyword_key, Author, Country, Fund, FundKey, Institution, Keyword, Paper, Source, Subject,
};
use crate::store::{ChangeSet, Store, StoreCounts};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Previous content of one staged slot
#[derive(Debug)]
enum Undo {
    Country(String, Option<Country>),
    Subject(u32, Option<Subject>),
    Source(u64, Option<Source>),
    Fund(FundKey, Option<Fund>),
    Keyword(String, Option<Keyword>),
    Institution(u64, Option<Institution>),
    Author(u64, Option<Author>),
    Paper(u64, Option<Paper>),
}

fn revert<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, old: Option<V>) {
    match old {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

/// Position in the undo journal, see [`ResolutionContext::savepoint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

pub struct ResolutionContext<'a> {
    store: &'a mut dyn Store,
    staged: ChangeSet,
    /// ASJC code index, loaded from the store on first use
    subjects: Option<HashMap<u32, Subject>>,
    /// Overwritten staged entries since the first savepoint of this unit of work
    journal: Vec<Undo>,
    recording: bool,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(store: &'a mut dyn Store) -> Self {
        Self {
            store,
            staged: ChangeSet::default(),
            subjects: None,
            journal: Vec::new(),
            recording: false,
        }
    }

    fn record(&mut self, undo: Undo) {
        if self.recording {
            self.journal.push(undo);
        }
    }

    fn reset_journal(&mut self) {
        self.journal.clear();
        self.recording = false;
    }

    /// Entities waiting for the next commit
    pub fn staged(&self) -> &ChangeSet {
        &self.staged
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        self.store.counts()
    }

    // ---- countries ----

    pub fn country(&self, name: &str) -> Result<Option<Country>> {
        match self.staged.countries.get(name) {
            Some(c) => Ok(Some(c.clone())),
            None => self.store.country(name),
        }
    }

    pub fn stage_country(&mut self, country: Country) {
        let key = country.name.clone();
        let old = self.staged.countries.insert(key.clone(), country);
        self.record(Undo::Country(key, old));
    }

    // ---- subjects ----

    pub fn subject(&mut self, asjc: u32) -> Result<Option<Subject>> {
        if let Some(s) = self.staged.subjects.get(&asjc) {
            return Ok(Some(s.clone()));
        }
        Ok(self.subject_index()?.get(&asjc).cloned())
    }

    fn subject_index(&mut self) -> Result<&HashMap<u32, Subject>> {
        if self.subjects.is_none() {
            let subjects = self.store.subjects()?;
            debug!(count = subjects.len(), "Loaded subject index");
            self.subjects = Some(subjects.into_iter().map(|s| (s.asjc, s)).collect());
        }
        Ok(self.subjects.get_or_insert_with(HashMap::new))
    }

    pub fn stage_subject(&mut self, subject: Subject) {
        if let Some(index) = self.subjects.as_mut() {
            index.insert(subject.asjc, subject.clone());
        }
        let asjc = subject.asjc;
        let old = self.staged.subjects.insert(asjc, subject);
        self.record(Undo::Subject(asjc, old));
    }

    // ---- sources ----

    pub fn source(&self, id_scp: u64) -> Result<Option<Source>> {
        match self.staged.sources.get(&id_scp) {
            Some(s) => Ok(Some(s.clone())),
            None => self.store.source(id_scp),
        }
    }

    /// Country of any staged or stored source sharing the publisher
    pub fn publisher_country(&self, publisher: &str) -> Result<Option<String>> {
        let staged = self
            .staged
            .sources
            .values()
            .filter(|s| s.publisher.as_deref() == Some(publisher))
            .find_map(|s| s.country.clone());
        match staged {
            Some(country) => Ok(Some(country)),
            None => self.store.publisher_country(publisher),
        }
    }

    pub fn stage_source(&mut self, source: Source) {
        let id = source.id_scp;
        let old = self.staged.sources.insert(id, source);
        self.record(Undo::Source(id, old));
    }

    // ---- funds ----

    pub fn fund(&self, key: &FundKey) -> Result<Option<Fund>> {
        match self.staged.funds.get(key) {
            Some(f) => Ok(Some(f.clone())),
            None => self.store.fund(key),
        }
    }

    pub fn stage_fund(&mut self, fund: Fund) {
        let key = fund.key();
        let old = self.staged.funds.insert(key.clone(), fund);
        self.record(Undo::Fund(key, old));
    }

    // ---- keywords ----

    pub fn keyword(&self, keyword: &str) -> Result<Option<Keyword>> {
        match self.staged.keywords.get(&keyword_key(keyword)) {
            Some(k) => Ok(Some(k.clone())),
            None => self.store.keyword(keyword),
        }
    }

    pub fn stage_keyword(&mut self, keyword: Keyword) {
        let key = keyword.key();
        let old = self.staged.keywords.insert(key.clone(), keyword);
        self.record(Undo::Keyword(key, old));
    }

    // ---- institutions ----

    pub fn institution(&self, id_scp: u64) -> Result<Option<Institution>> {
        match self.staged.institutions.get(&id_scp) {
            Some(i) => Ok(Some(i.clone())),
            None => self.store.institution(id_scp),
        }
    }

    pub fn stage_institution(&mut self, institution: Institution) {
        let id = institution.id_scp;
        let old = self.staged.institutions.insert(id, institution);
        self.record(Undo::Institution(id, old));
    }

    // ---- authors ----

    pub fn author(&self, id_scp: u64) -> Result<Option<Author>> {
        match self.staged.authors.get(&id_scp) {
            Some(a) => Ok(Some(a.clone())),
            None => self.store.author(id_scp),
        }
    }

    /// Authors affiliated with the institution, staged versions taking
    /// precedence over stored ones
    pub fn institution_authors(&self, institution: u64) -> Result<Vec<Author>> {
        let mut authors: Vec<Author> = self
            .store
            .institution_authors(institution)?
            .into_iter()
            .filter(|a| !self.staged.authors.contains_key(&a.id_scp))
            .collect();
        authors.extend(
            self.staged
                .authors
                .values()
                .filter(|a| a.is_affiliated_with(institution))
                .cloned(),
        );
        authors.sort_by_key(|a| a.id_scp);
        Ok(authors)
    }

    pub fn stage_author(&mut self, author: Author) {
        let id = author.id_scp;
        let old = self.staged.authors.insert(id, author);
        self.record(Undo::Author(id, old));
    }

    // ---- papers ----

    pub fn paper(&self, id_scp: u64) -> Result<Option<Paper>> {
        match self.staged.papers.get(&id_scp) {
            Some(p) => Ok(Some(p.clone())),
            None => self.store.paper(id_scp),
        }
    }

    pub fn paper_by_doi(&self, doi: &str) -> Result<Option<Paper>> {
        if let Some(p) = self
            .staged
            .papers
            .values()
            .find(|p| p.doi.as_deref() == Some(doi))
        {
            return Ok(Some(p.clone()));
        }
        // A stored paper whose staged version dropped the DOI no longer owns it
        Ok(self
            .store
            .paper_by_doi(doi)?
            .filter(|p| !self.staged.papers.contains_key(&p.id_scp)))
    }

    pub fn stage_paper(&mut self, paper: Paper) {
        let id = paper.id_scp;
        let old = self.staged.papers.insert(id, paper);
        self.record(Undo::Paper(id, old));
    }

    // ---- unit of work ----

    /// Apply every staged entity to the store and return how many were
    /// written. The staged set is cleared even when the store rejects it.
    pub fn commit(&mut self) -> Result<usize> {
        self.reset_journal();
        if self.staged.is_empty() {
            return Ok(0);
        }
        let changes = std::mem::take(&mut self.staged);
        let count = changes.len();
        if let Err(e) = self.store.apply(changes) {
            warn!(entities = count, error = %e, "Commit rejected, staged entities dropped");
            // the cached index may hold subjects that never made it
            self.subjects = None;
            return Err(e);
        }
        debug!(entities = count, "Committed");
        Ok(count)
    }

    /// Drop everything staged since the last commit
    pub fn discard(&mut self) {
        if !self.staged.is_empty() {
            debug!(entities = self.staged.len(), "Discarding staged entities");
        }
        self.staged = ChangeSet::default();
        self.subjects = None;
        self.reset_journal();
    }

    /// Mark the current staged state so a single failing record can be
    /// rolled back. Only entries staged after the mark are journaled.
    pub fn savepoint(&mut self) -> Savepoint {
        self.recording = true;
        Savepoint(self.journal.len())
    }

    /// Undo every staging call made since `savepoint`
    pub fn restore(&mut self, savepoint: Savepoint) {
        let staged = &mut self.staged;
        for undo in self.journal.drain(savepoint.0..).rev() {
            match undo {
                Undo::Country(key, old) => revert(&mut staged.countries, key, old),
                Undo::Subject(key, old) => revert(&mut staged.subjects, key, old),
                Undo::Source(key, old) => revert(&mut staged.sources, key, old),
                Undo::Fund(key, old) => revert(&mut staged.funds, key, old),
                Undo::Keyword(key, old) => revert(&mut staged.keywords, key, old),
                Undo::Institution(key, old) => revert(&mut staged.institutions, key, old),
                Undo::Author(key, old) => revert(&mut staged.authors, key, old),
                Undo::Paper(key, old) => revert(&mut staged.papers, key, old),
            }
        }
        self.subjects = None;
    }

    /// Persist buffered store state
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_staged_then_store_lookup() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);

        ctx.stage_institution(Institution::new(60001, "University of Tehran"));
        assert!(ctx.institution(60001)?.is_some());
        assert_eq!(ctx.counts()?.institutions, 0);

        assert_eq!(ctx.commit()?, 1);
        assert!(ctx.staged().is_empty());
        assert!(ctx.institution(60001)?.is_some());
        assert_eq!(ctx.counts()?.institutions, 1);
        Ok(())
    }

    #[test]
    fn test_savepoint_restore() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);

        ctx.stage_keyword(Keyword { keyword: "AI".into() });
        let savepoint = ctx.savepoint();
        ctx.stage_keyword(Keyword { keyword: "ML".into() });
        assert_eq!(ctx.staged().keywords.len(), 2);

        ctx.restore(savepoint);
        assert_eq!(ctx.staged().keywords.len(), 1);
        assert!(ctx.keyword("ml")?.is_none());
        assert!(ctx.keyword("ai")?.is_some());

        ctx.discard();
        assert!(ctx.staged().is_empty());
        Ok(())
    }

    #[test]
    fn test_restore_reverts_overwritten_entries() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);

        ctx.stage_institution(Institution::new(60001, "University of Tehran"));
        let first = ctx.savepoint();
        ctx.stage_institution(Institution::new(60001, "Renamed"));
        ctx.stage_institution(Institution::new(60002, "Sharif University"));
        let second = ctx.savepoint();
        ctx.stage_keyword(Keyword { keyword: "Graphs".into() });

        ctx.restore(second);
        assert!(ctx.keyword("graphs")?.is_none());
        assert_eq!(ctx.institution(60001)?.map(|i| i.name), Some("Renamed".to_string()));

        ctx.restore(first);
        assert_eq!(
            ctx.institution(60001)?.map(|i| i.name),
            Some("University of Tehran".to_string())
        );
        assert!(ctx.institution(60002)?.is_none());
        assert_eq!(ctx.staged().len(), 1);

        ctx.commit()?;
        let after_commit = ctx.savepoint();
        ctx.stage_keyword(Keyword { keyword: "Mining".into() });
        ctx.restore(after_commit);
        assert!(ctx.staged().is_empty());
        assert_eq!(ctx.counts()?.institutions, 1);
        Ok(())
    }

    #[test]
    fn test_subject_index_sees_staged_subjects() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut changes = ChangeSet::default();
        changes.subjects.insert(
            1700,
            Subject { asjc: 1700, top: "Physical Sciences".into(), middle: "Computer Science".into(), low: "All".into() },
        );
        store.apply(changes)?;

        let mut ctx = ResolutionContext::new(&mut store);
        assert!(ctx.subject(1700)?.is_some());
        assert!(ctx.subject(1702)?.is_none());

        ctx.stage_subject(Subject {
            asjc: 1702,
            top: "Physical Sciences".into(),
            middle: "Computer Science".into(),
            low: "Artificial Intelligence".into(),
        });
        assert!(ctx.subject(1702)?.is_some());
        Ok(())
    }

    #[test]
    fn test_publisher_country_prefers_staged() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut ctx = ResolutionContext::new(&mut store);
        let mut source = Source::new(1, "Journal");
        source.publisher = Some("Elsevier".into());
        source.country = Some("Netherlands".into());
        ctx.stage_source(source);

        assert_eq!(ctx.publisher_country("Elsevier")?, Some("Netherlands".to_string()));
        assert_eq!(ctx.publisher_country("Wiley")?, None);
        Ok(())
    }
}
