//! Persistence backends.
//!
//! A [`Store`] answers natural-key lookups and applies a [`ChangeSet`]
//! atomically. Two backends exist: [`MemoryStore`] (optionally snapshotted to a
//! JSON file) and [`SqliteStore`] (relational schema).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::model::{Author, Country, Fund, FundKey, Institution, Keyword, Paper, Source, Subject};
use serde::Serialize;
use std::collections::BTreeMap;

/// Entities created or modified within one resolution context, keyed by
/// natural key. Applying a change set upserts every entity it holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub countries: BTreeMap<String, Country>,
    pub subjects: BTreeMap<u32, Subject>,
    pub sources: BTreeMap<u64, Source>,
    pub funds: BTreeMap<FundKey, Fund>,
    /// Keyed by lower-cased keyword
    pub keywords: BTreeMap<String, Keyword>,
    pub institutions: BTreeMap<u64, Institution>,
    pub authors: BTreeMap<u64, Author>,
    pub papers: BTreeMap<u64, Paper>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of staged entities
    pub fn len(&self) -> usize {
        self.countries.len()
            + self.subjects.len()
            + self.sources.len()
            + self.funds.len()
            + self.keywords.len()
            + self.institutions.len()
            + self.authors.len()
            + self.papers.len()
    }
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub countries: usize,
    pub subjects: usize,
    pub sources: usize,
    pub funds: usize,
    pub keywords: usize,
    pub institutions: usize,
    pub departments: usize,
    pub authors: usize,
    pub papers: usize,
}

/// Natural-key lookups plus atomic writes
pub trait Store {
    fn country(&self, name: &str) -> Result<Option<Country>>;

    fn subject(&self, asjc: u32) -> Result<Option<Subject>>;

    fn subjects(&self) -> Result<Vec<Subject>>;

    fn source(&self, id_scp: u64) -> Result<Option<Source>>;

    /// Country of any source from `publisher` that has one
    fn publisher_country(&self, publisher: &str) -> Result<Option<String>>;

    fn fund(&self, key: &FundKey) -> Result<Option<Fund>>;

    /// Case-insensitive keyword lookup
    fn keyword(&self, keyword: &str) -> Result<Option<Keyword>>;

    fn institution(&self, id_scp: u64) -> Result<Option<Institution>>;

    fn author(&self, id_scp: u64) -> Result<Option<Author>>;

    /// Authors linked to any department of the institution
    fn institution_authors(&self, institution: u64) -> Result<Vec<Author>>;

    fn paper(&self, id_scp: u64) -> Result<Option<Paper>>;

    fn paper_by_doi(&self, doi: &str) -> Result<Option<Paper>>;

    fn counts(&self) -> Result<StoreCounts>;

    /// Upsert every entity of the change set, all or nothing
    fn apply(&mut self, changes: ChangeSet) -> Result<()>;

    /// Persist buffered state; a no-op for backends that write through
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
