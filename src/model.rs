//! Entity types of the publication database.
//!
//! Relations are expressed through natural keys (Scopus IDs, ASJC codes,
//! keyword text, fund key pairs), so entities are plain values that can be
//! staged, cloned and persisted without shared ownership.

use chrono::{NaiveDate, NaiveDateTime};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Placeholder for required text columns with no data
pub const NOT_AVAILABLE: &str = "NOT AVAILABLE";

/// Name of the placeholder department every new institution receives
pub const UNDEFINED_DEPARTMENT: &str = "Undefined";

/// Abbreviation of the placeholder department
pub const UNDEFINED_DEPARTMENT_ABBREVIATION: &str = "No Dept.";

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Random URL-safe token used as a public identifier (11 chars, like a
/// base64url-encoded 8-byte value)
pub fn frontend_token() -> String {
    let mut rng = rand::thread_rng();
    (0..11)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub name: String,
    /// ISO 3166-1 alpha-2 code
    pub domain: String,
    pub region: String,
    pub sub_region: Option<String>,
}

/// All Science Journal Classification subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub asjc: u32,
    pub top: String,
    pub middle: String,
    pub low: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetric {
    /// Metric name, e.g. `CiteScore`, `Percentile`, `SJR`
    pub kind: String,
    pub value: f64,
    pub year: i32,
}

/// Journal, book series or conference proceeding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id_scp: u64,
    pub title: String,
    pub kind: Option<String>,
    pub issn: Option<String>,
    pub e_issn: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    /// Country name
    pub country: Option<String>,
    /// ASJC codes
    pub subjects: Vec<u32>,
    pub metrics: Vec<SourceMetric>,
}

impl Source {
    pub fn new(id_scp: u64, title: impl Into<String>) -> Self {
        Self {
            id_scp,
            title: title.into(),
            kind: None,
            issn: None,
            e_issn: None,
            isbn: None,
            publisher: None,
            country: None,
            subjects: Vec::new(),
            metrics: Vec::new(),
        }
    }

    /// Link a subject; returns false if it was already linked
    pub fn add_subject(&mut self, asjc: u32) -> bool {
        if self.subjects.contains(&asjc) {
            return false;
        }
        self.subjects.push(asjc);
        true
    }

    pub fn metric(&self, kind: &str, year: i32) -> Option<&SourceMetric> {
        self.metrics.iter().find(|m| m.kind == kind && m.year == year)
    }
}

/// Natural key of a fund. Missing components hold [`NOT_AVAILABLE`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FundKey {
    pub id_scp: String,
    pub agency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fund {
    pub id_scp: String,
    pub agency: String,
    pub agency_acronym: Option<String>,
}

impl Fund {
    pub fn key(&self) -> FundKey {
        FundKey {
            id_scp: self.id_scp.clone(),
            agency: self.agency.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub keyword: String,
}

impl Keyword {
    /// Keywords are unique regardless of case
    pub fn key(&self) -> String {
        keyword_key(&self.keyword)
    }
}

/// Case-insensitive natural key of a keyword
pub fn keyword_key(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

/// Reference to a department: (institution Scopus ID, local department id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DepartmentRef {
    pub institution: u64,
    pub department: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    /// Local id, unique within the institution
    pub id: u32,
    pub id_frontend: String,
    pub name: String,
    pub abbreviation: Option<String>,
    pub kind: Option<String>,
}

impl Department {
    pub fn is_undefined(&self) -> bool {
        self.name == UNDEFINED_DEPARTMENT
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub id_scp: u64,
    pub id_frontend: String,
    pub name: String,
    pub city: Option<String>,
    /// Country name
    pub country: Option<String>,
    pub departments: Vec<Department>,
}

impl Institution {
    /// A new institution with its placeholder department
    pub fn new(id_scp: u64, name: impl Into<String>) -> Self {
        let mut institution = Self {
            id_scp,
            id_frontend: frontend_token(),
            name: name.into(),
            city: None,
            country: None,
            departments: Vec::new(),
        };
        institution.ensure_undefined_department();
        institution
    }

    pub fn department(&self, id: u32) -> Option<&Department> {
        self.departments.iter().find(|d| d.id == id)
    }

    pub fn undefined_department(&self) -> Option<&Department> {
        self.departments.iter().find(|d| d.is_undefined())
    }

    pub fn department_by_abbreviation(&self, abbreviation: &str) -> Option<&Department> {
        self.departments
            .iter()
            .find(|d| d.abbreviation.as_deref() == Some(abbreviation))
    }

    /// Add a department and return its local id
    pub fn add_department(
        &mut self,
        name: impl Into<String>,
        abbreviation: Option<String>,
        kind: Option<String>,
    ) -> u32 {
        let id = self.departments.iter().map(|d| d.id + 1).max().unwrap_or(1);
        self.departments.push(Department {
            id,
            id_frontend: frontend_token(),
            name: name.into(),
            abbreviation,
            kind,
        });
        id
    }

    /// Return the placeholder department, creating it if missing
    pub fn ensure_undefined_department(&mut self) -> u32 {
        if let Some(d) = self.undefined_department() {
            return d.id;
        }
        self.add_department(
            UNDEFINED_DEPARTMENT,
            Some(UNDEFINED_DEPARTMENT_ABBREVIATION.to_string()),
            None,
        )
    }

    pub fn department_ref(&self, id: u32) -> DepartmentRef {
        DepartmentRef {
            institution: self.id_scp,
            department: id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorProfile {
    /// URL, email address or phone number
    pub address: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Author {
    pub id_scp: u64,
    /// Google Scholar id
    pub id_gsc: Option<String>,
    /// Id in the institution's own directory
    pub id_institution: Option<String>,
    pub id_frontend: String,
    pub first: Option<String>,
    pub middle: Option<String>,
    pub last: Option<String>,
    pub initials: Option<String>,
    pub first_pref: Option<String>,
    pub middle_pref: Option<String>,
    pub last_pref: Option<String>,
    pub initials_pref: Option<String>,
    pub first_fa: Option<String>,
    pub last_fa: Option<String>,
    /// `m` or `f`
    pub sex: Option<String>,
    pub kind: Option<String>,
    pub rank: Option<String>,
    pub h_index_gsc: Option<u32>,
    pub i10_index_gsc: Option<u32>,
    pub retrieval_time_gsc: Option<NaiveDateTime>,
    pub profiles: Vec<AuthorProfile>,
    pub departments: Vec<DepartmentRef>,
}

impl Author {
    /// A new author; preferred names start as the reported ones
    pub fn new(
        id_scp: u64,
        first: Option<String>,
        last: Option<String>,
        initials: Option<String>,
    ) -> Self {
        Self {
            id_scp,
            id_frontend: frontend_token(),
            first_pref: first.clone(),
            last_pref: last.clone(),
            initials_pref: initials.clone(),
            first,
            last,
            initials,
            ..Default::default()
        }
    }

    /// Link a department; returns false if already linked
    pub fn link_department(&mut self, department: DepartmentRef) -> bool {
        if self.departments.contains(&department) {
            return false;
        }
        self.departments.push(department);
        true
    }

    /// Unlink a department; returns false if it was not linked
    pub fn unlink_department(&mut self, department: DepartmentRef) -> bool {
        let before = self.departments.len();
        self.departments.retain(|d| *d != department);
        before != self.departments.len()
    }

    /// Add a profile unless one with the same address exists
    pub fn add_profile(&mut self, address: impl Into<String>, kind: impl Into<String>) -> bool {
        let address = address.into();
        if self.profiles.iter().any(|p| p.address == address) {
            return false;
        }
        self.profiles.push(AuthorProfile {
            address,
            kind: kind.into(),
        });
        true
    }

    pub fn is_affiliated_with(&self, institution: u64) -> bool {
        self.departments.iter().any(|d| d.institution == institution)
    }
}

/// Author position within a paper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperAuthor {
    pub author_no: u32,
    /// Author Scopus ID
    pub author: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id_scp: u64,
    pub eid: String,
    pub title: String,
    pub kind: String,
    pub type_description: String,
    pub abstract_text: Option<String>,
    pub total_author: u32,
    pub open_access: bool,
    pub cited_cnt: Option<u32>,
    pub url: Option<String>,
    pub article_no: Option<String>,
    pub doi: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub date: Option<NaiveDate>,
    pub page_range: Option<String>,
    pub retrieval_time: NaiveDateTime,
    /// Source Scopus ID
    pub source: Option<u64>,
    pub fund: Option<FundKey>,
    /// Keyword texts
    pub keywords: Vec<String>,
    pub authors: Vec<PaperAuthor>,
}

impl Paper {
    pub fn year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.date.map(|d| d.year())
    }
}

impl std::fmt::Display for Paper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const MAX_LEN: usize = 50;
        let doi = self.doi.as_deref().unwrap_or("None");
        if self.title.chars().count() <= MAX_LEN {
            write!(f, "{}: {}; DOI: {}", self.id_scp, self.title, doi)
        } else {
            let short: String = self.title.chars().take(MAX_LEN - 3).collect();
            write!(f, "{}: {}...; DOI: {}", self.id_scp, short, doi)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_institution_has_one_undefined_department() {
        let inst = Institution::new(60001, "University of Tehran");
        assert_eq!(inst.departments.len(), 1);
        let dept = &inst.departments[0];
        assert_eq!(dept.name, UNDEFINED_DEPARTMENT);
        assert_eq!(dept.abbreviation.as_deref(), Some("No Dept."));
    }

    #[test]
    fn test_ensure_undefined_is_idempotent() {
        let mut inst = Institution::new(1, "X");
        let first = inst.ensure_undefined_department();
        let second = inst.ensure_undefined_department();
        assert_eq!(first, second);
        assert_eq!(inst.departments.len(), 1);

        let other = inst.add_department("Physics", Some("PHY".into()), None);
        assert_ne!(other, first);
        assert_eq!(inst.department_by_abbreviation("PHY").map(|d| d.id), Some(other));
    }

    #[test]
    fn test_author_links_are_idempotent() {
        let mut author = Author::new(7, Some("Ali".into()), Some("Rezaei".into()), None);
        let dept = DepartmentRef { institution: 1, department: 1 };
        assert!(author.link_department(dept));
        assert!(!author.link_department(dept));
        assert!(author.is_affiliated_with(1));
        assert!(author.unlink_department(dept));
        assert!(!author.is_affiliated_with(1));

        assert!(author.add_profile("a@b.c", "Email"));
        assert!(!author.add_profile("a@b.c", "Email"));
        assert_eq!(author.first_pref.as_deref(), Some("Ali"));
    }

    #[test]
    fn test_frontend_token_shape() {
        let token = frontend_token();
        assert_eq!(token.len(), 11);
        assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_keyword_key_is_case_insensitive() {
        assert_eq!(keyword_key(" Machine Learning"), keyword_key("machine learning"));
    }
}
