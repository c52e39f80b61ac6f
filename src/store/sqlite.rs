//! SQLite-backed relational store.
//!
//! Every entity table is keyed by its natural key; association tables carry
//! the many-to-many links. Writes of one change set run in a single
//! transaction.

use super::{ChangeSet, Store, StoreCounts};
use crate::error::{IngestError, Result};
use crate::model::{
    keyword_key, Author, AuthorProfile, Country, Department, DepartmentRef, Fund, FundKey, Institution,
    Keyword, Paper, PaperAuthor, Source, SourceMetric, Subject,
};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction};
use std::path::Path;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS country (
    name TEXT PRIMARY KEY,
    domain TEXT NOT NULL,
    region TEXT NOT NULL,
    sub_region TEXT
);
CREATE TABLE IF NOT EXISTS subject (
    asjc INTEGER PRIMARY KEY,
    top TEXT NOT NULL,
    middle TEXT NOT NULL,
    low TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS source (
    id_scp INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    type TEXT,
    issn TEXT,
    e_issn TEXT,
    isbn TEXT,
    publisher TEXT,
    country TEXT
);
CREATE INDEX IF NOT EXISTS source_publisher ON source (publisher);
CREATE TABLE IF NOT EXISTS source_subject (
    source_id INTEGER NOT NULL,
    asjc INTEGER NOT NULL,
    PRIMARY KEY (source_id, asjc)
);
CREATE TABLE IF NOT EXISTS source_metric (
    source_id INTEGER NOT NULL,
    type TEXT NOT NULL,
    year INTEGER NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (source_id, type, year)
);
CREATE TABLE IF NOT EXISTS fund (
    id_scp TEXT NOT NULL,
    agency TEXT NOT NULL,
    agency_acronym TEXT,
    PRIMARY KEY (id_scp, agency)
);
CREATE TABLE IF NOT EXISTS keyword (
    key TEXT PRIMARY KEY,
    keyword TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS institution (
    id_scp INTEGER PRIMARY KEY,
    id_frontend TEXT NOT NULL,
    name TEXT NOT NULL,
    city TEXT,
    country TEXT
);
CREATE TABLE IF NOT EXISTS department (
    institution_id INTEGER NOT NULL,
    id INTEGER NOT NULL,
    id_frontend TEXT NOT NULL,
    name TEXT NOT NULL,
    abbreviation TEXT,
    type TEXT,
    PRIMARY KEY (institution_id, id)
);
CREATE TABLE IF NOT EXISTS author (
    id_scp INTEGER PRIMARY KEY,
    id_gsc TEXT UNIQUE,
    id_institution TEXT,
    id_frontend TEXT NOT NULL,
    first TEXT,
    middle TEXT,
    last TEXT,
    initials TEXT,
    first_pref TEXT,
    middle_pref TEXT,
    last_pref TEXT,
    initials_pref TEXT,
    first_fa TEXT,
    last_fa TEXT,
    sex TEXT,
    type TEXT,
    rank TEXT,
    h_index_gsc INTEGER,
    i10_index_gsc INTEGER,
    retrieval_time_gsc TEXT
);
CREATE TABLE IF NOT EXISTS author_profile (
    author_id INTEGER NOT NULL,
    address TEXT NOT NULL,
    type TEXT NOT NULL,
    PRIMARY KEY (author_id, address)
);
CREATE TABLE IF NOT EXISTS author_department (
    author_id INTEGER NOT NULL,
    institution_id INTEGER NOT NULL,
    department_id INTEGER NOT NULL,
    PRIMARY KEY (author_id, institution_id, department_id)
);
CREATE INDEX IF NOT EXISTS author_department_institution
    ON author_department (institution_id);
CREATE TABLE IF NOT EXISTS paper (
    id_scp INTEGER PRIMARY KEY,
    eid TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    type TEXT NOT NULL,
    type_description TEXT NOT NULL,
    abstract TEXT,
    total_author INTEGER NOT NULL,
    open_access INTEGER NOT NULL,
    cited_cnt INTEGER,
    url TEXT,
    article_no TEXT,
    doi TEXT UNIQUE,
    volume TEXT,
    issue TEXT,
    date TEXT,
    page_range TEXT,
    retrieval_time TEXT NOT NULL,
    source_id INTEGER,
    fund_id_scp TEXT,
    fund_agency TEXT
);
CREATE TABLE IF NOT EXISTS paper_keyword (
    paper_id INTEGER NOT NULL,
    keyword_key TEXT NOT NULL,
    keyword TEXT NOT NULL,
    PRIMARY KEY (paper_id, keyword_key)
);
CREATE TABLE IF NOT EXISTS paper_author (
    paper_id INTEGER NOT NULL,
    author_id INTEGER NOT NULL,
    author_no INTEGER NOT NULL,
    PRIMARY KEY (paper_id, author_id)
);
";

/// Build an `INSERT .. ON CONFLICT DO UPDATE` statement. Conflicting rows
/// are updated in place, so a clash on a secondary unique column such as
/// `paper.doi` still fails.
fn upsert_sql(table: &str, columns: &[&str], key: &[&str]) -> String {
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .iter()
        .filter(|c| !key.contains(c))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders}) ON CONFLICT ({}) {action}",
        columns.join(", "),
        key.join(", ")
    )
}

fn sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| IngestError::Parse(format!("id {id} exceeds the SQLite integer range")))
}

/// Read an id column written by [`sql_id`]
fn row_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn parse_date(idx: usize, value: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(&s, DATE_FORMAT)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        })
        .transpose()
}

fn parse_datetime(idx: usize, value: Option<String>) -> rusqlite::Result<Option<NaiveDateTime>> {
    value
        .map(|s| {
            NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        })
        .transpose()
}

fn format_datetime(value: &NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

/// Store persisting to a SQLite database file
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (and create if needed) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        info!("Opened SQLite store at {:?}", path.as_ref());
        Self::with_connection(conn)
    }

    /// Transient database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn load_source(&self, id_scp: u64) -> Result<Option<Source>> {
        let source = self
            .conn
            .query_row(
                "SELECT id_scp, title, type, issn, e_issn, isbn, publisher, country
                 FROM source WHERE id_scp = ?1",
                params![sql_id(id_scp)?],
                |row| {
                    Ok(Source {
                        id_scp: row_id(row, 0)?,
                        title: row.get(1)?,
                        kind: row.get(2)?,
                        issn: row.get(3)?,
                        e_issn: row.get(4)?,
                        isbn: row.get(5)?,
                        publisher: row.get(6)?,
                        country: row.get(7)?,
                        subjects: Vec::new(),
                        metrics: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut source) = source else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT asjc FROM source_subject WHERE source_id = ?1 ORDER BY rowid")?;
        source.subjects = stmt
            .query_map(params![sql_id(id_scp)?], |row| row.get::<_, u32>(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT type, value, year FROM source_metric WHERE source_id = ?1 ORDER BY rowid",
        )?;
        source.metrics = stmt
            .query_map(params![sql_id(id_scp)?], |row| {
                Ok(SourceMetric {
                    kind: row.get(0)?,
                    value: row.get(1)?,
                    year: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(Some(source))
    }

    fn load_institution(&self, id_scp: u64) -> Result<Option<Institution>> {
        let institution = self
            .conn
            .query_row(
                "SELECT id_scp, id_frontend, name, city, country FROM institution WHERE id_scp = ?1",
                params![sql_id(id_scp)?],
                |row| {
                    Ok(Institution {
                        id_scp: row_id(row, 0)?,
                        id_frontend: row.get(1)?,
                        name: row.get(2)?,
                        city: row.get(3)?,
                        country: row.get(4)?,
                        departments: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut institution) = institution else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT id, id_frontend, name, abbreviation, type
             FROM department WHERE institution_id = ?1 ORDER BY id",
        )?;
        institution.departments = stmt
            .query_map(params![sql_id(id_scp)?], |row| {
                Ok(Department {
                    id: row.get(0)?,
                    id_frontend: row.get(1)?,
                    name: row.get(2)?,
                    abbreviation: row.get(3)?,
                    kind: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(Some(institution))
    }

    fn author_from_row(row: &Row<'_>) -> rusqlite::Result<Author> {
        Ok(Author {
            id_scp: row_id(row, 0)?,
            id_gsc: row.get(1)?,
            id_institution: row.get(2)?,
            id_frontend: row.get(3)?,
            first: row.get(4)?,
            middle: row.get(5)?,
            last: row.get(6)?,
            initials: row.get(7)?,
            first_pref: row.get(8)?,
            middle_pref: row.get(9)?,
            last_pref: row.get(10)?,
            initials_pref: row.get(11)?,
            first_fa: row.get(12)?,
            last_fa: row.get(13)?,
            sex: row.get(14)?,
            kind: row.get(15)?,
            rank: row.get(16)?,
            h_index_gsc: row.get(17)?,
            i10_index_gsc: row.get(18)?,
            retrieval_time_gsc: parse_datetime(19, row.get(19)?)?,
            profiles: Vec::new(),
            departments: Vec::new(),
        })
    }

    fn load_author(&self, id_scp: u64) -> Result<Option<Author>> {
        let author = self
            .conn
            .query_row(
                "SELECT id_scp, id_gsc, id_institution, id_frontend, first, middle, last,
                        initials, first_pref, middle_pref, last_pref, initials_pref,
                        first_fa, last_fa, sex, type, rank, h_index_gsc, i10_index_gsc,
                        retrieval_time_gsc
                 FROM author WHERE id_scp = ?1",
                params![sql_id(id_scp)?],
                Self::author_from_row,
            )
            .optional()?;

        let Some(mut author) = author else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT address, type FROM author_profile WHERE author_id = ?1 ORDER BY rowid",
        )?;
        author.profiles = stmt
            .query_map(params![sql_id(id_scp)?], |row| {
                Ok(AuthorProfile {
                    address: row.get(0)?,
                    kind: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT institution_id, department_id FROM author_department
             WHERE author_id = ?1 ORDER BY rowid",
        )?;
        author.departments = stmt
            .query_map(params![sql_id(id_scp)?], |row| {
                Ok(DepartmentRef {
                    institution: row_id(row, 0)?,
                    department: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(Some(author))
    }

    fn paper_from_row(row: &Row<'_>) -> rusqlite::Result<Paper> {
        let fund_id: Option<String> = row.get(18)?;
        let fund_agency: Option<String> = row.get(19)?;
        let retrieval_time = parse_datetime(16, row.get(16)?)?.ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(16, Type::Null, "retrieval_time".into())
        })?;

        Ok(Paper {
            id_scp: row_id(row, 0)?,
            eid: row.get(1)?,
            title: row.get(2)?,
            kind: row.get(3)?,
            type_description: row.get(4)?,
            abstract_text: row.get(5)?,
            total_author: row.get(6)?,
            open_access: row.get(7)?,
            cited_cnt: row.get(8)?,
            url: row.get(9)?,
            article_no: row.get(10)?,
            doi: row.get(11)?,
            volume: row.get(12)?,
            issue: row.get(13)?,
            date: parse_date(14, row.get(14)?)?,
            page_range: row.get(15)?,
            retrieval_time,
            source: row
                .get::<_, Option<i64>>(17)?
                .map(u64::try_from)
                .transpose()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(17, Type::Integer, Box::new(e)))?,
            fund: fund_id
                .zip(fund_agency)
                .map(|(id_scp, agency)| FundKey { id_scp, agency }),
            keywords: Vec::new(),
            authors: Vec::new(),
        })
    }

    fn load_paper(&self, column: &str, value: &dyn rusqlite::ToSql) -> Result<Option<Paper>> {
        let sql = format!(
            "SELECT id_scp, eid, title, type, type_description, abstract, total_author,
                    open_access, cited_cnt, url, article_no, doi, volume, issue, date,
                    page_range, retrieval_time, source_id, fund_id_scp, fund_agency
             FROM paper WHERE {column} = ?1"
        );
        let paper = self
            .conn
            .query_row(&sql, params![value], Self::paper_from_row)
            .optional()?;

        let Some(mut paper) = paper else {
            return Ok(None);
        };
        let id = sql_id(paper.id_scp)?;

        let mut stmt = self
            .conn
            .prepare("SELECT keyword FROM paper_keyword WHERE paper_id = ?1 ORDER BY rowid")?;
        paper.keywords = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT author_no, author_id FROM paper_author WHERE paper_id = ?1 ORDER BY rowid",
        )?;
        paper.authors = stmt
            .query_map(params![id], |row| {
                Ok(PaperAuthor {
                    author_no: row.get(0)?,
                    author: row_id(row, 1)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(Some(paper))
    }

    fn count(&self, table: &str) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        usize::try_from(n).map_err(|_| IngestError::Parse(format!("negative row count in {table}")))
    }
}

fn write_source(tx: &Transaction<'_>, source: &Source) -> Result<()> {
    let id = sql_id(source.id_scp)?;
    tx.execute(
        &upsert_sql(
            "source",
            &["id_scp", "title", "type", "issn", "e_issn", "isbn", "publisher", "country"],
            &["id_scp"],
        ),
        params![
            id,
            source.title,
            source.kind,
            source.issn,
            source.e_issn,
            source.isbn,
            source.publisher,
            source.country
        ],
    )?;

    tx.execute("DELETE FROM source_subject WHERE source_id = ?1", params![id])?;
    for asjc in &source.subjects {
        tx.execute(
            "INSERT OR IGNORE INTO source_subject (source_id, asjc) VALUES (?1, ?2)",
            params![id, asjc],
        )?;
    }

    tx.execute("DELETE FROM source_metric WHERE source_id = ?1", params![id])?;
    for metric in &source.metrics {
        tx.execute(
            "INSERT OR IGNORE INTO source_metric (source_id, type, year, value)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, metric.kind, metric.year, metric.value],
        )?;
    }
    Ok(())
}

fn write_institution(tx: &Transaction<'_>, institution: &Institution) -> Result<()> {
    let id = sql_id(institution.id_scp)?;
    tx.execute(
        &upsert_sql(
            "institution",
            &["id_scp", "id_frontend", "name", "city", "country"],
            &["id_scp"],
        ),
        params![
            id,
            institution.id_frontend,
            institution.name,
            institution.city,
            institution.country
        ],
    )?;

    tx.execute("DELETE FROM department WHERE institution_id = ?1", params![id])?;
    for dept in &institution.departments {
        tx.execute(
            "INSERT INTO department (institution_id, id, id_frontend, name, abbreviation, type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, dept.id, dept.id_frontend, dept.name, dept.abbreviation, dept.kind],
        )?;
    }
    Ok(())
}

fn write_author(tx: &Transaction<'_>, author: &Author) -> Result<()> {
    let id = sql_id(author.id_scp)?;
    tx.execute(
        &upsert_sql(
            "author",
            &[
                "id_scp",
                "id_gsc",
                "id_institution",
                "id_frontend",
                "first",
                "middle",
                "last",
                "initials",
                "first_pref",
                "middle_pref",
                "last_pref",
                "initials_pref",
                "first_fa",
                "last_fa",
                "sex",
                "type",
                "rank",
                "h_index_gsc",
                "i10_index_gsc",
                "retrieval_time_gsc",
            ],
            &["id_scp"],
        ),
        params![
            id,
            author.id_gsc,
            author.id_institution,
            author.id_frontend,
            author.first,
            author.middle,
            author.last,
            author.initials,
            author.first_pref,
            author.middle_pref,
            author.last_pref,
            author.initials_pref,
            author.first_fa,
            author.last_fa,
            author.sex,
            author.kind,
            author.rank,
            author.h_index_gsc,
            author.i10_index_gsc,
            author.retrieval_time_gsc.as_ref().map(format_datetime),
        ],
    )?;

    tx.execute("DELETE FROM author_profile WHERE author_id = ?1", params![id])?;
    for profile in &author.profiles {
        tx.execute(
            "INSERT OR IGNORE INTO author_profile (author_id, address, type) VALUES (?1, ?2, ?3)",
            params![id, profile.address, profile.kind],
        )?;
    }

    tx.execute("DELETE FROM author_department WHERE author_id = ?1", params![id])?;
    for dept in &author.departments {
        tx.execute(
            "INSERT OR IGNORE INTO author_department (author_id, institution_id, department_id)
             VALUES (?1, ?2, ?3)",
            params![id, sql_id(dept.institution)?, dept.department],
        )?;
    }
    Ok(())
}

fn write_paper(tx: &Transaction<'_>, paper: &Paper) -> Result<()> {
    let id = sql_id(paper.id_scp)?;
    tx.execute(
        &upsert_sql(
            "paper",
            &[
                "id_scp",
                "eid",
                "title",
                "type",
                "type_description",
                "abstract",
                "total_author",
                "open_access",
                "cited_cnt",
                "url",
                "article_no",
                "doi",
                "volume",
                "issue",
                "date",
                "page_range",
                "retrieval_time",
                "source_id",
                "fund_id_scp",
                "fund_agency",
            ],
            &["id_scp"],
        ),
        params![
            id,
            paper.eid,
            paper.title,
            paper.kind,
            paper.type_description,
            paper.abstract_text,
            paper.total_author,
            paper.open_access,
            paper.cited_cnt,
            paper.url,
            paper.article_no,
            paper.doi,
            paper.volume,
            paper.issue,
            paper.date.map(|d| d.format(DATE_FORMAT).to_string()),
            paper.page_range,
            format_datetime(&paper.retrieval_time),
            paper.source.map(sql_id).transpose()?,
            paper.fund.as_ref().map(|f| f.id_scp.clone()),
            paper.fund.as_ref().map(|f| f.agency.clone()),
        ],
    )?;

    tx.execute("DELETE FROM paper_keyword WHERE paper_id = ?1", params![id])?;
    for keyword in &paper.keywords {
        tx.execute(
            "INSERT OR IGNORE INTO paper_keyword (paper_id, keyword_key, keyword)
             VALUES (?1, ?2, ?3)",
            params![id, keyword_key(keyword), keyword],
        )?;
    }

    tx.execute("DELETE FROM paper_author WHERE paper_id = ?1", params![id])?;
    for author in &paper.authors {
        tx.execute(
            "INSERT OR IGNORE INTO paper_author (paper_id, author_id, author_no)
             VALUES (?1, ?2, ?3)",
            params![id, sql_id(author.author)?, author.author_no],
        )?;
    }
    Ok(())
}

/// Unique-key violations surface as [`IngestError::Constraint`]
fn constraint_error(error: IngestError) -> IngestError {
    match error {
        IngestError::Sqlite(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
            IngestError::Constraint(e.to_string())
        }
        other => other,
    }
}

fn write_changes(tx: &Transaction<'_>, changes: &ChangeSet) -> Result<()> {
    for country in changes.countries.values() {
        tx.execute(
            &upsert_sql("country", &["name", "domain", "region", "sub_region"], &["name"]),
            params![country.name, country.domain, country.region, country.sub_region],
        )?;
    }
    for subject in changes.subjects.values() {
        tx.execute(
            &upsert_sql("subject", &["asjc", "top", "middle", "low"], &["asjc"]),
            params![subject.asjc, subject.top, subject.middle, subject.low],
        )?;
    }
    for source in changes.sources.values() {
        write_source(tx, source)?;
    }
    for fund in changes.funds.values() {
        tx.execute(
            &upsert_sql(
                "fund",
                &["id_scp", "agency", "agency_acronym"],
                &["id_scp", "agency"],
            ),
            params![fund.id_scp, fund.agency, fund.agency_acronym],
        )?;
    }
    // the first stored casing of a keyword is kept
    for keyword in changes.keywords.values() {
        tx.execute(
            "INSERT INTO keyword (key, keyword) VALUES (?1, ?2) ON CONFLICT (key) DO NOTHING",
            params![keyword.key(), keyword.keyword],
        )?;
    }
    for institution in changes.institutions.values() {
        write_institution(tx, institution)?;
    }
    for author in changes.authors.values() {
        write_author(tx, author)?;
    }
    for paper in changes.papers.values() {
        write_paper(tx, paper)?;
    }
    Ok(())
}

impl Store for SqliteStore {
    fn country(&self, name: &str) -> Result<Option<Country>> {
        Ok(self
            .conn
            .query_row(
                "SELECT name, domain, region, sub_region FROM country WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Country {
                        name: row.get(0)?,
                        domain: row.get(1)?,
                        region: row.get(2)?,
                        sub_region: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    fn subject(&self, asjc: u32) -> Result<Option<Subject>> {
        Ok(self
            .conn
            .query_row(
                "SELECT asjc, top, middle, low FROM subject WHERE asjc = ?1",
                params![asjc],
                |row| {
                    Ok(Subject {
                        asjc: row.get(0)?,
                        top: row.get(1)?,
                        middle: row.get(2)?,
                        low: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    fn subjects(&self) -> Result<Vec<Subject>> {
        let mut stmt = self
            .conn
            .prepare("SELECT asjc, top, middle, low FROM subject ORDER BY asjc")?;
        let subjects = stmt
            .query_map([], |row| {
                Ok(Subject {
                    asjc: row.get(0)?,
                    top: row.get(1)?,
                    middle: row.get(2)?,
                    low: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(subjects)
    }

    fn source(&self, id_scp: u64) -> Result<Option<Source>> {
        self.load_source(id_scp)
    }

    fn publisher_country(&self, publisher: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT country FROM source
                 WHERE publisher = ?1 AND country IS NOT NULL LIMIT 1",
                params![publisher],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn fund(&self, key: &FundKey) -> Result<Option<Fund>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id_scp, agency, agency_acronym FROM fund WHERE id_scp = ?1 AND agency = ?2",
                params![key.id_scp, key.agency],
                |row| {
                    Ok(Fund {
                        id_scp: row.get(0)?,
                        agency: row.get(1)?,
                        agency_acronym: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn keyword(&self, keyword: &str) -> Result<Option<Keyword>> {
        Ok(self
            .conn
            .query_row(
                "SELECT keyword FROM keyword WHERE key = ?1",
                params![keyword_key(keyword)],
                |row| Ok(Keyword { keyword: row.get(0)? }),
            )
            .optional()?)
    }

    fn institution(&self, id_scp: u64) -> Result<Option<Institution>> {
        self.load_institution(id_scp)
    }

    fn author(&self, id_scp: u64) -> Result<Option<Author>> {
        self.load_author(id_scp)
    }

    fn institution_authors(&self, institution: u64) -> Result<Vec<Author>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT author_id FROM author_department
             WHERE institution_id = ?1 ORDER BY author_id",
        )?;
        let ids: Vec<u64> = stmt
            .query_map(params![sql_id(institution)?], |row| row_id(row, 0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut authors = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(author) = self.load_author(id)? {
                authors.push(author);
            }
        }
        Ok(authors)
    }

    fn paper(&self, id_scp: u64) -> Result<Option<Paper>> {
        self.load_paper("id_scp", &sql_id(id_scp)?)
    }

    fn paper_by_doi(&self, doi: &str) -> Result<Option<Paper>> {
        self.load_paper("doi", &doi)
    }

    fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            countries: self.count("country")?,
            subjects: self.count("subject")?,
            sources: self.count("source")?,
            funds: self.count("fund")?,
            keywords: self.count("keyword")?,
            institutions: self.count("institution")?,
            departments: self.count("department")?,
            authors: self.count("author")?,
            papers: self.count("paper")?,
        })
    }

    fn apply(&mut self, changes: ChangeSet) -> Result<()> {
        let tx = self.conn.transaction()?;
        write_changes(&tx, &changes).map_err(constraint_error)?;
        tx.commit()?;
        debug!(entities = changes.len(), "Committed change set");
        Ok(())
    }
}
