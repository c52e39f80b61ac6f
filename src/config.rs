//! `config.json` loading.
//!
//! The file is looked up at the path given on the command line, then
//! `./config.json`, then `scopusdb/config.json` in the user config
//! directory. Missing sections fall back to defaults; the Scopus credentials
//! can be overridden with `SCOPUS_API_KEY` and `SCOPUS_INST_TOKEN`.

use crate::batch::CommitPolicy;
use crate::error::{IngestError, Result};
use crate::faculty::{LowTierComparison, DEFAULT_CUTOFF};
use crate::scopus::{SearchQuery, SCOPUS_SEARCH_URL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_FILE: &str = "config.json";

/// Storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Sqlite,
    /// In-memory store snapshotted to a JSON file
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: Backend,
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite,
            path: PathBuf::from("scopus.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopusConfig {
    pub api_key: Option<String>,
    pub inst_token: Option<String>,
    pub base_url: String,
    /// Concurrent page requests
    pub max_workers: usize,
    /// Upper bound on pages fetched per query
    pub max_pages: u32,
}

impl Default for ScopusConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            inst_token: None,
            base_url: SCOPUS_SEARCH_URL.to_string(),
            max_workers: 3,
            max_pages: 200,
        }
    }
}

/// A reference table toggled by `process`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub process: bool,
    pub path: PathBuf,
}

/// A yearly source metrics table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub process: bool,
    pub path: PathBuf,
    pub year: i32,
}

/// An institution: paper export directory, roster files and search terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionConfig {
    pub name: String,
    pub id_scp: u64,
    #[serde(default)]
    pub process: bool,
    /// Faculty roster CSV
    pub faculties: Option<PathBuf>,
    /// Department list CSV
    pub departments: Option<PathBuf>,
    #[serde(default = "default_cutoff")]
    pub fuzzy_match_cutoff: u8,
    pub city: Option<String>,
    pub country: Option<String>,
}

fn default_cutoff() -> u8 {
    DEFAULT_CUTOFF
}

impl InstitutionConfig {
    /// Affiliation search for this institution. City and country must be
    /// configured and non-blank.
    pub fn search_query(&self, start_year: i32, end_year: Option<i32>) -> Result<SearchQuery> {
        let required = |value: &Option<String>, field: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    IngestError::Config(format!("institution {} has no {} configured", self.id_scp, field))
                })
        };
        Ok(SearchQuery {
            institution: self.name.clone(),
            city: required(&self.city, "city")?,
            country: required(&self.country, "country")?,
            start_year,
            end_year,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulateConfig {
    pub data_directory: PathBuf,
    /// Problem reports, relative to the data directory
    pub log_directory: PathBuf,
    pub commit_policy: CommitPolicy,
    pub countries: Option<DatasetConfig>,
    pub subjects: Option<DatasetConfig>,
    pub journals: Option<DatasetConfig>,
    pub conferences: Option<DatasetConfig>,
    pub metrics: Vec<MetricsConfig>,
    /// Directories of Scopus exports, one dataset each
    pub papers: Vec<DatasetConfig>,
    pub institutions: Vec<InstitutionConfig>,
    pub low_tier: LowTierComparison,
}

impl Default for PopulateConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            log_directory: PathBuf::from("logs"),
            commit_policy: CommitPolicy::default(),
            countries: None,
            subjects: None,
            journals: None,
            conferences: None,
            metrics: Vec::new(),
            papers: Vec::new(),
            institutions: Vec::new(),
            low_tier: LowTierComparison::default(),
        }
    }
}

impl PopulateConfig {
    /// Resolve a dataset path against the data directory
    pub fn data_path(&self, relative: &Path) -> PathBuf {
        self.data_directory.join(relative)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_directory.join(&self.log_directory)
    }

    pub fn institution(&self, id_scp: u64) -> Option<&InstitutionConfig> {
        self.institutions.iter().find(|i| i.id_scp == id_scp)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scopus: ScopusConfig,
    pub populate: PopulateConfig,
}

impl Config {
    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| IngestError::Config(format!("{}: {}", path.display(), e)))
    }

    /// First existing config file: `explicit`, `./config.json`, then the
    /// user config directory. An explicit path must exist.
    pub fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(IngestError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }

        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Ok(Some(local));
        }
        Ok(dirs::config_dir()
            .map(|dir| dir.join("scopusdb").join(CONFIG_FILE))
            .filter(|p| p.is_file()))
    }

    /// Load the located config, or defaults when none exists, then apply
    /// environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::locate(explicit)? {
            Some(path) => {
                debug!(path = %path.display(), "Loading config");
                Self::from_file(&path)?
            }
            None => {
                debug!("No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Override credentials from environment-style lookups
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("SCOPUS_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.scopus.api_key = Some(key);
        }
        if let Some(token) = var("SCOPUS_INST_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.scopus.inst_token = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_fill_missing_sections() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "database": {"backend": "memory", "path": "db.json"},
                "populate": {
                    "commit_policy": "per_record",
                    "countries": {"process": true, "path": "countries.csv"},
                    "metrics": [{"process": true, "path": "metrics_2018.csv", "year": 2018}],
                    "papers": [{"process": true, "path": "Tehran"}],
                    "institutions": [{"name": "Tehran", "id_scp": 60001, "process": true,
                                      "faculties": "Tehran.csv", "departments": "Tehran_dept.csv"}],
                    "low_tier": "first_and_last"
                }
            }"#,
        )?;

        let config = Config::from_file(&path)?;
        assert_eq!(config.database.backend, Backend::Memory);
        assert_eq!(config.scopus.base_url, SCOPUS_SEARCH_URL);
        assert_eq!(config.populate.commit_policy, CommitPolicy::PerRecord);
        assert_eq!(config.populate.low_tier, LowTierComparison::FirstAndLast);
        assert_eq!(config.populate.data_path(Path::new("x.csv")), PathBuf::from("data/x.csv"));
        assert_eq!(config.populate.log_path(), PathBuf::from("data/logs"));

        let institution = config.populate.institution(60001).expect("institution");
        assert_eq!(institution.fuzzy_match_cutoff, DEFAULT_CUTOFF);
        assert!(config.populate.subjects.is_none());
        Ok(())
    }

    #[test]
    fn test_invalid_config_is_config_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"database": {"backend": "mysql"}}"#)?;
        assert!(matches!(Config::from_file(&path), Err(IngestError::Config(_))));

        let missing = dir.path().join("absent.json");
        assert!(Config::locate(Some(&missing)).is_err());
        Ok(())
    }

    #[test]
    fn test_search_query_requires_city_and_country() -> Result<()> {
        let mut institution = InstitutionConfig {
            name: "University of Tehran".into(),
            id_scp: 60001,
            process: true,
            faculties: None,
            departments: None,
            fuzzy_match_cutoff: DEFAULT_CUTOFF,
            city: Some("Tehran".into()),
            country: None,
        };
        assert!(matches!(institution.search_query(2010, None), Err(IngestError::Config(_))));

        institution.country = Some("Iran".into());
        institution.city = Some("  ".into());
        assert!(matches!(institution.search_query(2010, None), Err(IngestError::Config(_))));

        institution.city = Some("Tehran".into());
        let query = institution.search_query(2010, Some(2019))?;
        assert!(query.to_query_string().contains("AFFILCITY(tehran) AND AFFILCOUNTRY(iran)"));
        assert_eq!(query.end_year, Some(2019));
        Ok(())
    }

    #[test]
    fn test_env_overrides_credentials() {
        let mut config = Config::default();
        config.scopus.api_key = Some("from-file".into());
        config.apply_env(|name| match name {
            "SCOPUS_API_KEY" => Some("from-env".to_string()),
            "SCOPUS_INST_TOKEN" => Some(" ".to_string()),
            _ => None,
        });
        assert_eq!(config.scopus.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.scopus.inst_token, None);
    }
}
