//! Scopus Search API client.
//!
//! Builds affiliation queries, fetches result pages concurrently and saves
//! each page as `{label}_{page}_{unix_timestamp}.json`, the naming the batch
//! driver reads the retrieval time from.

use crate::error::{IngestError, Result};
use chrono::Utc;
use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

/// Scopus Search API endpoint
pub const SCOPUS_SEARCH_URL: &str = "https://api.elsevier.com/content/search/scopus";

/// Results per page allowed with the `COMPLETE` view
pub const PAGE_SIZE: u32 = 25;

/// Affiliation search: institution, city and country, with a publication
/// year range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub institution: String,
    pub city: String,
    pub country: String,
    pub start_year: i32,
    /// Inclusive upper bound, open when `None`
    pub end_year: Option<i32>,
}

fn all_terms(value: &str) -> String {
    value
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" AND ")
}

impl SearchQuery {
    /// Render the Scopus advanced search string
    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "AFFIL({}) AND AFFILCITY({}) AND AFFILCOUNTRY({}) AND (PUBYEAR > {})",
            all_terms(&self.institution),
            all_terms(&self.city),
            all_terms(&self.country),
            self.start_year - 1
        );
        if let Some(end) = self.end_year {
            query.push_str(&format!(" AND (PUBYEAR < {})", end + 1));
        }
        query
    }
}

/// File name of a saved result page. Runs of non-word characters in the
/// label become underscores.
pub fn page_file_name(label: &str, page: u32, timestamp: i64) -> String {
    let label = Regex::new(r"\W+")
        .map(|re| re.replace_all(label.trim(), "_").into_owned())
        .unwrap_or_else(|_| label.trim().to_string());
    format!("{label}_{page}_{timestamp}.json")
}

/// `opensearch:totalResults` of a result page
pub fn total_results(page: &Value) -> Option<u64> {
    let total = page.pointer("/search-results/opensearch:totalResults")?;
    match total {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_u64(),
    }
}

/// Pages needed for `total` results, at least one and at most `max_pages`
pub fn page_count(total: u64, max_pages: u32) -> u32 {
    let needed = u32::try_from(total.div_ceil(u64::from(PAGE_SIZE))).unwrap_or(u32::MAX);
    needed.clamp(1, max_pages.max(1))
}

/// Scopus API client with rate limiting and concurrency control
pub struct ScopusClient {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
    base_url: Url,
    api_key: String,
    inst_token: Option<String>,
}

impl ScopusClient {
    /// Create a client for `base_url` (normally [`SCOPUS_SEARCH_URL`]) with at
    /// most `max_workers` requests in flight
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        inst_token: Option<String>,
        max_workers: usize,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| IngestError::Config(format!("Invalid Scopus URL: {}", e)))?;
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(IngestError::Config("Scopus API key is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("scopusdb/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            max_retries: 3,
            base_url,
            api_key,
            inst_token,
        })
    }

    /// Request URL of a zero-based result page
    pub fn page_url(&self, query: &str, page: u32) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("view", "COMPLETE")
            .append_pair("start", &(page * PAGE_SIZE).to_string())
            .append_pair("count", &PAGE_SIZE.to_string());
        url
    }

    /// Fetch one page, backing off exponentially on rate limits and
    /// transient failures
    pub async fn fetch_page(&self, query: &str, page: u32) -> Result<Value> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| IngestError::Config(format!("Request pool closed: {}", e)))?;

        let mut backoff = Duration::from_millis(500);
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            match self.do_fetch(query, page).await {
                Ok(value) => return Ok(value),
                Err(IngestError::RateLimited(secs)) => {
                    let wait = Duration::from_secs(secs).max(backoff);
                    warn!(
                        page,
                        attempt = attempt + 1,
                        wait_secs = wait.as_secs(),
                        "Rate limited, waiting"
                    );
                    tokio::time::sleep(wait).await;
                    backoff *= 2;
                    last_error = Some(IngestError::RateLimited(secs));
                }
                Err(e @ IngestError::Api { code, .. }) if (400..500).contains(&code) => {
                    // client errors do not improve with retries
                    return Err(e);
                }
                Err(e) => {
                    debug!(page, attempt = attempt + 1, error = %e, "Fetch failed");
                    if attempt < self.max_retries - 1 {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(IngestError::RateLimited(0)))
    }

    async fn do_fetch(&self, query: &str, page: u32) -> Result<Value> {
        let url = self.page_url(query, page);
        let mut request = self
            .client
            .get(url.as_str())
            .header("Accept", "application/json")
            .header("X-ELS-APIKey", &self.api_key);
        if let Some(token) = &self.inst_token {
            request = request.header("X-ELS-Insttoken", token);
        }
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(IngestError::RateLimited(retry_after));
        }

        if !response.status().is_success() {
            return Err(IngestError::Api {
                code: i32::from(response.status().as_u16()),
                message: format!("Scopus API error: {}", response.status()),
            });
        }

        Ok(response.json().await?)
    }

    /// Fetch up to `max_pages` pages of `query` and save them under
    /// `out_dir`. The first page determines how many pages exist.
    pub async fn download(
        &self,
        query: &SearchQuery,
        label: &str,
        max_pages: u32,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let query = query.to_query_string();
        info!(query = %query, "Starting Scopus download");
        std::fs::create_dir_all(out_dir)?;

        let first = self.fetch_page(&query, 0).await?;
        let total = total_results(&first).unwrap_or(0);
        let pages = page_count(total, max_pages);
        info!(total, pages, "Result pages");

        let mut saved = vec![save_page(out_dir, label, 0, &first)?];

        let futures: Vec<_> = (1..pages).map(|page| self.fetch_page(&query, page)).collect();
        let results = join_all(futures).await;

        for (page, result) in (1..pages).zip(results) {
            match result {
                Ok(value) => saved.push(save_page(out_dir, label, page, &value)?),
                Err(e) => warn!(page, error = %e, "Page skipped"),
            }
        }

        info!(saved = saved.len(), pages, "Scopus download complete");
        Ok(saved)
    }
}

fn save_page(out_dir: &Path, label: &str, page: u32, value: &Value) -> Result<PathBuf> {
    let path = out_dir.join(page_file_name(label, page, Utc::now().timestamp()));
    std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
    debug!(file = %path.display(), "Saved page");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_string() {
        let mut query = SearchQuery {
            institution: "University of Tehran".into(),
            city: "Tehran".into(),
            country: "Iran".into(),
            start_year: 2019,
            end_year: None,
        };
        assert_eq!(
            query.to_query_string(),
            "AFFIL(university AND of AND tehran) AND AFFILCITY(tehran) AND \
             AFFILCOUNTRY(iran) AND (PUBYEAR > 2018)"
        );

        query.end_year = Some(2020);
        assert!(query.to_query_string().ends_with(" AND (PUBYEAR < 2021)"));
    }

    #[test]
    fn test_page_file_name_feeds_retrieval_time() -> Result<()> {
        let name = page_file_name("University of Tehran", 3, 1572500000);
        assert_eq!(name, "University_of_Tehran_3_1572500000.json");

        let time = crate::batch::retrieval_time_from_path(Path::new(&name))?;
        assert_eq!(time.and_utc().timestamp(), 1572500000);
        Ok(())
    }

    #[test]
    fn test_page_count_is_bounded() {
        assert_eq!(page_count(0, 200), 1);
        assert_eq!(page_count(26, 200), 2);
        assert_eq!(page_count(u64::MAX, 200), 200);
        assert_eq!(page_count(u64::MAX, u32::MAX), u32::MAX);
        assert_eq!(page_count(100, 0), 1);
    }

    #[test]
    fn test_total_results() {
        let page = json!({"search-results": {"opensearch:totalResults": "51", "entry": []}});
        assert_eq!(total_results(&page), Some(51));
        assert_eq!(total_results(&json!({})), None);
    }

    #[test]
    fn test_page_url() -> Result<()> {
        let client = ScopusClient::new(SCOPUS_SEARCH_URL, "key", None, 2)?;
        let url = client.page_url("AFFIL(x)", 2);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("start".to_string(), "50".to_string())));
        assert!(pairs.contains(&("view".to_string(), "COMPLETE".to_string())));
        assert!(pairs.contains(&("query".to_string(), "AFFIL(x)".to_string())));

        assert!(ScopusClient::new("not a url", "key", None, 2).is_err());
        assert!(ScopusClient::new(SCOPUS_SEARCH_URL, " ", None, 2).is_err());
        Ok(())
    }
}
