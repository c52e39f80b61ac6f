//! Custom error types for scopusdb.
//!
//! All library functions return `Result<T, IngestError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for ingestion operations.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A field without a safe default is absent from a record
    #[error("Missing field: {0}")]
    MissingField(String),

    /// A field is present but its value cannot be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// A write would break a uniqueness rule of the store
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Error message from API
        message: String,
    },

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV reading/writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// SQLite backend error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

impl IngestError {
    /// Short name of the variant, used in problem reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "MissingField",
            Self::Parse(_) => "Parse",
            Self::Constraint(_) => "Constraint",
            Self::Network(_) => "Network",
            Self::Api { .. } => "Api",
            Self::RateLimited(_) => "RateLimited",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
            Self::Csv(_) => "Csv",
            Self::Sqlite(_) => "Sqlite",
            Self::Config(_) => "Config",
        }
    }
}

/// Result type alias using `IngestError`
pub type Result<T> = std::result::Result<T, IngestError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a missing-field error
    fn ok_or_missing(self, field: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing(self, field: &str) -> Result<T> {
        self.ok_or_else(|| IngestError::MissingField(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_or_missing() {
        let present: Option<u32> = Some(3);
        assert!(matches!(present.ok_or_missing("x"), Ok(3)));

        let absent: Option<u32> = None;
        let err = absent.ok_or_missing("dc:identifier").expect_err("should fail");
        assert_eq!(err.to_string(), "Missing field: dc:identifier");
        assert_eq!(err.kind(), "MissingField");
    }
}
