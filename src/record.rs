//! Record normalization and field extraction.
//!
//! The Scopus API wraps scalar values inconsistently: a bare value, an object
//! carrying the value under `"$"` (plus `@`-attributes), or a list of such
//! objects. Everything is decoded once into [`FieldValue`] at the JSON
//! boundary so resolvers never branch on the wire shape. CSV rows decode into
//! the same [`Record`] type.

use crate::error::{IngestError, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

/// Null-looking values shared by every input source
pub const DEFAULT_SENTINELS: &[&str] = &["", "-", "#N/A"];

/// Paper records also use the literal `undefined`
pub const PAPER_SENTINELS: &[&str] = &["", "-", "#N/A", "undefined"];

/// Faculty rosters use `---` for empty cells
pub const ROSTER_SENTINELS: &[&str] = &["", "-", "#N/A", "---"];

/// A decoded field of an external record
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Explicit absent marker (JSON null or a null-like sentinel)
    Absent,
    /// Bare scalar, e.g. `"dc:title": "..."`
    Scalar(String),
    /// Single wrapper, e.g. `"author-count": {"@limit": "100", "$": "3"}`
    Wrapped(String),
    /// List of wrappers or bare scalars, e.g. `"afid": [{"$": "60001"}]`
    ListOfWrapped(Vec<String>),
    /// Nested object without a `"$"` key
    Record(Record),
    /// List of nested objects, e.g. `"author": [{...}, {...}]`
    Records(Vec<Record>),
}

impl FieldValue {
    /// Decode a JSON value into its tagged shape
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Absent,
            Value::Object(mut map) => match map.remove("$") {
                Some(inner) => scalar_text(inner).map_or(Self::Absent, Self::Wrapped),
                None => Self::Record(Record::from_map(map)),
            },
            Value::Array(items) => decode_list(items),
            other => scalar_text(other).map_or(Self::Absent, Self::Scalar),
        }
    }

    fn is_sentinel(value: &str, sentinels: &[&str]) -> bool {
        let trimmed = value.trim();
        sentinels.iter().any(|s| s.trim() == trimmed)
    }

    fn normalized(&self, sentinels: &[&str]) -> Self {
        match self {
            Self::Scalar(s) | Self::Wrapped(s) if Self::is_sentinel(s, sentinels) => Self::Absent,
            Self::ListOfWrapped(items) => Self::ListOfWrapped(
                items
                    .iter()
                    .filter(|s| !Self::is_sentinel(s, sentinels))
                    .cloned()
                    .collect(),
            ),
            Self::Record(r) => Self::Record(r.normalize_nulls(sentinels)),
            Self::Records(rs) => {
                Self::Records(rs.iter().map(|r| r.normalize_nulls(sentinels)).collect())
            }
            other => other.clone(),
        }
    }
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn decode_list(items: Vec<Value>) -> FieldValue {
    let has_plain_objects = items
        .iter()
        .any(|item| matches!(item, Value::Object(m) if !m.contains_key("$")));

    if has_plain_objects {
        let records = items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(Record::from_map(map)),
                _ => None,
            })
            .collect();
        return FieldValue::Records(records);
    }

    let values = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(mut map) => map.remove("$").and_then(scalar_text),
            other => scalar_text(other),
        })
        .collect();
    FieldValue::ListOfWrapped(values)
}

/// A normalized external record (one JSON entry or one CSV row)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    fn from_map(map: Map<String, Value>) -> Self {
        let fields = map
            .into_iter()
            .map(|(k, v)| (k, FieldValue::from_json(v)))
            .collect();
        Self { fields }
    }

    /// Decode a JSON object. Anything else is a parse error.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(IngestError::Parse(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Build a record from a CSV row, every cell becoming a scalar
    pub fn from_csv(headers: &csv::StringRecord, row: &csv::StringRecord) -> Self {
        let fields = headers
            .iter()
            .zip(row.iter())
            .map(|(h, v)| {
                (
                    h.trim_start_matches('\u{feff}').to_string(),
                    FieldValue::Scalar(v.to_string()),
                )
            })
            .collect();
        Self { fields }
    }

    /// Builder-style field insertion
    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Whether the key exists at all (even with an absent value)
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Raw access to a decoded field
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Field names in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Extract a single scalar.
    ///
    /// Lists yield their first element. Absent, empty and non-scalar values
    /// yield `None`; callers apply their own default.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match self.fields.get(name)? {
            FieldValue::Scalar(s) | FieldValue::Wrapped(s) => s.as_str(),
            FieldValue::ListOfWrapped(items) => items.first()?.as_str(),
            _ => return None,
        };
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    /// Extract every scalar of a field, de-duplicated in first-seen order
    pub fn fields(&self, name: &str) -> Vec<String> {
        let items: Vec<&String> = match self.fields.get(name) {
            Some(FieldValue::Scalar(s)) | Some(FieldValue::Wrapped(s)) => vec![s],
            Some(FieldValue::ListOfWrapped(items)) => items.iter().collect(),
            _ => Vec::new(),
        };

        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for item in items {
            if !item.is_empty() && seen.insert(item.as_str()) {
                unique.push(item.clone());
            }
        }
        unique
    }

    /// Extract a scalar and parse it, `None` if absent or unparsable
    pub fn parse<T: FromStr>(&self, name: &str) -> Option<T> {
        self.field(name)?.trim().parse().ok()
    }

    /// Extract a scalar as an owned, trimmed string
    pub fn text(&self, name: &str) -> Option<String> {
        self.field(name).map(|s| s.trim().to_string())
    }

    /// Nested object
    pub fn record(&self, name: &str) -> Option<&Record> {
        match self.fields.get(name)? {
            FieldValue::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Nested list of objects. A lone object is treated as a one-element list.
    pub fn records(&self, name: &str) -> &[Record] {
        match self.fields.get(name) {
            Some(FieldValue::Records(rs)) => rs,
            Some(FieldValue::Record(r)) => std::slice::from_ref(r),
            _ => &[],
        }
    }

    /// Return a copy with every sentinel-valued scalar replaced by
    /// [`FieldValue::Absent`]. Nested records are normalized too.
    pub fn normalize_nulls(&self, sentinels: &[&str]) -> Record {
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.normalized(sentinels)))
            .collect();
        Record { fields }
    }
}

/// Free-function form of [`Record::normalize_nulls`]
pub fn normalize_nulls(record: &Record, sentinels: &[&str]) -> Record {
    record.normalize_nulls(sentinels)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Keep only `accepted` characters (all when empty) and truncate to
/// `max_len` characters (no limit when 0).
pub fn strip(value: &str, accepted: &str, max_len: usize) -> String {
    let trimmed = value.trim();
    let kept: String = if accepted.is_empty() {
        trimmed.to_string()
    } else {
        trimmed.chars().filter(|c| accepted.contains(*c)).collect()
    };
    if max_len == 0 {
        kept
    } else {
        kept.chars().take(max_len).collect()
    }
}

/// Characters allowed in ISSN/ISBN values
pub const ISSN_CHARS: &str = "0123456789xX";

/// Interpret Scopus flag values (`"1"`, `"true"`)
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        Record::from_json(json!({
            "dc:title": "Deep Learning",
            "author-count": {"@limit": "100", "$": "3"},
            "afid": [{"@_fa": "true", "$": "60001"}, {"$": "60002"}, {"$": "60001"}],
            "citedby-count": 12,
            "openaccessFlag": true,
            "prism:doi": null,
            "link": [
                {"@ref": "self", "@href": "https://api"},
                {"@ref": "scopus", "@href": "https://scopus"}
            ],
            "prism:volume": "-"
        }))
        .expect("object")
    }

    #[test]
    fn test_decode_shapes() {
        let r = sample();
        assert_eq!(r.get("dc:title"), Some(&FieldValue::Scalar("Deep Learning".into())));
        assert_eq!(r.get("author-count"), Some(&FieldValue::Wrapped("3".into())));
        assert_eq!(r.get("prism:doi"), Some(&FieldValue::Absent));
        assert_eq!(r.records("link").len(), 2);
        assert_eq!(r.field("citedby-count"), Some("12"));
        assert_eq!(r.field("openaccessFlag"), Some("true"));
    }

    #[test]
    fn test_field_first_and_many() {
        let r = sample();
        assert_eq!(r.field("afid"), Some("60001"));
        assert_eq!(r.fields("afid"), vec!["60001".to_string(), "60002".to_string()]);
        assert_eq!(r.parse::<u32>("author-count"), Some(3));
        assert_eq!(r.field("missing"), None);
        assert_eq!(r.field("missing").unwrap_or("fallback"), "fallback");
        assert!(r.fields("missing").is_empty());
    }

    #[test]
    fn test_normalize_sentinels() {
        for sentinel in ["", " ", "-", "#N/A"] {
            let r = Record::new()
                .with_field("x", FieldValue::Scalar(sentinel.to_string()))
                .with_field("y", FieldValue::Scalar("kept".to_string()));
            let n = r.normalize_nulls(DEFAULT_SENTINELS);
            assert_eq!(n.get("x"), Some(&FieldValue::Absent), "sentinel {sentinel:?}");
            assert_eq!(n.get("y"), Some(&FieldValue::Scalar("kept".to_string())));
            // the input is left untouched
            assert_eq!(r.get("x"), Some(&FieldValue::Scalar(sentinel.to_string())));
        }
    }

    #[test]
    fn test_normalize_nested_and_extra_sentinels() {
        let r = Record::from_json(json!({
            "fund-no": "undefined",
            "author": [{"authid": "1", "given-name": "#N/A"}]
        }))
        .expect("object");

        let default = normalize_nulls(&r, DEFAULT_SENTINELS);
        assert_eq!(default.field("fund-no"), Some("undefined"));

        let paper = normalize_nulls(&r, PAPER_SENTINELS);
        assert_eq!(paper.field("fund-no"), None);
        assert_eq!(paper.records("author")[0].field("given-name"), None);
        assert_eq!(paper.records("author")[0].field("authid"), Some("1"));
    }

    #[test]
    fn test_from_csv() {
        let headers = csv::StringRecord::from(vec!["\u{feff}name", "domain"]);
        let row = csv::StringRecord::from(vec!["Iran", "IR"]);
        let r = Record::from_csv(&headers, &row);
        assert_eq!(r.field("name"), Some("Iran"));
        assert_eq!(r.field("domain"), Some("IR"));
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        assert!(Record::from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_strip() {
        assert_eq!(strip(" 1234-567X ", ISSN_CHARS, 8), "1234567X");
        assert_eq!(strip("978-3-16-148410-0", ISSN_CHARS, 13), "9783161484100");
        assert_eq!(strip("  Long title  ", "", 4), "Long");
        assert_eq!(strip("abc", "", 0), "abc");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("true"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("false"));
    }
}
