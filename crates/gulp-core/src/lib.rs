//! Core data model for GULP project watch: scraped records, scan history, dataset names.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::warn;

pub const CRATE_NAME: &str = "gulp-core";

/// Field names that may carry a publication/update timestamp, most authoritative first.
pub const TIMESTAMP_FIELDS: &[&str] = &[
    "originalPublicationDate",
    "publicationDate",
    "updatedAt",
    "lastUpdated",
    "createdAt",
    "created",
];

/// Skills arrive either as a list or as a single comma-ish string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Skills {
    Many(Vec<String>),
    One(String),
}

impl Skills {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let (many, one) = match self {
            Skills::Many(items) => (items.as_slice(), None),
            Skills::One(item) => (&[][..], Some(item.as_str())),
        };
        many.iter().map(String::as_str).chain(one)
    }
}

/// One scraped listing.
///
/// Known keys are decoded leniently (wrong-typed values become absent); every other
/// key is kept in `extra` so a record survives a round trip through storage unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,
    #[serde(
        rename = "companyName",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub company_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub location: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_skills",
        skip_serializing_if = "Option::is_none"
    )]
    pub skills: Option<Skills>,
    #[serde(
        rename = "isRemoteWorkPossible",
        default,
        deserialize_with = "lenient_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub remote: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Record {
    /// Decode a JSON object into a record. Non-objects yield `None`.
    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => serde_json::from_value(JsonValue::Object(map)).ok(),
            _ => None,
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    /// `companyName`, falling back to a plain `company` key some feeds use.
    pub fn company(&self) -> &str {
        self.company_name
            .as_deref()
            .or_else(|| self.extra.get("company").and_then(JsonValue::as_str))
            .unwrap_or_default()
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or_default()
    }

    pub fn skills(&self) -> impl Iterator<Item = &str> {
        self.skills.iter().flat_map(Skills::iter)
    }

    /// Raw passthrough value for a key not modelled as a typed field.
    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.extra.get(name)
    }
}

/// Durable scan counters and the full set of IDs ever classified as new.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct History {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_scan: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_id_set")]
    pub known_project_ids: BTreeSet<String>,
    #[serde(default)]
    pub total_projects_found: usize,
}

/// Logical documents persisted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    Raw,
    Recent,
    Archive,
    History,
    NewOnly,
}

impl Dataset {
    pub const fn file_name(self) -> &'static str {
        match self {
            Dataset::Raw => "gulp_projekte_raw.json",
            Dataset::Recent => "recent_projects.json",
            Dataset::Archive => "archive_projects.json",
            Dataset::History => "project_history.json",
            Dataset::NewOnly => "new_projects.json",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dataset::Raw => "raw",
            Dataset::Recent => "recent",
            Dataset::Archive => "archive",
            Dataset::History => "history",
            Dataset::NewOnly => "new-only",
        };
        f.write_str(name)
    }
}

/// Plain-text file holding the RFC 3339 time of the last completed scrape pass.
pub const LAST_SCRAPE_FILE: &str = "last_scrape.txt";

fn scalar_to_string(value: JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.and_then(scalar_to_string))
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

/// Older history files carry numeric IDs straight from the API.
fn lenient_id_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    let Some(JsonValue::Array(items)) = value else {
        return Ok(BTreeSet::new());
    };
    let mut ids = BTreeSet::new();
    for item in items {
        match item {
            JsonValue::String(s) => {
                ids.insert(s);
            }
            JsonValue::Number(n) => {
                ids.insert(n.to_string());
            }
            other => warn!(value = %other, "skipping non-scalar known project id"),
        }
    }
    Ok(ids)
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Bool(b)) => Some(b),
        Some(JsonValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_skills<'de, D>(deserializer: D) -> Result<Option<Skills>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Array(items)) => Some(Skills::Many(
            items
                .into_iter()
                .filter_map(|item| match item {
                    JsonValue::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        )),
        Some(JsonValue::String(s)) => Some(Skills::One(s)),
        _ => None,
    })
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    let Some(JsonValue::String(raw)) = value else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    Ok(NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_decodes_leniently_and_keeps_unknown_keys() {
        let record = Record::from_json(json!({
            "id": 4711,
            "title": "Rust Backend Engineer",
            "companyName": null,
            "company": "ACME",
            "location": ["not", "a", "string"],
            "skills": ["rust", 3, "tokio"],
            "isRemoteWorkPossible": "TRUE",
            "originalPublicationDate": "2026-10-18T08:00:00Z"
        }))
        .expect("object decodes");

        assert_eq!(record.id, "4711");
        assert_eq!(record.company(), "ACME");
        assert_eq!(record.location, None);
        assert_eq!(record.skills().collect::<Vec<_>>(), vec!["rust", "tokio"]);
        assert_eq!(record.remote, Some(true));
        assert_eq!(
            record.field("originalPublicationDate"),
            Some(&json!("2026-10-18T08:00:00Z"))
        );

        let back = serde_json::to_value(&record).expect("serialize");
        assert_eq!(back["id"], json!("4711"));
        assert_eq!(back["company"], json!("ACME"));
        assert!(back.get("location").is_none());
    }

    #[test]
    fn single_string_skills_are_supported() {
        let record = Record::from_json(json!({"skills": "Kubernetes, Go"})).expect("decodes");
        assert_eq!(record.skills().collect::<Vec<_>>(), vec!["Kubernetes, Go"]);
        assert!(!record.has_id());
    }

    #[test]
    fn non_objects_are_not_records() {
        assert!(Record::from_json(json!("just text")).is_none());
        assert!(Record::from_json(json!([{"id": "a"}])).is_none());
    }

    #[test]
    fn history_accepts_naive_and_missing_timestamps() {
        let history: History = serde_json::from_value(json!({
            "last_scan": "2026-10-18T03:00:00.123456",
            "known_project_ids": ["b", "a", "a"],
            "total_projects_found": 2
        }))
        .expect("history decodes");
        assert!(history.last_scan.is_some());
        assert_eq!(history.known_project_ids.len(), 2);

        let empty: History = serde_json::from_value(json!({"last_scan": null})).expect("decodes");
        assert_eq!(empty, History::default());
    }

    #[test]
    fn history_keeps_numeric_known_ids() {
        let history: History = serde_json::from_value(json!({
            "known_project_ids": [4711, "a", null, {"id": "x"}],
            "total_projects_found": 2
        }))
        .expect("history decodes");
        assert_eq!(
            history.known_project_ids,
            BTreeSet::from(["4711".to_string(), "a".to_string()])
        );
    }

    #[test]
    fn dataset_file_layout_is_stable() {
        assert_eq!(Dataset::Raw.file_name(), "gulp_projekte_raw.json");
        assert_eq!(Dataset::NewOnly.file_name(), "new_projects.json");
        assert_eq!(Dataset::NewOnly.to_string(), "new-only");
    }
}
