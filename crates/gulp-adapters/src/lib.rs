//! Raw-record sources feeding the scrape pipeline.
//!
//! A source only produces loosely-typed JSON objects; identity, deduplication and
//! freshness are decided downstream.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gulp_storage::{FetchError, HttpFetcher};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "gulp-adapters";

pub const DEFAULT_SEARCH_URL: &str =
    "https://www.gulp.de/gulp2/rest/internal/projects/search?page={page}";

/// Top-level keys that hold the project list in a search response, in lookup order.
const LIST_KEYS: &[&str] = &["content", "data", "items", "projects", "results"];
/// An object carrying any of these keys is taken to be a project.
const PROJECT_KEYS: &[&str] = &["title", "jobTitle"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeBatch {
    pub records: Vec<JsonValue>,
    pub pages_attempted: usize,
    pub pages_failed: usize,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("all {attempted} requested pages failed")]
    AllPagesFailed { attempted: usize },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait ProjectSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// True when the records are generated rather than scraped, so their dates
    /// say nothing about freshness.
    fn synthetic(&self) -> bool {
        false
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        pages: RangeInclusive<u32>,
    ) -> Result<ScrapeBatch, SourceError>;
}

/// Pull project objects out of one search response.
///
/// The first list-valued key in [`LIST_KEYS`] is taken as is; when it is empty
/// (or no such key exists) the whole response is searched.
pub fn extract_projects(response: JsonValue) -> Vec<JsonValue> {
    if let JsonValue::Object(map) = &response {
        let first_list = LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(JsonValue::as_array));
        if let Some(items) = first_list.filter(|items| !items.is_empty()) {
            return items.clone();
        }
    }
    let mut found = Vec::new();
    collect_projects(response, &mut found);
    found
}

fn collect_projects(value: JsonValue, found: &mut Vec<JsonValue>) {
    match value {
        JsonValue::Array(items) => {
            for item in items {
                collect_projects(item, found);
            }
        }
        JsonValue::Object(map) => {
            if PROJECT_KEYS.iter().any(|key| map.contains_key(*key)) {
                found.push(JsonValue::Object(map));
            } else {
                for (_, nested) in map {
                    collect_projects(nested, found);
                }
            }
        }
        _ => {}
    }
}

/// Fetches the GULP project search feed page by page.
pub struct GulpSearchSource {
    http: HttpFetcher,
    url_template: String,
}

impl GulpSearchSource {
    pub fn new(http: HttpFetcher, url_template: impl Into<String>) -> Self {
        Self {
            http,
            url_template: url_template.into(),
        }
    }

    pub fn page_url(&self, page: u32) -> String {
        self.url_template.replace("{page}", &page.to_string())
    }
}

#[async_trait]
impl ProjectSource for GulpSearchSource {
    fn source_id(&self) -> &'static str {
        "gulp-search"
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        pages: RangeInclusive<u32>,
    ) -> Result<ScrapeBatch, SourceError> {
        let mut batch = ScrapeBatch::default();
        for page in pages {
            batch.pages_attempted += 1;
            let url = self.page_url(page);
            match self.http.fetch_json(&url).await {
                Ok(response) => {
                    let projects = extract_projects(response);
                    info!(run_id = %ctx.run_id, page, found = projects.len(), "page scraped");
                    batch.records.extend(projects);
                }
                Err(err) => {
                    warn!(run_id = %ctx.run_id, page, error = %err, "page fetch failed, skipping");
                    batch.pages_failed += 1;
                }
            }
        }
        if batch.pages_attempted > 0 && batch.pages_failed == batch.pages_attempted {
            return Err(SourceError::AllPagesFailed {
                attempted: batch.pages_attempted,
            });
        }
        Ok(batch)
    }
}

/// Replays a captured response or record list from disk; the page range is ignored.
pub struct FixtureSource {
    path: PathBuf,
}

impl FixtureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ProjectSource for FixtureSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn scrape(
        &self,
        _ctx: &ScrapeContext,
        _pages: RangeInclusive<u32>,
    ) -> Result<ScrapeBatch, SourceError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading fixture {}", self.path.display()))?;
        let value: JsonValue = serde_json::from_str(&text)
            .with_context(|| format!("parsing fixture {}", self.path.display()))?;
        let records = match value {
            JsonValue::Array(items) => items,
            other => extract_projects(other),
        };
        Ok(ScrapeBatch {
            records,
            pages_attempted: 1,
            pages_failed: 0,
        })
    }
}

/// Stand-in listings for deployments without access to the live feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderSource;

impl PlaceholderSource {
    pub fn records_at(now: DateTime<Utc>) -> Vec<JsonValue> {
        let stamp = now.format("%Y%m%d%H%M");
        [
            ("Platzhalter Projekt 1", "Platzhalter GmbH", "Berlin"),
            ("Platzhalter Projekt 2", "Test AG", "München"),
        ]
        .into_iter()
        .enumerate()
        .map(|(idx, (title, company, location))| {
            json!({
                "id": format!("placeholder-{}-{stamp}", idx + 1),
                "title": title,
                "description": "Automatisch erzeugter Eintrag ohne Live-Daten.",
                "companyName": company,
                "location": location,
                "isRemoteWorkPossible": true,
                "publicationDate": now.format("%d.%m.%Y").to_string(),
                "originalPublicationDate": now.to_rfc3339(),
                "url": "https://www.gulp.de/",
            })
        })
        .collect()
    }
}

#[async_trait]
impl ProjectSource for PlaceholderSource {
    fn source_id(&self) -> &'static str {
        "placeholder"
    }

    fn synthetic(&self) -> bool {
        true
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        _pages: RangeInclusive<u32>,
    ) -> Result<ScrapeBatch, SourceError> {
        Ok(ScrapeBatch {
            records: Self::records_at(ctx.started_at),
            pages_attempted: 1,
            pages_failed: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn list_keys_win_over_recursive_search() {
        let response = json!({
            "meta": {"title": "not a project"},
            "content": [{"id": "a", "title": "Rust"}, {"id": "b", "title": "Go"}],
        });
        let projects = extract_projects(response);
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0]["id"], "a");
    }

    #[test]
    fn empty_list_falls_back_to_recursive_search() {
        let response = json!({
            "results": [],
            "page": {"hits": [{"jobTitle": "SAP Berater", "details": {"title": "nested"}}]},
        });
        let projects = extract_projects(response);
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0]["jobTitle"], "SAP Berater");
    }

    #[test]
    fn only_the_first_list_key_is_considered() {
        let response = json!({
            "content": [],
            "results": [{"id": "r1", "title": "Listed"}],
        });
        let projects = extract_projects(response);
        // Recursive search still finds the entry under `results`.
        assert_eq!(projects, vec![json!({"id": "r1", "title": "Listed"})]);

        let response = json!({
            "content": [],
            "results": [{"id": "r2"}],
        });
        assert!(extract_projects(response).is_empty());
    }

    #[test]
    fn unrelated_payload_yields_nothing() {
        assert!(extract_projects(json!({"status": "ok"})).is_empty());
        assert!(extract_projects(json!(42)).is_empty());
    }

    #[test]
    fn placeholder_records_are_stamped_with_scrape_time() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 3, 0, 0).single().expect("ts");
        let records = PlaceholderSource::records_at(now);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], "placeholder-1-202610190300");
        assert_eq!(records[1]["publicationDate"], "19.10.2026");
    }
}
