//! Facade over the document store: ingest, repartition and read-side operations.

use std::collections::{BTreeSet, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gulp_core::{Dataset, History, Record, LAST_SCRAPE_FILE};
use gulp_storage::DocumentStore;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::freshness::{FreshnessPartitioner, FreshnessStrategy, Partitioned};
use crate::identity::resolve_id;
use crate::query::{run_query, select_source, ProjectQuery, QueryPage};
use crate::tracker::{coerce_batch, dedupe_batch, DeduplicationTracker};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub unique: usize,
    pub new: Vec<Record>,
    pub recent: usize,
    pub archived: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSeenOutcome {
    pub removed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetCounts {
    pub raw: usize,
    pub recent: usize,
    pub archive: usize,
    pub new_only: usize,
    pub known: usize,
}

/// Serializes every mutation of the stored documents behind one lock; reads are
/// lock-free and see whole documents thanks to atomic replacement.
#[derive(Debug)]
pub struct ProjectManager {
    store: DocumentStore,
    tracker: DeduplicationTracker,
    partitioner: FreshnessPartitioner,
    write_lock: Mutex<()>,
}

impl ProjectManager {
    pub fn new(store: DocumentStore, strategy: FreshnessStrategy) -> Self {
        Self {
            tracker: DeduplicationTracker::new(store.clone()),
            partitioner: FreshnessPartitioner::new(store.clone(), strategy),
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Whether any scrape pass has ever stored a raw snapshot.
    pub async fn has_scraped_data(&self) -> bool {
        self.store.exists(Dataset::Raw).await
    }

    pub async fn ingest(&self, raw: JsonValue) -> IngestOutcome {
        self.ingest_at(raw, Utc::now()).await
    }

    /// Snapshot the raw batch, deduplicate it against history, then partition.
    pub async fn ingest_at(&self, raw: JsonValue, now: DateTime<Utc>) -> IngestOutcome {
        let _guard = self.write_lock.lock().await;

        if let Err(err) = self.store.write(Dataset::Raw, &raw).await {
            error!(error = %format!("{err:#}"), "persisting raw snapshot failed");
        }
        let processed = self.tracker.process_at(raw, now).await;
        let unique = processed.unique.len();
        let partitioned = self.partitioner.apply(processed.unique, now).await;

        IngestOutcome {
            unique,
            new: processed.new,
            recent: partitioned.recent.len(),
            archived: partitioned.archive_delta.len(),
        }
    }

    /// Rebuild recent/archive from the raw snapshot without touching history.
    pub async fn repartition_at(&self, now: DateTime<Utc>) -> Result<Partitioned> {
        let _guard = self.write_lock.lock().await;

        let raw = self
            .store
            .read::<JsonValue>(Dataset::Raw)
            .await
            .context("reading raw snapshot")?;
        let items = coerce_batch(raw);
        if items.is_empty() {
            warn!("raw snapshot is empty, leaving partitions untouched");
            return Ok(Partitioned::default());
        }
        let unique = dedupe_batch(items, &mut BTreeSet::new()).unique;
        Ok(self.partitioner.apply(unique, now).await)
    }

    /// Query the partitions; storage failures degrade to an empty page.
    pub async fn get_projects(&self, query: &ProjectQuery) -> QueryPage {
        match self.try_get_projects(query).await {
            Ok(page) => page,
            Err(err) => {
                error!(error = %format!("{err:#}"), "project query failed");
                QueryPage::default()
            }
        }
    }

    async fn try_get_projects(&self, query: &ProjectQuery) -> Result<QueryPage> {
        let recent = if query.archived {
            Vec::new()
        } else {
            self.store.read_records(Dataset::Recent).await?
        };
        let archive = if query.archived || query.show_all {
            self.store.read_records(Dataset::Archive).await?
        } else {
            Vec::new()
        };
        let new_ids = if query.include_new_only && !query.archived {
            self.new_project_ids().await?
        } else {
            HashSet::new()
        };
        Ok(run_query(select_source(recent, archive, &new_ids, query), query))
    }

    /// Look a project up in recent, then archive, then the raw snapshot.
    pub async fn get_project(&self, id: &str) -> Option<Record> {
        for dataset in [Dataset::Recent, Dataset::Archive] {
            if let Some(found) = self
                .store
                .load_records(dataset)
                .await
                .into_iter()
                .find(|r| r.id == id)
            {
                return Some(found);
            }
        }
        let raw = self.store.load::<JsonValue>(Dataset::Raw).await;
        coerce_batch(raw)
            .into_iter()
            .filter_map(Record::from_json)
            .find_map(|mut record| (resolve_id(&mut record) == id).then_some(record))
    }

    pub async fn new_projects(&self) -> Result<Vec<Record>> {
        self.store.read_records(Dataset::NewOnly).await
    }

    pub async fn new_project_ids(&self) -> Result<HashSet<String>> {
        Ok(self
            .new_projects()
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    pub async fn clear_new_projects(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store
            .write(Dataset::NewOnly, &Vec::<Record>::new())
            .await
            .context("clearing new-only list")?;
        info!("new-only list cleared");
        Ok(())
    }

    /// Drop the given IDs from the new-only list. History is not touched, so the
    /// IDs stay known.
    pub async fn mark_projects_as_seen(&self, ids: &[String]) -> Result<MarkSeenOutcome> {
        let _guard = self.write_lock.lock().await;

        let mut new_only = self
            .store
            .read_records(Dataset::NewOnly)
            .await
            .context("reading new-only list")?;
        if ids.is_empty() {
            return Ok(MarkSeenOutcome {
                removed: 0,
                remaining: new_only.len(),
            });
        }

        let seen = ids.iter().map(String::as_str).collect::<HashSet<_>>();
        let before = new_only.len();
        new_only.retain(|r| !seen.contains(r.id.as_str()));
        let outcome = MarkSeenOutcome {
            removed: before - new_only.len(),
            remaining: new_only.len(),
        };
        if outcome.removed > 0 {
            self.store
                .write(Dataset::NewOnly, &new_only)
                .await
                .context("persisting new-only list")?;
        }
        info!(removed = outcome.removed, remaining = outcome.remaining, "marked projects as seen");
        Ok(outcome)
    }

    pub async fn history(&self) -> History {
        self.store.load(Dataset::History).await
    }

    pub async fn counts(&self) -> DatasetCounts {
        let raw = coerce_batch(self.store.load::<JsonValue>(Dataset::Raw).await).len();
        DatasetCounts {
            raw,
            recent: self.store.load_records(Dataset::Recent).await.len(),
            archive: self.store.load_records(Dataset::Archive).await.len(),
            new_only: self.store.load_records(Dataset::NewOnly).await.len(),
            known: self.history().await.known_project_ids.len(),
        }
    }

    pub async fn last_scrape(&self) -> Option<DateTime<Utc>> {
        let text = match self.store.read_text(LAST_SCRAPE_FILE).await {
            Ok(text) => text?,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "reading last scrape time failed");
                return None;
            }
        };
        DateTime::parse_from_rfc3339(text.trim())
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|err| warn!(error = %err, "ignoring malformed last scrape time"))
            .ok()
    }

    pub async fn record_scrape_time(&self, at: DateTime<Utc>) -> Result<()> {
        self.store
            .write_text(LAST_SCRAPE_FILE, &at.to_rfc3339())
            .await
            .context("writing last scrape time")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).single().expect("ts")
    }

    fn listing(id: &str, hours_old: i64) -> JsonValue {
        json!({
            "id": id,
            "title": format!("Projekt {id}"),
            "originalPublicationDate": (now() - Duration::hours(hours_old)).to_rfc3339(),
        })
    }

    fn manager(dir: &std::path::Path) -> ProjectManager {
        ProjectManager::new(DocumentStore::new(dir), FreshnessStrategy::default())
    }

    #[tokio::test]
    async fn ingest_splits_and_reports_new_records() {
        let dir = tempdir().expect("tempdir");
        let manager = manager(dir.path());

        let outcome = manager
            .ingest_at(json!([listing("a", 1), listing("b", 48), listing("a", 1)]), now())
            .await;
        assert_eq!(outcome.unique, 2);
        assert_eq!(outcome.new.len(), 2);
        assert_eq!(outcome.recent, 1);
        assert_eq!(outcome.archived, 1);

        let counts = manager.counts().await;
        assert_eq!(
            counts,
            DatasetCounts {
                raw: 3,
                recent: 1,
                archive: 1,
                new_only: 2,
                known: 2
            }
        );
    }

    #[tokio::test]
    async fn lookup_falls_through_to_raw_snapshot() {
        let dir = tempdir().expect("tempdir");
        let manager = manager(dir.path());
        manager.ingest_at(json!([listing("a", 1), listing("b", 48)]), now()).await;

        assert_eq!(manager.get_project("a").await.map(|r| r.id), Some("a".into()));
        assert_eq!(manager.get_project("b").await.map(|r| r.id), Some("b".into()));
        assert!(manager.get_project("zzz").await.is_none());

        manager
            .store()
            .write(Dataset::Raw, &json!([{"title": "Only Raw", "companyName": "X"}]))
            .await
            .expect("raw");
        let raw_only = manager.get_project("only_raw_x_").await.expect("raw hit");
        assert_eq!(raw_only.title(), "Only Raw");
    }

    #[tokio::test]
    async fn mark_seen_and_clear() {
        let dir = tempdir().expect("tempdir");
        let manager = manager(dir.path());
        manager
            .ingest_at(json!([listing("p1", 1), listing("p2", 1), listing("p3", 1)]), now())
            .await;

        let outcome = manager
            .mark_projects_as_seen(&["p1".to_string(), "nope".to_string()])
            .await
            .expect("mark");
        assert_eq!(outcome, MarkSeenOutcome { removed: 1, remaining: 2 });

        let noop = manager.mark_projects_as_seen(&[]).await.expect("noop");
        assert_eq!(noop, MarkSeenOutcome { removed: 0, remaining: 2 });
        assert!(manager.history().await.known_project_ids.contains("p1"));

        manager.clear_new_projects().await.expect("clear");
        assert!(manager.new_projects().await.expect("new").is_empty());
    }

    #[tokio::test]
    async fn repartition_reclassifies_from_raw_without_new_records() {
        let dir = tempdir().expect("tempdir");
        let manager = manager(dir.path());
        manager.ingest_at(json!([listing("a", 1), listing("b", 20)]), now()).await;

        let later = now() + Duration::hours(10);
        let partitioned = manager.repartition_at(later).await.expect("repartition");
        assert_eq!(partitioned.recent.len(), 1);
        assert_eq!(partitioned.archive_delta.len(), 1);
        assert_eq!(partitioned.archive_delta[0].id, "b");
        assert_eq!(manager.history().await.known_project_ids.len(), 2);
    }

    #[tokio::test]
    async fn queries_read_partitions() {
        let dir = tempdir().expect("tempdir");
        let manager = manager(dir.path());
        manager
            .ingest_at(json!([listing("a", 1), listing("b", 2), listing("old", 72)]), now())
            .await;

        let recent = manager.get_projects(&ProjectQuery::default()).await;
        assert_eq!(recent.total, 2);
        let archived = manager
            .get_projects(&ProjectQuery {
                archived: true,
                ..ProjectQuery::default()
            })
            .await;
        assert_eq!(archived.total, 1);
        let all = manager
            .get_projects(&ProjectQuery {
                show_all: true,
                ..ProjectQuery::default()
            })
            .await;
        assert_eq!(all.total, 3);
    }

    #[tokio::test]
    async fn last_scrape_time_round_trips() {
        let dir = tempdir().expect("tempdir");
        let manager = manager(dir.path());
        assert!(manager.last_scrape().await.is_none());
        manager.record_scrape_time(now()).await.expect("write");
        assert_eq!(manager.last_scrape().await, Some(now()));
    }
}
