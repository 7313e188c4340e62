//! Cross-run deduplication: which records are new, which were seen before.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use gulp_core::{Dataset, History, Record};
use gulp_storage::DocumentStore;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use crate::identity::resolve_id;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutcome {
    /// Every input record, first occurrence per ID, in input order.
    pub unique: Vec<Record>,
    /// The subset of `unique` whose ID was not known before this call.
    pub new: Vec<Record>,
}

/// Coerce arbitrary scraper output into a list of candidate records.
pub fn coerce_batch(input: JsonValue) -> Vec<JsonValue> {
    match input {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("projects") {
            Some(JsonValue::Array(items)) => {
                warn!(count = items.len(), "input was a wrapper object, using its `projects` list");
                items
            }
            other => {
                if let Some(value) = other {
                    map.insert("projects".to_string(), value);
                }
                warn!("input was a single object, wrapping it into a list");
                vec![JsonValue::Object(map)]
            }
        },
        JsonValue::Null => {
            warn!("input was null, using an empty list");
            Vec::new()
        }
        other => {
            warn!(kind = json_kind(&other), "input was not a list, using an empty list");
            Vec::new()
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Resolve IDs, drop in-batch duplicates, and split off records unknown to `known`.
/// Newly seen IDs are added to `known`.
pub fn dedupe_batch(items: Vec<JsonValue>, known: &mut BTreeSet<String>) -> ProcessOutcome {
    let mut outcome = ProcessOutcome::default();
    let mut seen = HashSet::with_capacity(items.len());
    let mut skipped = 0usize;
    let mut duplicates = 0usize;

    for item in items {
        let Some(mut record) = Record::from_json(item) else {
            skipped += 1;
            continue;
        };
        let id = resolve_id(&mut record);
        if !seen.insert(id.clone()) {
            duplicates += 1;
            continue;
        }
        if known.insert(id) {
            outcome.new.push(record.clone());
        }
        outcome.unique.push(record);
    }

    if skipped > 0 {
        warn!(skipped, "ignored non-object entries");
    }
    if duplicates > 0 {
        debug!(duplicates, "dropped in-batch duplicates");
    }
    outcome
}

/// Owns the persisted history and the new-only partition.
#[derive(Debug, Clone)]
pub struct DeduplicationTracker {
    store: DocumentStore,
}

impl DeduplicationTracker {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    pub async fn process(&self, input: JsonValue) -> ProcessOutcome {
        self.process_at(input, Utc::now()).await
    }

    /// Classify a batch and persist history plus the new-only list. Persistence
    /// failures are logged; the in-memory outcome is returned regardless.
    pub async fn process_at(&self, input: JsonValue, now: DateTime<Utc>) -> ProcessOutcome {
        let (mut history, history_readable) = match self.store.read::<History>(Dataset::History).await {
            Ok(history) => (history, true),
            Err(err) => {
                error!(error = %format!("{err:#}"), "history unreadable, treating every record as new");
                (History::default(), false)
            }
        };

        let outcome = dedupe_batch(coerce_batch(input), &mut history.known_project_ids);
        history.last_scan = Some(now);
        history.total_projects_found = history.known_project_ids.len();

        if history_readable {
            if let Err(err) = self.store.write(Dataset::History, &history).await {
                error!(error = %format!("{err:#}"), "persisting history failed");
            }
        } else {
            warn!("not overwriting unreadable history");
        }
        // Written even when empty so a previous run's list does not linger.
        if let Err(err) = self.store.write(Dataset::NewOnly, &outcome.new).await {
            error!(error = %format!("{err:#}"), "persisting new-only list failed");
        }

        info!(
            unique = outcome.unique.len(),
            new = outcome.new.len(),
            known = history.known_project_ids.len(),
            "processed batch"
        );
        outcome
    }
}
