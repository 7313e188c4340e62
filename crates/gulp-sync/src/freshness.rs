//! Recent/archive partitioning by publication time.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use gulp_core::{Dataset, Record, TIMESTAMP_FIELDS};
use gulp_storage::DocumentStore;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

pub const DEFAULT_RECENT_WINDOW_HOURS: i64 = 24;

/// Timestamp layouts tried in [`TimestampFormat::CASCADE`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// RFC 3339 / ISO 8601 with offset, e.g. `2026-10-18T08:00:00+02:00`.
    Rfc3339,
    /// ISO 8601 without offset, e.g. `2026-10-18T08:00:00.123`.
    NaiveIso,
    /// `2026-10-18 08:00:00`.
    FixedWidth,
    /// `2026-10-18`.
    DateOnly,
    /// `18.10.2026`.
    GermanDate,
    /// Unix seconds or milliseconds, numeric or as digits.
    Epoch,
}

impl TimestampFormat {
    pub const CASCADE: [TimestampFormat; 6] = [
        TimestampFormat::Rfc3339,
        TimestampFormat::NaiveIso,
        TimestampFormat::FixedWidth,
        TimestampFormat::DateOnly,
        TimestampFormat::GermanDate,
        TimestampFormat::Epoch,
    ];

    /// Naive values are taken as UTC.
    pub fn parse(self, raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        match self {
            TimestampFormat::Rfc3339 => DateTime::parse_from_rfc3339(raw)
                .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            TimestampFormat::NaiveIso => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc()),
            TimestampFormat::FixedWidth => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc()),
            TimestampFormat::DateOnly => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc()),
            TimestampFormat::GermanDate => NaiveDate::parse_from_str(raw, "%d.%m.%Y")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc()),
            TimestampFormat::Epoch => raw.parse::<i64>().ok().and_then(from_epoch),
        }
    }
}

// Values above this are read as milliseconds (year 5138 in seconds).
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

/// Run the format cascade over a raw JSON timestamp value.
pub fn parse_timestamp(value: &JsonValue) -> Option<(DateTime<Utc>, TimestampFormat)> {
    match value {
        JsonValue::String(raw) => TimestampFormat::CASCADE
            .into_iter()
            .find_map(|format| format.parse(raw).map(|ts| (ts, format))),
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch)
            .map(|ts| (ts, TimestampFormat::Epoch)),
        _ => None,
    }
}

/// First candidate field holding a non-empty value.
pub fn find_timestamp(record: &Record) -> Option<(&'static str, &JsonValue)> {
    TIMESTAMP_FIELDS.iter().find_map(|name| {
        let value = record.field(name)?;
        let usable = match value {
            JsonValue::Null => false,
            JsonValue::String(s) => !s.trim().is_empty(),
            _ => true,
        };
        usable.then_some((*name, value))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Recent,
    Archive,
}

/// Why a record landed where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    WithinWindow,
    FutureDated,
    NoTimestamp,
    Unparseable,
    Forced,
    Stale,
}

impl Verdict {
    pub fn freshness(self) -> Freshness {
        match self {
            Verdict::Stale => Freshness::Archive,
            _ => Freshness::Recent,
        }
    }
}

/// How freshness is decided for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessStrategy {
    /// Records published within `window` of now are recent.
    ByTimestamp { window: Duration },
    /// Every record is recent; used when dates carry no information.
    AllRecent,
}

impl Default for FreshnessStrategy {
    fn default() -> Self {
        FreshnessStrategy::ByTimestamp {
            window: Duration::hours(DEFAULT_RECENT_WINDOW_HOURS),
        }
    }
}

impl FreshnessStrategy {
    pub fn classify(&self, record: &Record, now: DateTime<Utc>) -> Verdict {
        let FreshnessStrategy::ByTimestamp { window } = *self else {
            return Verdict::Forced;
        };
        let Some((field, value)) = find_timestamp(record) else {
            return Verdict::NoTimestamp;
        };
        let Some((published, _format)) = parse_timestamp(value) else {
            warn!(id = %record.id, field, value = %value, "unparseable timestamp, treating as current");
            return Verdict::Unparseable;
        };
        if published > now {
            Verdict::FutureDated
        } else if now - published < window {
            Verdict::WithinWindow
        } else {
            Verdict::Stale
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partitioned {
    pub recent: Vec<Record>,
    /// Stale records not yet in the archive.
    pub archive_delta: Vec<Record>,
    /// Stale records skipped because the archive already holds their ID.
    pub already_archived: usize,
}

/// Split deduplicated records into recent and a new-to-archive delta.
pub fn partition(
    unique: Vec<Record>,
    archived_ids: &HashSet<String>,
    strategy: &FreshnessStrategy,
    now: DateTime<Utc>,
) -> Partitioned {
    let mut out = Partitioned::default();
    for record in unique {
        match strategy.classify(&record, now).freshness() {
            Freshness::Recent => out.recent.push(record),
            Freshness::Archive if archived_ids.contains(&record.id) => out.already_archived += 1,
            Freshness::Archive => out.archive_delta.push(record),
        }
    }
    out
}

/// Applies a [`FreshnessStrategy`] and maintains the recent and archive documents.
#[derive(Debug, Clone)]
pub struct FreshnessPartitioner {
    store: DocumentStore,
    strategy: FreshnessStrategy,
}

impl FreshnessPartitioner {
    pub fn new(store: DocumentStore, strategy: FreshnessStrategy) -> Self {
        Self { store, strategy }
    }

    /// Replace the recent document and append the archive delta.
    ///
    /// The archive update is read-modify-write without a transaction; a crash
    /// between read and rename loses only this run's delta. If the archive cannot
    /// be read it is left untouched.
    pub async fn apply(&self, unique: Vec<Record>, now: DateTime<Utc>) -> Partitioned {
        let (mut archive, archive_readable) = match self.store.read_records(Dataset::Archive).await {
            Ok(records) => (records, true),
            Err(err) => {
                error!(error = %format!("{err:#}"), "archive unreadable, skipping archive update");
                (Vec::new(), false)
            }
        };
        let archived_ids = archive.iter().map(|r| r.id.clone()).collect::<HashSet<_>>();

        let out = partition(unique, &archived_ids, &self.strategy, now);

        if let Err(err) = self.store.write(Dataset::Recent, &out.recent).await {
            error!(error = %format!("{err:#}"), "persisting recent list failed");
        }
        if archive_readable && !out.archive_delta.is_empty() {
            archive.extend(out.archive_delta.iter().cloned());
            if let Err(err) = self.store.write(Dataset::Archive, &archive).await {
                error!(error = %format!("{err:#}"), "persisting archive failed");
            }
        }

        info!(
            recent = out.recent.len(),
            archived = out.archive_delta.len(),
            already_archived = out.already_archived,
            archive_total = archive.len(),
            "partitioned batch"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).single().expect("ts")
    }

    fn published(id: &str, field: &str, value: JsonValue) -> Record {
        let mut obj = serde_json::Map::new();
        obj.insert("id".into(), json!(id));
        obj.insert(field.into(), value);
        Record::from_json(JsonValue::Object(obj)).expect("record")
    }

    fn hours_ago(id: &str, hours: i64) -> Record {
        published(
            id,
            "originalPublicationDate",
            json!((now() - Duration::hours(hours)).to_rfc3339()),
        )
    }

    #[test]
    fn cascade_accepts_every_supported_layout() {
        let cases = [
            ("2026-10-18T08:00:00+02:00", TimestampFormat::Rfc3339),
            ("2026-10-18T08:00:00Z", TimestampFormat::Rfc3339),
            ("2026-10-18T08:00:00.123456", TimestampFormat::NaiveIso),
            ("2026-10-18T08:00:00", TimestampFormat::NaiveIso),
            ("2026-10-18 08:00:00", TimestampFormat::FixedWidth),
            ("2026-10-18", TimestampFormat::DateOnly),
            ("18.10.2026", TimestampFormat::GermanDate),
            ("1792310400", TimestampFormat::Epoch),
        ];
        for (raw, expected) in cases {
            let (_, format) = parse_timestamp(&json!(raw)).unwrap_or_else(|| panic!("{raw} parses"));
            assert_eq!(format, expected, "{raw}");
        }
        let (ms, _) = parse_timestamp(&json!(1_792_310_400_000_i64)).expect("millis");
        let (secs, _) = parse_timestamp(&json!(1_792_310_400_i64)).expect("seconds");
        assert_eq!(ms, secs);
        assert!(parse_timestamp(&json!("gestern")).is_none());
        assert!(parse_timestamp(&json!({"date": "2026-10-18"})).is_none());
    }

    #[test]
    fn preferred_field_wins_and_blank_fields_are_skipped() {
        let record = Record::from_json(json!({
            "id": "a",
            "originalPublicationDate": "",
            "publicationDate": "19.10.2026",
            "createdAt": "2001-01-01"
        }))
        .expect("record");
        assert_eq!(find_timestamp(&record), Some(("publicationDate", &json!("19.10.2026"))));
    }

    #[test]
    fn window_boundaries() {
        let strategy = FreshnessStrategy::default();
        assert_eq!(strategy.classify(&hours_ago("a", 2), now()), Verdict::WithinWindow);
        assert_eq!(strategy.classify(&hours_ago("b", 30), now()), Verdict::Stale);
        assert_eq!(strategy.classify(&hours_ago("c", 24), now()), Verdict::Stale);
        assert_eq!(strategy.classify(&hours_ago("d", -30), now()), Verdict::FutureDated);
    }

    #[test]
    fn missing_or_garbled_dates_stay_visible() {
        let strategy = FreshnessStrategy::default();
        let undated = Record::from_json(json!({"id": "x"})).expect("record");
        let garbled = published("y", "updatedAt", json!("vor 3 Tagen"));
        assert_eq!(strategy.classify(&undated, now()), Verdict::NoTimestamp);
        assert_eq!(strategy.classify(&garbled, now()), Verdict::Unparseable);
        assert_eq!(Verdict::Unparseable.freshness(), Freshness::Recent);
    }

    #[test]
    fn all_recent_strategy_ignores_dates() {
        let strategy = FreshnessStrategy::AllRecent;
        assert_eq!(strategy.classify(&hours_ago("old", 500), now()), Verdict::Forced);
    }

    #[test]
    fn stale_records_already_archived_are_not_repeated() {
        let archived = HashSet::from(["old-1".to_string()]);
        let out = partition(
            vec![hours_ago("old-1", 48), hours_ago("old-2", 48), hours_ago("fresh", 1)],
            &archived,
            &FreshnessStrategy::default(),
            now(),
        );
        assert_eq!(out.recent.len(), 1);
        assert_eq!(out.archive_delta.len(), 1);
        assert_eq!(out.archive_delta[0].id, "old-2");
        assert_eq!(out.already_archived, 1);
    }

    #[tokio::test]
    async fn apply_replaces_recent_and_appends_archive() {
        let dir = tempdir().expect("tempdir");
        let store = DocumentStore::new(dir.path());
        let partitioner = FreshnessPartitioner::new(store.clone(), FreshnessStrategy::default());

        partitioner
            .apply(vec![hours_ago("r1", 1), hours_ago("s1", 30)], now())
            .await;
        partitioner
            .apply(vec![hours_ago("r2", 1), hours_ago("s1", 30), hours_ago("s2", 40)], now())
            .await;

        let recent = store.read_records(Dataset::Recent).await.expect("recent");
        let archive = store.read_records(Dataset::Archive).await.expect("archive");
        assert_eq!(recent.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["r2"]);
        assert_eq!(
            archive.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["s1", "s2"]
        );
    }
}
