//! Filtered, ranked, paginated reads over the recent and archive partitions.

use std::collections::HashSet;

use gulp_core::Record;
use serde::Serialize;

const TITLE_WEIGHT: u32 = 3;
const COMPANY_WEIGHT: u32 = 2;
const DESCRIPTION_WEIGHT: u32 = 1;
const SKILL_WEIGHT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectQuery {
    /// 1-based; 0 is read as 1.
    pub page: usize,
    pub limit: usize,
    pub search: Option<String>,
    pub location: Option<String>,
    pub remote: Option<bool>,
    pub archived: bool,
    pub include_new_only: bool,
    pub show_all: bool,
}

impl Default for ProjectQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            search: None,
            location: None,
            remote: None,
            archived: false,
            include_new_only: false,
            show_all: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryPage {
    pub projects: Vec<Record>,
    /// Matches after filtering, before pagination.
    pub total: usize,
}

/// Lower-cased whitespace-separated search terms.
pub fn search_terms(search: &str) -> Vec<String> {
    search.split_whitespace().map(str::to_lowercase).collect()
}

pub fn relevance(record: &Record, terms: &[String]) -> u32 {
    let title = record.title().to_lowercase();
    let company = record.company().to_lowercase();
    let description = record.description().to_lowercase();
    let skills = record.skills().map(str::to_lowercase).collect::<Vec<_>>();

    terms
        .iter()
        .map(|term| {
            let mut score = 0;
            if title.contains(term.as_str()) {
                score += TITLE_WEIGHT;
            }
            if company.contains(term.as_str()) {
                score += COMPANY_WEIGHT;
            }
            if description.contains(term.as_str()) {
                score += DESCRIPTION_WEIGHT;
            }
            if skills.iter().any(|skill| skill.contains(term.as_str())) {
                score += SKILL_WEIGHT;
            }
            score
        })
        .sum()
}

/// Pick the record set a query reads from.
///
/// `show_all` merges recent and archive by ID with recent entries first; an
/// archived copy of a recent ID is dropped. `include_new_only` then keeps only
/// IDs in `new_ids` (ignored for archive queries).
pub fn select_source(
    recent: Vec<Record>,
    archive: Vec<Record>,
    new_ids: &HashSet<String>,
    query: &ProjectQuery,
) -> Vec<Record> {
    if query.archived {
        return archive;
    }
    let mut source = if query.show_all {
        let recent_ids = recent.iter().map(|r| r.id.clone()).collect::<HashSet<_>>();
        let mut seen_archive = HashSet::new();
        let mut merged = recent;
        merged.extend(
            archive
                .into_iter()
                .filter(|r| !recent_ids.contains(&r.id) && seen_archive.insert(r.id.clone())),
        );
        merged
    } else {
        recent
    };
    if query.include_new_only {
        source.retain(|r| new_ids.contains(&r.id));
    }
    source
}

/// Search, filter and paginate a source set.
pub fn run_query(source: Vec<Record>, query: &ProjectQuery) -> QueryPage {
    let terms = query.search.as_deref().map(search_terms).unwrap_or_default();

    let mut matched = if terms.is_empty() {
        source
    } else {
        let mut scored = source
            .into_iter()
            .map(|record| (relevance(&record, &terms), record))
            .filter(|(score, _)| *score > 0)
            .collect::<Vec<_>>();
        // Stable sort keeps source order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, record)| record).collect()
    };

    if let Some(location) = query.location.as_deref().map(str::to_lowercase) {
        matched.retain(|r| r.location().to_lowercase().contains(&location));
    }
    if let Some(remote) = query.remote {
        matched.retain(|r| r.remote == Some(remote));
    }

    let total = matched.len();
    let page = query.page.max(1);
    let start = (page - 1).saturating_mul(query.limit).min(total);
    let end = start.saturating_add(query.limit).min(total);
    let projects = matched.drain(start..end).collect();

    QueryPage { projects, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: serde_json::Value) -> Record {
        Record::from_json(value).expect("record")
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn scoring_weights() {
        let record = rec(json!({
            "id": "a",
            "title": "Rust Developer",
            "companyName": "Rusty AG",
            "description": "rust everywhere",
            "skills": ["Rust", "Tokio"]
        }));
        assert_eq!(relevance(&record, &search_terms("RUST")), 3 + 2 + 1 + 3);
        assert_eq!(relevance(&record, &search_terms("tokio kafka")), 3);
        let single = rec(json!({"id": "b", "skills": "Python, Django"}));
        assert_eq!(relevance(&single, &search_terms("django")), 3);
    }

    #[test]
    fn title_match_outranks_location_only_match() {
        let source = vec![
            rec(json!({"id": "loc", "title": "Java Dev", "location": "Berlin", "description": "Team in Berlin"})),
            rec(json!({"id": "title", "title": "Berlin Cloud Architect", "location": "Remote"})),
            rec(json!({"id": "none", "title": "SAP", "location": "Berlin"})),
        ];
        let query = ProjectQuery {
            search: Some("berlin".into()),
            ..ProjectQuery::default()
        };
        let page = run_query(source, &query);
        assert_eq!(ids(&page.projects), vec!["title", "loc"]);
        assert_eq!(page.total, 2);
    }

    #[test]
    fn equal_scores_keep_source_order() {
        let source = (0..4)
            .map(|i| rec(json!({"id": format!("p{i}"), "title": "Go"})))
            .collect();
        let query = ProjectQuery {
            search: Some("go".into()),
            ..ProjectQuery::default()
        };
        assert_eq!(ids(&run_query(source, &query).projects), vec!["p0", "p1", "p2", "p3"]);
    }

    #[test]
    fn location_and_remote_filters() {
        let source = vec![
            rec(json!({"id": "a", "location": "München", "isRemoteWorkPossible": true})),
            rec(json!({"id": "b", "location": "Berlin-Mitte", "isRemoteWorkPossible": false})),
            rec(json!({"id": "c", "location": "berlin", "isRemoteWorkPossible": true})),
            rec(json!({"id": "d", "location": "Berlin"})),
        ];
        let query = ProjectQuery {
            location: Some("BERLIN".into()),
            remote: Some(true),
            ..ProjectQuery::default()
        };
        let page = run_query(source, &query);
        assert_eq!(ids(&page.projects), vec!["c"]);
        assert_eq!(page.total, 1);
    }

    #[test]
    fn pagination_reports_total_before_slicing() {
        let source = (1..=25)
            .map(|i| rec(json!({"id": format!("p{i}")})))
            .collect::<Vec<_>>();
        let query = ProjectQuery {
            page: 2,
            limit: 10,
            ..ProjectQuery::default()
        };
        let page = run_query(source.clone(), &query);
        assert_eq!(page.total, 25);
        assert_eq!(page.projects.first().map(|r| r.id.as_str()), Some("p11"));
        assert_eq!(page.projects.last().map(|r| r.id.as_str()), Some("p20"));

        let beyond = run_query(
            source,
            &ProjectQuery {
                page: 9,
                ..ProjectQuery::default()
            },
        );
        assert!(beyond.projects.is_empty());
        assert_eq!(beyond.total, 25);
    }

    #[test]
    fn show_all_prefers_recent_copies() {
        let recent = vec![rec(json!({"id": "x", "title": "recent copy"}))];
        let archive = vec![
            rec(json!({"id": "x", "title": "archived copy"})),
            rec(json!({"id": "y"})),
        ];
        let query = ProjectQuery {
            show_all: true,
            ..ProjectQuery::default()
        };
        let merged = select_source(recent, archive, &HashSet::new(), &query);
        assert_eq!(ids(&merged), vec!["x", "y"]);
        assert_eq!(merged[0].title(), "recent copy");
    }

    #[test]
    fn new_only_restriction_applies_to_recent_views() {
        let recent = vec![rec(json!({"id": "a"})), rec(json!({"id": "b"}))];
        let archive = vec![rec(json!({"id": "c"}))];
        let new_ids = HashSet::from(["b".to_string(), "c".to_string()]);

        let recent_only = select_source(
            recent.clone(),
            archive.clone(),
            &new_ids,
            &ProjectQuery {
                include_new_only: true,
                ..ProjectQuery::default()
            },
        );
        assert_eq!(ids(&recent_only), vec!["b"]);

        let archived = select_source(
            recent,
            archive,
            &new_ids,
            &ProjectQuery {
                archived: true,
                include_new_only: true,
                ..ProjectQuery::default()
            },
        );
        assert_eq!(ids(&archived), vec!["c"]);
    }
}
