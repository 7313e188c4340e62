use std::ops::RangeInclusive;
use std::path::PathBuf;

use chrono::Duration;
use gulp_adapters::DEFAULT_SEARCH_URL;

use crate::freshness::{FreshnessStrategy, DEFAULT_RECENT_WINDOW_HOURS};
use crate::notify::SmtpSettings;
use crate::pipeline::PipelineConfig;
use crate::scheduler::SchedulerConfigState;

pub const DEFAULT_SCRAPE_CRON: &str = "0 0 3 * * *";
pub const DEFAULT_PAGES: RangeInclusive<u32> = 1..=3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Live,
    Fixture(PathBuf),
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub port: u16,
    pub scheduler_enabled: bool,
    pub scrape_crons: Vec<String>,
    pub default_pages: RangeInclusive<u32>,
    pub search_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub source: SourceKind,
    pub force_all_recent: bool,
    pub recent_window_hours: i64,
    pub email_recipient: Option<String>,
    pub email_notifications: bool,
    pub smtp: SmtpSettings,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |key: &str, default: bool| {
            var(key)
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True" | "yes"))
                .unwrap_or(default)
        };

        let cloud = var("CLOUD_ENV").is_some() || var("RENDER").is_some();
        let source = match var("FIXTURE_PATH") {
            Some(path) => SourceKind::Fixture(PathBuf::from(path)),
            None if flag("USE_REAL_SCRAPER", false) && !cloud => SourceKind::Live,
            None => SourceKind::Placeholder,
        };
        let force_all_recent = flag("FORCE_ALL_RECENT", source == SourceKind::Placeholder);

        Self {
            data_dir: var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            port: var("PORT").and_then(|v| v.parse().ok()).unwrap_or(8000),
            scheduler_enabled: flag("SCHEDULER_ENABLED", true),
            scrape_crons: var("SCRAPE_CRON")
                .map(|v| {
                    v.split(';')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_else(|| vec![DEFAULT_SCRAPE_CRON.to_string()]),
            default_pages: var("SCRAPE_PAGES")
                .and_then(|v| parse_page_range(&v))
                .unwrap_or(DEFAULT_PAGES),
            search_url: var("GULP_SEARCH_URL").unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string()),
            user_agent: var("SCRAPER_USER_AGENT")
                .unwrap_or_else(|| format!("gulp-project-watch/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: var("HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(45),
            source,
            force_all_recent,
            recent_window_hours: var("RECENT_WINDOW_HOURS")
                .and_then(|v| v.parse().ok())
                .filter(|h: &i64| *h > 0)
                .unwrap_or(DEFAULT_RECENT_WINDOW_HOURS),
            email_recipient: var("EMAIL_RECIPIENT"),
            email_notifications: flag("EMAIL_NOTIFICATIONS", false),
            smtp: SmtpSettings::from_lookup(&lookup),
        }
    }

    pub fn freshness_strategy(&self) -> FreshnessStrategy {
        if self.force_all_recent {
            FreshnessStrategy::AllRecent
        } else {
            FreshnessStrategy::ByTimestamp {
                window: Duration::hours(self.recent_window_hours),
            }
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            default_pages: self.default_pages.clone(),
            email_recipient: self.email_recipient.clone(),
            notify_by_default: self.email_notifications,
        }
    }

    pub fn scheduler_state(&self) -> SchedulerConfigState {
        SchedulerConfigState {
            enabled: self.scheduler_enabled,
            cron: self.scrape_crons.clone(),
            timezone: "UTC",
            sends_email: self.email_notifications,
        }
    }
}

/// `"a-b"` or a single page number. Reversed bounds are swapped; page 0 is rejected.
pub fn parse_page_range(raw: &str) -> Option<RangeInclusive<u32>> {
    let (start, end) = match raw.split_once('-') {
        Some((a, b)) => (a.trim().parse::<u32>().ok()?, b.trim().parse::<u32>().ok()?),
        None => {
            let page = raw.trim().parse::<u32>().ok()?;
            (page, page)
        }
    };
    if start == 0 || end == 0 {
        return None;
    }
    Some(start.min(end)..=start.max(end))
}
