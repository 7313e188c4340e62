//! Scrape pipeline and project bookkeeping for GULP project watch.
//!
//! Records flow source -> [`tracker`] (identity, cross-run dedup) -> [`freshness`]
//! (recent/archive split) -> flat JSON documents, and are read back through
//! [`query`]. [`ProjectManager`] is the facade the API and CLI talk to.

pub mod config;
pub mod freshness;
pub mod identity;
pub mod manager;
pub mod notify;
pub mod pipeline;
pub mod query;
pub mod scheduler;
pub mod tracker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use gulp_adapters::{FixtureSource, GulpSearchSource, PlaceholderSource, ProjectSource};
use gulp_storage::{DocumentStore, HttpClientConfig, HttpFetcher};
use tracing::info;

pub use config::{AppConfig, SourceKind};
pub use freshness::{Freshness, FreshnessPartitioner, FreshnessStrategy, Verdict};
pub use manager::{DatasetCounts, IngestOutcome, MarkSeenOutcome, ProjectManager};
pub use notify::{EmailConfigState, EmailSender, NoopEmailSender, SmtpEmailSender, SmtpSettings};
pub use pipeline::{
    PassSummary, PipelineBusy, PipelineConfig, PipelineError, RunState, ScrapePipeline, ScrapeRequest,
};
pub use query::{ProjectQuery, QueryPage};
pub use scheduler::{build_scheduler, SchedulerConfigState};
pub use tracker::{DeduplicationTracker, ProcessOutcome};

pub const CRATE_NAME: &str = "gulp-sync";

pub fn build_source(config: &AppConfig) -> Result<Arc<dyn ProjectSource>> {
    let source: Arc<dyn ProjectSource> = match &config.source {
        SourceKind::Live => {
            let http = HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(config.http_timeout_secs),
                user_agent: Some(config.user_agent.clone()),
                ..Default::default()
            })?;
            Arc::new(GulpSearchSource::new(http, config.search_url.clone()))
        }
        SourceKind::Fixture(path) => Arc::new(FixtureSource::new(path.clone())),
        SourceKind::Placeholder => Arc::new(PlaceholderSource),
    };
    info!(
        source = source.source_id(),
        synthetic = source.synthetic(),
        strategy = ?config.freshness_strategy(),
        "project source selected"
    );
    Ok(source)
}

pub fn build_manager(config: &AppConfig) -> Arc<ProjectManager> {
    Arc::new(ProjectManager::new(
        DocumentStore::new(config.data_dir.clone()),
        config.freshness_strategy(),
    ))
}

pub fn build_pipeline(config: &AppConfig) -> Result<Arc<ScrapePipeline>> {
    Ok(Arc::new(ScrapePipeline::new(
        build_manager(config),
        build_source(config)?,
        Arc::new(SmtpEmailSender::new(config.smtp.clone())),
        config.pipeline_config(),
    )))
}

pub async fn run_sync_once_from_env(request: ScrapeRequest) -> Result<PassSummary> {
    let config = AppConfig::from_env();
    let pipeline = build_pipeline(&config)?;
    Ok(pipeline.run_once(request).await?)
}
