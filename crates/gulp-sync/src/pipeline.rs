//! One scrape pass end to end, guarded so only one pass runs at a time.

use std::ops::RangeInclusive;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use gulp_adapters::{ProjectSource, ScrapeContext};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::manager::ProjectManager;
use crate::notify::EmailSender;

/// Body of a manual scrape trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    #[serde(default)]
    pub pages: Vec<u32>,
    #[serde(default)]
    pub send_email: Option<bool>,
}

impl ScrapeRequest {
    /// `min..=max` of the requested pages, or `default` when none were given.
    pub fn page_range(&self, default: &RangeInclusive<u32>) -> RangeInclusive<u32> {
        match (self.pages.iter().min(), self.pages.iter().max()) {
            (Some(&min), Some(&max)) => min..=max,
            _ => default.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub run_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages_attempted: usize,
    pub pages_failed: usize,
    pub scraped: usize,
    pub unique: usize,
    pub new: usize,
    pub recent: usize,
    pub archived: usize,
    /// No records came back; stored documents were left as they were.
    pub skipped_empty: bool,
    pub email_sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RunState {
    Idle,
    #[serde(rename_all = "camelCase")]
    Running {
        run_id: Uuid,
        started_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Completed { summary: PassSummary },
    #[serde(rename_all = "camelCase")]
    Failed {
        run_id: Uuid,
        error: String,
        finished_at: DateTime<Utc>,
    },
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("scrape pass {run_id} is already running")]
pub struct PipelineBusy {
    pub run_id: Uuid,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Busy(#[from] PipelineBusy),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub default_pages: RangeInclusive<u32>,
    pub email_recipient: Option<String>,
    /// Whether a pass without an explicit `send_email` notifies.
    pub notify_by_default: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_pages: 1..=3,
            email_recipient: None,
            notify_by_default: false,
        }
    }
}

pub struct ScrapePipeline {
    manager: Arc<ProjectManager>,
    source: Arc<dyn ProjectSource>,
    email: Arc<dyn EmailSender>,
    config: PipelineConfig,
    state: Mutex<RunState>,
}

impl ScrapePipeline {
    pub fn new(
        manager: Arc<ProjectManager>,
        source: Arc<dyn ProjectSource>,
        email: Arc<dyn EmailSender>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            manager,
            source,
            email,
            config,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn manager(&self) -> &Arc<ProjectManager> {
        &self.manager
    }

    pub fn email(&self) -> &Arc<dyn EmailSender> {
        &self.email
    }

    pub fn source_id(&self) -> &'static str {
        self.source.source_id()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn state(&self) -> RunState {
        self.state.lock().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_running()
    }

    /// Run a pass and wait for it.
    pub async fn run_once(self: &Arc<Self>, request: ScrapeRequest) -> Result<PassSummary, PipelineError> {
        let ctx = self.begin().await?;
        match self.spawn_pass(ctx, request).await {
            Ok(result) => Ok(result?),
            Err(err) => Err(anyhow!("scrape pass task failed: {err}").into()),
        }
    }

    /// Start a pass in the background and return its run ID.
    pub async fn trigger(self: &Arc<Self>, request: ScrapeRequest) -> Result<Uuid, PipelineBusy> {
        let ctx = self.begin().await?;
        let run_id = ctx.run_id;
        drop(self.spawn_pass(ctx, request));
        Ok(run_id)
    }

    /// Start a default pass when nothing has been scraped into the data directory yet.
    pub async fn trigger_if_empty(self: &Arc<Self>) -> Option<Uuid> {
        if self.manager.has_scraped_data().await {
            return None;
        }
        match self.trigger(ScrapeRequest::default()).await {
            Ok(run_id) => {
                info!(%run_id, "no stored projects, starting initial scrape");
                Some(run_id)
            }
            Err(busy) => {
                info!(running = %busy.run_id, "initial scrape already running");
                None
            }
        }
    }

    /// The pass itself runs on an inner task so a panic still reaches `finish`
    /// and the pipeline leaves `Running`.
    fn spawn_pass(
        self: &Arc<Self>,
        ctx: ScrapeContext,
        request: ScrapeRequest,
    ) -> JoinHandle<Result<PassSummary>> {
        let pipeline = Arc::clone(self);
        let span = info_span!("scrape_pass", run_id = %ctx.run_id, source = self.source_id());
        tokio::spawn(
            async move {
                let worker = Arc::clone(&pipeline);
                let worker_ctx = ctx.clone();
                let pass = tokio::spawn(
                    async move { worker.execute(&worker_ctx, &request).await }.in_current_span(),
                );
                let result = match pass.await {
                    Ok(result) => result,
                    Err(err) => Err(anyhow!("scrape pass aborted: {err}")),
                };
                pipeline.finish(&ctx, &result).await;
                result
            }
            .instrument(span),
        )
    }

    async fn begin(&self) -> Result<ScrapeContext, PipelineBusy> {
        let mut state = self.state.lock().await;
        if let RunState::Running { run_id, .. } = *state {
            return Err(PipelineBusy { run_id });
        }
        let ctx = ScrapeContext {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        *state = RunState::Running {
            run_id: ctx.run_id,
            started_at: ctx.started_at,
        };
        Ok(ctx)
    }

    async fn finish(&self, ctx: &ScrapeContext, result: &Result<PassSummary>) {
        let next = match result {
            Ok(summary) => RunState::Completed {
                summary: summary.clone(),
            },
            Err(err) => {
                error!(error = %format!("{err:#}"), "scrape pass failed");
                RunState::Failed {
                    run_id: ctx.run_id,
                    error: format!("{err:#}"),
                    finished_at: Utc::now(),
                }
            }
        };
        *self.state.lock().await = next;
    }

    async fn execute(&self, ctx: &ScrapeContext, request: &ScrapeRequest) -> Result<PassSummary> {
        let pages = request.page_range(&self.config.default_pages);
        info!(pages = ?pages, "scrape pass started");

        let batch = self.source.scrape(ctx, pages).await?;
        let mut summary = PassSummary {
            run_id: ctx.run_id,
            source: self.source_id().to_string(),
            started_at: ctx.started_at,
            finished_at: ctx.started_at,
            pages_attempted: batch.pages_attempted,
            pages_failed: batch.pages_failed,
            scraped: batch.records.len(),
            unique: 0,
            new: 0,
            recent: 0,
            archived: 0,
            skipped_empty: false,
            email_sent: false,
        };

        if batch.records.is_empty() {
            warn!("scrape returned no records, leaving stored projects untouched");
            summary.skipped_empty = true;
            summary.finished_at = Utc::now();
            return Ok(summary);
        }

        let now = Utc::now();
        let outcome = self.manager.ingest_at(JsonValue::Array(batch.records), now).await;
        if let Err(err) = self.manager.record_scrape_time(now).await {
            error!(error = %format!("{err:#}"), "persisting last scrape time failed");
        }
        summary.unique = outcome.unique;
        summary.new = outcome.new.len();
        summary.recent = outcome.recent;
        summary.archived = outcome.archived;

        let wants_email = request.send_email.unwrap_or(self.config.notify_by_default);
        match self.config.email_recipient.as_deref() {
            Some(recipient) if wants_email && !outcome.new.is_empty() && self.email.is_configured() => {
                summary.email_sent = self.email.send(recipient, &outcome.new, now).await;
            }
            _ if wants_email => {
                info!(new = outcome.new.len(), "notification requested but not sent");
            }
            _ => {}
        }

        summary.finished_at = Utc::now();
        info!(
            scraped = summary.scraped,
            unique = summary.unique,
            new = summary.new,
            recent = summary.recent,
            archived = summary.archived,
            email_sent = summary.email_sent,
            "scrape pass completed"
        );
        Ok(summary)
    }
}
