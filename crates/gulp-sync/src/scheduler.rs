use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::pipeline::{PipelineError, ScrapePipeline, ScrapeRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfigState {
    pub enabled: bool,
    pub cron: Vec<String>,
    pub timezone: &'static str,
    pub sends_email: bool,
}

/// One cron job per expression, each running a default pass through the
/// pipeline's single-flight guard. The scheduler is returned unstarted.
pub async fn build_scheduler(pipeline: Arc<ScrapePipeline>, crons: &[String]) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in crons {
        let pipeline = Arc::clone(&pipeline);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                run_scheduled_pass(&pipeline).await;
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        info!(cron = %cron, "scheduled scrape job");
    }
    Ok(sched)
}

pub async fn run_scheduled_pass(pipeline: &Arc<ScrapePipeline>) {
    info!("scheduled scrape triggered");
    match pipeline.run_once(ScrapeRequest::default()).await {
        Ok(summary) => info!(run_id = %summary.run_id, new = summary.new, "scheduled scrape finished"),
        Err(PipelineError::Busy(busy)) => {
            info!(running = %busy.run_id, "scrape already running, skipping scheduled run")
        }
        Err(PipelineError::Failed(err)) => {
            error!(error = %format!("{err:#}"), "scheduled scrape failed")
        }
    }
}
